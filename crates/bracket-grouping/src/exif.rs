//! Batch capture-time extraction using exiftool for FocusGroup
//!
//! Import reads `DateTimeOriginal` for a whole folder through one exiftool
//! process running in stay-open mode. Focus positions are not read here; see
//! [`crate::inspect`] for the per-image reader used during grouping.

use std::path::PathBuf;
use std::process::{Command, Stdio, Child};
use std::io::{BufRead, BufReader, Write, BufWriter};
use serde::{Deserialize, Serialize};
use anyhow::{Result, Context, bail};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureInfo {
    pub file_path: PathBuf,
    /// Raw `YYYY:MM:DD HH:MM:SS` text, when the file carries one
    pub capture_timestamp: Option<String>,
}

#[derive(Deserialize)]
struct ExiftoolOutput {
    #[serde(rename = "SourceFile")]
    source_file: String,
    #[serde(rename = "DateTimeOriginal")]
    date_time_original: Option<serde_json::Value>,
}

pub struct ExiftoolRunner {
    child: Child,
    stdin: BufWriter<std::process::ChildStdin>,
    stdout: BufReader<std::process::ChildStdout>,
}

impl ExiftoolRunner {
    /// Start a persistent exiftool process
    pub fn new() -> Result<Self> {
        Self::with_program("exiftool")
    }

    /// Start a persistent process using a specific exiftool binary
    pub fn with_program(program: &str) -> Result<Self> {
        let mut child = Command::new(program)
            .args(["-stay_open", "True", "-@", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn {}. Make sure exiftool is installed and in PATH.", program))?;

        let stdin = BufWriter::new(
            child.stdin.take()
                .context("Failed to get stdin handle for exiftool process")?
        );

        let stdout = BufReader::new(
            child.stdout.take()
                .context("Failed to get stdout handle for exiftool process")?
        );

        Ok(Self {
            child,
            stdin,
            stdout,
        })
    }

    /// Read capture timestamps for multiple image files
    pub fn capture_times(&mut self, paths: &[PathBuf]) -> Result<Vec<CaptureInfo>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        writeln!(self.stdin, "-json")?;
        writeln!(self.stdin, "-fast2")?;
        writeln!(self.stdin, "-DateTimeOriginal")?;

        for path in paths {
            writeln!(self.stdin, "{}", path.display())?;
        }

        writeln!(self.stdin, "-execute")?;
        self.stdin.flush()?;

        // Read JSON output until {ready} sentinel
        let mut json_output = String::new();
        loop {
            let mut line = String::new();
            let bytes_read = self.stdout.read_line(&mut line)?;
            if bytes_read == 0 {
                bail!("Unexpected EOF from exiftool process");
            }

            let trimmed = line.trim();
            if trimmed.starts_with("{ready") && trimmed.ends_with('}') {
                break;
            }
            json_output.push_str(&line);
        }

        parse_capture_output(&json_output)
    }
}

impl Drop for ExiftoolRunner {
    fn drop(&mut self) {
        let _ = writeln!(self.stdin, "-stay_open");
        let _ = writeln!(self.stdin, "False");
        let _ = self.stdin.flush();
        let _ = self.child.wait();
    }
}

/// Parse exiftool `-json` output into capture records
fn parse_capture_output(json_output: &str) -> Result<Vec<CaptureInfo>> {
    // exiftool prints nothing at all when none of the files could be read
    if json_output.trim().is_empty() {
        return Ok(Vec::new());
    }

    let exiftool_data: Vec<ExiftoolOutput> = serde_json::from_str(json_output)
        .with_context(|| {
            let preview = match json_output.char_indices().nth(500) {
                Some((cut, _)) => format!("{}...(truncated, {} bytes total)", &json_output[..cut], json_output.len()),
                None => json_output.to_string(),
            };
            format!("Failed to parse exiftool JSON output. First bytes: {}", preview)
        })?;

    Ok(exiftool_data
        .into_iter()
        .map(|data| CaptureInfo {
            file_path: PathBuf::from(data.source_file),
            capture_timestamp: match data.date_time_original {
                Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
                _ => None,
            },
        })
        .collect())
}
