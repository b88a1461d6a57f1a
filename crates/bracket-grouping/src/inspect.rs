//! Per-image metadata access for FocusGroup
//!
//! The focus-step count is a maker-note field that standard EXIF readers do not
//! expose, so it is read by running exiftool once per image. Readings are only
//! meaningful as local deltas between neighbouring frames.

use std::path::Path;
use std::process::Command;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::catalog::ImageRecord;

/// Textual layout of EXIF capture timestamps
const TIMESTAMP_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unparseable {tag} value: {raw:?}")]
    Parse { tag: String, raw: String },
}

/// Source of focus-position readings.
///
/// Implementations never fail: an unreadable value is reported as 0.
pub trait FocusReader {
    fn focus_position(&mut self, image: &ImageRecord) -> i64;
}

impl<F> FocusReader for F
where
    F: FnMut(&ImageRecord) -> i64,
{
    fn focus_position(&mut self, image: &ImageRecord) -> i64 {
        self(image)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    /// Inspection tool to launch
    pub program: String,
    /// Numeric metadata tag holding the focus position
    pub tag: String,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            program: "exiftool".to_string(),
            tag: "FocusStepCount".to_string(),
        }
    }
}

/// Reads the focus position by spawning exiftool for a single tag.
#[derive(Debug, Clone, Default)]
pub struct ExiftoolFocusReader {
    config: InspectorConfig,
}

impl ExiftoolFocusReader {
    pub fn new(config: InspectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    /// Run the inspection tool on one file and parse its output.
    ///
    /// Blocks until the child process exits.
    pub fn read(&self, path: &Path) -> Result<i64, InspectError> {
        let output = Command::new(&self.config.program)
            .arg("-s3")
            .arg("-n")
            .arg(format!("-{}", self.config.tag))
            .arg(path)
            .output()
            .map_err(|source| InspectError::Launch {
                program: self.config.program.clone(),
                source,
            })?;

        let raw = String::from_utf8_lossy(&output.stdout);
        parse_focus_output(&raw).ok_or_else(|| InspectError::Parse {
            tag: self.config.tag.clone(),
            raw: raw.trim().to_string(),
        })
    }
}

impl FocusReader for ExiftoolFocusReader {
    fn focus_position(&mut self, image: &ImageRecord) -> i64 {
        let path = image.full_path();
        match self.read(&path) {
            Ok(position) => position,
            Err(e @ InspectError::Launch { .. }) => {
                log::error!("{} ({})", e, path.display());
                0
            }
            // Missing or garbled values count as position 0
            Err(InspectError::Parse { .. }) => 0,
        }
    }
}

/// Parse the textual integer printed by the inspection tool
fn parse_focus_output(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

/// Convert a `YYYY:MM:DD HH:MM:SS` timestamp to seconds since the Unix epoch.
///
/// Anything that does not match the layout yields 0. Trailing text such as
/// sub-seconds or a zone offset is ignored.
pub fn to_absolute_time(timestamp: &str) -> i64 {
    NaiveDateTime::parse_and_remainder(timestamp.trim(), TIMESTAMP_FORMAT)
        .map(|(dt, _)| dt.and_utc().timestamp())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_to_absolute_time() {
        assert_eq!(to_absolute_time("1970:01:01 00:00:00"), 0);
        assert_eq!(to_absolute_time("1970:01:01 00:01:05"), 65);
        assert_eq!(to_absolute_time("2024:01:15 14:30:25"), 1_705_329_025);
        assert_eq!(
            to_absolute_time("2024:01:15 14:30:35") - to_absolute_time("2024:01:15 14:30:25"),
            10
        );
    }

    #[test]
    fn test_to_absolute_time_malformed_is_epoch() {
        assert_eq!(to_absolute_time(""), 0);
        assert_eq!(to_absolute_time("yesterday"), 0);
        assert_eq!(to_absolute_time("2024-01-15 14:30:25"), 0);
        assert_eq!(to_absolute_time("2024:13:40 14:30:25"), 0);
    }

    #[test]
    fn test_to_absolute_time_ignores_trailing_text() {
        assert_eq!(
            to_absolute_time("2024:01:15 14:30:25.50+02:00"),
            to_absolute_time("2024:01:15 14:30:25")
        );
    }

    #[test]
    fn test_parse_focus_output() {
        assert_eq!(parse_focus_output("123\n"), Some(123));
        assert_eq!(parse_focus_output("  -42 "), Some(-42));
        assert_eq!(parse_focus_output(""), None);
        assert_eq!(parse_focus_output("n/a"), None);
    }

    #[test]
    fn test_launch_failure_defaults_to_zero() {
        let mut reader = ExiftoolFocusReader::new(InspectorConfig {
            program: "focusgroup-no-such-inspector".to_string(),
            ..InspectorConfig::default()
        });
        let path = PathBuf::from("/photos/DSC_0001.NEF");

        assert!(matches!(reader.read(&path), Err(InspectError::Launch { .. })));
        let image = ImageRecord::new(&path, "2024:01:15 14:30:25");
        assert_eq!(reader.focus_position(&image), 0);
    }

    #[test]
    fn test_closure_reader() {
        let mut calls = 0;
        let mut reader = |_: &ImageRecord| {
            calls += 1;
            250_i64
        };
        let image = ImageRecord::new(Path::new("/photos/a.jpg"), "");
        assert_eq!(reader.focus_position(&image), 250);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_default_inspector_config() {
        let config = InspectorConfig::default();
        assert_eq!(config.program, "exiftool");
        assert_eq!(config.tag, "FocusStepCount");
    }
}
