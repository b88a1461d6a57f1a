mod config;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use clap::{Parser, Subcommand, ValueEnum};
use anyhow::{Result, Context};
use bracket_grouping::{BracketGrouper, BracketOrder, ExiftoolFocusReader, ExiftoolRunner, GroupingReport};
use session_db::{SessionDb, StoredImage};
use crate::config::Settings;

/// Supported image file extensions
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "cr3", "cr2", "nef", "arw", "raf", "dng", "rw2", "orf",
];

#[derive(Parser)]
#[command(name = "focusgroup", version)]
#[command(about = "Group focus-bracketed photo sequences for stacking")]
struct Cli {
    /// TOML settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use this session database instead of the per-folder cache
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log every grouping decision
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    Filename,
    CaptureTime,
}

impl From<OrderArg> for BracketOrder {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::Filename => BracketOrder::Filename,
            OrderArg::CaptureTime => BracketOrder::CaptureTime,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Import a folder of images into its session
    Import {
        /// Path to folder containing images
        #[arg(short, long)]
        path: PathBuf,
    },

    /// Group by FocusStepCount
    Group {
        /// Path to an imported folder
        #[arg(short, long)]
        path: PathBuf,

        /// Restrict the selection to these file names
        #[arg(long, num_args = 1..)]
        only: Vec<String>,

        /// Maximum capture-time gap between neighbouring frames (seconds)
        #[arg(long)]
        time_gap: Option<i64>,

        /// Maximum focus-step change between neighbouring frames
        #[arg(long)]
        focus_threshold: Option<i64>,

        /// Candidate ordering
        #[arg(long, value_enum)]
        order: Option<OrderArg>,

        /// Write the grouping report to a JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List persisted groups
    List {
        #[arg(short, long)]
        path: PathBuf,
    },

    /// Remove every group in a session
    Reset {
        #[arg(short, long)]
        path: PathBuf,
    },

    /// Print the effective settings as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();

    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Import { path } => import_folder(&path, cli.db.as_deref(), &settings),
        Commands::Group { path, only, time_gap, focus_threshold, order, output } => {
            let mut settings = settings;
            if let Some(time_gap) = time_gap {
                settings.grouping.time_gap_seconds = time_gap;
            }
            if let Some(focus_threshold) = focus_threshold {
                settings.grouping.focus_step_threshold = focus_threshold;
            }
            if let Some(order) = order {
                settings.grouping.order = order.into();
            }
            group_folder(&path, cli.db.as_deref(), &settings, &only, output.as_deref())
        }
        Commands::List { path } => list_groups(&path, cli.db.as_deref()),
        Commands::Reset { path } => reset_groups(&path, cli.db.as_deref()),
        Commands::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

fn open_session(folder: &Path, db_path: Option<&Path>) -> Result<SessionDb> {
    match db_path {
        Some(db_path) => SessionDb::open_at(db_path),
        None => {
            let folder = folder
                .canonicalize()
                .with_context(|| format!("Folder not found: {}", folder.display()))?;
            SessionDb::open(&folder.to_string_lossy())
        }
    }
}

fn scan_images(folder: &Path) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(anyhow::anyhow!("Path is not a directory: {}", folder.display()));
    }

    let mut image_paths = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        let supported = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false);
        if supported {
            image_paths.push(path);
        }
    }
    image_paths.sort();
    Ok(image_paths)
}

fn import_folder(folder: &Path, db_path: Option<&Path>, settings: &Settings) -> Result<()> {
    let folder = folder
        .canonicalize()
        .with_context(|| format!("Folder not found: {}", folder.display()))?;
    println!("🔍 Scanning images in: {}", folder.display());

    let image_paths = scan_images(&folder)?;
    if image_paths.is_empty() {
        println!("⚠️  No supported image files found in {}", folder.display());
        return Ok(());
    }
    println!("📸 Found {} image files", image_paths.len());

    println!("📊 Reading capture times...");
    let mut runner = ExiftoolRunner::with_program(&settings.inspector.program)?;
    let captures: HashMap<PathBuf, Option<String>> = runner
        .capture_times(&image_paths)?
        .into_iter()
        .map(|info| (info.file_path, info.capture_timestamp))
        .collect();

    let mut missing = 0;
    let images: Vec<StoredImage> = image_paths
        .iter()
        .map(|path| {
            let capture = captures.get(path).and_then(|c| c.as_deref());
            if capture.is_none() {
                log::debug!("No capture time for {}", path.display());
                missing += 1;
            }
            StoredImage::new(path, capture)
        })
        .collect();

    let db = open_session(&folder, db_path)?;
    db.upsert_images(&images)?;
    db.set_meta("root_folder", &folder.to_string_lossy())?;

    if missing > 0 {
        println!("⚠️  {} file(s) have no capture time", missing);
    }
    println!("💾 Imported {} images into {}", images.len(), db.path().display());
    Ok(())
}

fn group_folder(
    folder: &Path,
    db_path: Option<&Path>,
    settings: &Settings,
    only: &[String],
    output_path: Option<&Path>,
) -> Result<()> {
    let mut db = open_session(folder, db_path)?;

    let mut candidates = db.load_records()?;
    if !only.is_empty() {
        candidates.retain(|image| only.contains(&image.filename));
    }
    println!("🎯 Grouping {} selected image(s) by focus step count...", candidates.len());

    let grouper = BracketGrouper::new(settings.grouping.clone());
    let mut reader = ExiftoolFocusReader::new(settings.inspector.clone());
    let report = grouper.group(candidates, &mut reader, &mut db);

    print_report(&report);
    db.set_meta("last_grouping", &report.summary())?;

    if let Some(output_path) = output_path {
        let json = serde_json::to_string_pretty(&report)
            .context("Failed to serialize grouping report to JSON")?;

        std::fs::write(output_path, json)
            .with_context(|| format!("Failed to write output to {}", output_path.display()))?;

        println!("💾 Report saved to: {}", output_path.display());
    }

    Ok(())
}

fn file_name(id: &str) -> String {
    Path::new(id)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| id.to_string())
}

fn print_report(report: &GroupingReport) {
    println!("\n📈 {}", report.summary());

    for (i, bracket) in report.brackets.iter().enumerate() {
        println!(
            "\nBracket {} ({} frames, focus span {})",
            i + 1,
            bracket.frame_count(),
            bracket.focus_span()
        );
        let frames = std::iter::once(&bracket.leader).chain(bracket.members.iter());
        for (id, position) in frames.zip(bracket.focus_positions.iter()) {
            println!("  {:>6}  {}", position, file_name(id.as_str()));
        }
    }
}

fn list_groups(folder: &Path, db_path: Option<&Path>) -> Result<()> {
    let db = open_session(folder, db_path)?;
    let groups = db.groups()?;

    if groups.is_empty() {
        println!("No groups in this session");
        return Ok(());
    }

    for (leader, members) in &groups {
        println!("{} ({} frames)", file_name(leader), members.len() + 1);
        for member in members {
            println!("  {}", file_name(member));
        }
    }
    if let Some(last) = db.get_meta("last_grouping")? {
        println!("\nLast run: {}", last);
    }
    Ok(())
}

fn reset_groups(folder: &Path, db_path: Option<&Path>) -> Result<()> {
    let db = open_session(folder, db_path)?;
    let changed = db.clear_groups()?;
    println!("Ungrouped {} image(s)", changed);
    Ok(())
}
