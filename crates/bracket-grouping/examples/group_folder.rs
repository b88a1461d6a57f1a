use std::path::PathBuf;
use bracket_grouping::{BracketGrouper, ExiftoolFocusReader, ExiftoolRunner, ImageRecord, MemoryCatalog};

fn main() {
    let folder = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut paths: Vec<PathBuf> = std::fs::read_dir(&folder)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e.eq_ignore_ascii_case("nef") || e.eq_ignore_ascii_case("jpg")).unwrap_or(false))
        .collect();
    paths.sort();

    println!("Found {} images", paths.len());

    let mut runner = ExiftoolRunner::new().unwrap();
    let mut catalog = MemoryCatalog::new();
    for info in runner.capture_times(&paths).unwrap() {
        catalog.insert(ImageRecord::new(&info.file_path, info.capture_timestamp.unwrap_or_default()));
    }

    let mut reader = ExiftoolFocusReader::default();
    let report = BracketGrouper::with_default_config().group(catalog.records(), &mut reader, &mut catalog);
    println!("\n{}", report.summary());
    for bracket in &report.brackets {
        println!("  {}: {} frames, focus {:?}", bracket.leader, bracket.frame_count(), bracket.focus_positions);
    }
    println!("\nSingles: {}", report.singles.len());
}
