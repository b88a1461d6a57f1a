//! Configuration file handling for the focusgroup CLI
//!
//! Settings live in an optional TOML file. Missing sections and keys fall back
//! to defaults, and command-line flags override whatever the file says.

use std::fs;
use std::path::Path;
use anyhow::{Context, Result};
use bracket_grouping::{BracketConfig, InspectorConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub grouping: BracketConfig,
    pub inspector: InspectorConfig,
}

impl Settings {
    /// Load settings from a TOML file, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bracket_grouping::BracketOrder;

    #[test]
    fn test_empty_file_uses_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.grouping.time_gap_seconds, 10);
        assert_eq!(settings.grouping.focus_step_threshold, 150);
        assert_eq!(settings.inspector.program, "exiftool");
    }

    #[test]
    fn test_partial_file_overrides_keys() {
        let settings = Settings::from_toml(
            r#"
            [grouping]
            focus_step_threshold = 80
            order = "capture-time"

            [inspector]
            program = "/opt/exiftool/exiftool"
            "#,
        )
        .unwrap();

        assert_eq!(settings.grouping.focus_step_threshold, 80);
        assert_eq!(settings.grouping.time_gap_seconds, 10);
        assert_eq!(settings.grouping.order, BracketOrder::CaptureTime);
        assert_eq!(settings.inspector.program, "/opt/exiftool/exiftool");
        assert_eq!(settings.inspector.tag, "FocusStepCount");
    }

    #[test]
    fn test_default_round_trips_through_toml() {
        let text = Settings::default().to_toml().unwrap();
        assert!(text.contains("time_gap_seconds = 10"));
        assert_eq!(Settings::from_toml(&text).unwrap(), Settings::default());
    }

    #[test]
    fn test_load_reports_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("focusgroup.toml");
        fs::write(&path, "[grouping]\ntime_gap_seconds = \"soon\"\n").unwrap();

        let err = Settings::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Invalid config file"));
        assert!(Settings::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
