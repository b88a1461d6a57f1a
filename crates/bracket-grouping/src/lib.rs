//! Focus bracket grouping library for FocusGroup
//!
//! This crate partitions photos shot in quick succession at varying focus
//! positions into brackets ready for focus stacking, and provides the exiftool
//! plumbing needed to read capture times and focus-step counts.

pub mod bracket;
pub mod catalog;
pub mod exif;
pub mod inspect;

pub use bracket::{Bracket, BracketConfig, BracketGrouper, BracketOrder, GroupingOutcome, GroupingReport};
pub use catalog::{GroupStore, ImageId, ImageRecord, MemoryCatalog};
pub use exif::{CaptureInfo, ExiftoolRunner};
pub use inspect::{to_absolute_time, ExiftoolFocusReader, FocusReader, InspectError, InspectorConfig};
