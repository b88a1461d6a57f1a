//! Image records and group membership for FocusGroup
//!
//! Group membership is a forwarding reference: every record points at the
//! leader of its group, and an ungrouped record points at itself. Grouping
//! never moves records around, it only rewrites leader links.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use anyhow::{Result, bail};

/// Stable identity of an image. The absolute file path is used as the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Path> for ImageId {
    fn from(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Unique identity used for equality and for store operations
    pub id: ImageId,
    /// Folder containing the file
    pub directory: PathBuf,
    /// File name, the default ordering key
    pub filename: String,
    /// Capture time as `YYYY:MM:DD HH:MM:SS`; empty when unknown
    pub capture_timestamp: String,
    /// Leader of the group this record belongs to (itself when ungrouped)
    pub leader: ImageId,
}

impl ImageRecord {
    /// Create an ungrouped record for a file path
    pub fn new(path: &Path, capture_timestamp: impl Into<String>) -> Self {
        let id = ImageId::from(path);
        Self {
            leader: id.clone(),
            id,
            directory: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            capture_timestamp: capture_timestamp.into(),
        }
    }

    /// Full file-system path of the image
    pub fn full_path(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }

    /// True when the record already follows another leader
    pub fn is_grouped(&self) -> bool {
        self.leader != self.id
    }
}

/// Host-side store that persists grouping decisions.
pub trait GroupStore {
    /// Make `member` follow `leader`.
    fn group_with(&mut self, member: &ImageId, leader: &ImageId) -> Result<()>;

    /// True when some other image already follows `leader`.
    fn has_members(&self, leader: &ImageId) -> Result<bool>;
}

impl<S: GroupStore + ?Sized> GroupStore for &mut S {
    fn group_with(&mut self, member: &ImageId, leader: &ImageId) -> Result<()> {
        (**self).group_with(member, leader)
    }

    fn has_members(&self, leader: &ImageId) -> Result<bool> {
        (**self).has_members(leader)
    }
}

/// In-memory catalog of image records, kept in insertion order.
#[derive(Debug, Default, Clone)]
pub struct MemoryCatalog {
    records: Vec<ImageRecord>,
    index: HashMap<ImageId, usize>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, replacing any record with the same identity
    pub fn insert(&mut self, record: ImageRecord) {
        match self.index.get(&record.id) {
            Some(&idx) => self.records[idx] = record,
            None => {
                self.index.insert(record.id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn get(&self, id: &ImageId) -> Option<&ImageRecord> {
        self.index.get(id).map(|&idx| &self.records[idx])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of every record, suitable as a grouping selection
    pub fn records(&self) -> Vec<ImageRecord> {
        self.records.clone()
    }

    /// Resolve the final leader of a record by following leader links.
    pub fn leader_of(&self, id: &ImageId) -> Option<ImageId> {
        let mut current = self.get(id)?;
        // A chain can never be longer than the catalog itself.
        for _ in 0..self.records.len() {
            if current.leader == current.id {
                return Some(current.id.clone());
            }
            current = self.get(&current.leader)?;
        }
        Some(current.id.clone())
    }

    /// Members (leader excluded) currently following `leader`
    pub fn members_of(&self, leader: &ImageId) -> Vec<&ImageRecord> {
        self.records
            .iter()
            .filter(|r| r.id != *leader && self.leader_of(&r.id).as_ref() == Some(leader))
            .collect()
    }
}

impl GroupStore for MemoryCatalog {
    fn group_with(&mut self, member: &ImageId, leader: &ImageId) -> Result<()> {
        let Some(root) = self.leader_of(leader) else {
            bail!("Unknown leader image: {}", leader);
        };
        if root == *member {
            bail!("Cannot group {} with itself", member);
        }
        let Some(&idx) = self.index.get(member) else {
            bail!("Unknown member image: {}", member);
        };
        self.records[idx].leader = root;
        Ok(())
    }

    fn has_members(&self, leader: &ImageId) -> Result<bool> {
        Ok(self.records.iter().any(|r| r.id != *leader && r.leader == *leader))
    }
}
