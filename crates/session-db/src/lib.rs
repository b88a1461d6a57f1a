//! SQLite persistence layer for FocusGroup sessions.
//!
//! Each imported folder gets a session database at:
//!   ~/.focusgroup/cache/{session-hash}/meta.db
//!
//! Stores: image records (capture time) with their group leader link, plus
//! free-form session metadata. Grouping decisions are written through
//! [`GroupStore`] as the grouper closes each run.
//!
//! Uses WAL mode for concurrent read/write without blocking readers.

use anyhow::{bail, Context, Result};
use bracket_grouping::{GroupStore, ImageId, ImageRecord};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A persisted image record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredImage {
    pub file_path: String,
    pub directory: String,
    pub filename: String,
    /// `YYYY:MM:DD HH:MM:SS`, empty when the file had none
    pub capture_time: String,
    /// Leader of the image's group; equal to `file_path` when ungrouped
    pub group_leader: String,
}

impl StoredImage {
    /// A fresh, ungrouped record for a file
    pub fn new(path: &Path, capture_time: Option<&str>) -> Self {
        let file_path = path.to_string_lossy().into_owned();
        Self {
            directory: path
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            capture_time: capture_time.unwrap_or_default().to_string(),
            group_leader: file_path.clone(),
            file_path,
        }
    }

    pub fn is_grouped(&self) -> bool {
        self.group_leader != self.file_path
    }
}

impl From<StoredImage> for ImageRecord {
    fn from(img: StoredImage) -> Self {
        ImageRecord {
            id: ImageId::new(img.file_path),
            directory: PathBuf::from(img.directory),
            filename: img.filename,
            capture_timestamp: img.capture_time,
            leader: ImageId::new(img.group_leader),
        }
    }
}

/// Session database handle.
pub struct SessionDb {
    conn: Connection,
    db_path: PathBuf,
}

impl SessionDb {
    /// Open or create a session database for the given folder path.
    /// Creates the cache directory and database file if needed.
    pub fn open(folder_path: &str) -> Result<Self> {
        let db_path = Self::session_path(folder_path);
        let cache_dir = db_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache dir: {}", cache_dir.display()))?;

        Self::open_at(&db_path)
    }

    /// Open a database at a specific path.
    pub fn open_at(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        // WAL mode for concurrent read/write
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn,
            db_path: db_path.to_path_buf(),
        };
        db.create_tables()?;
        log::debug!("Opened session database {}", db.db_path.display());
        Ok(db)
    }

    /// Check if a session database already exists for this folder.
    pub fn exists(folder_path: &str) -> bool {
        Self::session_path(folder_path).exists()
    }

    /// Get the database file path.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn session_path(folder_path: &str) -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".focusgroup")
            .join("cache")
            .join(Self::hash_path(folder_path))
            .join("meta.db")
    }

    // -- Schema --

    fn create_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS images (
                file_path TEXT PRIMARY KEY,
                directory TEXT NOT NULL DEFAULT '',
                filename TEXT NOT NULL,
                capture_time TEXT NOT NULL DEFAULT '',
                group_leader TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS session_meta (
                key TEXT PRIMARY KEY,
                value TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_images_leader ON images(group_leader);
            CREATE INDEX IF NOT EXISTS idx_images_filename ON images(filename);
            ",
        )?;
        Ok(())
    }

    // -- Session metadata --

    /// Store a session metadata key-value pair.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO session_meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Get a session metadata value.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .conn
            .query_row(
                "SELECT value FROM session_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }

    // -- Image operations --

    /// Insert an image, or refresh its file details on re-import.
    /// An existing group leader link is kept.
    pub fn upsert_image(&self, img: &StoredImage) -> Result<()> {
        self.conn.execute(
            "INSERT INTO images (file_path, directory, filename, capture_time, group_leader)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(file_path) DO UPDATE SET
                directory = excluded.directory,
                filename = excluded.filename,
                capture_time = excluded.capture_time",
            params![
                img.file_path,
                img.directory,
                img.filename,
                img.capture_time,
                img.group_leader,
            ],
        )?;
        Ok(())
    }

    /// Batch insert images (wrapped in a transaction for speed).
    pub fn upsert_images(&self, images: &[StoredImage]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for img in images {
            self.upsert_image(img)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Load all images, ordered by filename.
    pub fn load_images(&self) -> Result<Vec<StoredImage>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_path, directory, filename, capture_time, group_leader
             FROM images ORDER BY filename",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(StoredImage {
                file_path: row.get(0)?,
                directory: row.get(1)?,
                filename: row.get(2)?,
                capture_time: row.get(3)?,
                group_leader: row.get(4)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.into())
    }

    /// Load images as grouping candidates.
    pub fn load_records(&self) -> Result<Vec<ImageRecord>> {
        Ok(self.load_images()?.into_iter().map(ImageRecord::from).collect())
    }

    fn stored_leader(&self, file_path: &str) -> Result<Option<String>> {
        let leader = self
            .conn
            .query_row(
                "SELECT group_leader FROM images WHERE file_path = ?1",
                params![file_path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(leader)
    }

    /// Resolve the final leader of an image by following leader links.
    pub fn leader_of(&self, file_path: &str) -> Result<Option<String>> {
        let Some(mut leader) = self.stored_leader(file_path)? else {
            return Ok(None);
        };
        let mut current = file_path.to_string();
        let limit = self.image_count()?;
        for _ in 0..limit {
            if leader == current {
                break;
            }
            current = leader;
            leader = match self.stored_leader(&current)? {
                Some(next) => next,
                None => bail!("Dangling group leader: {}", current),
            };
        }
        Ok(Some(leader))
    }

    /// Persist a grouping decision: `member` follows `leader`'s group.
    pub fn set_group_leader(&self, member: &str, leader: &str) -> Result<()> {
        let root = self
            .leader_of(leader)?
            .with_context(|| format!("Unknown leader image: {}", leader))?;
        if root == member {
            bail!("Cannot group {} with itself", member);
        }
        let updated = self.conn.execute(
            "UPDATE images SET group_leader = ?1 WHERE file_path = ?2",
            params![root, member],
        )?;
        if updated == 0 {
            bail!("Unknown member image: {}", member);
        }
        Ok(())
    }

    /// Whether any other image follows `file_path`.
    pub fn leads_group(&self, file_path: &str) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM images WHERE group_leader = ?1 AND file_path != ?1)",
            params![file_path],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Persisted groups as leader -> members, members in filename order.
    pub fn groups(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut stmt = self.conn.prepare(
            "SELECT group_leader, file_path FROM images
             WHERE group_leader != file_path
             ORDER BY group_leader, filename",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in rows {
            let (leader, member) = row?;
            groups.entry(leader).or_default().push(member);
        }
        Ok(groups)
    }

    /// Make every image its own leader again. Returns the number of images changed.
    pub fn clear_groups(&self) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE images SET group_leader = file_path WHERE group_leader != file_path",
            [],
        )?;
        Ok(changed)
    }

    // -- Statistics --

    /// Get image count.
    pub fn image_count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Get the number of distinct groups.
    pub fn group_count(&self) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT group_leader) FROM images WHERE group_leader != file_path",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // -- Utility --

    /// Generate a deterministic hash from a folder path for cache directory naming.
    fn hash_path(path: &str) -> String {
        // FNV-1a; only needs to be deterministic, not cryptographic.
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in path.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        format!("{:016x}", hash)
    }
}

impl GroupStore for SessionDb {
    fn group_with(&mut self, member: &ImageId, leader: &ImageId) -> Result<()> {
        self.set_group_leader(member.as_str(), leader.as_str())
    }

    fn has_members(&self, leader: &ImageId) -> Result<bool> {
        self.leads_group(leader.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bracket_grouping::BracketGrouper;

    fn test_db() -> (SessionDb, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = SessionDb::open_at(&db_path).unwrap();
        (db, dir)
    }

    fn sample_image(name: &str) -> StoredImage {
        StoredImage::new(
            Path::new(&format!("/photos/{}", name)),
            Some("2025:08:14 18:45:40"),
        )
    }

    #[test]
    fn test_create_and_load_empty() {
        let (db, _dir) = test_db();
        assert!(db.load_images().unwrap().is_empty());
        assert_eq!(db.group_count().unwrap(), 0);
    }

    #[test]
    fn test_upsert_and_load_image() {
        let (db, _dir) = test_db();
        db.upsert_image(&sample_image("DSC_0001.NEF")).unwrap();

        let loaded = db.load_images().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].file_path, "/photos/DSC_0001.NEF");
        assert_eq!(loaded[0].directory, "/photos");
        assert_eq!(loaded[0].filename, "DSC_0001.NEF");
        assert_eq!(loaded[0].capture_time, "2025:08:14 18:45:40");
        assert!(!loaded[0].is_grouped());
    }

    #[test]
    fn test_batch_upsert() {
        let (db, _dir) = test_db();
        let images: Vec<_> = (0..100)
            .map(|i| sample_image(&format!("img_{:04}.NEF", i)))
            .collect();
        db.upsert_images(&images).unwrap();
        assert_eq!(db.image_count().unwrap(), 100);
    }

    #[test]
    fn test_group_with_resolves_leader_chain() {
        let (mut db, _dir) = test_db();
        let images: Vec<_> = ["a.NEF", "b.NEF", "c.NEF"].iter().map(|n| sample_image(n)).collect();
        db.upsert_images(&images).unwrap();

        let a = ImageId::new("/photos/a.NEF");
        let b = ImageId::new("/photos/b.NEF");
        let c = ImageId::new("/photos/c.NEF");
        db.group_with(&b, &a).unwrap();
        db.group_with(&c, &b).unwrap();

        assert_eq!(db.leader_of("/photos/c.NEF").unwrap().as_deref(), Some("/photos/a.NEF"));
        assert_eq!(db.leader_of("/photos/a.NEF").unwrap().as_deref(), Some("/photos/a.NEF"));
        assert_eq!(db.leader_of("/photos/missing.NEF").unwrap(), None);

        let groups = db.groups().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups["/photos/a.NEF"],
            vec!["/photos/b.NEF".to_string(), "/photos/c.NEF".to_string()]
        );
        assert_eq!(db.group_count().unwrap(), 1);
    }

    #[test]
    fn test_group_with_rejects_unknown_images() {
        let (mut db, _dir) = test_db();
        db.upsert_image(&sample_image("a.NEF")).unwrap();
        let a = ImageId::new("/photos/a.NEF");
        let missing = ImageId::new("/photos/missing.NEF");

        assert!(db.group_with(&missing, &a).is_err());
        assert!(db.group_with(&a, &missing).is_err());
        assert!(db.group_with(&a, &a).is_err());
    }

    #[test]
    fn test_reimport_preserves_group_leader() {
        let (mut db, _dir) = test_db();
        db.upsert_images(&[sample_image("a.NEF"), sample_image("b.NEF")]).unwrap();
        db.group_with(&ImageId::new("/photos/b.NEF"), &ImageId::new("/photos/a.NEF"))
            .unwrap();

        let mut reimported = sample_image("b.NEF");
        reimported.capture_time = "2025:08:14 18:45:41".to_string();
        db.upsert_image(&reimported).unwrap();

        let loaded = db.load_images().unwrap();
        assert_eq!(loaded[1].capture_time, "2025:08:14 18:45:41");
        assert_eq!(loaded[1].group_leader, "/photos/a.NEF");
    }

    #[test]
    fn test_clear_groups() {
        let (mut db, _dir) = test_db();
        db.upsert_images(&[sample_image("a.NEF"), sample_image("b.NEF")]).unwrap();
        db.group_with(&ImageId::new("/photos/b.NEF"), &ImageId::new("/photos/a.NEF"))
            .unwrap();

        assert_eq!(db.clear_groups().unwrap(), 1);
        assert!(db.groups().unwrap().is_empty());
        assert!(db.load_images().unwrap().iter().all(|img| !img.is_grouped()));
    }

    #[test]
    fn test_grouping_pass_writes_through() {
        let (mut db, _dir) = test_db();
        let images: Vec<_> = (0..4)
            .map(|i| sample_image(&format!("DSC_{:04}.NEF", i)))
            .collect();
        db.upsert_images(&images).unwrap();

        let positions: [i64; 4] = [100, 200, 260, 900];
        let mut reader = |image: &ImageRecord| {
            let idx: usize = image.filename[4..8].parse().unwrap();
            positions[idx]
        };
        let grouper = BracketGrouper::with_default_config();
        let candidates = db.load_records().unwrap();
        let report = grouper.group(candidates, &mut reader, &mut db);
        assert_eq!(report.groups_created(), 1);

        let groups = db.groups().unwrap();
        assert_eq!(groups["/photos/DSC_0000.NEF"].len(), 2);

        // Second pass leaves the whole group alone; only the single is left
        let report = grouper.group(db.load_records().unwrap(), &mut reader, &mut db);
        assert_eq!(report.groups_created(), 0);
        assert_eq!(report.skipped_grouped, 3);
    }

    #[test]
    fn test_rerun_keeps_nearby_groups_apart() {
        let (mut db, _dir) = test_db();
        let images: Vec<_> = (0..4)
            .map(|i| sample_image(&format!("DSC_{:04}.NEF", i)))
            .collect();
        db.upsert_images(&images).unwrap();

        // Leaders DSC_0000 and DSC_0002 end up 20 steps apart
        let positions: [i64; 4] = [0, 140, -20, -20];
        let mut reader = |image: &ImageRecord| {
            let idx: usize = image.filename[4..8].parse().unwrap();
            positions[idx]
        };
        let grouper = BracketGrouper::with_default_config();

        let first = grouper.group(db.load_records().unwrap(), &mut reader, &mut db);
        assert_eq!(first.groups_created(), 2);
        assert!(db.leads_group("/photos/DSC_0000.NEF").unwrap());
        assert!(!db.leads_group("/photos/DSC_0001.NEF").unwrap());

        let second = grouper.group(db.load_records().unwrap(), &mut reader, &mut db);
        assert_eq!(second.groups_created(), 0);
        assert_eq!(second.skipped_grouped, 4);

        let groups = db.groups().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["/photos/DSC_0000.NEF"], vec!["/photos/DSC_0001.NEF".to_string()]);
        assert_eq!(groups["/photos/DSC_0002.NEF"], vec!["/photos/DSC_0003.NEF".to_string()]);
    }

    #[test]
    fn test_session_meta() {
        let (db, _dir) = test_db();
        db.set_meta("root_folder", "/photos/macro").unwrap();
        db.set_meta("last_grouping", "Created 1 group").unwrap();

        assert_eq!(
            db.get_meta("root_folder").unwrap(),
            Some("/photos/macro".to_string())
        );
        assert_eq!(db.get_meta("nonexistent").unwrap(), None);
    }

    #[test]
    fn test_hash_path_is_deterministic() {
        assert_eq!(SessionDb::hash_path("/photos"), SessionDb::hash_path("/photos"));
        assert_ne!(SessionDb::hash_path("/photos"), SessionDb::hash_path("/photos2"));
        assert_eq!(SessionDb::hash_path("/photos").len(), 16);
    }
}
