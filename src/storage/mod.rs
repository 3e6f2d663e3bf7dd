//! Local record of past scans
//!
//! Successful classifications are kept in a SQLite database under the
//! user's data directory so `leafscan history` can show them across runs.

use crate::config::StorageConfig;
use crate::error::{LeafscanError, Result};
use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

pub mod types;
pub use types::ScanRecord;

/// Full length of a ULID string
const ULID_LEN: usize = 26;

/// SQLite-backed scan storage
#[derive(Debug)]
pub struct ScanStore {
    db_path: PathBuf,
}

impl ScanStore {
    /// Opens the database in the user's data directory.
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "leafscan", "leafscan")
            .ok_or_else(|| LeafscanError::Storage("Could not determine data directory".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .context("Failed to create data directory")
            .map_err(|e| LeafscanError::Storage(e.to_string()))?;

        Self::new_with_path(data_dir.join("scans.db"))
    }

    /// Opens the database at the configured path, or the default location.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match &config.db_path {
            Some(path) => Self::new_with_path(path.clone()),
            None => Self::new(),
        }
    }

    /// Opens (creating if needed) the database at `db_path`.
    ///
    /// # Examples
    ///
    /// ```
    /// use leafscan::storage::ScanStore;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = ScanStore::new_with_path(dir.path().join("scans.db")).unwrap();
    /// assert!(store.list_scans("1", 10).unwrap().is_empty());
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| LeafscanError::Storage(e.to_string()))?;
        }

        let store = Self { db_path };
        store.init()?;
        Ok(store)
    }

    /// Database file location
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection> {
        Ok(Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(|e| LeafscanError::Storage(e.to_string()))?)
    }

    fn init(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS scans (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                label TEXT NOT NULL,
                confidence REAL NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_scans_user ON scans (user_id, created_at);",
        )
        .context("Failed to create tables")
        .map_err(|e| LeafscanError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Persists `record`.
    pub fn save_scan(&self, record: &ScanRecord) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO scans (id, user_id, file_name, label, confidence, created_at)
            VALUES (?, ?, ?, ?, ?, ?)",
            params![
                record.id,
                record.user_id,
                record.file_name,
                record.label,
                record.confidence,
                record.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
            ],
        )
        .context("Failed to insert scan")
        .map_err(|e| LeafscanError::Storage(e.to_string()))?;

        tracing::debug!(id = %record.id, user = %record.user_id, "Saved scan");
        Ok(())
    }

    /// Up to `limit` scans for `user_id`, newest first.
    pub fn list_scans(&self, user_id: &str, limit: usize) -> Result<Vec<ScanRecord>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, file_name, label, confidence, created_at
                FROM scans
                WHERE user_id = ?
                ORDER BY created_at DESC, id DESC
                LIMIT ?",
            )
            .context("Failed to prepare statement")
            .map_err(|e| LeafscanError::Storage(e.to_string()))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![user_id, limit], |row| {
                let created_at_str: String = row.get(5)?;
                let created_at = DateTime::parse_from_rfc3339(&created_at_str)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());

                Ok(ScanRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    file_name: row.get(2)?,
                    label: row.get(3)?,
                    confidence: row.get(4)?,
                    created_at,
                })
            })
            .context("Failed to query scans")
            .map_err(|e| LeafscanError::Storage(e.to_string()))?;

        let mut scans = Vec::new();
        for scan in rows {
            scans.push(
                scan.context("Failed to read scan row")
                    .map_err(|e| LeafscanError::Storage(e.to_string()))?,
            );
        }
        Ok(scans)
    }

    /// Deletes one of `user_id`'s scans by full id or unambiguous prefix.
    ///
    /// Returns the number of rows removed. Scans owned by other users are
    /// never matched, and a prefix matching more than one scan is rejected.
    pub fn delete_scan(&self, user_id: &str, id: &str) -> Result<usize> {
        if id.is_empty() {
            return Err(LeafscanError::Validation("scan id is required".to_string()).into());
        }
        let conn = self.open()?;
        let prefix_len = id.chars().count() as i64;

        if prefix_len < ULID_LEN as i64 {
            let matches: i64 = conn
                .query_row(
                    "SELECT count(*) FROM scans WHERE user_id = ? AND substr(id, 1, ?) = ?",
                    params![user_id, prefix_len, id],
                    |r| r.get(0),
                )
                .context("Failed to count scans")
                .map_err(|e| LeafscanError::Storage(e.to_string()))?;
            if matches > 1 {
                return Err(LeafscanError::Validation(format!(
                    "scan id prefix '{}' is ambiguous ({} matches)",
                    id, matches
                ))
                .into());
            }
            return Ok(conn
                .execute(
                    "DELETE FROM scans WHERE user_id = ? AND substr(id, 1, ?) = ?",
                    params![user_id, prefix_len, id],
                )
                .context("Failed to delete scan")
                .map_err(|e| LeafscanError::Storage(e.to_string()))?);
        }

        Ok(conn
            .execute(
                "DELETE FROM scans WHERE user_id = ? AND id = ?",
                params![user_id, id],
            )
            .context("Failed to delete scan")
            .map_err(|e| LeafscanError::Storage(e.to_string()))?)
    }

    /// Removes every scan owned by `user_id`, returning how many were removed.
    pub fn clear_scans(&self, user_id: &str) -> Result<usize> {
        let conn = self.open()?;
        let removed = conn
            .execute("DELETE FROM scans WHERE user_id = ?", params![user_id])
            .context("Failed to clear scans")
            .map_err(|e| LeafscanError::Storage(e.to_string()))?;
        tracing::info!(user = user_id, removed, "Cleared scan history");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PredictionResult;
    use chrono::Duration;
    use tempfile::tempdir;

    fn create_test_store() -> (ScanStore, tempfile::TempDir) {
        let dir = tempdir().expect("failed to create tempdir");
        let store = ScanStore::new_with_path(dir.path().join("nested").join("scans.db"))
            .expect("failed to create store");
        (store, dir)
    }

    fn record(user: &str, label: &str, minutes_ago: i64) -> ScanRecord {
        let result = PredictionResult::new(label, 0.9).unwrap();
        let mut record = ScanRecord::new(user, "leaf.jpg", &result);
        record.created_at = Utc::now() - Duration::minutes(minutes_ago);
        record
    }

    #[test]
    fn test_init_creates_table() {
        let (store, _dir) = create_test_store();
        let conn = Connection::open(store.db_path()).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='scans'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_list_newest_first_and_scoped_to_user() {
        let (store, _dir) = create_test_store();
        store.save_scan(&record("1", "Healthy", 30)).unwrap();
        store.save_scan(&record("1", "Late Blight", 10)).unwrap();
        store.save_scan(&record("2", "Early Blight", 5)).unwrap();
        store.save_scan(&record("1", "Early Blight", 20)).unwrap();

        let labels: Vec<_> = store
            .list_scans("1", 10)
            .unwrap()
            .into_iter()
            .map(|s| s.label)
            .collect();
        assert_eq!(labels, vec!["Late Blight", "Early Blight", "Healthy"]);

        assert_eq!(store.list_scans("1", 2).unwrap().len(), 2);
        assert_eq!(store.list_scans("2", 10).unwrap().len(), 1);
        assert!(store.list_scans("3", 10).unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let (store, _dir) = create_test_store();
        let saved = record("1", "Healthy", 0);
        store.save_scan(&saved).unwrap();

        let loaded = store.list_scans("1", 1).unwrap().remove(0);
        assert_eq!(loaded, saved);
    }

    #[test]
    fn test_delete_by_full_id_and_prefix() {
        let (store, _dir) = create_test_store();
        let a = record("1", "Healthy", 2);
        let b = record("1", "Late Blight", 1);
        store.save_scan(&a).unwrap();
        store.save_scan(&b).unwrap();

        assert_eq!(store.delete_scan("1", &a.id).unwrap(), 1);
        assert_eq!(store.delete_scan("1", &b.id[..20]).unwrap(), 1);
        assert_eq!(store.delete_scan("1", &a.id).unwrap(), 0);
        assert!(store.list_scans("1", 10).unwrap().is_empty());
    }

    #[test]
    fn test_delete_rejects_empty_id() {
        let (store, _dir) = create_test_store();
        assert!(store.delete_scan("1", "").is_err());
    }

    #[test]
    fn test_delete_is_scoped_to_owner() {
        let (store, _dir) = create_test_store();
        let mut mine = record("1", "Healthy", 2);
        mine.id = "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string();
        let mut theirs = record("2", "Early Blight", 1);
        theirs.id = "01ARZ3NDEKTSV4RRFFQ69G5FAW".to_string();
        store.save_scan(&mine).unwrap();
        store.save_scan(&theirs).unwrap();

        // The shared prefix only counts the caller's own scans.
        assert_eq!(store.delete_scan("1", "01ARZ3").unwrap(), 1);
        assert_eq!(store.delete_scan("1", &theirs.id).unwrap(), 0);
        assert_eq!(store.delete_scan("1", &theirs.id[..10]).unwrap(), 0);
        let remaining = store.list_scans("2", 10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, theirs.id);
    }

    #[test]
    fn test_delete_prefix_treats_wildcards_literally() {
        let (store, _dir) = create_test_store();
        store.save_scan(&record("1", "Healthy", 2)).unwrap();
        store.save_scan(&record("1", "Healthy", 1)).unwrap();

        assert_eq!(store.delete_scan("1", "%").unwrap(), 0);
        assert_eq!(store.delete_scan("1", "_").unwrap(), 0);
        assert_eq!(store.list_scans("1", 10).unwrap().len(), 2);
    }

    #[test]
    fn test_clear_only_touches_one_user() {
        let (store, _dir) = create_test_store();
        store.save_scan(&record("1", "Healthy", 1)).unwrap();
        store.save_scan(&record("1", "Healthy", 2)).unwrap();
        store.save_scan(&record("2", "Healthy", 3)).unwrap();

        assert_eq!(store.clear_scans("1").unwrap(), 2);
        assert!(store.list_scans("1", 10).unwrap().is_empty());
        assert_eq!(store.list_scans("2", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_record_display_helpers() {
        let now = Utc::now();
        let mut r = record("1", "Healthy", 0);
        r.confidence = 0.876;
        r.created_at = now - Duration::hours(3);
        assert_eq!(r.confidence_percent(), 88);
        assert_eq!(r.age_label(now), "Scanned 3 hours ago");

        r.confidence = 1.2;
        assert_eq!(r.confidence_percent(), 100);
    }
}
