use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::warn;

use super::StoredToken;

/// Durable snapshot of the whole token table.
///
/// Written after every mutation and loaded once at startup. Plain JSON, so
/// the encrypted `envelope` fields can be inspected and backed up without
/// the master secret.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableSnapshot {
    /// Snapshot format version (for future schema evolution)
    pub snapshot_version: String,

    /// Timestamp when the snapshot was written
    pub saved_at: DateTime<Utc>,

    /// All tokens at snapshot time (user_id -> records in insertion order)
    pub users: HashMap<String, Vec<StoredToken>>,
}

impl TableSnapshot {
    pub fn new(users: HashMap<String, Vec<StoredToken>>) -> Self {
        Self {
            snapshot_version: "1".to_string(),
            saved_at: Utc::now(),
            users,
        }
    }

    /// Save snapshot to filesystem as JSON.
    ///
    /// Uses atomic write: writes to a .tmp file, fsyncs, then renames.
    /// This prevents partial/corrupt snapshots from being read.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize token table snapshot")?;

        let tmp_path = path.with_extension("tmp");

        {
            let mut tmp_file = File::create(&tmp_path)
                .context("Failed to create temporary snapshot file")?;
            tmp_file
                .write_all(json.as_bytes())
                .context("Failed to write snapshot data")?;
            tmp_file
                .sync_all()
                .context("Failed to sync snapshot file to disk")?;
        }

        fs::rename(&tmp_path, path).context("Failed to rename temporary snapshot file")?;

        Ok(())
    }

    /// Load snapshot from a JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).context("Failed to read snapshot file")?;
        serde_json::from_str(&json).context("Failed to deserialize snapshot JSON")
    }

    /// Load the table from `path`, treating a missing or unreadable snapshot
    /// as "start empty" — never fatal.
    pub fn load_or_empty(path: &Path) -> HashMap<String, Vec<StoredToken>> {
        if !path.exists() {
            return HashMap::new();
        }
        match Self::load_from_file(path) {
            Ok(snapshot) => snapshot.users,
            Err(e) => {
                warn!(
                    error = %e,
                    path = %path.display(),
                    "Token snapshot unreadable, starting with an empty table"
                );
                HashMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TokenState;
    use crate::validity::Provider;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn sample_table() -> HashMap<String, Vec<StoredToken>> {
        let token = StoredToken {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            provider: Provider::Monobank,
            envelope: "ZW52ZWxvcGU=".to_string(),
            display_name: None,
            state: TokenState::Active,
            created_at: Utc::now(),
            last_used_at: None,
        };
        HashMap::from([("u1".to_string(), vec![token])])
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");

        let snapshot = TableSnapshot::new(sample_table());
        snapshot.save_to_file(&path).expect("save failed");

        let loaded = TableSnapshot::load_from_file(&path).expect("load failed");
        assert_eq!(loaded.snapshot_version, "1");
        assert_eq!(loaded.users.len(), 1);
        assert_eq!(loaded.users["u1"][0].provider, Provider::Monobank);
        assert_eq!(loaded.users["u1"][0].envelope, "ZW52ZWxvcGU=");
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let table = TableSnapshot::load_or_empty(&dir.path().join("absent.json"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");
        fs::write(&path, "{ not json").unwrap();

        let table = TableSnapshot::load_or_empty(&path);
        assert!(table.is_empty());
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");

        TableSnapshot::new(sample_table())
            .save_to_file(&path)
            .unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }
}
