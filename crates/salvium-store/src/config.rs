//! Store configuration.
//!
//! Describes which named database files a [`Coordinator`](crate::Coordinator)
//! opens. Loaded from a JSON document, or built directly for the common
//! single-file case.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the database handle used when the caller does not pick one.
pub const DEFAULT_DB: &str = "wallet";

fn default_busy_timeout_ms() -> u64 { 5_000 }

/// One named database file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    pub databases: Vec<DatabaseConfig>,
    /// How long SQLite waits on a locked file before reporting `SQLITE_BUSY`.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl StoreConfig {
    pub fn new(databases: Vec<DatabaseConfig>) -> Self {
        Self {
            databases,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }

    /// A config with a single database handle.
    pub fn single(name: &str, path: impl Into<PathBuf>) -> Self {
        Self::new(vec![DatabaseConfig {
            name: name.to_string(),
            path: path.into(),
        }])
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single() {
        let cfg = StoreConfig::single(DEFAULT_DB, "/tmp/w.db");
        assert_eq!(cfg.databases.len(), 1);
        assert_eq!(cfg.databases[0].name, "wallet");
        assert_eq!(cfg.busy_timeout_ms, 5_000);
    }

    #[test]
    fn test_parse_defaults_timeout() {
        let cfg: StoreConfig = serde_json::from_str(
            r#"{"databases":[{"name":"wallet","path":"a.db"},{"name":"blocks","path":"b.db"}]}"#,
        )
        .unwrap();
        assert_eq!(cfg.databases[1].name, "blocks");
        assert_eq!(cfg.databases[1].path, PathBuf::from("b.db"));
        assert_eq!(cfg.busy_timeout_ms, 5_000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(
            &path,
            r#"{"databases":[{"name":"wallet","path":"w.db"}],"busyTimeoutMs":250}"#,
        )
        .unwrap();
        let cfg = StoreConfig::load(&path).unwrap();
        assert_eq!(cfg.busy_timeout_ms, 250);
    }
}
