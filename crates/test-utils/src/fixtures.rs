//! Common test fixtures for forecast run collections.
//!
//! Run times sit on 2024-01-`day` so tests can speak in days and cycle
//! hours. [`CollectionDir`] lays out placeholder run files on disk; a
//! codec double supplies their content.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Run time `hour`Z on 2024-01-`day`.
pub fn run_time(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0)
        .single()
        .expect("valid fixture date")
}

/// `base` plus a number of hours.
pub fn plus_hours(base: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    base + Duration::hours(hours)
}

/// File name a model writes a run under, e.g. `gfs_20240101_12z.nc`.
pub fn run_file_name(model: &str, run_time: DateTime<Utc>) -> String {
    format!("{}_{}.nc", model, run_time.format("%Y%m%d_%Hz"))
}

/// The recurring three-run schedule: day 1 00Z and 12Z, day 2 00Z, with
/// the 12Z run one step shorter.
pub fn three_run_schedule() -> Vec<(DateTime<Utc>, Vec<i64>)> {
    vec![
        (run_time(1, 0), vec![0, 6, 12]),
        (run_time(1, 12), vec![0, 6]),
        (run_time(2, 0), vec![0, 6, 12]),
    ]
}

/// A temporary collection root holding placeholder run files.
pub struct CollectionDir {
    dir: TempDir,
}

impl CollectionDir {
    pub fn new() -> Self {
        Self {
            dir: crate::temp_test_dir_with_prefix("fmrc_collection"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create (or overwrite) `name` with placeholder content.
    pub fn touch(&self, name: &str) -> PathBuf {
        self.write(name, b"placeholder")
    }

    /// Write `name` with the given content, creating parent directories.
    pub fn write(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create fixture directory");
        }
        fs::write(&path, content).expect("Failed to write fixture file");
        path
    }

    /// Rewrite `name` with longer content so its size, and therefore its
    /// signature, changes.
    pub fn rewrite(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        let mut content = fs::read(&path).unwrap_or_default();
        content.extend_from_slice(b" rewritten");
        fs::write(&path, content).expect("Failed to rewrite fixture file");
        path
    }

    pub fn remove(&self, name: &str) {
        fs::remove_file(self.dir.path().join(name)).expect("Failed to remove fixture file");
    }
}

impl Default for CollectionDir {
    fn default() -> Self {
        Self::new()
    }
}
