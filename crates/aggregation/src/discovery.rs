//! Finding run files under a collection root.

use chrono::{NaiveDate, TimeZone, Utc};
use fmrc_common::RunTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

use crate::error::{AggregationError, Result};

/// Modification signature of a file: a changed signature means the run
/// must be re-scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileSignature {
    /// Length in bytes
    pub len: u64,
    /// Modification time, nanoseconds since the Unix epoch (0 if unknown)
    pub modified: i64,
}

impl FileSignature {
    pub fn new(len: u64, modified: i64) -> Self {
        Self { len, modified }
    }

    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .and_then(|d| i64::try_from(d.as_nanos()).ok())
            .unwrap_or(0);

        Self::new(metadata.len(), modified)
    }

    /// Signature of the file at `path`.
    pub fn of(path: &Path) -> std::io::Result<Self> {
        Ok(Self::from_metadata(&std::fs::metadata(path)?))
    }
}

/// A candidate run file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub signature: FileSignature,
}

/// Check a path against a list of extensions (without dot, any case).
///
/// Multi-part extensions such as `grib2.gz` are matched on the file name
/// suffix.
pub fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let lower = name.to_lowercase();

    extensions.iter().any(|ext| {
        let ext = ext.trim_start_matches('.').to_lowercase();
        !ext.is_empty() && lower.ends_with(&format!(".{}", ext))
    })
}

/// Walk `root` and return every regular file with a matching extension,
/// sorted by path. Unreadable entries below the root are skipped.
pub fn discover_files(root: &Path, extensions: &[String]) -> Result<Vec<DiscoveredFile>> {
    if !root.is_dir() {
        return Err(AggregationError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("collection root {} is not a directory", root.display()),
        )));
    }

    let mut files = Vec::new();

    for entry in walkdir::WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if !entry.file_type().is_file() || !matches_extension(entry.path(), extensions) {
            continue;
        }

        match entry.metadata() {
            Ok(metadata) => files.push(DiscoveredFile {
                path: entry.path().to_path_buf(),
                signature: FileSignature::from_metadata(&metadata),
            }),
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Cannot stat file"),
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(root = %root.display(), count = files.len(), "Discovered files");
    Ok(files)
}

/// Derive a run time from a file name.
///
/// Supports patterns:
/// - `YYYYMMDD_HHz` (e.g., `gfs_20241201_06z_f003.nc`)
/// - `YYYYMMDDTHHMM` (e.g., `nam_20241201T1200.nc`)
/// - `YYYYMMDDHH` (e.g., `rap.2024120118.nc`)
pub fn run_time_from_filename(path: &Path) -> Option<RunTime> {
    let name = path.file_name()?.to_str()?.to_lowercase();
    let bytes = name.as_bytes();

    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }

        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let digits = &name[start..i];
        let rest = &name[i..];

        let found = match digits.len() {
            8 => date_with_cycle(digits, rest),
            10 => compose(&digits[..8], &digits[8..], "00"),
            _ => None,
        };
        if found.is_some() {
            return found;
        }
    }

    None
}

fn date_with_cycle(date: &str, rest: &str) -> Option<RunTime> {
    // _HHz
    if let Some(cycle) = rest.strip_prefix('_') {
        let hour = cycle.get(..2)?;
        if cycle.get(2..3) == Some("z") {
            return compose(date, hour, "00");
        }
        return None;
    }

    // THHMM
    let time = rest.strip_prefix('t')?;
    let hhmm = time.get(..4)?;
    if time.get(4..5).map_or(false, |c| c.chars().all(|c| c.is_ascii_digit())) {
        return None;
    }
    compose(date, hhmm.get(..2)?, hhmm.get(2..)?)
}

fn compose(date: &str, hour: &str, minute: &str) -> Option<RunTime> {
    let date = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    let naive = date.and_hms_opt(hour, minute, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}
