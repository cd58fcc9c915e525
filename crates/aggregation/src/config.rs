//! Collection configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AggregationError, Result};
use fmrc_common::GeometryId;
use storage::StoreBackend;

/// How the Best view chooses between runs that forecast the same instant.
///
/// Offsets within one run are strictly increasing, so every candidate for a
/// given valid time comes from a different run; the tie-break orders runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Newest covering run (smallest lead time).
    #[default]
    #[serde(alias = "prefer_newest_run")]
    PreferFreshRun,
    /// Oldest covering run (longest lead time).
    ///
    /// "Mature" refers to the run, not the lead time: the forecast issued
    /// longest ago wins, so the selected offset is the larger one. This is
    /// the inverse of [`TieBreak::PreferFreshRun`]. Also accepted as
    /// `prefer_oldest_run` or `longest_lead`.
    #[serde(alias = "prefer_oldest_run")]
    PreferMatureForecast,
}

impl TieBreak {
    /// Parse from string (case-insensitive, `-`/`_` agnostic).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "prefer_fresh_run" | "preferfreshrun" | "fresh" | "prefer_newest_run" | "shortest_lead" => {
                Some(Self::PreferFreshRun)
            }
            "prefer_mature_forecast"
            | "prefermatureforecast"
            | "mature"
            | "prefer_oldest_run"
            | "longest_lead" => {
                Some(Self::PreferMatureForecast)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreferFreshRun => "prefer_fresh_run",
            Self::PreferMatureForecast => "prefer_mature_forecast",
        }
    }
}

impl std::fmt::Display for TieBreak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of one forecast model run collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Collection identity; also the key prefix of the persisted index.
    pub collection_id: String,

    /// Directory scanned for run files.
    pub root: PathBuf,

    /// File extensions (without dot) that belong to the collection.
    pub extensions: Vec<String>,

    /// Reject runs whose geometry differs from the reference instead of
    /// grouping them.
    pub strict_geometry: bool,

    /// Best view selection rule.
    pub tie_break: TieBreak,

    /// Maximum number of files scanned at once.
    pub scan_concurrency: usize,

    /// Global attributes consulted for the run time, in order.
    pub run_time_attributes: Vec<String>,

    /// Derive the run time from the file name when metadata has none.
    pub run_time_from_filename: bool,

    /// Pin the reference geometry instead of taking the first run's.
    pub reference_geometry: Option<GeometryId>,

    /// Where the index is persisted.
    pub store: StoreBackend,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            collection_id: "default".to_string(),
            root: PathBuf::from("."),
            extensions: vec!["nc".to_string(), "nc4".to_string(), "netcdf".to_string()],
            strict_geometry: false,
            tie_break: TieBreak::default(),
            scan_concurrency: 4,
            run_time_attributes: vec![
                "_CoordinateModelRunDate".to_string(),
                "run_time".to_string(),
                "forecast_reference_time".to_string(),
            ],
            run_time_from_filename: true,
            reference_geometry: None,
            store: StoreBackend::default(),
        }
    }
}

impl CollectionConfig {
    /// Default configuration for a collection rooted at `root`.
    pub fn new(collection_id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            collection_id: collection_id.into(),
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("FMRC_COLLECTION_ID") {
            self.collection_id = val;
        }

        if let Some(val) = var("FMRC_ROOT") {
            self.root = PathBuf::from(val);
        }

        if let Some(val) = var("FMRC_EXTENSIONS") {
            self.extensions = val
                .split(',')
                .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect();
        }

        if let Some(val) = var("FMRC_STRICT_GEOMETRY") {
            self.strict_geometry = parse_flag(&val);
        }

        if let Some(val) = var("FMRC_TIE_BREAK") {
            if let Some(tie_break) = TieBreak::parse(&val) {
                self.tie_break = tie_break;
            }
        }

        if let Some(val) = var("FMRC_SCAN_CONCURRENCY") {
            if let Ok(n) = val.parse() {
                self.scan_concurrency = n;
            }
        }

        if let Some(val) = var("FMRC_RUN_TIME_FROM_FILENAME") {
            self.run_time_from_filename = parse_flag(&val);
        }

        if let Some(val) = var("FMRC_REFERENCE_GEOMETRY") {
            let val = val.trim();
            self.reference_geometry = (!val.is_empty()).then(|| GeometryId::new(val));
        }
    }

    /// Parse configuration from YAML. Missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| AggregationError::InvalidConfig(format!("YAML: {}", e)))
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.collection_id.trim().is_empty() {
            return Err("collection_id must not be empty".to_string());
        }

        if self.collection_id.contains(['/', '\\']) {
            return Err("collection_id must not contain path separators".to_string());
        }

        if self.scan_concurrency == 0 {
            return Err("scan_concurrency must be > 0".to_string());
        }

        if self.extensions.is_empty() {
            return Err("at least one file extension is required".to_string());
        }

        Ok(())
    }

    /// Key of the persisted index in the store.
    pub fn index_key(&self) -> String {
        index_key(&self.collection_id)
    }
}

/// Key of a collection's persisted index.
pub fn index_key(collection_id: &str) -> String {
    format!("{}/index.json", collection_id)
}

fn parse_flag(val: &str) -> bool {
    matches!(val.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = CollectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tie_break, TieBreak::PreferFreshRun);
        assert!(!config.strict_geometry);
        assert_eq!(config.index_key(), "default/index.json");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CollectionConfig::new("gfs", "/data");
        config.scan_concurrency = 0;
        assert!(config.validate().is_err());

        let config = CollectionConfig::new("gfs/0p25", "/data");
        assert!(config.validate().is_err());

        let mut config = CollectionConfig::new("gfs", "/data");
        config.extensions.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tie_break_names_describe_the_run_chosen() {
        assert_eq!(TieBreak::parse("prefer_oldest_run"), Some(TieBreak::PreferMatureForecast));
        assert_eq!(TieBreak::parse("Longest-Lead"), Some(TieBreak::PreferMatureForecast));
        assert_eq!(TieBreak::parse("prefer-newest-run"), Some(TieBreak::PreferFreshRun));
        assert_eq!(TieBreak::parse("shortest_lead"), Some(TieBreak::PreferFreshRun));
        assert_eq!(TieBreak::parse("smallest"), None);

        let config = CollectionConfig::from_yaml_str("tie_break: prefer_oldest_run").unwrap();
        assert_eq!(config.tie_break, TieBreak::PreferMatureForecast);
        assert_eq!(config.tie_break.as_str(), "prefer_mature_forecast");
    }

    #[test]
    fn test_apply_env() {
        let vars: HashMap<&str, &str> = [
            ("FMRC_COLLECTION_ID", "hrrr"),
            ("FMRC_EXTENSIONS", ".NC, grib2"),
            ("FMRC_STRICT_GEOMETRY", "1"),
            ("FMRC_TIE_BREAK", "prefer-mature-forecast"),
            ("FMRC_SCAN_CONCURRENCY", "12"),
            ("FMRC_REFERENCE_GEOMETRY", "0a1b2c3d"),
        ]
        .into_iter()
        .collect();

        let mut config = CollectionConfig::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.collection_id, "hrrr");
        assert_eq!(config.extensions, vec!["nc", "grib2"]);
        assert!(config.strict_geometry);
        assert_eq!(config.tie_break, TieBreak::PreferMatureForecast);
        assert_eq!(config.scan_concurrency, 12);
        assert_eq!(config.reference_geometry, Some(GeometryId::new("0a1b2c3d")));
    }

    #[test]
    fn test_from_yaml() {
        let config = CollectionConfig::from_yaml_str(
            r#"
collection_id: nam
root: /data/nam
strict_geometry: true
tie_break: prefer_mature_forecast
store:
  backend: local
  root: /var/lib/fmrc
"#,
        )
        .unwrap();

        assert_eq!(config.collection_id, "nam");
        assert_eq!(config.root, PathBuf::from("/data/nam"));
        assert!(config.strict_geometry);
        assert_eq!(config.tie_break, TieBreak::PreferMatureForecast);
        assert_eq!(config.scan_concurrency, 4);
        assert!(matches!(config.store, StoreBackend::Local { .. }));

        assert!(CollectionConfig::from_yaml_str("scan_concurrency: lots").is_err());
    }
}
