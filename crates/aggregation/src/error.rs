//! Error types for the aggregation crate.

use fmrc_common::{ForecastOffset, GeometryId, RunTime, TimeParseError};
use std::path::PathBuf;
use thiserror::Error;

use crate::codec::CodecError;
use storage::StoreError;

/// Failure to build a run inventory from one file.
///
/// Scan errors never abort a collection scan; they are collected into the
/// [`ScanReport`](crate::ScanReport) and the file is skipped.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Failed to open file: {0}")]
    Open(#[source] CodecError),

    #[error("Failed to read metadata: {0}")]
    Metadata(#[source] CodecError),

    #[error("No time axis found")]
    NoTimeAxis,

    #[error("No forecast variables found")]
    NoForecastVariables,

    #[error("Run time could not be determined")]
    NoRunTime,

    #[error("Invalid time units on axis '{axis}': {source}")]
    TimeUnits {
        axis: String,
        #[source]
        source: TimeParseError,
    },

    #[error("Offsets of '{variable}' are not strictly increasing ({previous} then {next})")]
    NonMonotonicOffsets {
        variable: String,
        previous: ForecastOffset,
        next: ForecastOffset,
    },

    #[error("Offset {offset} of '{variable}' is out of range for run {run_time}")]
    OffsetOutOfRange {
        variable: String,
        run_time: RunTime,
        offset: ForecastOffset,
    },

    #[error("Variable '{variable}' refers to unknown geometry {geometry}")]
    UnknownGeometry { variable: String, geometry: GeometryId },

    #[error("Geometry stored under {key} has id {found}")]
    GeometryKey { key: GeometryId, found: GeometryId },

    #[error("Run {run_time} is already provided by {existing}")]
    DuplicateRun { run_time: RunTime, existing: PathBuf },

    #[error("Scan task failed: {0}")]
    Task(String),
}

/// Errors that can occur in the aggregation engine.
#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("Geometry mismatch for run {run_time}: {reason}")]
    GeometryMismatch { run_time: RunTime, reason: String },

    #[error("Persisted index unusable: {0}")]
    IndexCorruption(String),

    #[error("Cannot resolve: {0}")]
    Resolution(String),

    #[error("Failed to read data: {0}")]
    Read(#[from] CodecError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Unknown run: {0}")]
    UnknownRun(RunTime),

    #[error("Unknown geometry group: {0}")]
    UnknownGeometry(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type for aggregation operations.
pub type Result<T> = std::result::Result<T, AggregationError>;
