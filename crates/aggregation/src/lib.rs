//! Forecast model run collection (FMRC) aggregation.
//!
//! Turns a directory of forecast run files into one virtual dataset with a
//! run axis and a ragged 2D (run, forecast offset) time axis.
//!
//! # Architecture
//!
//! - [`inventory`]: per-file metadata scan into a [`RunInventory`]
//! - [`reconcile`]: spatial geometry comparison against the reference
//! - [`index`]: copy-on-write run index with persist/reload
//! - [`time_axis`]: run axis and ragged time axis derivation
//! - [`view`]: TwoD, Best and slice views over the time axis
//! - [`proxy`]: mapping view cells to (file, variable, time index) reads
//! - [`collection`]: the scanning and query facade tying it together
//!
//! File formats plug in behind [`codec::GridCodec`]. The NetCDF codec is
//! behind the `netcdf` feature; [`codec::MemoryCodec`] serves tests.

pub mod codec;
pub mod collection;
pub mod config;
pub mod discovery;
pub mod error;
pub mod index;
pub mod inventory;
pub mod proxy;
pub mod reconcile;
pub mod time_axis;
pub mod view;

#[cfg(test)]
mod test_support;

// Re-exports
pub use codec::{
    AxisDescriptor, CodecError, FileHandle, GridCodec, MemoryCodec, NumericArray, SyntheticFile,
    VarDescriptor,
};
#[cfg(feature = "netcdf")]
pub use codec::NetcdfCodec;
pub use collection::{Collection, GroupedRun, ScanFailure, ScanMode, ScanReport};
pub use config::{CollectionConfig, TieBreak};
pub use discovery::{discover_files, run_time_from_filename, DiscoveredFile, FileSignature};
pub use error::{AggregationError, Result, ScanError};
pub use index::{CollectionIndex, GeometryGroup, IndexSnapshot, FORMAT_VERSION};
pub use inventory::{
    classify_axis, scan_file, variable_union, RunInventory, ScanOptions, SourceFile,
    VariableInventory,
};
pub use proxy::{GridAccessProxy, ReadDescriptor};
pub use reconcile::{CoordinateReconciler, MismatchReason, Reconciliation, VariableMismatch};
pub use time_axis::{TimeAxis2D, TimeAxisBuilder};
pub use view::{best_selection, LogicalIndex, SeriesEntry, ViewKind, VirtualDatasetView};
