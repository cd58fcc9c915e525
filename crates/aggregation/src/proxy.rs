//! Translating view coordinates into codec reads.

use chrono::{DateTime, Utc};
use fmrc_common::{ForecastOffset, RunTime};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::codec::{GridCodec, NumericArray};
use crate::error::{AggregationError, Result};
use crate::view::{LogicalIndex, VirtualDatasetView};

/// Where one logical cell lives on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadDescriptor {
    /// Backing file of the run
    pub path: PathBuf,
    /// Variable name inside the file
    pub variable: String,
    /// Name of the variable's time dimension in the file
    pub time_axis: String,
    /// Index along `time_axis`
    pub time_index: usize,
    pub run_time: RunTime,
    pub offset: ForecastOffset,
    pub valid_time: DateTime<Utc>,
}

/// Resolves view cells to read descriptors and performs the reads.
#[derive(Clone)]
pub struct GridAccessProxy {
    codec: Arc<dyn GridCodec>,
}

impl GridAccessProxy {
    pub fn new(codec: Arc<dyn GridCodec>) -> Self {
        Self { codec }
    }

    /// Map a logical index of `view` to a file position.
    ///
    /// Absent cells and indexes outside the view are
    /// [`AggregationError::Resolution`] errors.
    pub fn resolve(&self, view: &VirtualDatasetView, index: LogicalIndex) -> Result<ReadDescriptor> {
        let entry = view.entry(index)?;

        let run = view.snapshot().get(entry.run_time).ok_or_else(|| {
            AggregationError::Resolution(format!("run {} not in snapshot", entry.run_time))
        })?;

        let variable = run.variable(view.variable()).ok_or_else(|| {
            AggregationError::Resolution(format!(
                "run {} has no '{}'",
                entry.run_time,
                view.variable()
            ))
        })?;

        let time_index = variable.offsets.binary_search(&entry.offset).map_err(|_| {
            AggregationError::Resolution(format!(
                "run {} has no offset {} for '{}'",
                entry.run_time,
                entry.offset,
                view.variable()
            ))
        })?;

        Ok(ReadDescriptor {
            path: run.path().to_path_buf(),
            variable: view.variable().to_string(),
            time_axis: variable.time_axis.clone(),
            time_index,
            run_time: entry.run_time,
            offset: entry.offset,
            valid_time: entry.valid_time,
        })
    }

    /// Decode the cell behind a descriptor on a blocking thread.
    #[instrument(skip(self, descriptor), fields(path = %descriptor.path.display(), variable = %descriptor.variable, time_index = descriptor.time_index))]
    pub async fn read(&self, descriptor: &ReadDescriptor) -> Result<NumericArray> {
        let codec = Arc::clone(&self.codec);
        let descriptor = descriptor.clone();

        let array = tokio::task::spawn_blocking(move || -> Result<NumericArray> {
            let handle = codec.open(&descriptor.path)?;
            let array = handle.read_cell(
                &descriptor.variable,
                &descriptor.time_axis,
                descriptor.time_index,
            );
            handle.close()?;
            Ok(array?)
        })
        .await
        .map_err(|e| anyhow::anyhow!("read task failed: {}", e))??;

        debug!(values = array.len(), "Read cell");
        Ok(array)
    }
}
