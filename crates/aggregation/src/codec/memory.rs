//! In-process codec serving synthetic files.
//!
//! Files are registered by path; the path does not have to exist on disk
//! for `open`, but collection scans only see paths that discovery finds,
//! so tests usually create empty placeholder files as well.

use chrono::{DateTime, Utc};
use fmrc_common::time::is_time_units;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{
    AxisDescriptor, CodecError, CodecResult, FileHandle, GridCodec, NumericArray, VarDescriptor,
};

/// Metadata (and generated data) of one synthetic file.
#[derive(Debug, Clone, Default)]
pub struct SyntheticFile {
    axes: Vec<AxisDescriptor>,
    variables: Vec<VarDescriptor>,
    attributes: BTreeMap<String, String>,
}

impl SyntheticFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// A typical single-run file: a `time` axis in hours since the run,
    /// a 3x4 lat/lon grid and the run time as a global attribute.
    pub fn forecast_run(run_time: DateTime<Utc>, offset_hours: &[i64]) -> Self {
        let units = format!("hours since {}", run_time.format("%Y-%m-%dT%H:%M:%SZ"));

        Self::new()
            .with_attribute("_CoordinateModelRunDate", run_time.to_rfc3339())
            .with_axis(
                AxisDescriptor::new("time", offset_hours.iter().map(|h| *h as f64).collect())
                    .with_units(units),
            )
            .with_axis(
                AxisDescriptor::new("lat", vec![30.0, 40.0, 50.0]).with_units("degrees_north"),
            )
            .with_axis(
                AxisDescriptor::new("lon", vec![-120.0, -110.0, -100.0, -90.0])
                    .with_units("degrees_east"),
            )
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn without_attribute(mut self, name: &str) -> Self {
        self.attributes.remove(name);
        self
    }

    /// Add (or replace) an axis.
    pub fn with_axis(mut self, axis: AxisDescriptor) -> Self {
        self.axes.retain(|a| a.name != axis.name);
        self.axes.push(axis);
        self
    }

    /// Add an isobaric axis named `isobaric` with the given levels (hPa).
    pub fn with_pressure_levels(self, levels: &[f64]) -> Self {
        self.with_axis(AxisDescriptor::new("isobaric", levels.to_vec()).with_units("hPa"))
    }

    /// Add a variable over the named dimensions.
    pub fn with_variable(mut self, name: impl Into<String>, dimensions: &[&str]) -> Self {
        let dimensions: Vec<String> = dimensions.iter().map(|d| d.to_string()).collect();
        let shape = dimensions
            .iter()
            .map(|d| self.axis(d).map(AxisDescriptor::len).unwrap_or(1))
            .collect();
        self.variables
            .push(VarDescriptor::new(name, dimensions, shape));
        self
    }

    /// Add a variable over `time` and every non-time axis, in axis order.
    pub fn with_grid_variable(self, name: impl Into<String>) -> Self {
        let dimensions: Vec<String> = std::iter::once("time".to_string())
            .chain(
                self.axes
                    .iter()
                    .filter(|a| !is_time_axis(a))
                    .map(|a| a.name.clone()),
            )
            .collect();
        let dims: Vec<&str> = dimensions.iter().map(String::as_str).collect();
        self.with_variable(name, &dims)
    }

    fn axis(&self, name: &str) -> Option<&AxisDescriptor> {
        self.axes.iter().find(|a| a.name == name)
    }

    /// Coordinate variables first, then data variables.
    fn all_variables(&self) -> Vec<VarDescriptor> {
        self.axes
            .iter()
            .map(|a| VarDescriptor::new(a.name.clone(), vec![a.name.clone()], vec![a.len()]))
            .chain(self.variables.iter().cloned())
            .collect()
    }

    fn read(
        &self,
        variable: &str,
        time_dimension: &str,
        time_index: usize,
    ) -> CodecResult<NumericArray> {
        let var = self
            .variables
            .iter()
            .find(|v| v.name == variable)
            .ok_or_else(|| CodecError::MissingVariable(variable.to_string()))?;

        let (time_dim, steps) = var.time_dimension(time_dimension)?;
        if time_index >= steps {
            return Err(CodecError::TimeIndex {
                variable: variable.to_string(),
                index: time_index,
                len: steps,
            });
        }

        let shape = var.shape_without(time_dim);
        let count: usize = shape.iter().product();

        // Deterministic values: time step in the thousands, cell index below.
        let values = (0..count)
            .map(|i| time_index as f32 * 1000.0 + i as f32)
            .collect();

        NumericArray::new(shape, values)
    }
}

fn is_time_axis(axis: &AxisDescriptor) -> bool {
    axis.axis_type.map(|k| k.is_time()).unwrap_or(false)
        || axis.units.as_deref().map(is_time_units).unwrap_or(false)
}

/// Codec over a registry of [`SyntheticFile`]s.
#[derive(Default)]
pub struct MemoryCodec {
    files: RwLock<HashMap<PathBuf, Arc<SyntheticFile>>>,
}

impl MemoryCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the file served for `path`.
    pub fn insert(&self, path: impl Into<PathBuf>, file: SyntheticFile) {
        self.files.write().insert(path.into(), Arc::new(file));
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.files.write().remove(path).is_some()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }
}

impl GridCodec for MemoryCodec {
    fn open(&self, path: &Path) -> CodecResult<Box<dyn FileHandle>> {
        let file = self
            .files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| CodecError::Open {
                path: path.to_path_buf(),
                message: "no such synthetic file".to_string(),
            })?;

        Ok(Box::new(MemoryHandle { file }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryHandle {
    file: Arc<SyntheticFile>,
}

impl FileHandle for MemoryHandle {
    fn axes(&self) -> CodecResult<Vec<AxisDescriptor>> {
        Ok(self.file.axes.clone())
    }

    fn variables(&self) -> CodecResult<Vec<VarDescriptor>> {
        Ok(self.file.all_variables())
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.file.attributes.get(name).cloned()
    }

    fn read_cell(
        &self,
        variable: &str,
        time_dimension: &str,
        time_index: usize,
    ) -> CodecResult<NumericArray> {
        self.file.read(variable, time_dimension, time_index)
    }
}
