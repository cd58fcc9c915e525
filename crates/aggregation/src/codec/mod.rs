//! Interface to the external file codec.
//!
//! The aggregation engine never decodes array bytes itself. It asks a
//! [`GridCodec`] to open a file, list the file's coordinate axes and
//! variables, and (only when a caller reads data) decode one time step of
//! one variable.
//!
//! Codec calls block. The engine only makes them from
//! `tokio::task::spawn_blocking` workers.

pub mod memory;
#[cfg(feature = "netcdf")]
pub mod netcdf;

use fmrc_common::AxisKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use memory::{MemoryCodec, SyntheticFile};
#[cfg(feature = "netcdf")]
pub use self::netcdf::NetcdfCodec;

/// Errors reported by a codec.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("cannot open {path}: {message}")]
    Open { path: PathBuf, message: String },

    #[error("variable not found: {0}")]
    MissingVariable(String),

    #[error("time index {index} out of range for '{variable}' ({len} steps)")]
    TimeIndex {
        variable: String,
        index: usize,
        len: usize,
    },

    #[error("invalid file structure: {0}")]
    InvalidFormat(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for codec operations.
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// A coordinate axis as listed by the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisDescriptor {
    pub name: String,
    /// Axis type when the codec knows it; otherwise it is inferred from
    /// attributes and units during scanning.
    pub axis_type: Option<AxisKind>,
    pub units: Option<String>,
    pub values: Vec<f64>,
    pub attributes: BTreeMap<String, String>,
}

impl AxisDescriptor {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            axis_type: None,
            units: None,
            values,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn with_type(mut self, kind: AxisKind) -> Self {
        self.axis_type = Some(kind);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A variable as listed by the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDescriptor {
    pub name: String,
    /// Dimension names, outermost first
    pub dimensions: Vec<String>,
    /// Dimension lengths, same order as `dimensions`
    pub shape: Vec<usize>,
    pub attributes: BTreeMap<String, String>,
}

impl VarDescriptor {
    pub fn new(name: impl Into<String>, dimensions: Vec<String>, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            dimensions,
            shape,
            attributes: BTreeMap::new(),
        }
    }

    /// Length of a named dimension.
    pub fn dimension_len(&self, dimension: &str) -> Option<usize> {
        self.dimension_position(dimension)
            .and_then(|i| self.shape.get(i).copied())
    }

    /// Position of a named dimension.
    pub fn dimension_position(&self, dimension: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d == dimension)
    }

    /// Position and length of the dimension a read steps along.
    pub fn time_dimension(&self, dimension: &str) -> CodecResult<(usize, usize)> {
        let position = self.dimension_position(dimension).ok_or_else(|| {
            CodecError::InvalidFormat(format!(
                "'{}' has no dimension '{}'",
                self.name, dimension
            ))
        })?;
        Ok((position, self.shape.get(position).copied().unwrap_or(0)))
    }

    /// Shape without the dimension at `position`.
    pub fn shape_without(&self, position: usize) -> Vec<usize> {
        self.shape
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != position)
            .map(|(_, len)| *len)
            .collect()
    }
}

/// One decoded time step of a variable.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericArray {
    /// Shape of the non-time dimensions
    pub shape: Vec<usize>,
    /// Row-major values; missing data is NaN
    pub values: Vec<f32>,
}

impl NumericArray {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> CodecResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(CodecError::Read(format!(
                "array shape {:?} needs {} values, got {}",
                shape,
                expected,
                values.len()
            )));
        }
        Ok(Self { shape, values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An open file.
pub trait FileHandle: Send {
    /// All coordinate axes in the file.
    fn axes(&self) -> CodecResult<Vec<AxisDescriptor>>;

    /// All variables in the file, coordinate variables included.
    fn variables(&self) -> CodecResult<Vec<VarDescriptor>>;

    /// A global attribute rendered as text.
    fn attribute(&self, name: &str) -> Option<String>;

    /// Decode one time step of a variable: index `time_index` along its
    /// `time_dimension`. The result keeps every other dimension.
    fn read_cell(
        &self,
        variable: &str,
        time_dimension: &str,
        time_index: usize,
    ) -> CodecResult<NumericArray>;

    /// Release the file. Dropping the handle also releases it.
    fn close(self: Box<Self>) -> CodecResult<()> {
        Ok(())
    }
}

/// Opens files of one on-disk format.
pub trait GridCodec: Send + Sync {
    fn open(&self, path: &Path) -> CodecResult<Box<dyn FileHandle>>;

    /// Codec name for logs.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_array_shape_check() {
        assert!(NumericArray::new(vec![2, 3], vec![0.0; 6]).is_ok());
        assert!(NumericArray::new(vec![2, 3], vec![0.0; 5]).is_err());
    }

    #[test]
    fn test_dimension_len() {
        let var = VarDescriptor::new(
            "temp",
            vec!["time".into(), "lat".into(), "lon".into()],
            vec![3, 10, 20],
        );
        assert_eq!(var.dimension_len("lat"), Some(10));
        assert_eq!(var.dimension_len("level"), None);
    }

    #[test]
    fn test_time_dimension_by_name() {
        let var = VarDescriptor::new(
            "temp",
            vec!["reftime".into(), "time".into(), "lat".into()],
            vec![1, 5, 10],
        );
        assert_eq!(var.time_dimension("time").unwrap(), (1, 5));
        assert_eq!(var.shape_without(1), vec![1, 10]);
        assert!(matches!(
            var.time_dimension("time1"),
            Err(CodecError::InvalidFormat(_))
        ));
    }
}
