//! NetCDF/HDF5 codec backed by the native `netcdf` library.
//!
//! Metadata is read once at open time and the library handle is dropped
//! again; `read_cell` reopens the file. The native handle therefore never
//! crosses threads.

use netcdf::AttributeValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{
    AxisDescriptor, CodecError, CodecResult, FileHandle, GridCodec, NumericArray, VarDescriptor,
};

/// Variable attributes copied onto axis descriptors.
const AXIS_ATTRIBUTES: [&str; 6] = [
    "_CoordinateAxisType",
    "axis",
    "standard_name",
    "long_name",
    "positive",
    "calendar",
];

/// Codec for NetCDF-3/4 files.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetcdfCodec;

impl NetcdfCodec {
    pub fn new() -> Self {
        Self
    }
}

impl GridCodec for NetcdfCodec {
    fn open(&self, path: &Path) -> CodecResult<Box<dyn FileHandle>> {
        let file = netcdf::open(path).map_err(|e| CodecError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut attributes = BTreeMap::new();
        for attr in file.attributes() {
            if let Ok(value) = attr.value() {
                attributes.insert(attr.name().to_string(), render(&value));
            }
        }

        let mut variables = Vec::new();
        let mut axes = Vec::new();

        for var in file.variables() {
            let name = var.name();
            let dimensions: Vec<String> =
                var.dimensions().iter().map(|d| d.name()).collect();
            let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();

            let mut var_attributes = BTreeMap::new();
            for attr in var.attributes() {
                if let Ok(value) = attr.value() {
                    var_attributes.insert(attr.name().to_string(), render(&value));
                }
            }

            // A 1-D variable named after its dimension is a coordinate axis.
            if dimensions.len() == 1 && dimensions[0] == name {
                let values: Vec<f64> = var.get_values(..).map_err(|e| {
                    CodecError::Read(format!("coordinate '{}': {}", name, e))
                })?;

                let mut axis = AxisDescriptor::new(name.clone(), values);
                axis.units = var_attributes.get("units").cloned();
                for key in AXIS_ATTRIBUTES {
                    if let Some(value) = var_attributes.get(key) {
                        axis.attributes.insert(key.to_string(), value.clone());
                    }
                }
                axes.push(axis);
            }

            let mut descriptor = VarDescriptor::new(name, dimensions, shape);
            descriptor.attributes = var_attributes;
            variables.push(descriptor);
        }

        // Dimensions without a coordinate variable become index axes.
        for dim in file.dimensions() {
            let name = dim.name();
            if !axes.iter().any(|a| a.name == name) {
                let values = (0..dim.len()).map(|i| i as f64).collect();
                axes.push(AxisDescriptor::new(name, values));
            }
        }

        debug!(
            path = %path.display(),
            axes = axes.len(),
            variables = variables.len(),
            "Opened NetCDF file"
        );

        Ok(Box::new(NetcdfHandle {
            path: path.to_path_buf(),
            axes,
            variables,
            attributes,
        }))
    }

    fn name(&self) -> &'static str {
        "netcdf"
    }
}

struct NetcdfHandle {
    path: PathBuf,
    axes: Vec<AxisDescriptor>,
    variables: Vec<VarDescriptor>,
    attributes: BTreeMap<String, String>,
}

impl FileHandle for NetcdfHandle {
    fn axes(&self) -> CodecResult<Vec<AxisDescriptor>> {
        Ok(self.axes.clone())
    }

    fn variables(&self) -> CodecResult<Vec<VarDescriptor>> {
        Ok(self.variables.clone())
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.get(name).cloned()
    }

    fn read_cell(
        &self,
        variable: &str,
        time_dimension: &str,
        time_index: usize,
    ) -> CodecResult<NumericArray> {
        let descriptor = self
            .variables
            .iter()
            .find(|v| v.name == variable)
            .ok_or_else(|| CodecError::MissingVariable(variable.to_string()))?;

        let (time_dim, steps) = descriptor.time_dimension(time_dimension)?;
        if time_index >= steps {
            return Err(CodecError::TimeIndex {
                variable: variable.to_string(),
                index: time_index,
                len: steps,
            });
        }

        let file = netcdf::open(&self.path).map_err(|e| CodecError::Open {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        let var = file
            .variable(variable)
            .ok_or_else(|| CodecError::MissingVariable(variable.to_string()))?;

        let raw: Vec<f32> = var
            .get_values(..)
            .map_err(|e| CodecError::Read(format!("'{}': {}", variable, e)))?;

        let fill = descriptor
            .attributes
            .get("_FillValue")
            .and_then(|v| v.parse::<f32>().ok());
        let values = select_step(&raw, &descriptor.shape, time_dim, time_index)
            .into_iter()
            .map(|v| match fill {
                Some(fill) if v == fill => f32::NAN,
                _ => v,
            })
            .collect();

        NumericArray::new(descriptor.shape_without(time_dim), values)
    }
}

/// Extract the hyperslab at `index` along dimension `dim` from a row-major
/// array of the given shape.
fn select_step(values: &[f32], shape: &[usize], dim: usize, index: usize) -> Vec<f32> {
    let inner: usize = shape[dim + 1..].iter().product();
    let outer: usize = shape[..dim].iter().product();
    let len = shape[dim];

    let mut out = Vec::with_capacity(outer * inner);
    for o in 0..outer {
        let start = (o * len + index) * inner;
        out.extend_from_slice(&values[start..start + inner]);
    }
    out
}

fn render(value: &AttributeValue) -> String {
    match value {
        AttributeValue::Str(s) => s.clone(),
        AttributeValue::Strs(v) => v.join(","),
        AttributeValue::Double(v) => v.to_string(),
        AttributeValue::Float(v) => v.to_string(),
        AttributeValue::Int(v) => v.to_string(),
        AttributeValue::Short(v) => v.to_string(),
        AttributeValue::Longlong(v) => v.to_string(),
        AttributeValue::Uint(v) => v.to_string(),
        AttributeValue::Ushort(v) => v.to_string(),
        AttributeValue::Ulonglong(v) => v.to_string(),
        AttributeValue::Uchar(v) => v.to_string(),
        AttributeValue::Schar(v) => v.to_string(),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_step_leading_time() {
        // shape [2, 3]: two steps of three values
        let values = [0.0, 1.0, 2.0, 10.0, 11.0, 12.0];
        assert_eq!(select_step(&values, &[2, 3], 0, 1), vec![10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_select_step_inner_time() {
        // shape [2 (member), 2 (time), 2 (x)]
        let values = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        assert_eq!(
            select_step(&values, &[2, 2, 2], 1, 1),
            vec![2.0, 3.0, 6.0, 7.0]
        );
    }

    #[test]
    fn test_open_missing_file() {
        let codec = NetcdfCodec::new();
        assert!(matches!(
            codec.open(Path::new("/definitely/not/here.nc")),
            Err(CodecError::Open { .. })
        ));
    }
}
