//! Coordinate geometry descriptors and their canonical signature.
//!
//! A [`CoordinateGeometry`] describes the non-time axes a run's data
//! variables depend on. Two geometries are compatible iff their canonical
//! signatures (ordered tuples of axis kind, length and key coordinate
//! values) are identical. The signature and its short [`GeometryId`] are
//! computed once at construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Classification of a coordinate axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AxisKind {
    /// Model run (reference) time
    RunTime,
    /// Forecast/valid time
    Time,
    /// Generic vertical coordinate
    GeoZ,
    /// Height above a surface
    Height,
    /// Isobaric level
    Pressure,
    /// Projected Y
    GeoY,
    /// Projected X
    GeoX,
    /// Latitude
    Lat,
    /// Longitude
    Lon,
    /// Ensemble member
    Ensemble,
    /// Anything unrecognised
    Other,
}

impl AxisKind {
    pub fn is_time(&self) -> bool {
        matches!(self, AxisKind::Time | AxisKind::RunTime)
    }

    pub fn is_vertical(&self) -> bool {
        matches!(self, AxisKind::GeoZ | AxisKind::Height | AxisKind::Pressure)
    }

    /// Parse a `_CoordinateAxisType` attribute value.
    pub fn from_axis_type(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "runtime" => Some(AxisKind::RunTime),
            "time" => Some(AxisKind::Time),
            "geoz" => Some(AxisKind::GeoZ),
            "height" => Some(AxisKind::Height),
            "pressure" => Some(AxisKind::Pressure),
            "geoy" => Some(AxisKind::GeoY),
            "geox" => Some(AxisKind::GeoX),
            "lat" => Some(AxisKind::Lat),
            "lon" => Some(AxisKind::Lon),
            "ensemble" => Some(AxisKind::Ensemble),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AxisKind::RunTime => "RunTime",
            AxisKind::Time => "Time",
            AxisKind::GeoZ => "GeoZ",
            AxisKind::Height => "Height",
            AxisKind::Pressure => "Pressure",
            AxisKind::GeoY => "GeoY",
            AxisKind::GeoX => "GeoX",
            AxisKind::Lat => "Lat",
            AxisKind::Lon => "Lon",
            AxisKind::Ensemble => "Ensemble",
            AxisKind::Other => "Other",
        }
    }

    fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for AxisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One non-time axis of a geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryAxis {
    /// Axis name as found in the file (not part of the identity)
    pub name: String,
    pub kind: AxisKind,
    pub length: usize,
    /// Key coordinate values: every level for vertical and ensemble axes,
    /// first and last coordinate otherwise.
    pub key_values: Vec<f64>,
}

impl GeometryAxis {
    /// Build an axis descriptor, keeping only the values that take part in
    /// the geometry identity.
    pub fn new(name: impl Into<String>, kind: AxisKind, values: &[f64]) -> Self {
        let key_values = if kind.is_vertical() || kind == AxisKind::Ensemble {
            values.to_vec()
        } else {
            match (values.first(), values.last()) {
                (Some(first), Some(last)) => vec![*first, *last],
                _ => Vec::new(),
            }
        };

        Self {
            name: name.into(),
            kind,
            length: values.len(),
            key_values,
        }
    }

    fn signature(&self) -> AxisSignature {
        AxisSignature {
            kind: self.kind,
            length: self.length,
            key_bits: self.key_values.iter().map(|v| canonical_bits(*v)).collect(),
        }
    }
}

/// Normalise -0.0 and NaN payloads so equal values hash equally.
fn canonical_bits(value: f64) -> u64 {
    if value == 0.0 {
        0.0f64.to_bits()
    } else if value.is_nan() {
        f64::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct AxisSignature {
    kind: AxisKind,
    length: usize,
    key_bits: Vec<u64>,
}

/// Short identity of a geometry signature (CRC-32 digest, hex).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeometryId(String);

impl GeometryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeometryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The horizontal/vertical coordinate system of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "StoredGeometry", try_from = "StoredGeometry")]
pub struct CoordinateGeometry {
    axes: Vec<GeometryAxis>,
    signature: Vec<AxisSignature>,
    id: GeometryId,
}

impl CoordinateGeometry {
    /// Build a geometry from its axes. Axes are put in canonical order
    /// (kind, length, key values, then name) so that file axis order does
    /// not affect identity.
    pub fn new(axes: Vec<GeometryAxis>) -> Self {
        let mut keyed: Vec<(AxisSignature, GeometryAxis)> =
            axes.into_iter().map(|a| (a.signature(), a)).collect();
        keyed.sort_by(|(sa, a), (sb, b)| sa.cmp(sb).then_with(|| a.name.cmp(&b.name)));

        let (signature, axes): (Vec<_>, Vec<_>) = keyed.into_iter().unzip();
        let id = digest(&signature);

        Self {
            axes,
            signature,
            id,
        }
    }

    pub fn axes(&self) -> &[GeometryAxis] {
        &self.axes
    }

    pub fn id(&self) -> &GeometryId {
        &self.id
    }

    pub fn vertical_axes(&self) -> impl Iterator<Item = &GeometryAxis> {
        self.axes.iter().filter(|a| a.kind.is_vertical())
    }

    /// Human-readable shape, e.g. `Pressure(4) Lat(181) Lon(360)`.
    pub fn describe(&self) -> String {
        self.axes
            .iter()
            .map(|a| format!("{}({})", a.kind, a.length))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// First structural difference between `self` (the reference) and
    /// `other`, or `None` when the geometries are identical.
    pub fn difference(&self, other: &CoordinateGeometry) -> Option<GeometryDifference> {
        if self.signature == other.signature {
            return None;
        }

        if self.axes.len() != other.axes.len() {
            return Some(GeometryDifference::AxisCount {
                expected: self.axes.len(),
                found: other.axes.len(),
            });
        }

        let mut expected_kinds: Vec<AxisKind> = self.axes.iter().map(|a| a.kind).collect();
        let mut found_kinds: Vec<AxisKind> = other.axes.iter().map(|a| a.kind).collect();
        expected_kinds.sort();
        found_kinds.sort();
        if let Some((expected, found)) = expected_kinds
            .iter()
            .zip(found_kinds.iter())
            .find(|(e, f)| e != f)
        {
            return Some(GeometryDifference::AxisKind {
                expected: *expected,
                found: *found,
            });
        }

        for (reference, candidate) in self.signature.iter().zip(other.signature.iter()) {
            if reference == candidate {
                continue;
            }
            let kind = reference.kind;
            if kind.is_vertical() {
                return Some(GeometryDifference::VerticalLevels {
                    kind,
                    expected: reference.length,
                    found: candidate.length,
                });
            }
            if reference.length != candidate.length {
                return Some(GeometryDifference::Length {
                    kind,
                    expected: reference.length,
                    found: candidate.length,
                });
            }
            return Some(GeometryDifference::Coordinates { kind });
        }

        // Signatures differ but no pairwise difference was found; only
        // possible through ordering ties, report as a count mismatch.
        Some(GeometryDifference::AxisCount {
            expected: self.axes.len(),
            found: other.axes.len(),
        })
    }
}

impl PartialEq for CoordinateGeometry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.signature == other.signature
    }
}

impl Eq for CoordinateGeometry {}

impl Hash for CoordinateGeometry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.signature.hash(state);
    }
}

fn digest(signature: &[AxisSignature]) -> GeometryId {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&(signature.len() as u64).to_le_bytes());
    for axis in signature {
        hasher.update(&[axis.kind.code()]);
        hasher.update(&(axis.length as u64).to_le_bytes());
        hasher.update(&(axis.key_bits.len() as u64).to_le_bytes());
        for bits in &axis.key_bits {
            hasher.update(&bits.to_le_bytes());
        }
    }
    GeometryId(format!("{:08x}", hasher.finalize()))
}

/// Why two geometries are not the same.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryDifference {
    AxisCount { expected: usize, found: usize },
    AxisKind { expected: AxisKind, found: AxisKind },
    Length { kind: AxisKind, expected: usize, found: usize },
    VerticalLevels { kind: AxisKind, expected: usize, found: usize },
    Coordinates { kind: AxisKind },
}

impl fmt::Display for GeometryDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryDifference::AxisCount { expected, found } => {
                write!(f, "dimension mismatch: expected {} axes, found {}", expected, found)
            }
            GeometryDifference::AxisKind { expected, found } => {
                write!(f, "axis type mismatch: expected {}, found {}", expected, found)
            }
            GeometryDifference::Length {
                kind,
                expected,
                found,
            } => write!(
                f,
                "dimension mismatch on {} axis: expected length {}, found {}",
                kind, expected, found
            ),
            GeometryDifference::VerticalLevels {
                kind,
                expected,
                found,
            } => write!(
                f,
                "differing vertical levels on {} axis ({} vs {} levels)",
                kind, expected, found
            ),
            GeometryDifference::Coordinates { kind } => {
                write!(f, "differing coordinates on {} axis", kind)
            }
        }
    }
}

/// Persisted form: the axes plus the id they hashed to when written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredGeometry {
    id: GeometryId,
    axes: Vec<GeometryAxis>,
}

impl From<CoordinateGeometry> for StoredGeometry {
    fn from(geometry: CoordinateGeometry) -> Self {
        Self {
            id: geometry.id,
            axes: geometry.axes,
        }
    }
}

impl TryFrom<StoredGeometry> for CoordinateGeometry {
    type Error = String;

    fn try_from(stored: StoredGeometry) -> Result<Self, Self::Error> {
        let geometry = CoordinateGeometry::new(stored.axes);
        if geometry.id != stored.id {
            return Err(format!(
                "geometry id mismatch: stored {}, recomputed {}",
                stored.id, geometry.id
            ));
        }
        Ok(geometry)
    }
}
