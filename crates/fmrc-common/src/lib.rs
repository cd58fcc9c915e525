//! Common types shared across the forecast aggregation workspace.

pub mod geometry;
pub mod time;

pub use geometry::{AxisKind, CoordinateGeometry, GeometryAxis, GeometryDifference, GeometryId};
pub use time::{is_time_units, parse_instant, ForecastOffset, RunTime, TimeParseError, TimeUnits, ValidTime};
