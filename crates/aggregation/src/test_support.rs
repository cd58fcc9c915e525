//! Inventory builders shared by unit tests.

use chrono::{Duration, TimeZone, Utc};
use fmrc_common::{AxisKind, CoordinateGeometry, ForecastOffset, GeometryAxis, RunTime};
use std::collections::BTreeMap;

use crate::discovery::FileSignature;
use crate::inventory::{RunInventory, SourceFile, VariableInventory};

/// 2024-01-01 00Z plus `hours`.
pub fn run_at(hours: i64) -> RunTime {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
}

pub fn latlon_geometry() -> CoordinateGeometry {
    CoordinateGeometry::new(vec![
        GeometryAxis::new("lat", AxisKind::Lat, &[30.0, 40.0, 50.0]),
        GeometryAxis::new("lon", AxisKind::Lon, &[-120.0, -110.0, -100.0, -90.0]),
    ])
}

pub fn levels_geometry(levels: &[f64]) -> CoordinateGeometry {
    let mut axes = latlon_geometry().axes().to_vec();
    axes.push(GeometryAxis::new("isobaric", AxisKind::Pressure, levels));
    CoordinateGeometry::new(axes)
}

/// Run on the lat/lon test grid with the given variables and offsets (hours).
pub fn inventory(run_time: RunTime, path: &str, variables: &[(&str, &[i64])]) -> RunInventory {
    inventory_in(latlon_geometry(), run_time, path, variables)
}

/// Run whose variables all live on `geometry`.
pub fn inventory_in(
    geometry: CoordinateGeometry,
    run_time: RunTime,
    path: &str,
    variables: &[(&str, &[i64])],
) -> RunInventory {
    let variables: Vec<(&str, &CoordinateGeometry, &[i64])> = variables
        .iter()
        .map(|(name, offsets)| (*name, &geometry, *offsets))
        .collect();
    mixed_inventory(run_time, path, &variables)
}

/// Run with one geometry per variable.
pub fn mixed_inventory(
    run_time: RunTime,
    path: &str,
    variables: &[(&str, &CoordinateGeometry, &[i64])],
) -> RunInventory {
    let geometries: Vec<CoordinateGeometry> =
        variables.iter().map(|(_, g, _)| (*g).clone()).collect();

    let variables: BTreeMap<String, VariableInventory> = variables
        .iter()
        .map(|(name, geometry, offsets)| {
            (
                name.to_string(),
                VariableInventory {
                    time_axis: "time".to_string(),
                    offsets: offsets.iter().map(|h| ForecastOffset::from_hours(*h)).collect(),
                    dimensions: geometry.axes().iter().map(|a| a.name.clone()).collect(),
                    geometry: geometry.id().clone(),
                },
            )
        })
        .collect();

    RunInventory::new(
        run_time,
        SourceFile {
            path: path.into(),
            signature: FileSignature::new(1, 1),
        },
        geometries,
        variables,
    )
    .unwrap()
}
