//! Per-file run inventories.
//!
//! A [`RunInventory`] is everything the engine needs to know about one run
//! file without reading its data: the run time and, for each forecast
//! variable, the ordered forecast offsets and the geometry of the axes the
//! variable depends on. Variables on the same grid share one geometry.

use fmrc_common::{
    parse_instant, AxisKind, CoordinateGeometry, ForecastOffset, GeometryAxis, GeometryId,
    RunTime, TimeParseError, TimeUnits,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::codec::{AxisDescriptor, FileHandle, GridCodec, VarDescriptor};
use crate::config::CollectionConfig;
use crate::discovery::{run_time_from_filename, DiscoveredFile, FileSignature};
use crate::error::ScanError;

/// Backing file of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: PathBuf,
    pub signature: FileSignature,
}

impl From<&DiscoveredFile> for SourceFile {
    fn from(file: &DiscoveredFile) -> Self {
        Self {
            path: file.path.clone(),
            signature: file.signature,
        }
    }
}

/// What one run holds for one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInventory {
    /// In-file time axis the offsets come from
    pub time_axis: String,
    /// Forecast offsets, strictly increasing; position equals the in-file
    /// time index.
    pub offsets: Vec<ForecastOffset>,
    /// Non-time dimensions, in file order
    pub dimensions: Vec<String>,
    /// Geometry of `dimensions`; a key of the run's geometries
    pub geometry: GeometryId,
}

/// Metadata of one model run, built from exactly one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInventory {
    run_time: RunTime,
    source: SourceFile,
    geometries: BTreeMap<GeometryId, CoordinateGeometry>,
    variables: BTreeMap<String, VariableInventory>,
}

impl RunInventory {
    /// Assemble an inventory from its variables and the geometries they
    /// refer to. Fails on a broken invariant (see [`validate`](Self::validate)).
    pub fn new(
        run_time: RunTime,
        source: SourceFile,
        geometries: impl IntoIterator<Item = CoordinateGeometry>,
        variables: BTreeMap<String, VariableInventory>,
    ) -> Result<Self, ScanError> {
        let inventory = Self {
            run_time,
            source,
            geometries: geometries
                .into_iter()
                .map(|g| (g.id().clone(), g))
                .collect(),
            variables,
        };
        inventory.validate()?;
        Ok(inventory)
    }

    /// Check the inventory invariants: offsets strictly increasing and
    /// representable as instants, every variable on a known geometry, and
    /// geometries keyed by their own id.
    pub fn validate(&self) -> Result<(), ScanError> {
        for (key, geometry) in &self.geometries {
            if key != geometry.id() {
                return Err(ScanError::GeometryKey {
                    key: key.clone(),
                    found: geometry.id().clone(),
                });
            }
        }

        for (name, variable) in &self.variables {
            check_increasing(name, &variable.offsets)?;

            if let Some(offset) = variable
                .offsets
                .iter()
                .find(|o| o.valid_at(self.run_time).is_none())
            {
                return Err(ScanError::OffsetOutOfRange {
                    variable: name.clone(),
                    run_time: self.run_time,
                    offset: *offset,
                });
            }

            if !self.geometries.contains_key(&variable.geometry) {
                return Err(ScanError::UnknownGeometry {
                    variable: name.clone(),
                    geometry: variable.geometry.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn run_time(&self) -> RunTime {
        self.run_time
    }

    pub fn source(&self) -> &SourceFile {
        &self.source
    }

    pub fn path(&self) -> &Path {
        &self.source.path
    }

    /// Distinct geometries of the run's variables, by id.
    pub fn geometries(&self) -> impl Iterator<Item = &CoordinateGeometry> {
        self.geometries.values()
    }

    pub fn geometry(&self, id: &GeometryId) -> Option<&CoordinateGeometry> {
        self.geometries.get(id)
    }

    /// Geometry a variable is defined on; `None` when the run lacks it.
    pub fn variable_geometry(&self, variable: &str) -> Option<&CoordinateGeometry> {
        self.variables
            .get(variable)
            .and_then(|v| self.geometries.get(&v.geometry))
    }

    pub fn variable_geometry_id(&self, variable: &str) -> Option<&GeometryId> {
        self.variables.get(variable).map(|v| &v.geometry)
    }

    pub fn variables(&self) -> &BTreeMap<String, VariableInventory> {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&VariableInventory> {
        self.variables.get(name)
    }

    /// Offsets of a variable; empty when the run lacks it.
    pub fn offsets(&self, variable: &str) -> &[ForecastOffset] {
        self.variables
            .get(variable)
            .map(|v| v.offsets.as_slice())
            .unwrap_or(&[])
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }
}

fn check_increasing(variable: &str, offsets: &[ForecastOffset]) -> Result<(), ScanError> {
    for pair in offsets.windows(2) {
        if pair[1] <= pair[0] {
            return Err(ScanError::NonMonotonicOffsets {
                variable: variable.to_string(),
                previous: pair[0],
                next: pair[1],
            });
        }
    }
    Ok(())
}

/// Scan settings taken from the collection configuration.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Global attributes holding the run time, in priority order
    pub run_time_attributes: Vec<String>,
    /// Fall back to the file name for the run time
    pub run_time_from_filename: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from(&CollectionConfig::default())
    }
}

impl From<&CollectionConfig> for ScanOptions {
    fn from(config: &CollectionConfig) -> Self {
        Self {
            run_time_attributes: config.run_time_attributes.clone(),
            run_time_from_filename: config.run_time_from_filename,
        }
    }
}

/// Classify a coordinate axis from its declared type, attributes and units.
pub fn classify_axis(axis: &AxisDescriptor) -> AxisKind {
    if let Some(kind) = axis.axis_type {
        return kind;
    }

    if let Some(kind) = axis
        .attribute("_CoordinateAxisType")
        .and_then(AxisKind::from_axis_type)
    {
        return kind;
    }

    let standard_name = axis.attribute("standard_name").map(str::to_lowercase);
    let is_reference_time = standard_name.as_deref() == Some("forecast_reference_time");

    if let Some(cf_axis) = axis.attribute("axis") {
        match cf_axis.trim().to_uppercase().as_str() {
            "T" if is_reference_time => return AxisKind::RunTime,
            "T" => return AxisKind::Time,
            "X" => return AxisKind::GeoX,
            "Y" => return AxisKind::GeoY,
            "Z" => return AxisKind::GeoZ,
            _ => {}
        }
    }

    match standard_name.as_deref() {
        Some("time") => return AxisKind::Time,
        Some("forecast_reference_time") => return AxisKind::RunTime,
        Some("latitude") => return AxisKind::Lat,
        Some("longitude") => return AxisKind::Lon,
        Some("projection_x_coordinate") => return AxisKind::GeoX,
        Some("projection_y_coordinate") => return AxisKind::GeoY,
        Some("air_pressure") => return AxisKind::Pressure,
        Some("height") | Some("altitude") => return AxisKind::Height,
        _ => {}
    }

    if let Some(units) = axis.units.as_deref() {
        if fmrc_common::is_time_units(units) {
            return AxisKind::Time;
        }
        match units.trim().to_lowercase().as_str() {
            "degrees_north" | "degree_north" | "degree_n" | "degrees_n" | "degreen"
            | "degreesn" => return AxisKind::Lat,
            "degrees_east" | "degree_east" | "degree_e" | "degrees_e" | "degreee"
            | "degreese" => return AxisKind::Lon,
            "pa" | "hpa" | "mb" | "mbar" | "millibar" => return AxisKind::Pressure,
            _ => {}
        }
    }

    if axis.attribute("positive").is_some() {
        return AxisKind::GeoZ;
    }

    AxisKind::Other
}

struct ClassifiedAxis<'a> {
    descriptor: &'a AxisDescriptor,
    kind: AxisKind,
}

fn time_units(axis: &AxisDescriptor) -> Result<TimeUnits, ScanError> {
    let units = axis.units.as_deref().ok_or_else(|| ScanError::TimeUnits {
        axis: axis.name.clone(),
        source: TimeParseError::InvalidUnits("missing units".to_string()),
    })?;

    units.parse().map_err(|source| ScanError::TimeUnits {
        axis: axis.name.clone(),
        source,
    })
}

fn instants(axis: &AxisDescriptor) -> Result<Vec<RunTime>, ScanError> {
    let units = time_units(axis)?;
    axis.values
        .iter()
        .map(|v| {
            units.to_instant(*v).ok_or_else(|| ScanError::TimeUnits {
                axis: axis.name.clone(),
                source: TimeParseError::InvalidFormat(format!("time value {}", v)),
            })
        })
        .collect()
}

/// Build the inventory of one run file.
///
/// Blocking: opens the file through the codec.
pub fn scan_file(
    codec: &dyn GridCodec,
    file: &DiscoveredFile,
    options: &ScanOptions,
) -> Result<RunInventory, ScanError> {
    let handle = codec.open(&file.path).map_err(ScanError::Open)?;
    let result = inventory_from_handle(handle.as_ref(), file, options);

    if let Err(e) = handle.close() {
        debug!(path = %file.path.display(), error = %e, "Close failed");
    }

    result
}

fn inventory_from_handle(
    handle: &dyn FileHandle,
    file: &DiscoveredFile,
    options: &ScanOptions,
) -> Result<RunInventory, ScanError> {
    let axes = handle.axes().map_err(ScanError::Metadata)?;
    let variables = handle.variables().map_err(ScanError::Metadata)?;

    let classified: HashMap<&str, ClassifiedAxis<'_>> = axes
        .iter()
        .map(|a| {
            (
                a.name.as_str(),
                ClassifiedAxis {
                    descriptor: a,
                    kind: classify_axis(a),
                },
            )
        })
        .collect();

    let time_axes: Vec<&AxisDescriptor> = axes
        .iter()
        .filter(|a| classified[a.name.as_str()].kind == AxisKind::Time)
        .collect();
    if time_axes.is_empty() {
        return Err(ScanError::NoTimeAxis);
    }

    let run_time = determine_run_time(handle, &axes, &classified, &time_axes, file, options)?;

    let mut offsets_by_axis: HashMap<&str, Vec<ForecastOffset>> = HashMap::new();
    let mut inventories = BTreeMap::new();
    let mut geometries: BTreeMap<GeometryId, CoordinateGeometry> = BTreeMap::new();

    for var in variables.iter().filter(|v| !classified.contains_key(v.name.as_str())) {
        let Some(time_axis) = var.dimensions.iter().find(|d| {
            classified
                .get(d.as_str())
                .map(|a| a.kind == AxisKind::Time)
                .unwrap_or(false)
        }) else {
            debug!(variable = %var.name, "Skipping variable without time dimension");
            continue;
        };

        if !offsets_by_axis.contains_key(time_axis.as_str()) {
            let axis = classified[time_axis.as_str()].descriptor;
            let offsets = instants(axis)?
                .into_iter()
                .map(|t| ForecastOffset::between(run_time, t))
                .collect();
            offsets_by_axis.insert(axis.name.as_str(), offsets);
        }
        let offsets = offsets_by_axis[time_axis.as_str()].clone();
        check_increasing(&var.name, &offsets)?;

        let dimensions = non_time_dimensions(var, &classified);
        let geometry = CoordinateGeometry::new(
            dimensions
                .iter()
                .map(|dim| geometry_axis(dim, var, &classified))
                .collect(),
        );
        let geometry_id = geometry.id().clone();
        geometries.entry(geometry_id.clone()).or_insert(geometry);

        inventories.insert(
            var.name.clone(),
            VariableInventory {
                time_axis: time_axis.clone(),
                offsets,
                dimensions,
                geometry: geometry_id,
            },
        );
    }

    if inventories.is_empty() {
        return Err(ScanError::NoForecastVariables);
    }

    debug!(
        path = %file.path.display(),
        run_time = %run_time,
        variables = inventories.len(),
        geometries = geometries.len(),
        "Scanned run"
    );

    RunInventory::new(
        run_time,
        SourceFile::from(file),
        geometries.into_values(),
        inventories,
    )
}

fn non_time_dimensions(var: &VarDescriptor, classified: &HashMap<&str, ClassifiedAxis<'_>>) -> Vec<String> {
    var.dimensions
        .iter()
        .filter(|d| {
            !classified
                .get(d.as_str())
                .map(|a| a.kind.is_time())
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

fn geometry_axis(
    dim: &str,
    var: &VarDescriptor,
    classified: &HashMap<&str, ClassifiedAxis<'_>>,
) -> GeometryAxis {
    match classified.get(dim) {
        Some(axis) => GeometryAxis::new(dim, axis.kind, &axis.descriptor.values),
        None => {
            // Dimension without a coordinate axis: identity is its length.
            let len = var.dimension_len(dim).unwrap_or(0);
            let index: Vec<f64> = (0..len).map(|i| i as f64).collect();
            GeometryAxis::new(dim, AxisKind::Other, &index)
        }
    }
}

fn determine_run_time(
    handle: &dyn FileHandle,
    axes: &[AxisDescriptor],
    classified: &HashMap<&str, ClassifiedAxis<'_>>,
    time_axes: &[&AxisDescriptor],
    file: &DiscoveredFile,
    options: &ScanOptions,
) -> Result<RunTime, ScanError> {
    // 1. A run-time axis with a single value
    if let Some(axis) = axes
        .iter()
        .find(|a| classified[a.name.as_str()].kind == AxisKind::RunTime && a.len() == 1)
    {
        if let Some(run_time) = instants(axis)?.first() {
            return Ok(*run_time);
        }
    }

    // 2. Global attributes
    for name in &options.run_time_attributes {
        if let Some(value) = handle.attribute(name) {
            match parse_instant(&value) {
                Ok(run_time) => return Ok(run_time),
                Err(e) => debug!(attribute = %name, error = %e, "Ignoring run time attribute"),
            }
        }
    }

    // 3. File name
    if options.run_time_from_filename {
        if let Some(run_time) = run_time_from_filename(&file.path) {
            return Ok(run_time);
        }
    }

    // 4. The single value of the only time axis
    if let [axis] = time_axes {
        if axis.len() == 1 {
            if let Some(run_time) = instants(axis)?.first() {
                return Ok(*run_time);
            }
        }
    }

    Err(ScanError::NoRunTime)
}

/// Collect the distinct variable names of a set of inventories.
pub fn variable_union<'a>(runs: impl IntoIterator<Item = &'a RunInventory>) -> BTreeSet<String> {
    runs.into_iter()
        .flat_map(|r| r.variables.keys().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MemoryCodec, SyntheticFile};
    use chrono::{TimeZone, Utc};

    fn run() -> RunTime {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn discovered(path: &str) -> DiscoveredFile {
        DiscoveredFile {
            path: PathBuf::from(path),
            signature: FileSignature::new(1, 1),
        }
    }

    fn scan(codec: &MemoryCodec, path: &str) -> Result<RunInventory, ScanError> {
        scan_file(codec, &discovered(path), &ScanOptions::default())
    }

    #[test]
    fn test_classify_axis() {
        let lat = AxisDescriptor::new("y", vec![0.0]).with_units("degrees_north");
        assert_eq!(classify_axis(&lat), AxisKind::Lat);

        let time = AxisDescriptor::new("t", vec![0.0]).with_units("hours since 2024-01-01");
        assert_eq!(classify_axis(&time), AxisKind::Time);

        let reftime = AxisDescriptor::new("reftime", vec![0.0])
            .with_units("hours since 2024-01-01")
            .with_attribute("standard_name", "forecast_reference_time");
        assert_eq!(classify_axis(&reftime), AxisKind::RunTime);

        let declared = AxisDescriptor::new("lev", vec![2.0])
            .with_attribute("_CoordinateAxisType", "Height");
        assert_eq!(classify_axis(&declared), AxisKind::Height);

        let isobaric = AxisDescriptor::new("isobaric", vec![500.0]).with_units("hPa");
        assert_eq!(classify_axis(&isobaric), AxisKind::Pressure);

        let sigma = AxisDescriptor::new("sigma", vec![0.9]).with_attribute("positive", "down");
        assert_eq!(classify_axis(&sigma), AxisKind::GeoZ);

        let x = AxisDescriptor::new("x", vec![0.0]).with_attribute("axis", "X");
        assert_eq!(classify_axis(&x), AxisKind::GeoX);

        assert_eq!(classify_axis(&AxisDescriptor::new("member", vec![])), AxisKind::Other);
    }

    #[test]
    fn test_scan_basic_run() {
        let codec = MemoryCodec::new();
        codec.insert(
            "/data/run.nc",
            SyntheticFile::forecast_run(run(), &[0, 6, 12])
                .with_grid_variable("temp")
                .with_variable("land_mask", &["lat", "lon"]),
        );

        let inventory = scan(&codec, "/data/run.nc").unwrap();
        assert_eq!(inventory.run_time(), run());
        assert_eq!(
            inventory.offsets("temp"),
            &[
                ForecastOffset::from_hours(0),
                ForecastOffset::from_hours(6),
                ForecastOffset::from_hours(12)
            ]
        );
        // No time dimension: not a forecast variable
        assert!(inventory.variable("land_mask").is_none());
        assert!(inventory.offsets("wind").is_empty());
        assert_eq!(
            inventory.variable_geometry("temp").unwrap().describe(),
            "Lat(3) Lon(4)"
        );
        assert_eq!(inventory.variable("temp").unwrap().time_axis, "time");
    }

    #[test]
    fn test_scan_failures() {
        let codec = MemoryCodec::new();

        assert!(matches!(scan(&codec, "/missing.nc"), Err(ScanError::Open(_))));

        codec.insert(
            "/no_time.nc",
            SyntheticFile::new()
                .with_axis(AxisDescriptor::new("lat", vec![1.0]).with_units("degrees_north"))
                .with_variable("mask", &["lat"]),
        );
        assert!(matches!(scan(&codec, "/no_time.nc"), Err(ScanError::NoTimeAxis)));

        codec.insert(
            "/no_run.nc",
            SyntheticFile::forecast_run(run(), &[0, 6])
                .without_attribute("_CoordinateModelRunDate")
                .with_grid_variable("temp"),
        );
        assert!(matches!(scan(&codec, "/no_run.nc"), Err(ScanError::NoRunTime)));

        codec.insert(
            "/backwards.nc",
            SyntheticFile::forecast_run(run(), &[6, 0]).with_grid_variable("temp"),
        );
        assert!(matches!(
            scan(&codec, "/backwards.nc"),
            Err(ScanError::NonMonotonicOffsets { .. })
        ));

        codec.insert(
            "/duplicate.nc",
            SyntheticFile::forecast_run(run(), &[0, 3, 3]).with_grid_variable("temp"),
        );
        assert!(matches!(
            scan(&codec, "/duplicate.nc"),
            Err(ScanError::NonMonotonicOffsets { .. })
        ));

        codec.insert(
            "/no_vars.nc",
            SyntheticFile::forecast_run(run(), &[0, 6]),
        );
        assert!(matches!(
            scan(&codec, "/no_vars.nc"),
            Err(ScanError::NoForecastVariables)
        ));
    }

    #[test]
    fn test_run_time_sources() {
        let codec = MemoryCodec::new();

        // From the file name
        codec.insert(
            "/data/gfs_20240301_12z.nc",
            SyntheticFile::forecast_run(run(), &[0, 6])
                .without_attribute("_CoordinateModelRunDate")
                .with_grid_variable("temp"),
        );
        let inventory = scan(&codec, "/data/gfs_20240301_12z.nc").unwrap();
        assert_eq!(inventory.run_time(), run());

        // From a single-valued run-time axis, ahead of attributes
        codec.insert(
            "/reftime.nc",
            SyntheticFile::forecast_run(run(), &[0, 6])
                .with_attribute("_CoordinateModelRunDate", "1999-01-01T00:00:00Z")
                .with_axis(
                    AxisDescriptor::new("reftime", vec![12.0])
                        .with_units("hours since 2024-03-01T00:00:00Z")
                        .with_type(AxisKind::RunTime),
                )
                .with_grid_variable("temp"),
        );
        assert_eq!(scan(&codec, "/reftime.nc").unwrap().run_time(), run());

        // From the only time axis holding a single value
        codec.insert(
            "/analysis.nc",
            SyntheticFile::forecast_run(run(), &[0])
                .without_attribute("_CoordinateModelRunDate")
                .with_grid_variable("temp"),
        );
        let inventory = scan(&codec, "/analysis.nc").unwrap();
        assert_eq!(inventory.run_time(), run());
        assert_eq!(inventory.offsets("temp"), &[ForecastOffset::ZERO]);
    }

    #[test]
    fn test_variables_on_different_time_axes() {
        let codec = MemoryCodec::new();
        codec.insert(
            "/run.nc",
            SyntheticFile::forecast_run(run(), &[0, 6, 12])
                .with_axis(
                    AxisDescriptor::new("time1", vec![3.0, 9.0])
                        .with_units("hours since 2024-03-01T12:00:00Z"),
                )
                .with_pressure_levels(&[850.0, 500.0])
                .with_variable("temp", &["time", "isobaric", "lat", "lon"])
                .with_variable("precip", &["time1", "lat", "lon"]),
        );

        let inventory = scan(&codec, "/run.nc").unwrap();
        assert_eq!(inventory.offsets("temp").len(), 3);
        assert_eq!(
            inventory.offsets("precip"),
            &[ForecastOffset::from_hours(3), ForecastOffset::from_hours(9)]
        );
        assert_eq!(
            inventory.variable("precip").unwrap().dimensions,
            vec!["lat".to_string(), "lon".to_string()]
        );
    }

    #[test]
    fn test_geometry_recorded_per_variable() {
        let codec = MemoryCodec::new();
        codec.insert(
            "/run.nc",
            SyntheticFile::forecast_run(run(), &[0, 6])
                .with_pressure_levels(&[850.0, 500.0])
                .with_variable("temp", &["time", "isobaric", "lat", "lon"])
                .with_variable("precip", &["time", "lat", "lon"])
                .with_variable("snow", &["time", "lat", "lon"]),
        );
        let inventory = scan(&codec, "/run.nc").unwrap();

        assert_eq!(inventory.geometries().count(), 2);
        assert_eq!(
            inventory.variable_geometry("temp").unwrap().describe(),
            "Pressure(2) Lat(3) Lon(4)"
        );
        assert_eq!(
            inventory.variable_geometry("precip").unwrap().describe(),
            "Lat(3) Lon(4)"
        );
        assert_eq!(
            inventory.variable_geometry_id("precip"),
            inventory.variable_geometry_id("snow")
        );
        assert!(inventory.variable_geometry("wind").is_none());

        // A run with only the surface fields carries the same surface geometry
        codec.insert(
            "/surface.nc",
            SyntheticFile::forecast_run(run(), &[0, 6])
                .with_variable("precip", &["time", "lat", "lon"]),
        );
        let surface = scan(&codec, "/surface.nc").unwrap();
        assert_eq!(
            surface.variable_geometry_id("precip"),
            inventory.variable_geometry_id("precip")
        );
    }

    #[test]
    fn test_validate_rejects_broken_inventories() {
        let source = SourceFile {
            path: "/run.nc".into(),
            signature: FileSignature::new(1, 1),
        };
        let grid = CoordinateGeometry::new(vec![GeometryAxis::new("lat", AxisKind::Lat, &[1.0])]);
        let variable = |offsets: Vec<ForecastOffset>, geometry: GeometryId| {
            BTreeMap::from([(
                "temp".to_string(),
                VariableInventory {
                    time_axis: "time".to_string(),
                    offsets,
                    dimensions: vec!["lat".to_string()],
                    geometry,
                },
            )])
        };

        assert!(RunInventory::new(
            run(),
            source.clone(),
            [grid.clone()],
            variable(vec![ForecastOffset::ZERO], grid.id().clone())
        )
        .is_ok());

        assert!(matches!(
            RunInventory::new(
                run(),
                source.clone(),
                [grid.clone()],
                variable(vec![ForecastOffset::ZERO], GeometryId::new("00000000"))
            ),
            Err(ScanError::UnknownGeometry { .. })
        ));

        assert!(matches!(
            RunInventory::new(
                run(),
                source,
                [grid.clone()],
                variable(
                    vec![ForecastOffset::from_seconds(9_000_000_000_000_000_000)],
                    grid.id().clone()
                )
            ),
            Err(ScanError::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn test_serde_roundtrip_keeps_geometry_identity() {
        let codec = MemoryCodec::new();
        codec.insert(
            "/run.nc",
            SyntheticFile::forecast_run(run(), &[0, 6]).with_grid_variable("temp"),
        );
        let inventory = scan(&codec, "/run.nc").unwrap();

        let json = serde_json::to_string(&inventory).unwrap();
        let restored: RunInventory = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, inventory);
        assert_eq!(
            restored.variable_geometry_id("temp"),
            inventory.variable_geometry_id("temp")
        );
    }
}
