//! Scans and reads of real NetCDF files through `NetcdfCodec`.
//!
//! Small runs are written into a temporary collection root with the
//! `netcdf` crate. The sample-file test skips itself unless a model run is
//! placed under `testdata/` or `TEST_DATA_DIR`.

#![cfg(feature = "netcdf")]

use aggregation::{
    scan_file, Collection, CollectionConfig, DiscoveredFile, FileHandle, FileSignature, GridCodec,
    LogicalIndex, NetcdfCodec, ScanOptions, ViewKind,
};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use storage::ObjectIndexStore;
use test_utils::{
    assert_approx_eq, assert_time_eq, require_test_file, run_file_name, run_time,
    CollectionDir,
};

const LATS: [f64; 3] = [30.0, 40.0, 50.0];
const LONS: [f64; 4] = [-120.0, -110.0, -100.0, -90.0];
const FILL: f32 = -999.0;

/// Write a run with `temp(time, lat, lon)` where cell values are
/// `step * 100 + cell`. The last cell of the first step is the fill value.
fn write_run(path: &Path, run: DateTime<Utc>, offsets: &[f64]) -> Result<(), netcdf::Error> {
    let mut file = netcdf::create(path)?;
    file.add_attribute("_CoordinateModelRunDate", run.to_rfc3339().as_str())?;

    file.add_dimension("time", offsets.len())?;
    file.add_dimension("lat", LATS.len())?;
    file.add_dimension("lon", LONS.len())?;

    {
        let mut time = file.add_variable::<f64>("time", &["time"])?;
        let units = format!("hours since {}", run.format("%Y-%m-%dT%H:%M:%SZ"));
        time.put_attribute("units", units.as_str())?;
        time.put_attribute("standard_name", "time")?;
        time.put_values(offsets, ..)?;
    }
    {
        let mut lat = file.add_variable::<f64>("lat", &["lat"])?;
        lat.put_attribute("units", "degrees_north")?;
        lat.put_values(&LATS, ..)?;
    }
    {
        let mut lon = file.add_variable::<f64>("lon", &["lon"])?;
        lon.put_attribute("units", "degrees_east")?;
        lon.put_values(&LONS, ..)?;
    }

    let cells = LATS.len() * LONS.len();
    let mut values: Vec<f32> = (0..offsets.len())
        .flat_map(|step| (0..cells).map(move |cell| (step * 100 + cell) as f32))
        .collect();
    values[cells - 1] = FILL;

    let mut temp = file.add_variable::<f32>("temp", &["time", "lat", "lon"])?;
    temp.set_fill_value(FILL)?;
    temp.put_attribute("units", "K")?;
    temp.put_values(&values, ..)?;

    Ok(())
}

fn discovered(path: &Path) -> DiscoveredFile {
    DiscoveredFile {
        path: path.to_path_buf(),
        signature: FileSignature::of(path).unwrap(),
    }
}

#[test]
fn test_scan_written_run() {
    let dir = CollectionDir::new();
    let path = dir.path().join(run_file_name("gfs", run_time(1, 0)));
    write_run(&path, run_time(1, 0), &[0.0, 6.0, 12.0]).unwrap();

    let run = scan_file(&NetcdfCodec::new(), &discovered(&path), &ScanOptions::default()).unwrap();
    assert_time_eq!(run.run_time(), run_time(1, 0));

    let temp = run.variable("temp").unwrap();
    assert_eq!(temp.time_axis, "time");
    assert_eq!(temp.dimensions, vec!["lat", "lon"]);
    assert_eq!(
        run.offsets("temp").iter().map(|o| o.seconds()).collect::<Vec<_>>(),
        vec![0, 21_600, 43_200]
    );
    assert_eq!(run.variable_geometry("temp").unwrap().axes().len(), 2);
}

#[test]
fn test_read_cell_masks_fill_values() {
    let dir = CollectionDir::new();
    let path = dir.path().join("run.nc");
    write_run(&path, run_time(1, 0), &[0.0, 6.0]).unwrap();

    let handle = NetcdfCodec::new().open(&path).unwrap();

    let first = handle.read_cell("temp", "time", 0).unwrap();
    assert_eq!(first.shape, vec![3, 4]);
    assert_approx_eq!(first.values[1], 1.0, 1e-6);
    assert!(first.values[11].is_nan());

    let second = handle.read_cell("temp", "time", 1).unwrap();
    assert_approx_eq!(second.values[0], 100.0, 1e-6);
    assert_approx_eq!(second.values[11], 111.0, 1e-6);

    assert!(handle.read_cell("temp", "time", 2).is_err());
    assert!(handle.read_cell("wind", "time", 0).is_err());
}

#[tokio::test]
async fn test_collection_over_netcdf_runs() {
    let dir = CollectionDir::new();
    for (run, offsets) in [
        (run_time(1, 0), vec![0.0, 6.0, 12.0]),
        (run_time(1, 12), vec![0.0, 6.0]),
    ] {
        write_run(&dir.path().join(run_file_name("gfs", run)), run, &offsets).unwrap();
    }

    let collection = Collection::open(
        CollectionConfig::new("gfs", dir.path()),
        Arc::new(NetcdfCodec::new()),
        Arc::new(ObjectIndexStore::in_memory()),
    )
    .await
    .unwrap();

    let report = collection.scan().await.unwrap();
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(report.added, vec![run_time(1, 0), run_time(1, 12)]);

    let best = collection.view(ViewKind::Best, "temp").unwrap();
    // 00Z +0, +6, then the 12Z run covers 12Z and 18Z
    let descriptor = collection.resolve(&best, LogicalIndex::Series(3)).unwrap();
    assert_time_eq!(descriptor.valid_time, run_time(1, 18));
    assert_eq!(descriptor.time_index, 1);

    let array = collection.read(&descriptor).await.unwrap();
    assert_eq!(array.shape, vec![3, 4]);
    assert_approx_eq!(array.values[0], 100.0, 1e-6);
}

#[test]
fn test_sample_model_run() {
    let path = require_test_file!("gfs_sample.nc");

    let codec = NetcdfCodec::new();
    let run = scan_file(&codec, &discovered(&path), &ScanOptions::default()).unwrap();
    assert!(!run.variables().is_empty());

    let handle = codec.open(&path).unwrap();
    for (name, variable) in run.variables() {
        let cell = handle.read_cell(name, &variable.time_axis, 0).unwrap();
        assert!(!cell.is_empty(), "{} has an empty first step", name);
    }
}
