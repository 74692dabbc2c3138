// crates/cml_terrain/tests/regression_kriging.rs

//! 回归克里金端到端测试：ASCII DEM → 趋势 → 残差克里金 → 网格

use cml_geo::{BoundaryMask, BoundingBox, Point2D};
use cml_terrain::dem::{RasterDem, SampleMethod};
use cml_terrain::interpolation::{
    FactoredSystem, GridSpec, InterpolationError, KrigingConfig, LinearSolver, RegressionKriging,
    SamplePoint,
};
use cml_terrain::provider::ElevationLookup;
use nalgebra::DMatrix;
use std::io::Write;
use std::sync::Arc;

/// 4x4 DEM，经度 14-15、纬度 49-50，自南向北升高
const DEM_ASC: &str = "\
ncols 4
nrows 4
xllcorner 14.0
yllcorner 49.0
cellsize 0.25
NODATA_value -9999
800 800 800 800
600 600 600 600
400 400 400 400
200 200 200 200
";

fn load_dem() -> RasterDem {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(DEM_ASC.as_bytes()).unwrap();
    RasterDem::from_ascii_grid(file.path(), SampleMethod::Bilinear).unwrap()
}

fn three_points(dem: &RasterDem) -> Vec<SamplePoint> {
    [(14.2, 49.2, 0.1), (14.5, 49.5, -0.1), (14.8, 49.8, 0.05)]
        .iter()
        .map(|&(lon, lat, noise)| {
            let loc = Point2D::from_lonlat(lon, lat);
            let z = dem.elevation_at(&loc).unwrap();
            SamplePoint::new(loc, 20.0 - 0.006 * z + noise)
        })
        .collect()
}

#[test]
fn test_three_points_trend_and_exactness() {
    let dem = load_dem();
    let points = three_points(&dem);
    let engine = RegressionKriging::new(KrigingConfig::default());
    let fitted = engine.fit(&points, &dem).unwrap();

    // 温度随高程降低
    assert!(fitted.trend().elevation_slope() < 0.0);
    // 三个点不足以拟合变异函数
    assert!(fitted.variogram().is_fallback());

    for p in &points {
        let v = fitted.predict_at(&p.location, dem.elevation_at(&p.location)).unwrap();
        assert!((v - p.value).abs() < 1e-6, "{} vs {}", v, p.value);
    }
}

#[test]
fn test_grid_is_deterministic() {
    let dem = load_dem();
    let points = three_points(&dem);
    let engine = RegressionKriging::new(KrigingConfig::default());
    let grid = GridSpec::new(BoundingBox::new(14.0, 49.0, 15.0, 50.0), 9, 11);

    let a = engine.interpolate(&points, &dem, &grid).unwrap();
    let b = engine.interpolate(&points, &dem, &grid).unwrap();

    assert_eq!(a.shape(), (9, 11));
    assert_eq!(a.x_coords.dim(), a.temperature.dim());
    assert_eq!(a.y_coords.dim(), a.temperature.dim());
    assert_eq!(a.temperature, b.temperature);
    assert_eq!(a.valid_cells(), 99);

    // 行沿纬度升高，列沿经度升高
    assert!((a.x_coords[(0, 0)] - 14.0).abs() < 1e-12);
    assert!((a.x_coords[(0, 10)] - 15.0).abs() < 1e-12);
    assert!((a.y_coords[(0, 0)] - 49.0).abs() < 1e-12);
    assert!((a.y_coords[(8, 0)] - 50.0).abs() < 1e-12);
}

#[test]
fn test_higher_cells_are_colder() {
    let dem = load_dem();
    let points = three_points(&dem);
    let engine = RegressionKriging::new(KrigingConfig::default());
    let grid = GridSpec::new(BoundingBox::new(14.2, 49.2, 14.8, 49.8), 5, 3);
    let out = engine.interpolate(&points, &dem, &grid).unwrap();

    let south = out.temperature[(0, 1)];
    let north = out.temperature[(4, 1)];
    assert!(north < south);
}

#[test]
fn test_cells_outside_dem_use_fallback_elevation() {
    let dem = load_dem();
    let points = three_points(&dem);
    let engine = RegressionKriging::new(KrigingConfig::default());
    let grid = GridSpec::new(BoundingBox::new(14.0, 49.0, 16.0, 50.0), 3, 5);
    let out = engine.interpolate(&points, &dem, &grid).unwrap();

    // 经度 15.5 与 16.0 不在 DEM 覆盖内，仍有有限值
    assert!(dem.elevation_at(&Point2D::from_lonlat(16.0, 49.5)).is_none());
    assert!(out.temperature.iter().all(|v| v.is_finite()));
}

#[test]
fn test_constant_field_falls_back() {
    let dem = load_dem();
    let mut points = Vec::new();
    for i in 0..4 {
        for j in 0..3 {
            let loc = Point2D::from_lonlat(14.1 + 0.25 * i as f64, 49.1 + 0.35 * j as f64);
            points.push(SamplePoint::new(loc, 12.5));
        }
    }

    let engine = RegressionKriging::new(KrigingConfig::default());
    let fitted = engine.fit(&points, &dem).unwrap();
    assert!(fitted.variogram().is_fallback());
    assert!(fitted.trend().elevation_slope().abs() < 1e-9);

    let grid = GridSpec::new(BoundingBox::new(14.0, 49.0, 15.0, 50.0), 4, 4);
    let out = engine.interpolate(&points, &dem, &grid).unwrap();
    assert!(out.temperature.iter().all(|v| (v - 12.5).abs() < 1e-6));
}

#[test]
fn test_boundary_outside_is_nan() {
    let dem = load_dem();
    let points = three_points(&dem);
    let boundary = BoundaryMask::from_geojson_str(
        r#"{"type":"Polygon","coordinates":[[[13.9,48.9],[14.6,48.9],[14.6,50.1],[13.9,50.1],[13.9,48.9]]]}"#,
    )
    .unwrap();
    let engine = RegressionKriging::new(KrigingConfig::default()).with_boundary(boundary);
    let grid = GridSpec::new(BoundingBox::new(14.0, 49.0, 15.0, 50.0), 3, 5);
    let out = engine.interpolate(&points, &dem, &grid).unwrap();

    // 列: 14.0, 14.25, 14.5 在区域内; 14.75, 15.0 在区域外
    for r in 0..3 {
        assert!(out.temperature[(r, 2)].is_finite());
        assert!(out.temperature[(r, 3)].is_nan());
        assert!(out.temperature[(r, 4)].is_nan());
    }
    assert_eq!(out.valid_cells(), 9);
}

#[derive(Debug)]
struct FailingSolver;

impl LinearSolver for FailingSolver {
    fn factorize(&self, _matrix: DMatrix<f64>) -> Option<Box<dyn FactoredSystem>> {
        None
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

#[test]
fn test_singular_system_is_reported() {
    let dem = load_dem();
    let points = three_points(&dem);
    let engine = RegressionKriging::new(KrigingConfig::default()).with_solver(Arc::new(FailingSolver));
    let grid = GridSpec::new(BoundingBox::new(14.0, 49.0, 15.0, 50.0), 3, 3);

    let err = engine.interpolate(&points, &dem, &grid).unwrap_err();
    assert!(err.is_singular());
    assert!(matches!(err, InterpolationError::Singular { .. }));
}

#[test]
fn test_coincident_points_are_merged() {
    let dem = load_dem();
    let mut points = three_points(&dem);
    points.push(SamplePoint::new(points[0].location, points[0].value + 0.2));

    let engine = RegressionKriging::new(KrigingConfig::default());
    let fitted = engine.fit(&points, &dem).unwrap();
    assert_eq!(fitted.n_input(), 4);
    assert_eq!(fitted.n_points(), 3);
}
