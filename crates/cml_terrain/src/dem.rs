// crates/cml_terrain/src/dem.rs

//! 数字高程模型 (DEM)
//!
//! 在栅格上按最近邻或双线性采样高程。点特征与网格单元使用同一采样方法。
//!
//! # 示例
//!
//! ```
//! use cml_terrain::dem::{RasterDem, SampleMethod};
//! use cml_terrain::raster::{GeoTransform, RasterData};
//! use cml_terrain::provider::ElevationLookup;
//! use cml_geo::Point2D;
//!
//! let raster = RasterData::from_data(vec![0.0, 10.0, 20.0, 30.0], 2, 2, -9999.0).unwrap();
//! let dem = RasterDem::new(raster, GeoTransform::new(0.0, 1.0, 1.0, -1.0), SampleMethod::Bilinear);
//!
//! let z = dem.elevation_at(&Point2D::new(0.5, 0.5)).unwrap();
//! assert!((z - 15.0).abs() < 1e-10);
//! ```

use crate::provider::ElevationLookup;
use crate::raster::{read_ascii_grid, GeoTransform, RasterData};
use cml_foundation::error::CmlResult;
use cml_geo::{BoundingBox, Point2D};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 采样方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleMethod {
    /// 最近邻
    Nearest,
    /// 双线性
    #[default]
    Bilinear,
}

impl SampleMethod {
    /// 获取方法名称
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Bilinear => "bilinear",
        }
    }
}

/// 栅格 DEM
#[derive(Debug, Clone)]
pub struct RasterDem {
    raster: RasterData,
    transform: GeoTransform,
    method: SampleMethod,
}

impl RasterDem {
    /// 由栅格与仿射变换创建
    pub fn new(raster: RasterData, transform: GeoTransform, method: SampleMethod) -> Self {
        Self {
            raster,
            transform,
            method,
        }
    }

    /// 从 ESRI ASCII Grid 文件加载
    pub fn from_ascii_grid(path: impl AsRef<Path>, method: SampleMethod) -> CmlResult<Self> {
        let path = path.as_ref();
        let (raster, transform) = read_ascii_grid(path)?;
        tracing::info!(
            "DEM 已加载: {} ({} x {}, {})",
            path.display(),
            raster.width,
            raster.height,
            method.name()
        );
        Ok(Self::new(raster, transform, method))
    }

    /// 采样方法
    pub fn method(&self) -> SampleMethod {
        self.method
    }

    /// 栅格数据
    pub fn raster(&self) -> &RasterData {
        &self.raster
    }

    /// 覆盖范围（像素外边界）
    pub fn coverage(&self) -> BoundingBox {
        let (x0, y0) = self.transform.pixel_to_geo(-0.5, -0.5);
        let (x1, y1) = self.transform.pixel_to_geo(
            self.raster.width as f64 - 0.5,
            self.raster.height as f64 - 0.5,
        );
        BoundingBox::new(x0, y0, x1, y1)
    }

    fn sample_nearest(&self, px: f64, py: f64) -> Option<f64> {
        let ix = px.round();
        let iy = py.round();
        if ix < 0.0 || iy < 0.0 {
            return None;
        }
        self.raster.valid(ix as usize, iy as usize)
    }

    fn sample_bilinear(&self, px: f64, py: f64) -> Option<f64> {
        let x0 = px.floor();
        let y0 = py.floor();

        // 边缘半个像素内退化为最近邻
        if x0 < 0.0
            || y0 < 0.0
            || x0 + 1.0 >= self.raster.width as f64
            || y0 + 1.0 >= self.raster.height as f64
        {
            return self.sample_nearest(px, py);
        }

        let dx = px - x0;
        let dy = py - y0;
        let (x0, y0) = (x0 as usize, y0 as usize);

        let taps = [
            (x0, y0, (1.0 - dx) * (1.0 - dy)),
            (x0 + 1, y0, dx * (1.0 - dy)),
            (x0, y0 + 1, (1.0 - dx) * dy),
            (x0 + 1, y0 + 1, dx * dy),
        ];

        let mut sum = 0.0;
        let mut weight_sum = 0.0;
        let mut has_nodata = false;
        for (x, y, w) in taps {
            match self.raster.valid(x, y) {
                Some(v) => {
                    sum += v * w;
                    weight_sum += w;
                }
                None => has_nodata = true,
            }
        }

        if weight_sum < 1e-10 || (has_nodata && weight_sum < 0.5) {
            None
        } else {
            Some(sum / weight_sum)
        }
    }
}

impl ElevationLookup for RasterDem {
    fn elevation_at(&self, point: &Point2D) -> Option<f64> {
        if !point.is_finite() {
            return None;
        }
        let (px, py) = self.transform.geo_to_pixel(point.x, point.y);
        match self.method {
            SampleMethod::Nearest => self.sample_nearest(px, py),
            SampleMethod::Bilinear => self.sample_bilinear(px, py),
        }
    }
}
