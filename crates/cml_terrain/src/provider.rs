// crates/cml_terrain/src/provider.rs

//! 高程查询接口
//!
//! 抽象高程数据的获取，特征构建与回归克里金趋势项共用同一实现。

use cml_geo::Point2D;
use std::sync::Arc;

/// 高程查询 trait
///
/// 覆盖范围外或无数据的位置返回 `None`（未解析）。
pub trait ElevationLookup: Send + Sync {
    /// 获取单点高程
    fn elevation_at(&self, point: &Point2D) -> Option<f64>;

    /// 批量获取高程
    fn elevations_at(&self, points: &[Point2D]) -> Vec<Option<f64>> {
        points.iter().map(|p| self.elevation_at(p)).collect()
    }
}

impl<T: ElevationLookup + ?Sized> ElevationLookup for &T {
    fn elevation_at(&self, point: &Point2D) -> Option<f64> {
        (**self).elevation_at(point)
    }
}

impl<T: ElevationLookup + ?Sized> ElevationLookup for Arc<T> {
    fn elevation_at(&self, point: &Point2D) -> Option<f64> {
        (**self).elevation_at(point)
    }
}

impl<T: ElevationLookup + ?Sized> ElevationLookup for Box<T> {
    fn elevation_at(&self, point: &Point2D) -> Option<f64> {
        (**self).elevation_at(point)
    }
}
