// crates/cml_geo/src/geometry.rs
//! 几何类型定义
//!
//! 提供项目统一的二维点类型以及地理距离计算。
//!
//! # 距离计算
//!
//! - `distance_to`: 欧几里得距离（坐标单位，仅用于邻域排序等近似场景）
//! - `geodesic_distance_to`: Haversine 公式（米）
//! - `geodesic_distance_km`: Haversine 公式（千米），变异函数与克里金统一使用

use serde::{Deserialize, Serialize};

// ============================================================================
// 地球物理常量
// ============================================================================

/// 地球平均半径 (米) - 用于 Haversine 公式
pub const EARTH_MEAN_RADIUS: f64 = 6_371_008.8;

// ============================================================================
// Point2D
// ============================================================================

/// 2D点 - 经纬度坐标
///
/// 约定 `x` 为经度、`y` 为纬度（度）。
///
/// # 示例
///
/// ```
/// use cml_geo::geometry::Point2D;
///
/// let a = Point2D::from_lonlat(14.0, 50.0);
/// let b = Point2D::from_lonlat(15.0, 50.0);
/// let km = a.geodesic_distance_km(&b); // 约 71.5 km
/// assert!((km - 71.5).abs() < 1.0);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    /// X坐标（经度）
    pub x: f64,
    /// Y坐标（纬度）
    pub y: f64,
}

impl Point2D {
    /// 创建新的2D点
    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// 从经纬度创建（lon, lat）
    #[inline]
    #[must_use]
    pub const fn from_lonlat(lon: f64, lat: f64) -> Self {
        Self { x: lon, y: lat }
    }

    /// 获取经度
    #[inline]
    #[must_use]
    pub const fn lon(&self) -> f64 {
        self.x
    }

    /// 获取纬度
    #[inline]
    #[must_use]
    pub const fn lat(&self) -> f64 {
        self.y
    }

    /// 欧几里得距离（坐标单位）
    #[inline]
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Haversine 公式计算大圆距离（米）
    #[must_use]
    pub fn geodesic_distance_to(&self, other: &Self) -> f64 {
        self.haversine_distance(other, EARTH_MEAN_RADIUS)
    }

    /// Haversine 公式计算大圆距离（千米）
    #[inline]
    #[must_use]
    pub fn geodesic_distance_km(&self, other: &Self) -> f64 {
        self.geodesic_distance_to(other) / 1000.0
    }

    /// Haversine 公式（可自定义球体半径）
    #[must_use]
    pub fn haversine_distance(&self, other: &Self, radius: f64) -> f64 {
        let (lat1, lat2) = (self.y.to_radians(), other.y.to_radians());
        let half_dlat = (lat2 - lat1) / 2.0;
        let half_dlon = (other.x - self.x).to_radians() / 2.0;

        let a = half_dlat.sin().powi(2) + lat1.cos() * lat2.cos() * half_dlon.sin().powi(2);

        // 浮点误差可能使 a 略大于 1
        let c = 2.0 * a.clamp(0.0, 1.0).sqrt().asin();

        radius * c
    }

    /// 检查坐标是否有限
    #[inline]
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// 检查是否为合法经纬度
    #[inline]
    #[must_use]
    pub fn is_valid_lonlat(&self) -> bool {
        self.is_finite() && (-180.0..=180.0).contains(&self.x) && (-90.0..=90.0).contains(&self.y)
    }
}
