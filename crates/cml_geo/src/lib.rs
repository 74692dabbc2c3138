// crates/cml_geo/src/lib.rs
//! CML 地理空间处理模块
//!
//! 提供经纬度点、边界框、空间索引和区域掩膜。
//!
//! # 模块
//!
//! - `geometry`: 几何类型 (Point2D) 与大圆距离
//! - `spatial_index`: 边界框与基于 R-tree 的空间索引
//! - `boundary`: 多边形区域（国界）掩膜，支持 GeoJSON 加载
//!
//! # 示例
//!
//! ```
//! use cml_geo::prelude::*;
//!
//! let prague = Point2D::from_lonlat(14.42, 50.08);
//! let brno = Point2D::from_lonlat(16.61, 49.20);
//! let km = prague.geodesic_distance_km(&brno);
//! assert!(km > 180.0 && km < 190.0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod boundary;
pub mod geometry;
pub mod spatial_index;

/// 预导入模块
pub mod prelude {
    pub use crate::boundary::BoundaryMask;
    pub use crate::geometry::Point2D;
    pub use crate::spatial_index::{BoundingBox, SpatialIndex};
}

// 重导出常用类型
pub use boundary::BoundaryMask;
pub use geometry::Point2D;
pub use spatial_index::{BoundingBox, SpatialIndex};
