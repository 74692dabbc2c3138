// crates/cml_geo/src/spatial_index.rs
//! 空间索引实现
//!
//! 边界框定义插值区域；R-tree 索引用于克里金的移动邻域搜索与
//! 异常检测的半径邻域查询。
//!
//! # 示例
//!
//! ```
//! use cml_geo::spatial_index::SpatialIndex;
//! use cml_geo::geometry::Point2D;
//!
//! let index = SpatialIndex::bulk_load(vec![
//!     (Point2D::new(14.0, 50.0), 0usize),
//!     (Point2D::new(15.0, 50.0), 1),
//!     (Point2D::new(18.0, 49.0), 2),
//! ]);
//!
//! let nearest = index.nearest_values(&Point2D::new(14.2, 50.1), 2);
//! assert_eq!(nearest, vec![0, 1]);
//! ```

use crate::geometry::{Point2D, EARTH_MEAN_RADIUS};
use cml_foundation::error::{CmlError, CmlResult};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

/// 边界框（经纬度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// 最小 x（西）
    pub min_x: f64,
    /// 最小 y（南）
    pub min_y: f64,
    /// 最大 x（东）
    pub max_x: f64,
    /// 最大 y（北）
    pub max_y: f64,
}

impl BoundingBox {
    /// 创建新的边界框，自动规范化角点顺序
    #[must_use]
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: min_x.max(max_x),
            max_y: min_y.max(max_y),
        }
    }

    /// 包围一组点的最小边界框
    #[must_use]
    pub fn enclosing(points: &[Point2D]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = Self::new(first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            bbox.min_x = bbox.min_x.min(p.x);
            bbox.min_y = bbox.min_y.min(p.y);
            bbox.max_x = bbox.max_x.max(p.x);
            bbox.max_y = bbox.max_y.max(p.y);
        }
        Some(bbox)
    }

    /// 检查点是否在边界框内（含边界）
    #[must_use]
    pub fn contains_point(&self, point: &Point2D) -> bool {
        point.x >= self.min_x
            && point.x <= self.max_x
            && point.y >= self.min_y
            && point.y <= self.max_y
    }

    /// 合并两个边界框
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// 计算宽度
    #[must_use]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// 计算高度
    #[must_use]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// 计算中心点
    #[must_use]
    pub fn center(&self) -> Point2D {
        Point2D::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// 验证边界框：坐标有限且面积为正
    pub fn validate(&self) -> CmlResult<()> {
        let finite = [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(CmlError::invalid_input("边界框包含非有限坐标"));
        }
        if self.width() <= 0.0 || self.height() <= 0.0 {
            return Err(CmlError::invalid_input(format!(
                "边界框宽高必须为正: {} x {}",
                self.width(),
                self.height()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// R-tree 包装
// ============================================================================

/// 空间索引条目
#[derive(Debug, Clone)]
struct SpatialEntry<T> {
    point: Point2D,
    data: T,
}

impl<T> RTreeObject for SpatialEntry<T> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.point.x, self.point.y])
    }
}

impl<T> rstar::PointDistance for SpatialEntry<T> {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.point.x - point[0];
        let dy = self.point.y - point[1];
        dx * dx + dy * dy
    }
}

/// 空间索引
///
/// 基于 R-tree 的点索引。距离按坐标欧氏距离排序，
/// 在区域尺度（数百千米）内与大圆距离排序一致，足以选取邻域。
pub struct SpatialIndex<T> {
    tree: RTree<SpatialEntry<T>>,
}

impl<T: Clone> SpatialIndex<T> {
    /// 从点集批量构建
    #[must_use]
    pub fn bulk_load(points: Vec<(Point2D, T)>) -> Self {
        let entries: Vec<SpatialEntry<T>> = points
            .into_iter()
            .map(|(point, data)| SpatialEntry { point, data })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// 查询最近的 k 个点
    #[must_use]
    pub fn query_nearest(&self, point: &Point2D, k: usize) -> Vec<(&Point2D, &T)> {
        self.tree
            .nearest_neighbor_iter(&[point.x, point.y])
            .take(k)
            .map(|entry| (&entry.point, &entry.data))
            .collect()
    }

    /// 查询大圆距离不超过 `radius_km` 的点（含查询点本身）
    ///
    /// 先以经纬度包络粗筛，再按 Haversine 距离精确判断。
    #[must_use]
    pub fn within_km(&self, point: &Point2D, radius_km: f64) -> Vec<(&Point2D, &T)> {
        if !(radius_km >= 0.0) {
            return Vec::new();
        }
        let km_per_degree = EARTH_MEAN_RADIUS.to_radians() / 1000.0;
        let dlat = radius_km / km_per_degree;
        // 同纬度两点的大圆距离短于纬线弧长，经度方向放宽
        let max_lat = (point.lat().abs() + dlat).min(89.0);
        let dlon = 1.5 * dlat / max_lat.to_radians().cos();
        let envelope = AABB::from_corners(
            [point.x - dlon, point.y - dlat],
            [point.x + dlon, point.y + dlat],
        );
        self.tree
            .locate_in_envelope(&envelope)
            .filter(|entry| entry.point.geodesic_distance_km(point) <= radius_km)
            .map(|entry| (&entry.point, &entry.data))
            .collect()
    }

    /// 查询最近的 k 个点的附加数据（按距离升序）
    #[must_use]
    pub fn nearest_values(&self, point: &Point2D, k: usize) -> Vec<T> {
        self.tree
            .nearest_neighbor_iter(&[point.x, point.y])
            .take(k)
            .map(|entry| entry.data.clone())
            .collect()
    }

    /// 返回索引中的点数量
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// 检查索引是否为空
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

// ============================================================================
// 测试
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box() {
        let bbox = BoundingBox::new(12.0, 48.5, 19.0, 51.1);
        assert!(bbox.contains_point(&Point2D::new(15.0, 50.0)));
        assert!(!bbox.contains_point(&Point2D::new(20.0, 50.0)));
        assert!((bbox.width() - 7.0).abs() < 1e-10);
        assert!((bbox.height() - 2.6).abs() < 1e-10);
        assert!(bbox.validate().is_ok());
    }

    #[test]
    fn test_bounding_box_normalizes_corners() {
        let bbox = BoundingBox::new(19.0, 51.0, 12.0, 48.0);
        assert!((bbox.min_x - 12.0).abs() < 1e-10);
        assert!((bbox.max_y - 51.0).abs() < 1e-10);
    }

    #[test]
    fn test_degenerate_bounding_box_rejected() {
        let bbox = BoundingBox::new(12.0, 50.0, 12.0, 51.0);
        assert!(bbox.validate().is_err());
    }

    #[test]
    fn test_enclosing() {
        let bbox = BoundingBox::enclosing(&[
            Point2D::new(1.0, 5.0),
            Point2D::new(-2.0, 3.0),
            Point2D::new(4.0, 4.0),
        ])
        .unwrap();
        assert_eq!(bbox, BoundingBox::new(-2.0, 3.0, 4.0, 5.0));
        assert!(BoundingBox::enclosing(&[]).is_none());
    }

    #[test]
    fn test_bounding_box_merge() {
        let bbox1 = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let bbox2 = BoundingBox::new(5.0, 5.0, 20.0, 20.0);
        let merged = bbox1.merge(&bbox2);
        assert_eq!(merged, BoundingBox::new(0.0, 0.0, 20.0, 20.0));
    }

    #[test]
    fn test_spatial_index_nearest() {
        let index = SpatialIndex::bulk_load(vec![
            (Point2D::new(0.0, 0.0), 1u32),
            (Point2D::new(10.0, 10.0), 2),
            (Point2D::new(20.0, 20.0), 3),
        ]);

        let results = index.query_nearest(&Point2D::new(5.0, 5.5), 2);
        assert_eq!(results.len(), 2);
        assert_eq!(*results[0].1, 2);
        assert_eq!(index.nearest_values(&Point2D::new(19.0, 19.0), 1), vec![3]);
    }

    #[test]
    fn test_within_km() {
        // 纬度 50° 处 0.1° 经度约 7.1 km，0.1° 纬度约 11.1 km
        let index = SpatialIndex::bulk_load(vec![
            (Point2D::new(14.0, 50.0), "center"),
            (Point2D::new(14.1, 50.0), "east"),
            (Point2D::new(14.0, 50.1), "north"),
            (Point2D::new(14.3, 50.0), "far_east"),
            (Point2D::new(15.0, 50.0), "outside"),
        ]);

        let mut found: Vec<&str> = index
            .within_km(&Point2D::new(14.0, 50.0), 12.0)
            .into_iter()
            .map(|(_, v)| *v)
            .collect();
        found.sort_unstable();
        assert_eq!(found, vec!["center", "east", "north"]);

        assert_eq!(index.within_km(&Point2D::new(14.0, 50.0), 25.0).len(), 4);
        assert!(index.within_km(&Point2D::new(14.0, 50.0), f64::NAN).is_empty());
    }

    #[test]
    fn test_nearest_more_than_available() {
        let index = SpatialIndex::bulk_load(vec![(Point2D::new(0.0, 0.0), 7u8)]);
        assert_eq!(index.nearest_values(&Point2D::new(1.0, 1.0), 5), vec![7]);
        assert_eq!(index.len(), 1);
        assert!(!index.is_empty());
    }
}
