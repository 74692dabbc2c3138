// crates/cml_geo/src/boundary.rs
//! 区域边界掩膜
//!
//! 以一个或多个多边形外环描述插值区域（通常为国界），
//! 用于把区域外的网格单元标记为无数据。
//!
//! 支持从 GeoJSON 加载：`FeatureCollection`、`Feature` 或裸几何，
//! 几何类型为 `Polygon` 或 `MultiPolygon`，只使用外环（`coordinates[0]`）。

use crate::geometry::Point2D;
use crate::spatial_index::BoundingBox;
use cml_foundation::error::{CmlError, CmlResult};
use serde_json::Value;
use std::path::Path;

/// 多边形外环
#[derive(Debug, Clone)]
struct Ring {
    vertices: Vec<Point2D>,
    bbox: BoundingBox,
}

impl Ring {
    fn new(mut vertices: Vec<Point2D>) -> CmlResult<Self> {
        // 去掉闭合点
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        if vertices.len() < 3 {
            return Err(CmlError::invalid_input(format!(
                "多边形至少需要3个顶点, 实际{}",
                vertices.len()
            )));
        }
        let bbox = BoundingBox::enclosing(&vertices)
            .ok_or_else(|| CmlError::invalid_input("空多边形"))?;
        Ok(Self { vertices, bbox })
    }

    /// 射线法判断点是否在环内
    fn contains(&self, p: &Point2D) -> bool {
        if !self.bbox.contains_point(p) {
            return false;
        }
        let n = self.vertices.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[j];
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

/// 区域边界掩膜
///
/// # 示例
///
/// ```
/// use cml_geo::boundary::BoundaryMask;
/// use cml_geo::geometry::Point2D;
///
/// let mask = BoundaryMask::from_polygon(vec![
///     Point2D::new(0.0, 0.0),
///     Point2D::new(10.0, 0.0),
///     Point2D::new(10.0, 10.0),
///     Point2D::new(0.0, 10.0),
/// ]).unwrap();
///
/// assert!(mask.contains(&Point2D::new(5.0, 5.0)));
/// assert!(!mask.contains(&Point2D::new(15.0, 5.0)));
/// ```
#[derive(Debug, Clone)]
pub struct BoundaryMask {
    rings: Vec<Ring>,
}

impl BoundaryMask {
    /// 单个多边形
    pub fn from_polygon(vertices: Vec<Point2D>) -> CmlResult<Self> {
        Ok(Self {
            rings: vec![Ring::new(vertices)?],
        })
    }

    /// 多个多边形（任一包含即视为区域内）
    pub fn from_polygons(polygons: Vec<Vec<Point2D>>) -> CmlResult<Self> {
        let rings = polygons
            .into_iter()
            .map(Ring::new)
            .collect::<CmlResult<Vec<_>>>()?;
        if rings.is_empty() {
            return Err(CmlError::invalid_input("边界不含任何多边形"));
        }
        Ok(Self { rings })
    }

    /// 从 GeoJSON 字符串加载
    pub fn from_geojson_str(text: &str) -> CmlResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| CmlError::serialization(format!("GeoJSON 解析失败: {e}")))?;
        let mut polygons = Vec::new();
        collect_polygons(&value, &mut polygons)?;
        Self::from_polygons(polygons)
    }

    /// 从 GeoJSON 文件加载
    pub fn from_geojson_file(path: impl AsRef<Path>) -> CmlResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CmlError::file_not_found(path));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| CmlError::io_with_source(format!("读取边界文件失败: {}", path.display()), e))?;
        Self::from_geojson_str(&text)
    }

    /// 点是否在区域内
    #[must_use]
    pub fn contains(&self, point: &Point2D) -> bool {
        self.rings.iter().any(|r| r.contains(point))
    }

    /// 多边形数量
    #[must_use]
    pub fn polygon_count(&self) -> usize {
        self.rings.len()
    }

    /// 整个区域的外包框
    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        let mut iter = self.rings.iter();
        // rings 构造时保证非空
        let first = iter.next().map(|r| r.bbox).unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0));
        iter.fold(first, |acc, r| acc.merge(&r.bbox))
    }
}

fn collect_polygons(value: &Value, out: &mut Vec<Vec<Point2D>>) -> CmlResult<()> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| CmlError::invalid_input("GeoJSON 对象缺少 type"))?;

    match kind {
        "FeatureCollection" => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| CmlError::invalid_input("FeatureCollection 缺少 features"))?;
            for feature in features {
                collect_polygons(feature, out)?;
            }
        }
        "Feature" => {
            let geometry = value
                .get("geometry")
                .ok_or_else(|| CmlError::invalid_input("Feature 缺少 geometry"))?;
            collect_polygons(geometry, out)?;
        }
        "Polygon" => {
            let coords = coordinates(value)?;
            out.push(parse_outer_ring(coords)?);
        }
        "MultiPolygon" => {
            let coords = coordinates(value)?;
            let polygons = coords
                .as_array()
                .ok_or_else(|| CmlError::invalid_input("MultiPolygon 坐标必须为数组"))?;
            for polygon in polygons {
                out.push(parse_outer_ring(polygon)?);
            }
        }
        other => {
            return Err(CmlError::invalid_input(format!(
                "不支持的 GeoJSON 几何类型: {other}"
            )));
        }
    }
    Ok(())
}

fn coordinates(value: &Value) -> CmlResult<&Value> {
    value
        .get("coordinates")
        .ok_or_else(|| CmlError::invalid_input("几何缺少 coordinates"))
}

fn parse_outer_ring(polygon: &Value) -> CmlResult<Vec<Point2D>> {
    let ring = polygon
        .as_array()
        .and_then(|rings| rings.first())
        .and_then(Value::as_array)
        .ok_or_else(|| CmlError::invalid_input("多边形缺少外环"))?;

    ring.iter()
        .map(|pos| {
            let lon = pos.get(0).and_then(Value::as_f64);
            let lat = pos.get(1).and_then(Value::as_f64);
            match (lon, lat) {
                (Some(lon), Some(lat)) => Ok(Point2D::from_lonlat(lon, lat)),
                _ => Err(CmlError::invalid_input(format!("无效的坐标: {pos}"))),
            }
        })
        .collect()
}
