// crates/cml_terrain/src/interpolation/grid.rs

//! 规则插值网格
//!
//! 网格由边界框与行列数定义，坐标在边界上等距取点（含两端）。
//! 行沿纬度自南向北递增，列沿经度自西向东递增。
//! 同一 `GridSpec` 在不同周期产生完全相同的坐标矩阵。

use super::error::{InterpolationError, InterpolationResult};
use cml_geo::{BoundingBox, Point2D};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// 网格定义
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// 覆盖范围
    pub bounds: BoundingBox,
    /// 行数（纬度方向）
    pub rows: usize,
    /// 列数（经度方向）
    pub cols: usize,
}

impl Default for GridSpec {
    /// 捷克共和国外包框，500 x 500
    fn default() -> Self {
        Self {
            bounds: BoundingBox::new(12.09, 48.55, 18.86, 51.06),
            rows: 500,
            cols: 500,
        }
    }
}

impl GridSpec {
    /// 创建网格定义
    pub fn new(bounds: BoundingBox, rows: usize, cols: usize) -> Self {
        Self { bounds, rows, cols }
    }

    /// 校验网格定义
    pub fn validate(&self) -> InterpolationResult<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(InterpolationError::invalid_grid(format!(
                "行列数必须大于0: {} x {}",
                self.rows, self.cols
            )));
        }
        self.bounds
            .validate()
            .map_err(|e| InterpolationError::invalid_grid(e.to_string()))
    }

    /// 形状 `(rows, cols)`
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// 单元总数
    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    /// 是否为空网格
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn step(min: f64, max: f64, n: usize) -> f64 {
        if n > 1 {
            (max - min) / (n - 1) as f64
        } else {
            0.0
        }
    }

    /// 单元坐标
    #[inline]
    pub fn cell_point(&self, row: usize, col: usize) -> Point2D {
        let b = &self.bounds;
        let dx = Self::step(b.min_x, b.max_x, self.cols);
        let dy = Self::step(b.min_y, b.max_y, self.rows);
        Point2D::new(b.min_x + col as f64 * dx, b.min_y + row as f64 * dy)
    }

    /// 坐标矩阵 `(x_coords, y_coords)`
    pub fn coordinate_matrices(&self) -> (Array2<f64>, Array2<f64>) {
        let x = Array2::from_shape_fn(self.shape(), |(r, c)| self.cell_point(r, c).x);
        let y = Array2::from_shape_fn(self.shape(), |(r, c)| self.cell_point(r, c).y);
        (x, y)
    }
}

/// 插值结果网格
///
/// 三个矩阵形状相同；区域外或无数据单元为 NaN。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolationGrid {
    /// 经度矩阵
    pub x_coords: Array2<f64>,
    /// 纬度矩阵
    pub y_coords: Array2<f64>,
    /// 温度矩阵
    pub temperature: Array2<f64>,
}

impl InterpolationGrid {
    /// 由网格定义与温度矩阵组装
    pub fn from_spec(spec: &GridSpec, temperature: Array2<f64>) -> InterpolationResult<Self> {
        if temperature.dim() != spec.shape() {
            return Err(InterpolationError::SizeMismatch {
                name: "temperature",
                expected: spec.len(),
                actual: temperature.len(),
            });
        }
        let (x_coords, y_coords) = spec.coordinate_matrices();
        Ok(Self {
            x_coords,
            y_coords,
            temperature,
        })
    }

    /// 形状 `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        self.temperature.dim()
    }

    /// 有效（有限值）单元数
    pub fn valid_cells(&self) -> usize {
        self.temperature.iter().filter(|v| v.is_finite()).count()
    }

    /// 有效单元上的真实最小/最大值
    pub fn min_max(&self) -> Option<(f64, f64)> {
        self.temperature
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> GridSpec {
        GridSpec::new(BoundingBox::new(12.0, 48.0, 14.0, 49.0), 3, 5)
    }

    #[test]
    fn test_coordinate_matrices_shape() {
        let (x, y) = spec().coordinate_matrices();
        assert_eq!(x.dim(), (3, 5));
        assert_eq!(y.dim(), (3, 5));
    }

    #[test]
    fn test_cell_points_span_bounds() {
        let s = spec();
        let first = s.cell_point(0, 0);
        let last = s.cell_point(2, 4);
        assert!((first.x - 12.0).abs() < 1e-12);
        assert!((first.y - 48.0).abs() < 1e-12);
        assert!((last.x - 14.0).abs() < 1e-12);
        assert!((last.y - 49.0).abs() < 1e-12);
        assert!((s.cell_point(1, 2).x - 13.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_cell_grid() {
        let s = GridSpec::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 1, 1);
        assert!(s.validate().is_ok());
        let p = s.cell_point(0, 0);
        assert!((p.x - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate() {
        assert!(spec().validate().is_ok());
        let zero = GridSpec::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 0, 4);
        assert!(zero.validate().is_err());
        let flat = GridSpec::new(BoundingBox::new(0.0, 0.0, 0.0, 1.0), 2, 2);
        assert!(flat.validate().is_err());
    }

    #[test]
    fn test_min_max_ignores_nan() {
        let s = GridSpec::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 2, 2);
        let t = Array2::from_shape_vec((2, 2), vec![3.0, f64::NAN, -1.5, 7.25]).unwrap();
        let grid = InterpolationGrid::from_spec(&s, t).unwrap();
        assert_eq!(grid.min_max(), Some((-1.5, 7.25)));
        assert_eq!(grid.valid_cells(), 3);
    }

    #[test]
    fn test_min_max_all_masked() {
        let s = GridSpec::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 1, 2);
        let grid = InterpolationGrid::from_spec(&s, Array2::from_elem((1, 2), f64::NAN)).unwrap();
        assert!(grid.min_max().is_none());
    }

    #[test]
    fn test_from_spec_shape_mismatch() {
        let s = spec();
        assert!(InterpolationGrid::from_spec(&s, Array2::zeros((2, 2))).is_err());
    }
}
