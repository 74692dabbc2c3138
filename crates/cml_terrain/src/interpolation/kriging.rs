// crates/cml_terrain/src/interpolation/kriging.rs

//! Kriging 插值
//!
//! 普通克里金 (Ordinary Kriging)，提供最优线性无偏估计（BLUE）。
//!
//! # 算法原理
//!
//! 对每个目标点求解半变异形式的克里金系统：
//!
//! $$
//! \begin{bmatrix} \gamma_{11} & \cdots & \gamma_{1n} & 1 \\
//!                 \vdots & \ddots & \vdots & \vdots \\
//!                 \gamma_{n1} & \cdots & \gamma_{nn} & 1 \\
//!                 1 & \cdots & 1 & 0 \end{bmatrix}
//! \begin{bmatrix} w_1 \\ \vdots \\ w_n \\ \mu \end{bmatrix} =
//! \begin{bmatrix} \gamma_{10} \\ \vdots \\ \gamma_{n0} \\ 1 \end{bmatrix}
//! $$
//!
//! 距离为大圆距离（千米）。γ(0) = 0，因此在采样点处精确插值；
//! 块金使非对角元整体抬升，对近重合点起正则化作用。
//!
//! # 移动邻域
//!
//! 每个目标点只使用最近的 `max_neighbors` 个采样点（R-tree 搜索）。
//! 采样点总数不超过邻域大小时，系统只分解一次并被所有目标点复用。
//!
//! # 示例
//!
//! ```
//! use cml_terrain::interpolation::kriging::KrigingInterpolator;
//! use cml_terrain::interpolation::variogram::VariogramModel;
//! use cml_geo::Point2D;
//!
//! let points = vec![
//!     Point2D::from_lonlat(14.0, 50.0),
//!     Point2D::from_lonlat(14.5, 50.0),
//!     Point2D::from_lonlat(14.0, 50.5),
//! ];
//! let kriging = KrigingInterpolator::new(
//!     points.clone(),
//!     vec![1.0, 2.0, 3.0],
//!     VariogramModel::spherical(0.0, 1.0, 100.0),
//! ).unwrap();
//!
//! let (value, variance) = kriging.interpolate_with_variance(&points[1]).unwrap();
//! assert!((value - 2.0).abs() < 1e-8);
//! assert!(variance.abs() < 1e-8);
//! ```

use super::error::{InterpolationError, InterpolationResult};
use super::solver::{FactoredSystem, LinearSolver, LuSolver};
use super::variogram::VariogramModel;
use cml_geo::{Point2D, SpatialIndex};
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

/// 默认邻域大小
pub const DEFAULT_MAX_NEIGHBORS: usize = 40;

/// Kriging 插值器
pub struct KrigingInterpolator {
    /// 采样点坐标
    points: Vec<Point2D>,
    /// 采样点值
    values: Vec<f64>,
    /// 变异函数模型
    variogram: VariogramModel,
    /// 邻域大小
    max_neighbors: usize,
    /// 邻域搜索索引
    index: SpatialIndex<usize>,
    /// 全部点参与时预先分解的系统
    global: Option<Box<dyn FactoredSystem>>,
    solver: Arc<dyn LinearSolver>,
}

impl std::fmt::Debug for KrigingInterpolator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KrigingInterpolator")
            .field("n_points", &self.points.len())
            .field("variogram", &self.variogram)
            .field("max_neighbors", &self.max_neighbors)
            .field("global", &self.global.is_some())
            .field("solver", &self.solver.name())
            .finish()
    }
}

impl KrigingInterpolator {
    /// 创建插值器（默认邻域大小与 LU 求解器）
    pub fn new(
        points: Vec<Point2D>,
        values: Vec<f64>,
        variogram: VariogramModel,
    ) -> InterpolationResult<Self> {
        Self::with_options(
            points,
            values,
            variogram,
            DEFAULT_MAX_NEIGHBORS,
            Arc::new(LuSolver::default()),
        )
    }

    /// 创建插值器
    ///
    /// 采样点数不超过 `max_neighbors` 时立即分解全局系统，奇异则返回错误。
    pub fn with_options(
        points: Vec<Point2D>,
        values: Vec<f64>,
        variogram: VariogramModel,
        max_neighbors: usize,
        solver: Arc<dyn LinearSolver>,
    ) -> InterpolationResult<Self> {
        if points.len() != values.len() {
            return Err(InterpolationError::SizeMismatch {
                name: "values",
                expected: points.len(),
                actual: values.len(),
            });
        }
        if points.is_empty() {
            return Err(InterpolationError::InsufficientPoints {
                required: 1,
                actual: 0,
            });
        }
        if points.iter().any(|p| !p.is_finite()) || values.iter().any(|v| !v.is_finite()) {
            return Err(InterpolationError::non_finite("克里金采样点"));
        }
        if !variogram.is_valid() {
            return Err(InterpolationError::non_finite(format!("变异函数参数 {variogram:?}")));
        }

        let max_neighbors = max_neighbors.max(1);
        let index = SpatialIndex::bulk_load(
            points.iter().copied().enumerate().map(|(i, p)| (p, i)).collect(),
        );

        let mut interpolator = Self {
            points,
            values,
            variogram,
            max_neighbors,
            index,
            global: None,
            solver,
        };

        if interpolator.points.len() <= max_neighbors {
            let all: Vec<usize> = (0..interpolator.points.len()).collect();
            let system = interpolator.factorize(&all)?;
            interpolator.global = Some(system);
        }

        Ok(interpolator)
    }

    /// 获取变异函数模型
    pub fn variogram(&self) -> &VariogramModel {
        &self.variogram
    }

    /// 获取采样点数量
    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    /// 是否复用全局分解
    pub fn uses_global_system(&self) -> bool {
        self.global.is_some()
    }

    fn singular(&self) -> InterpolationError {
        InterpolationError::Singular {
            nugget: self.variogram.nugget(),
        }
    }

    /// 构建并分解邻域系统
    fn factorize(&self, idx: &[usize]) -> InterpolationResult<Box<dyn FactoredSystem>> {
        let n = idx.len();
        let mut k = DMatrix::zeros(n + 1, n + 1);

        for a in 0..n {
            for b in (a + 1)..n {
                let h = self.points[idx[a]].geodesic_distance_km(&self.points[idx[b]]);
                let g = self.variogram.gamma(h);
                k[(a, b)] = g;
                k[(b, a)] = g;
            }
            // Lagrange 乘子行/列
            k[(a, n)] = 1.0;
            k[(n, a)] = 1.0;
        }

        self.solver.factorize(k).ok_or_else(|| {
            tracing::warn!("克里金矩阵奇异: n={}, nugget={:.3e}", n, self.variogram.nugget());
            self.singular()
        })
    }

    /// 构建右端向量 k₀
    fn rhs(&self, idx: &[usize], target: &Point2D) -> DVector<f64> {
        let n = idx.len();
        let mut k0 = DVector::zeros(n + 1);
        for (a, &i) in idx.iter().enumerate() {
            k0[a] = self.variogram.gamma(self.points[i].geodesic_distance_km(target));
        }
        k0[n] = 1.0;
        k0
    }

    /// 插值并返回 Kriging 方差
    ///
    /// # 返回
    /// (插值值, Kriging 方差)
    ///
    /// σ²_k = Σ wᵢ γ(xᵢ, x₀) + μ
    pub fn interpolate_with_variance(&self, target: &Point2D) -> InterpolationResult<(f64, f64)> {
        let idx: Vec<usize> = match self.global {
            Some(_) => (0..self.points.len()).collect(),
            None => self.index.nearest_values(target, self.max_neighbors),
        };
        let k0 = self.rhs(&idx, target);
        let weights = match &self.global {
            Some(system) => system.solve(&k0),
            None => self.factorize(&idx)?.solve(&k0),
        }
        .ok_or_else(|| self.singular())?;

        let value: f64 = idx
            .iter()
            .enumerate()
            .map(|(a, &i)| weights[a] * self.values[i])
            .sum();
        let variance = k0.dot(&weights).max(0.0);

        if !value.is_finite() {
            return Err(self.singular());
        }
        Ok((value, variance))
    }

    /// 在指定点插值
    pub fn interpolate(&self, target: &Point2D) -> InterpolationResult<f64> {
        self.interpolate_with_variance(target).map(|(value, _)| value)
    }

    /// 计算指定点的 Kriging 标准差
    pub fn standard_deviation(&self, target: &Point2D) -> InterpolationResult<f64> {
        self.interpolate_with_variance(target).map(|(_, var)| var.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point2D> {
        vec![
            Point2D::from_lonlat(14.0, 50.0),
            Point2D::from_lonlat(14.1, 50.0),
            Point2D::from_lonlat(14.0, 50.1),
            Point2D::from_lonlat(14.1, 50.1),
        ]
    }

    #[test]
    fn test_kriging_interpolation() {
        let kriging = KrigingInterpolator::new(
            square(),
            vec![0.0, 1.0, 1.0, 2.0],
            VariogramModel::spherical(0.0, 1.0, 100.0),
        )
        .unwrap();

        // 中心点对称，应接近 1.0
        let value = kriging.interpolate(&Point2D::from_lonlat(14.05, 50.05)).unwrap();
        assert!((value - 1.0).abs() < 0.05);
        assert!(kriging.uses_global_system());
    }

    #[test]
    fn test_kriging_at_sample_point() {
        let points = square();
        let values = vec![5.0, 10.0, 7.0, 3.0];
        let kriging =
            KrigingInterpolator::new(points.clone(), values.clone(), VariogramModel::spherical(0.2, 1.0, 30.0))
                .unwrap();

        for (p, v) in points.iter().zip(&values) {
            let result = kriging.interpolate(p).unwrap();
            assert!((result - v).abs() < 1e-8);
        }
    }

    #[test]
    fn test_kriging_variance() {
        let points = vec![Point2D::from_lonlat(14.0, 50.0), Point2D::from_lonlat(14.2, 50.0)];
        let kriging =
            KrigingInterpolator::new(points, vec![0.0, 10.0], VariogramModel::spherical(0.0, 1.0, 40.0))
                .unwrap();

        // 采样点附近方差应该较小
        let (_, var_near) = kriging
            .interpolate_with_variance(&Point2D::from_lonlat(14.001, 50.0))
            .unwrap();

        // 远离采样点方差应该较大
        let (_, var_far) = kriging
            .interpolate_with_variance(&Point2D::from_lonlat(14.1, 50.2))
            .unwrap();

        assert!(var_near < var_far);
    }

    #[test]
    fn test_weights_sum_to_one_far_away() {
        // 远超变程处退化为邻域均值
        let kriging = KrigingInterpolator::new(
            square(),
            vec![1.0, 2.0, 3.0, 6.0],
            VariogramModel::spherical(0.0, 1.0, 5.0),
        )
        .unwrap();
        let value = kriging.interpolate(&Point2D::from_lonlat(16.0, 51.0)).unwrap();
        assert!((value - 3.0).abs() < 1e-8);
    }

    #[test]
    fn test_moving_neighbourhood() {
        let mut points = Vec::new();
        let mut values = Vec::new();
        for i in 0..6 {
            for j in 0..6 {
                points.push(Point2D::from_lonlat(14.0 + 0.1 * i as f64, 50.0 + 0.1 * j as f64));
                values.push(i as f64 + j as f64);
            }
        }
        let kriging = KrigingInterpolator::with_options(
            points.clone(),
            values.clone(),
            VariogramModel::exponential(0.0, 2.0, 60.0),
            8,
            Arc::new(LuSolver::default()),
        )
        .unwrap();

        assert!(!kriging.uses_global_system());
        // 局部系统仍精确插值
        let v = kriging.interpolate(&points[14]).unwrap();
        assert!((v - values[14]).abs() < 1e-8);
        let mid = kriging.interpolate(&Point2D::from_lonlat(14.25, 50.25)).unwrap();
        assert!(mid > 3.0 && mid < 7.0);
    }

    #[test]
    fn test_duplicate_points_singular() {
        let p = Point2D::from_lonlat(14.0, 50.0);
        let result = KrigingInterpolator::new(
            vec![p, p, Point2D::from_lonlat(14.1, 50.0)],
            vec![1.0, 2.0, 3.0],
            VariogramModel::spherical(0.0, 1.0, 50.0),
        );
        assert!(matches!(result, Err(InterpolationError::Singular { .. })));
    }

    #[test]
    fn test_kriging_empty() {
        let result = KrigingInterpolator::new(vec![], vec![], VariogramModel::default());
        assert!(matches!(result, Err(InterpolationError::InsufficientPoints { .. })));
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let result = KrigingInterpolator::new(
            vec![Point2D::from_lonlat(14.0, 50.0)],
            vec![f64::NAN],
            VariogramModel::default(),
        );
        assert!(matches!(result, Err(InterpolationError::NonFinite { .. })));
    }
}
