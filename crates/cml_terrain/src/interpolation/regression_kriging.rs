// crates/cml_terrain/src/interpolation/regression_kriging.rs

//! 回归克里金引擎
//!
//! 把温度场分解为确定性趋势与空间相关残差：
//!
//! 1. 在 DEM 上取每个点的高程，拟合线性趋势（高程，可选经纬度）
//! 2. 计算残差 `rᵢ = Tᵢ - trend(zᵢ)`
//! 3. 拟合残差的半变异函数，点数不足或退化时使用默认模型
//! 4. 以块金正则化的普通克里金插值残差
//! 5. 在网格上求 `trend(z_cell) + r̂(cell)`，区域外单元为 NaN
//!
//! 网格单元彼此独立，按行并行计算；相同输入得到逐位相同的输出。
//!
//! # 示例
//!
//! ```ignore
//! use cml_terrain::interpolation::{GridSpec, KrigingConfig, RegressionKriging, SamplePoint};
//!
//! let engine = RegressionKriging::new(KrigingConfig::default()).with_boundary(mask);
//! let grid = engine.interpolate(&points, &dem, &GridSpec::default())?;
//! let (min, max) = grid.min_max().unwrap();
//! ```

use super::error::{InterpolationError, InterpolationResult};
use super::grid::{GridSpec, InterpolationGrid};
use super::kriging::{KrigingInterpolator, DEFAULT_MAX_NEIGHBORS};
use super::solver::{LinearSolver, LuSolver};
use super::trend::{TrendCovariates, TrendModel};
use super::variogram::{fit_variogram, VariogramFit, VariogramKind, VariogramModel};
use crate::provider::ElevationLookup;
use cml_foundation::error::{CmlError, CmlResult};
use cml_geo::{BoundaryMask, Point2D};
use ndarray::Array2;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

// ============================================================================
// 配置
// ============================================================================

fn default_n_lags() -> usize {
    6
}

fn default_min_variogram_points() -> usize {
    10
}

fn default_max_neighbors() -> usize {
    DEFAULT_MAX_NEIGHBORS
}

fn default_regularization() -> f64 {
    1e-6
}

fn default_retry_nugget_factor() -> f64 {
    1000.0
}

fn default_merge_distance_km() -> f64 {
    0.01
}

/// 回归克里金配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KrigingConfig {
    /// 拟合的变异函数模型类别
    #[serde(default)]
    pub variogram_kind: VariogramKind,

    /// 经验半变异函数的滞后区间数
    #[serde(default = "default_n_lags")]
    pub n_lags: usize,

    /// 拟合变异函数所需的最少点数，不足时使用默认模型
    #[serde(default = "default_min_variogram_points")]
    pub min_variogram_points: usize,

    /// 默认变异函数
    #[serde(default)]
    pub default_variogram: VariogramModel,

    /// 移动邻域大小
    #[serde(default = "default_max_neighbors")]
    pub max_neighbors: usize,

    /// 额外块金（相对总基台的比例），用于正则化克里金系统
    #[serde(default = "default_regularization")]
    pub regularization: f64,

    /// 奇异重试时正则化的放大倍数
    #[serde(default = "default_retry_nugget_factor")]
    pub retry_nugget_factor: f64,

    /// 趋势协变量
    #[serde(default)]
    pub trend: TrendCovariates,

    /// 小于该距离 (km) 的点视为重合并取均值
    #[serde(default = "default_merge_distance_km")]
    pub merge_distance_km: f64,
}

impl Default for KrigingConfig {
    fn default() -> Self {
        Self {
            variogram_kind: VariogramKind::default(),
            n_lags: default_n_lags(),
            min_variogram_points: default_min_variogram_points(),
            default_variogram: VariogramModel::default(),
            max_neighbors: default_max_neighbors(),
            regularization: default_regularization(),
            retry_nugget_factor: default_retry_nugget_factor(),
            trend: TrendCovariates::default(),
            merge_distance_km: default_merge_distance_km(),
        }
    }
}

impl KrigingConfig {
    /// 验证配置
    pub fn validate(&self) -> CmlResult<()> {
        if self.n_lags == 0 {
            return Err(CmlError::config("kriging.n_lags 必须大于0"));
        }
        if self.min_variogram_points < 3 {
            return Err(CmlError::config(format!(
                "kriging.min_variogram_points 至少为3, 实际{}",
                self.min_variogram_points
            )));
        }
        if self.max_neighbors == 0 {
            return Err(CmlError::config("kriging.max_neighbors 必须大于0"));
        }
        if !self.default_variogram.is_valid() {
            return Err(CmlError::config(format!(
                "kriging.default_variogram 参数无效: {:?}",
                self.default_variogram
            )));
        }
        if !(self.regularization >= 0.0 && self.regularization.is_finite()) {
            return Err(CmlError::config(format!(
                "kriging.regularization 必须为非负有限值: {}",
                self.regularization
            )));
        }
        if !(self.retry_nugget_factor > 1.0 && self.retry_nugget_factor.is_finite()) {
            return Err(CmlError::config(format!(
                "kriging.retry_nugget_factor 必须大于1: {}",
                self.retry_nugget_factor
            )));
        }
        if !(self.merge_distance_km >= 0.0 && self.merge_distance_km.is_finite()) {
            return Err(CmlError::config(format!(
                "kriging.merge_distance_km 必须为非负有限值: {}",
                self.merge_distance_km
            )));
        }
        Ok(())
    }

    /// 放宽正则化（增大块金）后的配置
    pub fn relaxed(&self) -> Self {
        Self {
            regularization: self.regularization.max(1e-6) * self.retry_nugget_factor,
            ..self.clone()
        }
    }
}

// ============================================================================
// 输入
// ============================================================================

/// 插值输入点
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    /// 位置
    pub location: Point2D,
    /// 温度
    pub value: f64,
}

impl SamplePoint {
    /// 创建输入点
    pub fn new(location: Point2D, value: f64) -> Self {
        Self { location, value }
    }
}

/// 合并重合点（位置取首个点，值取均值），保持首次出现的顺序
fn merge_coincident(points: &[SamplePoint], tolerance_km: f64) -> Vec<SamplePoint> {
    let mut clusters: Vec<(Point2D, f64, usize)> = Vec::with_capacity(points.len());
    for p in points {
        let hit = clusters
            .iter_mut()
            .find(|(loc, _, _)| loc.geodesic_distance_km(&p.location) <= tolerance_km);
        match hit {
            Some((_, sum, count)) => {
                *sum += p.value;
                *count += 1;
            }
            None => clusters.push((p.location, p.value, 1)),
        }
    }
    clusters
        .into_iter()
        .map(|(loc, sum, count)| SamplePoint::new(loc, sum / count as f64))
        .collect()
}

// ============================================================================
// 已拟合模型
// ============================================================================

/// 已拟合的回归克里金模型
#[derive(Debug)]
pub struct FittedRegressionKriging {
    trend: TrendModel,
    variogram: VariogramFit,
    kriging: KrigingInterpolator,
    fallback_elevation: f64,
    n_input: usize,
}

impl FittedRegressionKriging {
    /// 趋势模型
    pub fn trend(&self) -> &TrendModel {
        &self.trend
    }

    /// 变异函数拟合结果
    pub fn variogram(&self) -> &VariogramFit {
        &self.variogram
    }

    /// 实际参与克里金的点数（合并重合点后）
    pub fn n_points(&self) -> usize {
        self.kriging.n_points()
    }

    /// 输入点数
    pub fn n_input(&self) -> usize {
        self.n_input
    }

    /// DEM 无覆盖处使用的高程（输入点平均高程）
    pub fn fallback_elevation(&self) -> f64 {
        self.fallback_elevation
    }

    /// 在任意位置预测温度
    pub fn predict_at(&self, point: &Point2D, elevation: Option<f64>) -> InterpolationResult<f64> {
        self.predict_with_variance(point, elevation).map(|(v, _)| v)
    }

    /// 预测温度及残差克里金方差
    pub fn predict_with_variance(
        &self,
        point: &Point2D,
        elevation: Option<f64>,
    ) -> InterpolationResult<(f64, f64)> {
        let z = elevation.unwrap_or(self.fallback_elevation);
        let (residual, variance) = self.kriging.interpolate_with_variance(point)?;
        Ok((self.trend.predict(point, z) + residual, variance))
    }
}

// ============================================================================
// 引擎
// ============================================================================

type MaskCache = Arc<Mutex<Option<(GridSpec, Arc<Array2<bool>>)>>>;

/// 回归克里金引擎
#[derive(Clone)]
pub struct RegressionKriging {
    config: KrigingConfig,
    boundary: Option<Arc<BoundaryMask>>,
    solver: Arc<dyn LinearSolver>,
    mask_cache: MaskCache,
}

impl std::fmt::Debug for RegressionKriging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegressionKriging")
            .field("config", &self.config)
            .field("boundary", &self.boundary.is_some())
            .field("solver", &self.solver.name())
            .finish()
    }
}

impl RegressionKriging {
    /// 创建引擎
    pub fn new(config: KrigingConfig) -> Self {
        Self {
            config,
            boundary: None,
            solver: Arc::new(LuSolver::default()),
            mask_cache: Arc::new(Mutex::new(None)),
        }
    }

    /// 设置区域边界，区域外单元输出 NaN
    pub fn with_boundary(mut self, boundary: BoundaryMask) -> Self {
        self.boundary = Some(Arc::new(boundary));
        self.mask_cache = Arc::new(Mutex::new(None));
        self
    }

    /// 替换线性求解器
    pub fn with_solver(mut self, solver: Arc<dyn LinearSolver>) -> Self {
        self.solver = solver;
        self
    }

    /// 配置
    pub fn config(&self) -> &KrigingConfig {
        &self.config
    }

    /// 增大块金后的引擎，共享边界掩膜缓存
    pub fn relaxed(&self) -> Self {
        Self {
            config: self.config.relaxed(),
            ..self.clone()
        }
    }

    /// 拟合趋势、变异函数与残差克里金
    pub fn fit(
        &self,
        points: &[SamplePoint],
        dem: &dyn ElevationLookup,
    ) -> InterpolationResult<FittedRegressionKriging> {
        if points.is_empty() {
            return Err(InterpolationError::InsufficientPoints {
                required: 1,
                actual: 0,
            });
        }
        if points
            .iter()
            .any(|p| !p.location.is_finite() || !p.value.is_finite())
        {
            return Err(InterpolationError::non_finite("插值输入点"));
        }

        let merged = merge_coincident(points, self.config.merge_distance_km);
        if merged.len() < points.len() {
            tracing::debug!("合并重合点: {} -> {}", points.len(), merged.len());
        }

        let locations: Vec<Point2D> = merged.iter().map(|p| p.location).collect();
        let values: Vec<f64> = merged.iter().map(|p| p.value).collect();

        // DEM 无覆盖的点使用已解析高程的均值
        let resolved = dem.elevations_at(&locations);
        let known: Vec<f64> = resolved.iter().flatten().copied().collect();
        let fallback_elevation = if known.is_empty() {
            tracing::warn!("所有插值点均无 DEM 高程，趋势退化为常数");
            0.0
        } else {
            known.iter().sum::<f64>() / known.len() as f64
        };
        let elevations: Vec<f64> = resolved
            .iter()
            .map(|z| z.unwrap_or(fallback_elevation))
            .collect();

        let trend = TrendModel::fit(self.config.trend, &locations, &elevations, &values)?;
        let residuals = trend.residuals(&locations, &elevations, &values);
        tracing::debug!(
            "趋势系数: {:?} (高程斜率 {:.5} ℃/m)",
            trend.coefficients(),
            trend.elevation_slope()
        );

        let variogram = fit_variogram(
            self.config.variogram_kind,
            &locations,
            &residuals,
            self.config.n_lags,
            self.config.min_variogram_points,
            self.config.default_variogram,
        );
        if variogram.is_fallback() {
            tracing::debug!("使用默认变异函数: {:?}", variogram.source);
        }

        let extra_nugget = self.config.regularization * variogram.model.sill_total();
        let model = variogram.model.with_extra_nugget(extra_nugget);
        let (nugget, sill, range) = model.params();
        tracing::debug!(
            "变异函数 {}: nugget={:.4}, sill={:.4}, range={:.1} km",
            model.kind().name(),
            nugget,
            sill,
            range
        );

        let kriging = KrigingInterpolator::with_options(
            locations,
            residuals,
            model,
            self.config.max_neighbors,
            Arc::clone(&self.solver),
        )?;

        Ok(FittedRegressionKriging {
            trend,
            variogram,
            kriging,
            fallback_elevation,
            n_input: points.len(),
        })
    }

    /// 插值到网格
    pub fn interpolate(
        &self,
        points: &[SamplePoint],
        dem: &dyn ElevationLookup,
        grid: &GridSpec,
    ) -> InterpolationResult<InterpolationGrid> {
        self.interpolate_with_variance(points, dem, grid)
            .map(|(grid, _)| grid)
    }

    /// 插值到网格并返回每个单元的克里金方差
    pub fn interpolate_with_variance(
        &self,
        points: &[SamplePoint],
        dem: &dyn ElevationLookup,
        grid: &GridSpec,
    ) -> InterpolationResult<(InterpolationGrid, Array2<f64>)> {
        grid.validate()?;
        let start = Instant::now();

        let fitted = self.fit(points, dem)?;
        let mask = self.cell_mask(grid);

        let rows: Vec<Vec<(f64, f64)>> = (0..grid.rows)
            .into_par_iter()
            .map(|r| {
                (0..grid.cols)
                    .map(|c| {
                        if !mask[(r, c)] {
                            return Ok((f64::NAN, f64::NAN));
                        }
                        let cell = grid.cell_point(r, c);
                        fitted.predict_with_variance(&cell, dem.elevation_at(&cell))
                    })
                    .collect::<InterpolationResult<Vec<_>>>()
            })
            .collect::<InterpolationResult<Vec<_>>>()?;

        let mut temperature = Array2::from_elem(grid.shape(), f64::NAN);
        let mut variance = Array2::from_elem(grid.shape(), f64::NAN);
        for (r, row) in rows.into_iter().enumerate() {
            for (c, (t, v)) in row.into_iter().enumerate() {
                temperature[(r, c)] = t;
                variance[(r, c)] = v;
            }
        }

        let output = InterpolationGrid::from_spec(grid, temperature)?;
        tracing::info!(
            "回归克里金完成: {} 点 ({} 参与克里金), 变异函数{}, {} x {} 网格, 有效单元 {}, 耗时 {:.2}s",
            fitted.n_input(),
            fitted.n_points(),
            if fitted.variogram().is_fallback() { "默认" } else { "拟合" },
            grid.rows,
            grid.cols,
            output.valid_cells(),
            start.elapsed().as_secs_f64()
        );

        Ok((output, variance))
    }

    /// 区域掩膜，同一网格定义只计算一次
    fn cell_mask(&self, grid: &GridSpec) -> Arc<Array2<bool>> {
        let Some(boundary) = &self.boundary else {
            return Arc::new(Array2::from_elem(grid.shape(), true));
        };

        let mut cache = self.mask_cache.lock();
        if let Some((spec, mask)) = cache.as_ref() {
            if spec == grid {
                return Arc::clone(mask);
            }
        }

        let mask = Arc::new(Array2::from_shape_fn(grid.shape(), |(r, c)| {
            boundary.contains(&grid.cell_point(r, c))
        }));
        *cache = Some((*grid, Arc::clone(&mask)));
        mask
    }
}
