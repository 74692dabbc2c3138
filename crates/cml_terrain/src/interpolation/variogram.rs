// crates/cml_terrain/src/interpolation/variogram.rs

//! 半变异函数
//!
//! 包含参数化模型、残差的经验半变异函数以及模型拟合。
//!
//! # 变异函数模型
//!
//! 支持三种常用模型，距离单位统一为千米：
//! - 球状模型 (Spherical)
//! - 指数模型 (Exponential)
//! - 高斯模型 (Gaussian)
//!
//! # 拟合
//!
//! 经验半变异函数在最小与最大点对距离之间等距分为 `n_lags` 个滞后区间，
//! 每个区间取 γ = ½·mean((rᵢ - rⱼ)²)。对一组候选变程逐个求解
//! 以点对数加权的最小二乘（块金、偏基台非负，闭式解），取残差平方和最小者。
//!
//! 点数少于下限、有效区间不足或拟合结果退化时，返回配置的默认模型。

use cml_geo::Point2D;
use serde::{Deserialize, Serialize};

/// 候选变程个数
const RANGE_CANDIDATES: usize = 64;

/// 基台退化阈值 (℃²)
const DEGENERATE_SILL: f64 = 1e-12;

/// 变异函数模型类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariogramKind {
    /// 球状模型
    #[default]
    Spherical,
    /// 指数模型
    Exponential,
    /// 高斯模型
    Gaussian,
}

impl VariogramKind {
    /// 获取模型名称
    pub fn name(&self) -> &'static str {
        match self {
            Self::Spherical => "spherical",
            Self::Exponential => "exponential",
            Self::Gaussian => "gaussian",
        }
    }

    /// 归一化结构函数 f(h/a) ∈ [0, 1]
    #[inline]
    fn structure(&self, h: f64, range: f64) -> f64 {
        let ratio = h / range;
        match self {
            Self::Spherical => {
                if ratio >= 1.0 {
                    1.0
                } else {
                    1.5 * ratio - 0.5 * ratio.powi(3)
                }
            }
            Self::Exponential => 1.0 - (-3.0 * ratio).exp(),
            Self::Gaussian => 1.0 - (-3.0 * ratio.powi(2)).exp(),
        }
    }
}

/// 变异函数模型
///
/// 描述残差空间相关性随距离（千米）变化的模型。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum VariogramModel {
    /// 球状模型
    ///
    /// 具有明确的变程。
    /// γ(h) = C₀ + C * (1.5h/a - 0.5(h/a)³) 当 h < a
    /// γ(h) = C₀ + C 当 h >= a
    Spherical {
        /// 块金值 (nugget)，即 h→0 处的不连续
        nugget: f64,
        /// 偏基台值 (partial sill)，不含块金
        sill: f64,
        /// 变程 (range, km)
        range: f64,
    },

    /// 指数模型
    ///
    /// γ(h) = C₀ + C * (1 - exp(-3h/a))
    Exponential {
        /// 块金值
        nugget: f64,
        /// 偏基台值
        sill: f64,
        /// 有效变程 (km)
        range: f64,
    },

    /// 高斯模型
    ///
    /// γ(h) = C₀ + C * (1 - exp(-3(h/a)²))
    Gaussian {
        /// 块金值
        nugget: f64,
        /// 偏基台值
        sill: f64,
        /// 有效变程 (km)
        range: f64,
    },
}

impl VariogramModel {
    /// 按类别创建
    pub fn new(kind: VariogramKind, nugget: f64, sill: f64, range: f64) -> Self {
        match kind {
            VariogramKind::Spherical => Self::Spherical { nugget, sill, range },
            VariogramKind::Exponential => Self::Exponential { nugget, sill, range },
            VariogramKind::Gaussian => Self::Gaussian { nugget, sill, range },
        }
    }

    /// 创建球状模型
    pub fn spherical(nugget: f64, sill: f64, range: f64) -> Self {
        Self::new(VariogramKind::Spherical, nugget, sill, range)
    }

    /// 创建指数模型
    pub fn exponential(nugget: f64, sill: f64, range: f64) -> Self {
        Self::new(VariogramKind::Exponential, nugget, sill, range)
    }

    /// 创建高斯模型
    pub fn gaussian(nugget: f64, sill: f64, range: f64) -> Self {
        Self::new(VariogramKind::Gaussian, nugget, sill, range)
    }

    /// 模型类别
    pub fn kind(&self) -> VariogramKind {
        match self {
            Self::Spherical { .. } => VariogramKind::Spherical,
            Self::Exponential { .. } => VariogramKind::Exponential,
            Self::Gaussian { .. } => VariogramKind::Gaussian,
        }
    }

    /// `(nugget, sill, range)`
    #[inline]
    pub fn params(&self) -> (f64, f64, f64) {
        match *self {
            Self::Spherical { nugget, sill, range }
            | Self::Exponential { nugget, sill, range }
            | Self::Gaussian { nugget, sill, range } => (nugget, sill, range),
        }
    }

    /// 块金值
    pub fn nugget(&self) -> f64 {
        self.params().0
    }

    /// 变程
    pub fn range(&self) -> f64 {
        self.params().2
    }

    /// 计算半变异函数值 γ(h)，h < 1e-10 时为 0
    #[inline]
    pub fn gamma(&self, h: f64) -> f64 {
        if h < 1e-10 {
            return 0.0;
        }
        let (nugget, sill, range) = self.params();
        nugget + sill * self.kind().structure(h, range)
    }

    /// 获取基台值（总方差）
    pub fn sill_total(&self) -> f64 {
        let (nugget, sill, _) = self.params();
        nugget + sill
    }

    /// 增大块金值
    pub fn with_extra_nugget(&self, extra: f64) -> Self {
        let (nugget, sill, range) = self.params();
        Self::new(self.kind(), nugget + extra, sill, range)
    }

    /// 参数是否有效（非负、有限、变程为正）
    pub fn is_valid(&self) -> bool {
        let (nugget, sill, range) = self.params();
        nugget.is_finite()
            && sill.is_finite()
            && range.is_finite()
            && nugget >= 0.0
            && sill >= 0.0
            && range > 0.0
    }
}

impl Default for VariogramModel {
    /// 默认球状模型：块金 0.1 ℃²，偏基台 1.0 ℃²，变程 100 km
    fn default() -> Self {
        Self::Spherical {
            nugget: 0.1,
            sill: 1.0,
            range: 100.0,
        }
    }
}

// ============================================================================
// 经验半变异函数
// ============================================================================

/// 滞后区间
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LagBin {
    /// 区间内点对的平均距离 (km)
    pub distance: f64,
    /// 半变异值
    pub semivariance: f64,
    /// 点对数
    pub pairs: usize,
}

/// 经验半变异函数
#[derive(Debug, Clone, Default)]
pub struct EmpiricalVariogram {
    bins: Vec<LagBin>,
    max_distance: f64,
}

impl EmpiricalVariogram {
    /// 由点和值计算，只保留非空区间
    pub fn compute(points: &[Point2D], values: &[f64], n_lags: usize) -> Self {
        let n = points.len().min(values.len());
        if n < 2 || n_lags == 0 {
            return Self::default();
        }

        let mut pairs = Vec::with_capacity(n * (n - 1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                let h = points[i].geodesic_distance_km(&points[j]);
                let dv = values[i] - values[j];
                pairs.push((h, 0.5 * dv * dv));
            }
        }

        let (d_min, d_max) = pairs
            .iter()
            .fold((f64::INFINITY, 0.0_f64), |(lo, hi), &(h, _)| (lo.min(h), hi.max(h)));
        let width = (d_max - d_min) / n_lags as f64;

        let mut sums = vec![(0.0, 0.0, 0usize); n_lags];
        for &(h, g) in &pairs {
            let k = if width > 0.0 {
                (((h - d_min) / width) as usize).min(n_lags - 1)
            } else {
                0
            };
            sums[k].0 += h;
            sums[k].1 += g;
            sums[k].2 += 1;
        }

        let bins = sums
            .into_iter()
            .filter(|&(_, _, count)| count > 0)
            .map(|(h, g, count)| LagBin {
                distance: h / count as f64,
                semivariance: g / count as f64,
                pairs: count,
            })
            .collect();

        Self {
            bins,
            max_distance: d_max,
        }
    }

    /// 非空区间
    pub fn bins(&self) -> &[LagBin] {
        &self.bins
    }

    /// 最大点对距离 (km)
    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    /// 以点对数加权拟合给定类别的模型
    ///
    /// 有效区间少于 2 个或结果退化时返回 `None`。
    pub fn fit(&self, kind: VariogramKind) -> Option<VariogramModel> {
        if self.bins.len() < 2 || !(self.max_distance > 0.0) {
            return None;
        }

        let mut best: Option<(f64, VariogramModel)> = None;
        for step in 0..RANGE_CANDIDATES {
            let t = step as f64 / (RANGE_CANDIDATES - 1) as f64;
            let range = self.max_distance * (0.05 + 1.95 * t);
            let Some((nugget, sill, sse)) = self.fit_at_range(kind, range) else {
                continue;
            };
            if best.as_ref().map_or(true, |(best_sse, _)| sse < *best_sse) {
                best = Some((sse, VariogramModel::new(kind, nugget, sill, range)));
            }
        }

        best.map(|(_, model)| model)
            .filter(|m| m.is_valid() && m.sill_total() > DEGENERATE_SILL)
    }

    /// 固定变程下块金与偏基台的非负加权最小二乘
    fn fit_at_range(&self, kind: VariogramKind, range: f64) -> Option<(f64, f64, f64)> {
        let (mut s_w, mut s_f, mut s_ff, mut s_g, mut s_fg) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for bin in &self.bins {
            let w = bin.pairs as f64;
            let f = kind.structure(bin.distance, range);
            s_w += w;
            s_f += w * f;
            s_ff += w * f * f;
            s_g += w * bin.semivariance;
            s_fg += w * f * bin.semivariance;
        }

        let sse = |c0: f64, c: f64| -> f64 {
            self.bins
                .iter()
                .map(|bin| {
                    let r = bin.semivariance - c0 - c * kind.structure(bin.distance, range);
                    bin.pairs as f64 * r * r
                })
                .sum()
        };

        let mut candidates: Vec<(f64, f64)> = Vec::with_capacity(3);
        let det = s_w * s_ff - s_f * s_f;
        if det.abs() > 1e-12 * s_w * s_ff.max(1e-300) {
            let c0 = (s_ff * s_g - s_f * s_fg) / det;
            let c = (s_w * s_fg - s_f * s_g) / det;
            if c0 >= 0.0 && c >= 0.0 {
                candidates.push((c0, c));
            }
        }
        if candidates.is_empty() {
            if s_ff > 0.0 {
                candidates.push((0.0, (s_fg / s_ff).max(0.0)));
            }
            if s_w > 0.0 {
                candidates.push(((s_g / s_w).max(0.0), 0.0));
            }
        }

        candidates
            .into_iter()
            .map(|(c0, c)| (c0, c, sse(c0, c)))
            .filter(|(_, _, e)| e.is_finite())
            .min_by(|a, b| a.2.total_cmp(&b.2))
    }
}

// ============================================================================
// 拟合结果
// ============================================================================

/// 使用默认模型的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// 点数少于拟合下限
    TooFewPoints,
    /// 有效滞后区间不足
    TooFewLags,
    /// 拟合结果退化（基台为零或参数无效）
    Degenerate,
}

/// 变异函数来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariogramSource {
    /// 由残差拟合
    Fitted,
    /// 默认模型
    Fallback(FallbackReason),
}

/// 变异函数拟合结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariogramFit {
    /// 使用的模型
    pub model: VariogramModel,
    /// 模型来源
    pub source: VariogramSource,
}

impl VariogramFit {
    /// 是否为默认模型
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, VariogramSource::Fallback(_))
    }
}

/// 对残差拟合变异函数，退化时返回默认模型
pub fn fit_variogram(
    kind: VariogramKind,
    points: &[Point2D],
    residuals: &[f64],
    n_lags: usize,
    min_points: usize,
    default_model: VariogramModel,
) -> VariogramFit {
    let fallback = |reason| VariogramFit {
        model: default_model,
        source: VariogramSource::Fallback(reason),
    };

    if points.len() < min_points.max(3) {
        return fallback(FallbackReason::TooFewPoints);
    }

    let empirical = EmpiricalVariogram::compute(points, residuals, n_lags);
    if empirical.bins().len() < 2 {
        return fallback(FallbackReason::TooFewLags);
    }

    match empirical.fit(kind) {
        Some(model) => VariogramFit {
            model,
            source: VariogramSource::Fitted,
        },
        None => fallback(FallbackReason::Degenerate),
    }
}
