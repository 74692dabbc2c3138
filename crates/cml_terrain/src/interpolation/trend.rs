// crates/cml_terrain/src/interpolation/trend.rs

//! 趋势回归
//!
//! 以普通最小二乘拟合温度对高程（可选经纬度）的线性趋势：
//!
//! $$ T = \beta_0 + \beta_1 (z - \bar z) \;[+ \beta_2 (x - \bar x) + \beta_3 (y - \bar y)] $$
//!
//! 协变量先中心化再用 SVD 求最小范数解，设计矩阵秩亏
//! （例如所有点高程相同、点数少于参数个数）时退化为较低阶的趋势而不是失败。

use super::error::{InterpolationError, InterpolationResult};
use cml_geo::Point2D;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// 趋势协变量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendCovariates {
    /// 仅高程
    #[default]
    Elevation,
    /// 高程 + 经度 + 纬度
    ElevationAndLocation,
}

impl TrendCovariates {
    /// 协变量个数（不含截距）
    pub fn count(&self) -> usize {
        match self {
            Self::Elevation => 1,
            Self::ElevationAndLocation => 3,
        }
    }

    fn values(&self, point: &Point2D, elevation: f64) -> [f64; 3] {
        [elevation, point.x, point.y]
    }
}

/// 已拟合的线性趋势
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendModel {
    covariates: TrendCovariates,
    /// 协变量均值
    means: Vec<f64>,
    /// `[截距, 高程斜率, (经度斜率, 纬度斜率)]`
    coefficients: Vec<f64>,
}

impl TrendModel {
    /// 拟合趋势
    pub fn fit(
        covariates: TrendCovariates,
        points: &[Point2D],
        elevations: &[f64],
        values: &[f64],
    ) -> InterpolationResult<Self> {
        let n = points.len();
        if n == 0 {
            return Err(InterpolationError::InsufficientPoints {
                required: 1,
                actual: 0,
            });
        }
        if elevations.len() != n {
            return Err(InterpolationError::SizeMismatch {
                name: "elevations",
                expected: n,
                actual: elevations.len(),
            });
        }
        if values.len() != n {
            return Err(InterpolationError::SizeMismatch {
                name: "values",
                expected: n,
                actual: values.len(),
            });
        }

        let k = covariates.count();
        let mut means = vec![0.0; k];
        for (p, &z) in points.iter().zip(elevations) {
            let row = covariates.values(p, z);
            for j in 0..k {
                means[j] += row[j];
            }
        }
        for m in &mut means {
            *m /= n as f64;
        }

        let x = DMatrix::from_fn(n, k + 1, |i, j| {
            if j == 0 {
                1.0
            } else {
                covariates.values(&points[i], elevations[i])[j - 1] - means[j - 1]
            }
        });
        let y = DVector::from_column_slice(values);

        let svd = x.svd(true, true);
        let max_sv = svd.singular_values.max();
        let eps = if max_sv > 0.0 { max_sv * 1e-10 } else { 1e-12 };
        let beta = svd
            .solve(&y, eps)
            .map_err(|e| InterpolationError::Trend {
                message: e.to_string(),
            })?;

        let coefficients: Vec<f64> = beta.iter().copied().collect();
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(InterpolationError::non_finite("趋势系数"));
        }

        Ok(Self {
            covariates,
            means,
            coefficients,
        })
    }

    /// 趋势值
    pub fn predict(&self, point: &Point2D, elevation: f64) -> f64 {
        let row = self.covariates.values(point, elevation);
        let mut t = self.coefficients[0];
        for (j, mean) in self.means.iter().enumerate() {
            t += self.coefficients[j + 1] * (row[j] - mean);
        }
        t
    }

    /// 残差 `value - trend`
    pub fn residuals(&self, points: &[Point2D], elevations: &[f64], values: &[f64]) -> Vec<f64> {
        points
            .iter()
            .zip(elevations)
            .zip(values)
            .map(|((p, &z), &v)| v - self.predict(p, z))
            .collect()
    }

    /// 高程斜率（℃/m），即递减率的相反数
    pub fn elevation_slope(&self) -> f64 {
        self.coefficients[1]
    }

    /// 协变量均值处的趋势值
    pub fn intercept(&self) -> f64 {
        self.coefficients[0]
    }

    /// 全部系数
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// 协变量
    pub fn covariates(&self) -> TrendCovariates {
        self.covariates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(n: usize) -> Vec<Point2D> {
        (0..n).map(|i| Point2D::new(14.0 + i as f64 * 0.3, 49.5 + (i % 3) as f64 * 0.2)).collect()
    }

    #[test]
    fn test_exact_lapse_rate() {
        let points = pts(5);
        let elevations = [200.0, 400.0, 600.0, 800.0, 1000.0];
        // 每升高 100 m 降温 0.65 ℃
        let values: Vec<f64> = elevations.iter().map(|z| 15.0 - 0.0065 * z).collect();

        let trend = TrendModel::fit(TrendCovariates::Elevation, &points, &elevations, &values).unwrap();
        assert!((trend.elevation_slope() + 0.0065).abs() < 1e-10);
        assert!((trend.predict(&points[0], 300.0) - (15.0 - 0.0065 * 300.0)).abs() < 1e-9);

        let residuals = trend.residuals(&points, &elevations, &values);
        assert!(residuals.iter().all(|r| r.abs() < 1e-9));
    }

    #[test]
    fn test_constant_elevation_gives_mean() {
        let points = pts(3);
        let elevations = [300.0; 3];
        let values = [10.0, 12.0, 14.0];

        let trend = TrendModel::fit(TrendCovariates::Elevation, &points, &elevations, &values).unwrap();
        assert!(trend.elevation_slope().abs() < 1e-12);
        assert!((trend.predict(&points[0], 300.0) - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_point() {
        let trend = TrendModel::fit(TrendCovariates::Elevation, &pts(1), &[500.0], &[8.0]).unwrap();
        assert!((trend.predict(&Point2D::new(0.0, 0.0), 500.0) - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_location_covariates() {
        let points = pts(6);
        let elevations = [250.0, 310.0, 480.0, 520.0, 700.0, 820.0];
        let values: Vec<f64> = points
            .iter()
            .zip(&elevations)
            .map(|(p, z)| 20.0 - 0.006 * z + 0.5 * (p.x - 14.0) - 1.2 * (p.y - 49.5))
            .collect();

        let trend =
            TrendModel::fit(TrendCovariates::ElevationAndLocation, &points, &elevations, &values).unwrap();
        let c = trend.coefficients();
        assert_eq!(c.len(), 4);
        assert!((c[1] + 0.006).abs() < 1e-8);
        assert!((c[2] - 0.5).abs() < 1e-6);
        assert!((c[3] + 1.2).abs() < 1e-6);
    }

    #[test]
    fn test_empty_and_mismatch() {
        assert!(matches!(
            TrendModel::fit(TrendCovariates::Elevation, &[], &[], &[]),
            Err(InterpolationError::InsufficientPoints { .. })
        ));
        assert!(matches!(
            TrendModel::fit(TrendCovariates::Elevation, &pts(2), &[1.0], &[1.0, 2.0]),
            Err(InterpolationError::SizeMismatch { .. })
        ));
    }
}
