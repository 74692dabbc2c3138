// crates/cml_pipeline/src/outliers.rs

//! 空间离群检测
//!
//! 在特征构建后的整批记录上执行两项检测：
//!
//! - 全局：温度 z 分数超过阈值而高程 z 分数未超过，温度异常无法由地形解释
//! - 局部：与 `radius_km` 内其他设备记录的温度均值之差超过 `residual_threshold`，
//!   邻居少于 `min_neighbors` 的记录记为未评估
//!
//! 两项结果按 [`CombineMode`] 合并。z 分数使用样本标准差；温度非有限的
//! 记录不参与统计也不被剔除。

use crate::anomaly::RejectReason;
use crate::types::FeatureRecord;
use cml_foundation::error::{CmlError, CmlResult};
use cml_geo::SpatialIndex;
use serde::{Deserialize, Serialize};

/// 全局与局部检测结果的合并方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineMode {
    /// 任一检测命中即剔除
    #[default]
    Union,
    /// 两项检测都命中才剔除
    Intersection,
}

impl CombineMode {
    fn combine(self, global: bool, local: bool) -> bool {
        match self {
            Self::Union => global || local,
            Self::Intersection => global && local,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_temperature_channel() -> String {
    "temperature_mw".to_string()
}

fn default_z_threshold() -> f64 {
    2.0
}

fn default_residual_threshold() -> f64 {
    6.0
}

fn default_min_neighbors() -> usize {
    5
}

fn default_radius_km() -> f64 {
    20.0
}

/// 空间离群检测配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialOutlierConfig {
    /// 是否启用
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// 温度通道名称
    #[serde(default = "default_temperature_channel")]
    pub temperature_channel: String,

    /// 全局检测的 z 分数阈值（温度与高程共用）
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,

    /// 局部检测的温差阈值 [℃]
    #[serde(default = "default_residual_threshold")]
    pub residual_threshold: f64,

    /// 局部检测所需的最少邻居数
    #[serde(default = "default_min_neighbors")]
    pub min_neighbors: usize,

    /// 邻域半径 [km]
    #[serde(default = "default_radius_km")]
    pub radius_km: f64,

    /// 合并方式
    #[serde(default)]
    pub combine: CombineMode,
}

impl Default for SpatialOutlierConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            temperature_channel: default_temperature_channel(),
            z_threshold: default_z_threshold(),
            residual_threshold: default_residual_threshold(),
            min_neighbors: default_min_neighbors(),
            radius_km: default_radius_km(),
            combine: CombineMode::default(),
        }
    }
}

impl SpatialOutlierConfig {
    /// 验证配置
    pub fn validate(&self) -> CmlResult<()> {
        let positive = [
            ("z_threshold", self.z_threshold),
            ("residual_threshold", self.residual_threshold),
            ("radius_km", self.radius_km),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(CmlError::config(format!(
                    "anomaly.spatial.{name} 必须为正有限值: {value}"
                )));
            }
        }
        if self.min_neighbors == 0 {
            return Err(CmlError::config("anomaly.spatial.min_neighbors 必须大于0"));
        }
        Ok(())
    }
}

/// 空间检测结果
#[derive(Debug, Clone, Default)]
pub struct SpatialOutcome {
    /// 保留的记录（保持输入顺序）
    pub kept: Vec<FeatureRecord>,
    /// 剔除的记录及原因
    pub rejected: Vec<(FeatureRecord, RejectReason)>,
    /// 全局检测命中数（合并前）
    pub global: usize,
    /// 局部检测命中数（合并前）
    pub local: usize,
    /// 邻居不足、未做局部判断的记录数
    pub unevaluated: usize,
}

impl SpatialOutcome {
    pub(crate) fn passthrough(records: Vec<FeatureRecord>) -> Self {
        Self {
            kept: records,
            ..Default::default()
        }
    }
}

/// 均值与样本标准差，少于两个值时为 `None`
fn sample_moments(values: &[f64]) -> Option<(f64, f64)> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    Some((mean, var.sqrt()))
}

/// 全局 z 分数；温度离散度为零时不判断，高程离散度为零时高程 z 取 0
fn global_z(
    temperature: f64,
    elevation: f64,
    temp_moments: Option<(f64, f64)>,
    elev_moments: Option<(f64, f64)>,
) -> Option<(f64, f64)> {
    let (t_mean, t_std) = temp_moments.filter(|(_, s)| *s > 0.0)?;
    let z_elev = match elev_moments {
        Some((e_mean, e_std)) if e_std > 0.0 && elevation.is_finite() => (elevation - e_mean) / e_std,
        _ => 0.0,
    };
    Some(((temperature - t_mean) / t_std, z_elev))
}

pub(crate) fn screen(
    config: &SpatialOutlierConfig,
    temperature_index: usize,
    records: Vec<FeatureRecord>,
) -> SpatialOutcome {
    let temps: Vec<Option<f64>> = records
        .iter()
        .map(|r| r.signal_metrics.get(temperature_index).copied().filter(|v| v.is_finite()))
        .collect();
    let valid: Vec<usize> = (0..records.len()).filter(|&i| temps[i].is_some()).collect();

    let temp_values: Vec<f64> = valid.iter().filter_map(|&i| temps[i]).collect();
    let elev_values: Vec<f64> = valid
        .iter()
        .map(|&i| records[i].elevation)
        .filter(|e| e.is_finite())
        .collect();
    let temp_moments = sample_moments(&temp_values);
    let elev_moments = sample_moments(&elev_values);
    let index = SpatialIndex::bulk_load(valid.iter().map(|&i| (records[i].location, i)).collect());

    let mut outcome = SpatialOutcome::default();
    let mut verdicts: Vec<Option<RejectReason>> = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let Some(temperature) = temps[i] else {
            verdicts.push(None);
            continue;
        };

        let global = global_z(temperature, record.elevation, temp_moments, elev_moments)
            .filter(|(z_t, z_e)| z_t.abs() > config.z_threshold && z_e.abs() <= config.z_threshold)
            .map(|(z_t, _)| z_t);

        let neighbours: Vec<f64> = index
            .within_km(&record.location, config.radius_km)
            .into_iter()
            .filter(|&(_, &j)| records[j].device_id != record.device_id)
            .filter_map(|(_, &j)| temps[j])
            .collect();
        let local = if neighbours.len() >= config.min_neighbors {
            let mean = neighbours.iter().sum::<f64>() / neighbours.len() as f64;
            let residual = temperature - mean;
            (residual.abs() > config.residual_threshold).then_some(residual)
        } else {
            outcome.unevaluated += 1;
            None
        };

        outcome.global += usize::from(global.is_some());
        outcome.local += usize::from(local.is_some());

        let channel = || config.temperature_channel.clone();
        let verdict = if !config.combine.combine(global.is_some(), local.is_some()) {
            None
        } else if let Some(residual) = local {
            Some(RejectReason::LocalOutlier {
                channel: channel(),
                residual,
                neighbors: neighbours.len(),
            })
        } else {
            global.map(|z_score| RejectReason::GlobalOutlier {
                channel: channel(),
                z_score,
            })
        };
        verdicts.push(verdict);
    }

    for (record, verdict) in records.into_iter().zip(verdicts) {
        match verdict {
            Some(reason) => outcome.rejected.push((record, reason)),
            None => outcome.kept.push(record),
        }
    }

    tracing::info!(
        "空间离群检测: 全局 {}, 局部 {}, 未评估 {}, 剔除 {} ({:?})",
        outcome.global,
        outcome.local,
        outcome.unevaluated,
        outcome.rejected.len(),
        config.combine
    );
    outcome
}
