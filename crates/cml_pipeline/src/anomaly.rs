// crates/cml_pipeline/src/anomaly.rs

//! 异常读数过滤
//!
//! 依次执行四项检查，任何一项不通过即剔除该读数：
//!
//! 1. 重启：同一设备在本批内运行时长通道减小，剔除该设备全部读数
//! 2. 缺失：必需通道缺失或为 NaN
//! 3. 范围：指标超出物理合理范围
//! 4. 偏离：相对同设备最近窗口的稳健 z 分数（中位数/MAD）超过阈值
//!
//! 过滤从不返回错误，只缩小数据集。通过缺失与范围检查的读数（包括被
//! 判为偏离的读数）进入设备历史窗口，持续的电平跳变在半个窗口后成为
//! 新的基线。窗口同时按条数 `window` 与时长 `max_history_age_secs`
//! 截断，超过时长没有读数的设备被移除。历史不足 `min_history` 的设备
//! 跳过偏离检查。相同输入与窗口状态产生相同输出。
//!
//! 特征构建之后，[`AnomalyFilter::screen_spatial`] 在整批记录上执行
//! 空间离群检测，见 [`crate::outliers`]。

use crate::outliers::{self, SpatialOutcome, SpatialOutlierConfig};
use crate::types::{DeviceId, FeatureRecord, Reading};
use chrono::{DateTime, Duration, Utc};
use cml_foundation::error::{CmlError, CmlResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

/// MAD 转标准差的系数
const MAD_SCALE: f64 = 1.4826;

/// 历史保留时长上限（365 天）
const MAX_HISTORY_AGE_SECS: u64 = 365 * 24 * 3600;

// ============================================================================
// 配置
// ============================================================================

/// 指标通道定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricChannel {
    /// 通道名称
    pub name: String,
    /// 合理下限
    #[serde(default)]
    pub min: Option<f64>,
    /// 合理上限
    #[serde(default)]
    pub max: Option<f64>,
    /// 是否必需
    #[serde(default = "default_true")]
    pub required: bool,
    /// 是否参与偏离检查
    #[serde(default = "default_true")]
    pub deviation_check: bool,
}

fn default_true() -> bool {
    true
}

impl MetricChannel {
    /// 创建通道
    pub fn new(name: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            required: true,
            deviation_check: true,
        }
    }

    /// 设置为可选通道
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// 不参与偏离检查
    pub fn without_deviation_check(mut self) -> Self {
        self.deviation_check = false;
        self
    }

    fn in_range(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

fn default_channels() -> Vec<MetricChannel> {
    vec![
        MetricChannel::new("temperature_mw", Some(-40.0), Some(85.0)),
        MetricChannel::new("signal", Some(-120.0), Some(0.0)),
        MetricChannel::new("uptime", Some(0.0), None).without_deviation_check(),
    ]
}

fn default_window() -> usize {
    12
}

fn default_min_history() -> usize {
    3
}

fn default_z_threshold() -> f64 {
    3.5
}

fn default_mad_floor() -> f64 {
    0.1
}

fn default_max_history_age_secs() -> u64 {
    7200
}

fn default_uptime_channel() -> Option<String> {
    Some("uptime".to_string())
}

/// 异常过滤配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// 指标通道，顺序与 `Reading::signal_metrics` 一致
    #[serde(default = "default_channels")]
    pub channels: Vec<MetricChannel>,

    /// 每台设备保留的历史读数个数
    #[serde(default = "default_window")]
    pub window: usize,

    /// 执行偏离检查所需的最少历史读数
    #[serde(default = "default_min_history")]
    pub min_history: usize,

    /// 稳健 z 分数阈值
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,

    /// 离散度下限（与指标同单位），避免常值历史把微小波动判为异常
    #[serde(default = "default_mad_floor")]
    pub mad_floor: f64,

    /// 历史读数最长保留时长 [s]
    #[serde(default = "default_max_history_age_secs")]
    pub max_history_age_secs: u64,

    /// 用于重启检测的运行时长通道，`None` 表示不检测
    #[serde(default = "default_uptime_channel")]
    pub uptime_channel: Option<String>,

    /// 空间离群检测
    #[serde(default)]
    pub spatial: SpatialOutlierConfig,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            window: default_window(),
            min_history: default_min_history(),
            z_threshold: default_z_threshold(),
            mad_floor: default_mad_floor(),
            max_history_age_secs: default_max_history_age_secs(),
            uptime_channel: default_uptime_channel(),
            spatial: SpatialOutlierConfig::default(),
        }
    }
}

impl AnomalyConfig {
    /// 验证配置
    pub fn validate(&self) -> CmlResult<()> {
        if self.channels.is_empty() {
            return Err(CmlError::config("anomaly.channels 不能为空"));
        }
        let mut names = HashSet::new();
        for ch in &self.channels {
            if !names.insert(ch.name.as_str()) {
                return Err(CmlError::config(format!("anomaly.channels 重复通道: {}", ch.name)));
            }
            if let (Some(min), Some(max)) = (ch.min, ch.max) {
                if !(min <= max) {
                    return Err(CmlError::config(format!(
                        "通道 {} 的范围无效: [{}, {}]",
                        ch.name, min, max
                    )));
                }
            }
        }
        if self.window == 0 {
            return Err(CmlError::config("anomaly.window 必须大于0"));
        }
        if self.min_history == 0 || self.min_history > self.window {
            return Err(CmlError::config(format!(
                "anomaly.min_history 必须在 1..={} 内, 实际{}",
                self.window, self.min_history
            )));
        }
        if !(self.z_threshold > 0.0) {
            return Err(CmlError::config(format!(
                "anomaly.z_threshold 必须为正: {}",
                self.z_threshold
            )));
        }
        if !(self.mad_floor >= 0.0 && self.mad_floor.is_finite()) {
            return Err(CmlError::config(format!(
                "anomaly.mad_floor 必须为非负有限值: {}",
                self.mad_floor
            )));
        }
        if !(1..=MAX_HISTORY_AGE_SECS).contains(&self.max_history_age_secs) {
            return Err(CmlError::config(format!(
                "anomaly.max_history_age_secs 必须在 1..={} 内, 实际{}",
                MAX_HISTORY_AGE_SECS, self.max_history_age_secs
            )));
        }
        if let Some(name) = &self.uptime_channel {
            if self.channel_index(name).is_none() {
                return Err(CmlError::config(format!("anomaly.uptime_channel 未定义: {name}")));
            }
        }
        self.spatial.validate()?;
        if self.spatial.enabled && self.channel_index(&self.spatial.temperature_channel).is_none() {
            return Err(CmlError::config(format!(
                "anomaly.spatial.temperature_channel 未定义: {}",
                self.spatial.temperature_channel
            )));
        }
        Ok(())
    }

    /// 历史保留时长
    pub fn max_history_age(&self) -> Duration {
        Duration::seconds(self.max_history_age_secs.min(MAX_HISTORY_AGE_SECS) as i64)
    }

    /// 按名称查找通道位置
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }

    /// 通道名称列表
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }
}

// ============================================================================
// 结果
// ============================================================================

/// 剔除原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// 必需指标缺失或为 NaN
    Missing {
        /// 通道
        channel: String,
    },
    /// 超出合理范围
    Range {
        /// 通道
        channel: String,
        /// 读数
        value: f64,
    },
    /// 偏离近期历史
    Deviation {
        /// 通道
        channel: String,
        /// 稳健 z 分数
        score: f64,
    },
    /// 设备在本批内重启
    Restart,
    /// 温度相对整批为离群值而高程不是
    GlobalOutlier {
        /// 温度通道
        channel: String,
        /// 温度 z 分数
        z_score: f64,
    },
    /// 与半径内邻居均值相差过大
    LocalOutlier {
        /// 温度通道
        channel: String,
        /// 与邻居均值之差
        residual: f64,
        /// 邻居数
        neighbors: usize,
    },
}

impl RejectReason {
    /// 原因代码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Missing { .. } => "missing",
            Self::Range { .. } => "range",
            Self::Deviation { .. } => "deviation",
            Self::Restart => "restart",
            Self::GlobalOutlier { .. } => "global_outlier",
            Self::LocalOutlier { .. } => "local_outlier",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { channel } => write!(f, "missing: {channel}"),
            Self::Range { channel, value } => write!(f, "range: {channel}={value}"),
            Self::Deviation { channel, score } => write!(f, "deviation: {channel} z={score:.2}"),
            Self::Restart => f.write_str("restart"),
            Self::GlobalOutlier { channel, z_score } => {
                write!(f, "global outlier: {channel} z={z_score:.2}")
            }
            Self::LocalOutlier {
                channel,
                residual,
                neighbors,
            } => write!(f, "local outlier: {channel} residual={residual:.2} ({neighbors} neighbors)"),
        }
    }
}

/// 过滤统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    /// 通过
    pub accepted: usize,
    /// 超范围
    pub range: usize,
    /// 偏离
    pub deviation: usize,
    /// 缺失
    pub missing: usize,
    /// 重启
    pub restart: usize,
}

impl FilterStats {
    /// 剔除总数
    pub fn rejected(&self) -> usize {
        self.range + self.deviation + self.missing + self.restart
    }

    fn record(&mut self, reason: &RejectReason) {
        match reason {
            RejectReason::Missing { .. } => self.missing += 1,
            RejectReason::Range { .. } => self.range += 1,
            RejectReason::Deviation { .. } => self.deviation += 1,
            RejectReason::Restart => self.restart += 1,
            // 空间检测在特征构建之后单独计数
            RejectReason::GlobalOutlier { .. } | RejectReason::LocalOutlier { .. } => {}
        }
    }
}

/// 过滤结果
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    /// 通过的读数（按设备、时间排序）
    pub clean: Vec<Reading>,
    /// 剔除的读数及原因
    pub rejected: Vec<(Reading, RejectReason)>,
    /// 统计
    pub stats: FilterStats,
}

// ============================================================================
// 过滤器
// ============================================================================

/// 设备历史窗口
#[derive(Debug, Clone, Default)]
struct DeviceHistory {
    entries: VecDeque<(DateTime<Utc>, Vec<f64>)>,
}

impl DeviceHistory {
    /// `[since, before)` 内的通道历史值
    fn channel_between(&self, channel: usize, since: DateTime<Utc>, before: DateTime<Utc>) -> Vec<f64> {
        self.entries
            .iter()
            .filter(|(t, _)| *t >= since && *t < before)
            .filter_map(|(_, m)| m.get(channel).copied())
            .filter(|v| v.is_finite())
            .collect()
    }

    fn push(&mut self, timestamp: DateTime<Utc>, metrics: &[f64], window: usize) {
        // 重叠加载的读数已在窗口中
        if self.entries.iter().any(|(t, _)| *t == timestamp) {
            return;
        }
        let pos = self.entries.partition_point(|(t, _)| *t < timestamp);
        self.entries.insert(pos, (timestamp, metrics.to_vec()));
        while self.entries.len() > window {
            self.entries.pop_front();
        }
    }

    fn prune_before(&mut self, cutoff: DateTime<Utc>) {
        while self.entries.front().is_some_and(|(t, _)| *t < cutoff) {
            self.entries.pop_front();
        }
    }
}

/// 异常过滤器
///
/// 持有每台设备的历史窗口，跨周期复用。
#[derive(Debug, Clone)]
pub struct AnomalyFilter {
    config: AnomalyConfig,
    uptime_index: Option<usize>,
    history: HashMap<DeviceId, DeviceHistory>,
}

impl AnomalyFilter {
    /// 创建过滤器
    pub fn new(config: AnomalyConfig) -> CmlResult<Self> {
        config.validate()?;
        let uptime_index = config
            .uptime_channel
            .as_deref()
            .and_then(|name| config.channel_index(name));
        Ok(Self {
            config,
            uptime_index,
            history: HashMap::new(),
        })
    }

    /// 配置
    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// 有历史记录的设备数
    pub fn tracked_devices(&self) -> usize {
        self.history.len()
    }

    /// 清空历史窗口
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// 过滤一批读数
    pub fn filter(&mut self, readings: Vec<Reading>) -> FilterOutcome {
        let mut by_device: BTreeMap<DeviceId, Vec<Reading>> = BTreeMap::new();
        for r in readings {
            by_device.entry(r.device_id.clone()).or_default().push(r);
        }

        let latest = by_device
            .values()
            .flat_map(|batch| batch.iter().map(|r| r.timestamp))
            .max();

        let mut outcome = FilterOutcome::default();
        for (device, mut batch) in by_device {
            batch.sort_by_key(|r| r.timestamp);

            if self.restarted(&batch) {
                tracing::debug!("设备 {} 在本批内重启, 剔除 {} 条读数", device, batch.len());
                for r in batch {
                    outcome.stats.record(&RejectReason::Restart);
                    outcome.rejected.push((r, RejectReason::Restart));
                }
                continue;
            }

            for r in batch {
                let verdict = self.check(&r);
                if matches!(verdict, None | Some(RejectReason::Deviation { .. })) {
                    self.history
                        .entry(device.clone())
                        .or_default()
                        .push(r.timestamp, &r.signal_metrics, self.config.window);
                }
                match verdict {
                    Some(reason) => {
                        outcome.stats.record(&reason);
                        outcome.rejected.push((r, reason));
                    }
                    None => {
                        outcome.stats.accepted += 1;
                        outcome.clean.push(r);
                    }
                }
            }
        }

        if let Some(latest) = latest {
            self.evict_before(latest - self.config.max_history_age());
        }

        let s = outcome.stats;
        tracing::info!(
            "异常过滤: 通过 {}, 剔除 {} (range {}, deviation {}, missing {}, restart {})",
            s.accepted,
            s.rejected(),
            s.range,
            s.deviation,
            s.missing,
            s.restart
        );
        outcome
    }

    /// 空间离群检测
    ///
    /// 作用于特征构建后的整批记录，未启用时原样返回。
    pub fn screen_spatial(&self, records: Vec<FeatureRecord>) -> SpatialOutcome {
        let spatial = &self.config.spatial;
        match self.config.channel_index(&spatial.temperature_channel) {
            Some(idx) if spatial.enabled => outliers::screen(spatial, idx, records),
            _ => SpatialOutcome::passthrough(records),
        }
    }

    /// 丢弃早于 `cutoff` 的历史，移除没有剩余历史的设备
    fn evict_before(&mut self, cutoff: DateTime<Utc>) {
        let before = self.history.len();
        self.history.retain(|_, h| {
            h.prune_before(cutoff);
            !h.entries.is_empty()
        });
        let evicted = before - self.history.len();
        if evicted > 0 {
            tracing::debug!("移除 {} 台长时间无读数的设备历史", evicted);
        }
    }

    /// 运行时长在批内是否减小（读数已按时间排序）
    fn restarted(&self, batch: &[Reading]) -> bool {
        let Some(idx) = self.uptime_index else {
            return false;
        };
        let uptimes: Vec<f64> = batch.iter().filter_map(|r| r.metric(idx)).collect();
        uptimes.windows(2).any(|w| w[1] < w[0])
    }

    fn check(&self, reading: &Reading) -> Option<RejectReason> {
        for (i, ch) in self.config.channels.iter().enumerate() {
            let Some(v) = reading.signal_metrics.get(i).copied().filter(|v| !v.is_nan()) else {
                if ch.required {
                    return Some(RejectReason::Missing {
                        channel: ch.name.clone(),
                    });
                }
                continue;
            };
            if v.is_infinite() || !ch.in_range(v) {
                return Some(RejectReason::Range {
                    channel: ch.name.clone(),
                    value: v,
                });
            }
        }

        let history = self.history.get(&reading.device_id)?;
        for (i, ch) in self.config.channels.iter().enumerate() {
            if !ch.deviation_check {
                continue;
            }
            let Some(value) = reading.metric(i) else {
                continue;
            };
            let since = reading.timestamp - self.config.max_history_age();
            let recent = history.channel_between(i, since, reading.timestamp);
            let recent = &recent[recent.len().saturating_sub(self.config.window)..];
            if recent.len() < self.config.min_history {
                continue;
            }
            let score = robust_z(value, recent, self.config.mad_floor);
            if score > self.config.z_threshold {
                return Some(RejectReason::Deviation {
                    channel: ch.name.clone(),
                    score,
                });
            }
        }
        None
    }
}

/// 中位数
fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// 稳健 z 分数 `|x - median| / (1.4826 * MAD)`
fn robust_z(value: f64, window: &[f64], mad_floor: f64) -> f64 {
    let mut sorted = window.to_vec();
    let center = median(&mut sorted);
    let mut deviations: Vec<f64> = window.iter().map(|v| (v - center).abs()).collect();
    let spread = (MAD_SCALE * median(&mut deviations)).max(mad_floor).max(f64::MIN_POSITIVE);
    (value - center).abs() / spread
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn reading(device: &str, minute: i64, temp: f64, signal: f64, uptime: f64) -> Reading {
        Reading::new(device, t(minute), vec![temp, signal, uptime])
    }

    fn filter() -> AnomalyFilter {
        AnomalyFilter::new(AnomalyConfig::default()).unwrap()
    }

    #[test]
    fn test_config_validate() {
        assert!(AnomalyConfig::default().validate().is_ok());

        let mut bad = AnomalyConfig::default();
        bad.uptime_channel = Some("nope".into());
        assert!(bad.validate().is_err());

        let mut bad = AnomalyConfig::default();
        bad.min_history = 20;
        assert!(bad.validate().is_err());

        let mut bad = AnomalyConfig::default();
        bad.channels.push(MetricChannel::new("signal", None, None));
        assert!(bad.validate().is_err());

        let mut bad = AnomalyConfig::default();
        bad.max_history_age_secs = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_spatial_channel_must_exist_when_enabled() {
        let mut config = AnomalyConfig::default();
        config.spatial.temperature_channel = "temperature_air".into();
        assert!(config.validate().is_err());

        config.spatial.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_range_rejection() {
        let mut f = filter();
        let out = f.filter(vec![
            reading("a", 0, 20.0, -50.0, 100.0),
            reading("b", 0, 120.0, -50.0, 100.0),
            reading("c", 0, 20.0, 10.0, 100.0),
        ]);
        assert_eq!(out.clean.len(), 1);
        assert_eq!(out.rejected.len(), 2);
        assert!(out.rejected.iter().all(|(_, r)| r.code() == "range"));
        assert_eq!(out.stats.range, 2);
    }

    #[test]
    fn test_nan_is_rejected() {
        let mut f = filter();
        let out = f.filter(vec![
            reading("a", 0, f64::NAN, -50.0, 100.0),
            reading("b", 0, 20.0, f64::INFINITY, 100.0),
        ]);
        assert!(out.clean.is_empty());
        assert_eq!(out.stats.missing, 1);
        assert_eq!(out.stats.range, 1);
    }

    #[test]
    fn test_missing_metric() {
        let mut f = filter();
        let out = f.filter(vec![Reading::new("a", t(0), vec![20.0])]);
        assert_eq!(
            out.rejected[0].1,
            RejectReason::Missing {
                channel: "signal".into()
            }
        );
    }

    #[test]
    fn test_optional_channel_may_be_missing() {
        let mut config = AnomalyConfig::default();
        config.channels[2] = MetricChannel::new("uptime", Some(0.0), None).optional();
        config.uptime_channel = None;
        let mut f = AnomalyFilter::new(config).unwrap();
        let out = f.filter(vec![Reading::new("a", t(0), vec![20.0, -50.0])]);
        assert_eq!(out.clean.len(), 1);
    }

    #[test]
    fn test_restart_rejects_device() {
        let mut f = filter();
        let out = f.filter(vec![
            reading("a", 0, 20.0, -50.0, 1000.0),
            reading("a", 5, 20.0, -50.0, 10.0),
            reading("a", 10, 20.0, -50.0, 310.0),
            reading("b", 0, 20.0, -50.0, 1000.0),
        ]);
        assert_eq!(out.stats.restart, 3);
        assert_eq!(out.clean.len(), 1);
        assert_eq!(out.clean[0].device_id.as_str(), "b");
    }

    #[test]
    fn test_no_history_skips_deviation() {
        let mut f = filter();
        // 第一条读数无历史，只做范围检查
        let out = f.filter(vec![reading("a", 0, 80.0, -50.0, 100.0)]);
        assert_eq!(out.clean.len(), 1);
    }

    #[test]
    fn test_deviation_rejection() {
        let mut f = filter();
        let mut batch: Vec<Reading> = (0..6)
            .map(|i| reading("a", i * 5, 20.0 + 0.1 * (i % 2) as f64, -50.0, 100.0 + i as f64))
            .collect();
        batch.push(reading("a", 30, 45.0, -50.0, 200.0));
        let out = f.filter(batch);

        assert_eq!(out.stats.accepted, 6);
        assert_eq!(out.stats.deviation, 1);
        assert_eq!(out.rejected[0].1.code(), "deviation");
    }

    #[test]
    fn test_history_persists_and_ignores_overlap() {
        let mut f = filter();
        let first: Vec<Reading> = (0..4)
            .map(|i| reading("a", i * 5, 20.0, -50.0, 100.0 + i as f64))
            .collect();
        f.filter(first.clone());
        assert_eq!(f.tracked_devices(), 1);

        // 重叠窗口重新加载相同读数，结果不变
        let again = f.filter(first);
        assert_eq!(again.stats.accepted, 4);

        let out = f.filter(vec![reading("a", 20, 35.0, -50.0, 200.0)]);
        assert_eq!(out.stats.deviation, 1);

        f.reset();
        let out = f.filter(vec![reading("a", 25, 35.0, -50.0, 300.0)]);
        assert_eq!(out.stats.accepted, 1);
    }

    #[test]
    fn test_persistent_step_change_recovers() {
        let mut f = filter();
        let batch = |hour: i64, signal: f64| -> Vec<Reading> {
            (0..12)
                .map(|k| {
                    let minute = 60 * hour + 5 * k;
                    reading("a", minute, 20.0, signal, 60.0 * minute as f64)
                })
                .collect()
        };

        assert_eq!(f.filter(batch(0, -50.0)).stats.accepted, 12);

        // 跳变后的读数逐条进入窗口，过半后成为新的基线
        let out = f.filter(batch(1, -51.0));
        assert_eq!(out.stats.deviation, 6);
        assert_eq!(out.stats.accepted, 6);
        assert!(out.rejected.iter().all(|(r, _)| r.timestamp < t(90)));

        for hour in 2..24 {
            let out = f.filter(batch(hour, -51.0));
            assert_eq!(out.stats.accepted, 12, "hour {hour}");
        }
    }

    #[test]
    fn test_aged_history_ignored() {
        let mut f = filter();
        f.filter(
            (0..4)
                .map(|i| reading("a", i * 5, 20.0, -50.0, 100.0 + i as f64))
                .collect(),
        );

        // 超过保留时长的历史不再参与偏离检查
        let out = f.filter(vec![reading("a", 200, 20.0, -60.0, 20_000.0)]);
        assert_eq!(out.stats.accepted, 1);
        assert_eq!(f.tracked_devices(), 1);
    }

    #[test]
    fn test_stale_devices_evicted() {
        let mut f = filter();
        f.filter(vec![
            reading("a", 0, 20.0, -50.0, 100.0),
            reading("b", 0, 20.0, -50.0, 100.0),
        ]);
        assert_eq!(f.tracked_devices(), 2);

        f.filter(vec![reading("b", 180, 20.0, -50.0, 10_900.0)]);
        assert_eq!(f.tracked_devices(), 1);

        // 范围不合格的读数不进入历史
        f.filter(vec![reading("c", 180, 150.0, -50.0, 100.0)]);
        assert_eq!(f.tracked_devices(), 1);
    }

    #[test]
    fn test_screen_spatial_disabled_passes_through() {
        let mut config = AnomalyConfig::default();
        config.spatial.enabled = false;
        let f = AnomalyFilter::new(config).unwrap();

        let records: Vec<FeatureRecord> = [15.0, 15.0, 15.0, 40.0]
            .into_iter()
            .enumerate()
            .map(|(i, temp)| FeatureRecord {
                device_id: format!("d{i}").into(),
                timestamp: t(0),
                location: cml_geo::Point2D::from_lonlat(14.0 + i as f64, 50.0),
                hour_of_day: 12,
                day_of_year: 153,
                is_daylight: true,
                elevation: 300.0,
                azimuth: 0.0,
                signal_metrics: vec![temp, -50.0, 100.0],
            })
            .collect();
        let out = f.screen_spatial(records.clone());
        assert_eq!(out.kept, records);
        assert!(out.rejected.is_empty());
    }

    #[test]
    fn test_deterministic_regardless_of_input_order() {
        let batch = vec![
            reading("b", 5, 21.0, -55.0, 10.0),
            reading("a", 0, 20.0, -50.0, 100.0),
            reading("b", 0, 21.0, -55.0, 5.0),
        ];
        let mut reversed = batch.clone();
        reversed.reverse();

        let a = filter().filter(batch);
        let b = filter().filter(reversed);
        assert_eq!(a.clean, b.clean);
        assert_eq!(a.stats, b.stats);
    }

    #[test]
    fn test_robust_z() {
        let z = robust_z(10.0, &[1.0, 2.0, 3.0, 4.0, 5.0], 0.0);
        // median=3, MAD=1
        assert!((z - 7.0 / MAD_SCALE).abs() < 1e-12);
    }
}
