// crates/cml_pipeline/src/types.rs

//! 管线数据模型
//!
//! 读数 → 特征记录 → 预测点，全部为周期内的值对象。

use chrono::{DateTime, Utc};
use cml_geo::Point2D;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 设备标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// 创建设备标识
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 字符串形式
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// 设备读数
///
/// `(device_id, timestamp)` 唯一。`signal_metrics` 按通道配置顺序排列，
/// 缺失值以 NaN 或缺少尾部元素表示。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// 设备
    pub device_id: DeviceId,
    /// 时间戳
    pub timestamp: DateTime<Utc>,
    /// 信号指标
    #[serde(with = "nullable_metrics")]
    pub signal_metrics: Vec<f64>,
}

/// JSON 中以 `null` 表示缺失指标，内存中为 NaN
mod nullable_metrics {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        let values: Vec<Option<f64>> = values
            .iter()
            .map(|v| if v.is_nan() { None } else { Some(*v) })
            .collect();
        values.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let values = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}

impl Reading {
    /// 创建读数
    pub fn new(device_id: impl Into<DeviceId>, timestamp: DateTime<Utc>, signal_metrics: Vec<f64>) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            signal_metrics,
        }
    }

    /// 第 `index` 个指标（缺失或非有限时为 `None`）
    pub fn metric(&self, index: usize) -> Option<f64> {
        self.signal_metrics.get(index).copied().filter(|v| v.is_finite())
    }
}

/// 设备元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    /// 设备
    pub device_id: DeviceId,
    /// 纬度
    pub latitude: f64,
    /// 经度
    pub longitude: f64,
    /// 天线方位角 (度)
    pub azimuth: f64,
    /// 登记高程 (m)，仅供参考，趋势协变量以 DEM 为准
    #[serde(default)]
    pub elevation: Option<f64>,
}

impl DeviceMetadata {
    /// 设备位置
    pub fn location(&self) -> Point2D {
        Point2D::from_lonlat(self.longitude, self.latitude)
    }
}

/// 特征记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// 设备
    pub device_id: DeviceId,
    /// 时间戳
    pub timestamp: DateTime<Utc>,
    /// 设备位置
    pub location: Point2D,
    /// 本地小时 (0-23)
    pub hour_of_day: u32,
    /// 本地年积日 (1-366)
    pub day_of_year: u32,
    /// 是否白昼
    pub is_daylight: bool,
    /// DEM 高程 (m)
    pub elevation: f64,
    /// 天线方位角 (度)
    pub azimuth: f64,
    /// 信号指标
    pub signal_metrics: Vec<f64>,
}

/// 预测点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedPoint {
    /// 设备
    pub device_id: DeviceId,
    /// 位置
    pub location: Point2D,
    /// 时间戳
    pub timestamp: DateTime<Utc>,
    /// 预测温度 (℃)
    pub predicted_temperature: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_metric() {
        let r = Reading::new("a", Utc::now(), vec![1.0, f64::NAN]);
        assert_eq!(r.metric(0), Some(1.0));
        assert_eq!(r.metric(1), None);
        assert_eq!(r.metric(2), None);
    }

    #[test]
    fn test_reading_null_metric() {
        let r: Reading = serde_json::from_str(
            r#"{"device_id":"a","timestamp":"2024-05-01T12:00:00Z","signal_metrics":[21.5,null]}"#,
        )
        .unwrap();
        assert_eq!(r.metric(0), Some(21.5));
        assert!(r.signal_metrics[1].is_nan());

        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("[21.5,null]"));
    }

    #[test]
    fn test_device_id_serde_transparent() {
        let id = DeviceId::new("10.0.0.1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"10.0.0.1\"");
        assert_eq!(id.to_string(), "10.0.0.1");
    }

    #[test]
    fn test_metadata_location() {
        let meta: DeviceMetadata = serde_json::from_str(
            r#"{"device_id":"a","latitude":50.0,"longitude":14.4,"azimuth":90.0}"#,
        )
        .unwrap();
        assert_eq!(meta.location(), Point2D::from_lonlat(14.4, 50.0));
        assert!(meta.elevation.is_none());
    }
}
