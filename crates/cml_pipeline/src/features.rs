// crates/cml_pipeline/src/features.rs

//! 特征构建
//!
//! 为每条通过过滤的读数派生时间、白昼与高程特征。元数据缺失或
//! 高程无法从 DEM 解析的记录被单独丢弃，不影响整批。

use crate::solar::is_daylight;
use crate::types::{DeviceId, DeviceMetadata, FeatureRecord, Reading};
use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use chrono_tz::Tz;
use cml_foundation::error::{CmlError, CmlResult};
use cml_geo::Point2D;
use cml_terrain::dem::SampleMethod;
use cml_terrain::provider::ElevationLookup;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// 配置
// ============================================================================

/// 本地时间特征使用的时区
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeZoneSetting {
    /// UTC
    Utc,
    /// 固定偏移 (小时)
    Fixed(i32),
    /// IANA 时区名
    Named(String),
}

impl Default for TimeZoneSetting {
    fn default() -> Self {
        Self::Named("Europe/Prague".to_string())
    }
}

/// 已解析的时区
#[derive(Debug, Clone, Copy)]
enum LocalZone {
    Utc,
    Fixed(FixedOffset),
    Named(Tz),
}

impl TimeZoneSetting {
    fn resolve(&self) -> CmlResult<LocalZone> {
        match self {
            Self::Utc => Ok(LocalZone::Utc),
            Self::Fixed(hours) => FixedOffset::east_opt(hours * 3600)
                .map(LocalZone::Fixed)
                .ok_or_else(|| CmlError::config(format!("无效的时区偏移: {hours} 小时"))),
            Self::Named(name) => name
                .parse::<Tz>()
                .map(LocalZone::Named)
                .map_err(|_| CmlError::config(format!("未知的时区: {name}"))),
        }
    }
}

/// 特征构建配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// 小时与年积日的时区
    #[serde(default)]
    pub timezone: TimeZoneSetting,

    /// DEM 采样方法（点特征与网格单元共用）
    #[serde(default)]
    pub sample_method: SampleMethod,
}

impl FeatureConfig {
    /// 验证配置
    pub fn validate(&self) -> CmlResult<()> {
        self.timezone.resolve().map(|_| ())
    }
}

// ============================================================================
// 错误
// ============================================================================

/// 单条记录的特征解析错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureResolutionError {
    /// 设备无元数据
    #[error("设备 {device_id} 缺少元数据")]
    MissingMetadata {
        /// 设备
        device_id: DeviceId,
    },

    /// 元数据中的位置无效
    #[error("设备 {device_id} 位置无效: ({lon}, {lat})")]
    InvalidLocation {
        /// 设备
        device_id: DeviceId,
        /// 经度
        lon: f64,
        /// 纬度
        lat: f64,
    },

    /// DEM 无法解析高程
    #[error("设备 {device_id} 位置 ({lon}, {lat}) 无 DEM 高程")]
    UnresolvedElevation {
        /// 设备
        device_id: DeviceId,
        /// 经度
        lon: f64,
        /// 纬度
        lat: f64,
    },
}

/// 特征构建结果
#[derive(Debug, Clone, Default)]
pub struct FeatureBatch {
    /// 特征记录
    pub records: Vec<FeatureRecord>,
    /// 丢弃的读数 `(设备, 时间, 原因)`
    pub dropped: Vec<(DeviceId, DateTime<Utc>, FeatureResolutionError)>,
}

// ============================================================================
// 构建器
// ============================================================================

/// 特征构建器
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    config: FeatureConfig,
    zone: LocalZone,
}

impl FeatureBuilder {
    /// 创建构建器，时区无法解析时返回配置错误
    pub fn new(config: FeatureConfig) -> CmlResult<Self> {
        let zone = config.timezone.resolve()?;
        Ok(Self { config, zone })
    }

    /// 配置
    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// 本地小时与年积日
    pub fn local_hour_and_day(&self, timestamp: DateTime<Utc>) -> (u32, u32) {
        match self.zone {
            LocalZone::Utc => (timestamp.hour(), timestamp.ordinal()),
            LocalZone::Fixed(offset) => {
                let local = timestamp.with_timezone(&offset);
                (local.hour(), local.ordinal())
            }
            LocalZone::Named(tz) => {
                let local = timestamp.with_timezone(&tz);
                (local.hour(), local.ordinal())
            }
        }
    }

    /// 构建特征
    ///
    /// 同一设备的位置与高程在一次构建内只解析一次。
    pub fn build(
        &self,
        readings: &[Reading],
        metadata: &HashMap<DeviceId, DeviceMetadata>,
        dem: &dyn ElevationLookup,
    ) -> FeatureBatch {
        let mut resolved: HashMap<&DeviceId, Result<(Point2D, f64, f64), FeatureResolutionError>> =
            HashMap::new();
        let mut batch = FeatureBatch::default();

        for reading in readings {
            let site = resolved
                .entry(&reading.device_id)
                .or_insert_with(|| resolve_site(&reading.device_id, metadata, dem));

            match site {
                Ok((location, elevation, azimuth)) => {
                    let (hour_of_day, day_of_year) = self.local_hour_and_day(reading.timestamp);
                    batch.records.push(FeatureRecord {
                        device_id: reading.device_id.clone(),
                        timestamp: reading.timestamp,
                        location: *location,
                        hour_of_day,
                        day_of_year,
                        is_daylight: is_daylight(location, reading.timestamp),
                        elevation: *elevation,
                        azimuth: *azimuth,
                        signal_metrics: reading.signal_metrics.clone(),
                    });
                }
                Err(e) => {
                    batch
                        .dropped
                        .push((reading.device_id.clone(), reading.timestamp, e.clone()));
                }
            }
        }

        if !batch.dropped.is_empty() {
            let devices = resolved.values().filter(|r| r.is_err()).count();
            tracing::warn!(
                "特征构建丢弃 {} 条读数 ({} 台设备无法解析位置或高程)",
                batch.dropped.len(),
                devices
            );
        }
        tracing::debug!("特征构建完成: {} 条记录", batch.records.len());
        batch
    }
}

fn resolve_site(
    device_id: &DeviceId,
    metadata: &HashMap<DeviceId, DeviceMetadata>,
    dem: &dyn ElevationLookup,
) -> Result<(Point2D, f64, f64), FeatureResolutionError> {
    let meta = metadata
        .get(device_id)
        .ok_or_else(|| FeatureResolutionError::MissingMetadata {
            device_id: device_id.clone(),
        })?;

    let location = meta.location();
    if !location.is_valid_lonlat() {
        return Err(FeatureResolutionError::InvalidLocation {
            device_id: device_id.clone(),
            lon: meta.longitude,
            lat: meta.latitude,
        });
    }

    let elevation =
        dem.elevation_at(&location)
            .ok_or_else(|| FeatureResolutionError::UnresolvedElevation {
                device_id: device_id.clone(),
                lon: meta.longitude,
                lat: meta.latitude,
            })?;

    let azimuth = if meta.azimuth.is_finite() { meta.azimuth } else { 0.0 };
    Ok((location, elevation, azimuth))
}
