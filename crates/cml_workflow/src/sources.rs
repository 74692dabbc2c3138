// crates/cml_workflow/src/sources.rs

//! 数据来源模块
//!
//! 遥测加载与设备元数据解析的抽象，以及基于 JSON 文件的实现。
//! 两个接口都是同步的，编排器在阻塞线程池中调用它们。

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cml_pipeline::{DeviceId, DeviceMetadata, Reading};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// 数据来源错误
#[derive(Debug, Error)]
pub enum SourceError {
    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 解析错误
    #[error("Parse error: {0}")]
    Parse(String),

    /// 服务不可用
    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

/// 时间范围 `(start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// 起点（不含）
    pub start: DateTime<Utc>,
    /// 终点（含）
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// 以 `end` 为终点、长度为 `window` 的时间窗
    pub fn trailing(end: DateTime<Utc>, window: Duration) -> Self {
        let window = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::zero());
        Self {
            start: end - window,
            end,
        }
    }

    /// 是否包含时刻
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t > self.start && t <= self.end
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}]", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// 遥测加载器
///
/// 返回顺序不作保证。
pub trait TelemetryLoader: Send + Sync {
    /// 加载时间范围内的读数
    fn load(&self, range: &TimeRange) -> Result<Vec<Reading>, SourceError>;

    /// 名称 (用于日志)
    fn name(&self) -> &str {
        "telemetry"
    }
}

/// 元数据解析器
///
/// 未知设备不出现在结果中，这不是错误。
pub trait MetadataResolver: Send + Sync {
    /// 解析设备元数据
    fn resolve(
        &self,
        device_ids: &BTreeSet<DeviceId>,
    ) -> Result<HashMap<DeviceId, DeviceMetadata>, SourceError>;
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, SourceError> {
    let json = std::fs::read_to_string(path)?;
    serde_json::from_str(&json).map_err(|e| SourceError::Parse(format!("{}: {}", path.display(), e)))
}

/// JSON 文件遥测来源
///
/// 文件内容为 `Reading` 数组，每次加载重新读取，外部进程可以持续覆盖该文件。
#[derive(Debug, Clone)]
pub struct JsonTelemetrySource {
    path: PathBuf,
}

impl JsonTelemetrySource {
    /// 创建来源
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TelemetryLoader for JsonTelemetrySource {
    fn load(&self, range: &TimeRange) -> Result<Vec<Reading>, SourceError> {
        if !self.path.exists() {
            return Err(SourceError::Unavailable(format!(
                "telemetry file missing: {}",
                self.path.display()
            )));
        }
        let all: Vec<Reading> = read_json(&self.path)?;
        let total = all.len();
        let readings: Vec<Reading> = all.into_iter().filter(|r| range.contains(r.timestamp)).collect();
        tracing::debug!(
            "遥测加载: {} 条中 {} 条在 {} 内",
            total,
            readings.len(),
            range
        );
        Ok(readings)
    }

    fn name(&self) -> &str {
        "json-telemetry"
    }
}

/// JSON 文件元数据来源
///
/// 文件内容为 `DeviceMetadata` 数组。
#[derive(Debug, Clone)]
pub struct JsonMetadataSource {
    path: PathBuf,
}

impl JsonMetadataSource {
    /// 创建来源
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MetadataResolver for JsonMetadataSource {
    fn resolve(
        &self,
        device_ids: &BTreeSet<DeviceId>,
    ) -> Result<HashMap<DeviceId, DeviceMetadata>, SourceError> {
        let all: Vec<DeviceMetadata> = read_json(&self.path)?;
        Ok(all
            .into_iter()
            .filter(|m| device_ids.contains(&m.device_id))
            .map(|m| (m.device_id.clone(), m))
            .collect())
    }
}
