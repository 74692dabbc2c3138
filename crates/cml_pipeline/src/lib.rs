// crates/cml_pipeline/src/lib.rs

//! CML 数据管线
//!
//! 原始读数 → 异常过滤 → 特征构建 → 点温度预测。
//!
//! # 模块
//!
//! - [`types`]: 读数、设备元数据、特征记录与预测点
//! - [`anomaly`]: 异常过滤（范围、缺失、重启、稳健偏离）
//! - [`outliers`]: 特征构建后的空间离群检测（全局 z 分数、局部邻域残差）
//! - [`solar`]: 日出日落与白昼判断
//! - [`features`]: 特征构建
//! - [`prediction`]: 估计器接口、标准化与预测适配器

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod anomaly;
pub mod features;
pub mod outliers;
pub mod prediction;
pub mod solar;
pub mod types;

// 重导出常用类型
pub use anomaly::{AnomalyConfig, AnomalyFilter, FilterOutcome, FilterStats, MetricChannel, RejectReason};
pub use features::{FeatureBatch, FeatureBuilder, FeatureConfig, FeatureResolutionError, TimeZoneSetting};
pub use outliers::{CombineMode, SpatialOutcome, SpatialOutlierConfig};
pub use prediction::{
    aggregate_by_device, FeatureColumn, LinearModel, ModelInferenceError, PredictionAdapter,
    PredictionConfig, StandardScaler, TemperatureModel,
};
pub use types::{DeviceId, DeviceMetadata, FeatureRecord, PredictedPoint, Reading};
