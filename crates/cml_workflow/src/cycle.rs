// crates/cml_workflow/src/cycle.rs

//! 周期定义模块
//!
//! 定义周期标识、状态机状态、周期结果与周期错误。

use chrono::{DateTime, Utc};
use cml_pipeline::{DeviceId, ModelInferenceError};
use cml_terrain::interpolation::InterpolationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

/// 周期ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CycleId(Uuid);

impl CycleId {
    /// 创建新的周期ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// 从UUID创建
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// 获取内部UUID
    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// 短形式（前8位），用于文件名
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CycleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// 周期状态
///
/// `Idle → Loading → Filtering → Featurizing → Predicting → Interpolating → Persisting → Idle`，
/// 任一阶段不可恢复的错误进入 `Failed`，记录后回到 `Idle`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    /// 空闲
    Idle,
    /// 加载读数与元数据
    Loading,
    /// 异常过滤
    Filtering,
    /// 特征构建
    Featurizing,
    /// 点温度预测
    Predicting,
    /// 空间插值
    Interpolating,
    /// 持久化
    Persisting,
    /// 失败
    Failed,
}

impl CycleState {
    /// 正常流程中的下一个状态
    pub fn next(&self) -> Self {
        match self {
            Self::Idle => Self::Loading,
            Self::Loading => Self::Filtering,
            Self::Filtering => Self::Featurizing,
            Self::Featurizing => Self::Predicting,
            Self::Predicting => Self::Interpolating,
            Self::Interpolating => Self::Persisting,
            Self::Persisting | Self::Failed => Self::Idle,
        }
    }

    /// 是否为周期执行中的阶段
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle | Self::Failed)
    }
}

impl Default for CycleState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Loading => "LOADING",
            Self::Filtering => "FILTERING",
            Self::Featurizing => "FEATURIZING",
            Self::Predicting => "PREDICTING",
            Self::Interpolating => "INTERPOLATING",
            Self::Persisting => "PERSISTING",
            Self::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// 周期结果
///
/// 每个成功周期恰好产生一个结果；`grid_reference` 指向持久化的插值网格。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleResult {
    /// 周期ID
    pub cycle_id: CycleId,
    /// 结果时间戳（跨周期严格递增）
    pub timestamp: DateTime<Utc>,
    /// 参与插值的设备
    pub device_ids_used: BTreeSet<DeviceId>,
    /// 有效单元最低温度
    pub min_temp: f64,
    /// 有效单元最高温度
    pub max_temp: f64,
    /// 网格制品引用
    pub grid_reference: String,
}

/// 周期错误
#[derive(Debug, Error)]
pub enum CycleError {
    /// 数据不可用（加载失败或结果为空）
    #[error("数据不可用 [{stage}]: {message}")]
    DataUnavailable {
        /// 阶段
        stage: CycleState,
        /// 原因
        message: String,
    },

    /// 加载超时
    #[error("加载超时: {secs}s")]
    Timeout {
        /// 超时时长 [s]
        secs: u64,
    },

    /// 可插值的点数不足
    #[error("有效点不足: 需要至少{required}个, 实际{actual}个")]
    InsufficientPoints {
        /// 最少点数
        required: usize,
        /// 实际点数
        actual: usize,
    },

    /// 估计器推断失败
    #[error("模型推断失败: {0}")]
    ModelInference(#[from] ModelInferenceError),

    /// 放宽正则化后仍奇异
    #[error("克里金方程组奇异（已放宽重试）: 块金={nugget}")]
    InterpolationSingular {
        /// 最后一次使用的块金
        nugget: f64,
    },

    /// 其他插值错误
    #[error("插值失败: {0}")]
    Interpolation(InterpolationError),

    /// 持久化重试耗尽
    #[error("持久化失败（{attempts}次尝试）: {message}")]
    Persistence {
        /// 尝试次数
        attempts: u32,
        /// 最后一次错误
        message: String,
    },

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl CycleError {
    /// 数据不可用
    pub fn unavailable(stage: CycleState, message: impl Into<String>) -> Self {
        Self::DataUnavailable {
            stage,
            message: message.into(),
        }
    }

    /// 出错的阶段
    pub fn stage(&self) -> CycleState {
        match self {
            Self::DataUnavailable { stage, .. } => *stage,
            Self::Timeout { .. } => CycleState::Loading,
            Self::InsufficientPoints { .. } => CycleState::Predicting,
            Self::ModelInference(_) => CycleState::Predicting,
            Self::InterpolationSingular { .. } | Self::Interpolation(_) => CycleState::Interpolating,
            Self::Persistence { .. } => CycleState::Persisting,
            Self::Internal(_) => CycleState::Failed,
        }
    }

    /// 下一个周期是否可能恢复（数据或外部服务问题）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DataUnavailable { .. }
                | Self::Timeout { .. }
                | Self::InsufficientPoints { .. }
                | Self::Persistence { .. }
        )
    }
}

impl From<InterpolationError> for CycleError {
    fn from(e: InterpolationError) -> Self {
        match e {
            InterpolationError::Singular { nugget } => Self::InterpolationSingular { nugget },
            other => Self::Interpolation(other),
        }
    }
}
