// crates/cml_config/src/cycle.rs

//! 周期调度配置

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_interval_secs() -> u64 {
    3600
}
fn default_align_to_interval() -> bool {
    true
}
fn default_load_window_secs() -> u64 {
    3600
}
fn default_load_timeout_secs() -> u64 {
    120
}
fn default_min_viable_points() -> usize {
    3
}
fn default_persist_retries() -> u32 {
    3
}
fn default_persist_backoff_ms() -> u64 {
    500
}

/// 周期配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleConfig {
    /// 周期间隔 [s]
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// 是否把周期起点对齐到间隔整数倍（如整点）
    #[serde(default = "default_align_to_interval")]
    pub align_to_interval: bool,

    /// 每周期加载的读数时间窗 [s]
    #[serde(default = "default_load_window_secs")]
    pub load_window_secs: u64,

    /// 加载阶段超时 [s]
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,

    /// 聚合后进入插值的最少点数，不足则放弃本周期
    #[serde(default = "default_min_viable_points")]
    pub min_viable_points: usize,

    /// 持久化失败后的重试次数
    #[serde(default = "default_persist_retries")]
    pub persist_retries: u32,

    /// 持久化重试的初始退避 [ms]，每次翻倍
    #[serde(default = "default_persist_backoff_ms")]
    pub persist_backoff_ms: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            align_to_interval: default_align_to_interval(),
            load_window_secs: default_load_window_secs(),
            load_timeout_secs: default_load_timeout_secs(),
            min_viable_points: default_min_viable_points(),
            persist_retries: default_persist_retries(),
            persist_backoff_ms: default_persist_backoff_ms(),
        }
    }
}

impl CycleConfig {
    /// 周期间隔
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// 加载时间窗
    pub fn load_window(&self) -> Duration {
        Duration::from_secs(self.load_window_secs)
    }

    /// 加载超时
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    /// 第 `attempt` 次重试前的退避（从 0 计）
    pub fn persist_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.persist_backoff_ms.saturating_mul(1u64 << attempt.min(16)))
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::invalid("cycle.interval_secs", self.interval_secs, "必须为正"));
        }
        if self.load_window_secs == 0 {
            return Err(ConfigError::invalid(
                "cycle.load_window_secs",
                self.load_window_secs,
                "必须为正",
            ));
        }
        if self.load_timeout_secs == 0 || self.load_timeout_secs > self.interval_secs {
            return Err(ConfigError::invalid(
                "cycle.load_timeout_secs",
                self.load_timeout_secs,
                "必须在 (0, interval_secs] 范围内",
            ));
        }
        if self.min_viable_points < 3 {
            return Err(ConfigError::invalid(
                "cycle.min_viable_points",
                self.min_viable_points,
                "趋势与克里金至少需要3个点",
            ));
        }
        Ok(())
    }
}
