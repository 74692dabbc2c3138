// crates/cml_terrain/src/interpolation/error.rs

//! 插值错误类型

use thiserror::Error;

/// 插值结果类型
pub type InterpolationResult<T> = Result<T, InterpolationError>;

/// 插值错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpolationError {
    /// 克里金方程组奇异（正则化后仍无法求解）
    #[error("克里金方程组奇异: 块金={nugget}")]
    Singular {
        /// 求解时使用的块金值（含正则化）
        nugget: f64,
    },

    /// 采样点不足
    #[error("插值点不足: 需要至少{required}个, 实际{actual}个")]
    InsufficientPoints {
        /// 最少点数
        required: usize,
        /// 实际点数
        actual: usize,
    },

    /// 网格定义无效
    #[error("无效的网格定义: {message}")]
    InvalidGrid {
        /// 原因
        message: String,
    },

    /// 数组大小不匹配
    #[error("数组大小不匹配: {name} 期望{expected}, 实际{actual}")]
    SizeMismatch {
        /// 数据名称
        name: &'static str,
        /// 期望大小
        expected: usize,
        /// 实际大小
        actual: usize,
    },

    /// 输入或中间结果包含非有限值
    #[error("非有限数值: {what}")]
    NonFinite {
        /// 出现位置
        what: String,
    },

    /// 趋势回归失败
    #[error("趋势回归失败: {message}")]
    Trend {
        /// 原因
        message: String,
    },
}

impl InterpolationError {
    /// 无效网格
    pub fn invalid_grid(message: impl Into<String>) -> Self {
        Self::InvalidGrid {
            message: message.into(),
        }
    }

    /// 非有限值
    pub fn non_finite(what: impl Into<String>) -> Self {
        Self::NonFinite { what: what.into() }
    }

    /// 是否为奇异矩阵错误（可放宽正则化重试）
    pub fn is_singular(&self) -> bool {
        matches!(self, Self::Singular { .. })
    }
}
