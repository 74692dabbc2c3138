// crates/cml_config/src/error.rs

//! 配置层错误类型

use cml_foundation::error::CmlError;

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 解析错误
    #[error("解析错误: {0}")]
    Parse(String),

    /// 无效值
    #[error("无效值 '{key}': {value} - {reason}")]
    InvalidValue {
        /// 配置键
        key: String,
        /// 配置值
        value: String,
        /// 原因
        reason: String,
    },

    /// 缺失配置
    #[error("缺失配置: {0}")]
    Missing(String),

    /// 组件配置节校验失败
    #[error("配置节 '{section}' 无效: {source}")]
    Section {
        /// 配置节
        section: &'static str,
        /// 组件返回的错误
        #[source]
        source: CmlError,
    },
}

impl ConfigError {
    /// 无效值
    pub fn invalid(key: impl Into<String>, value: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// 包装组件校验错误
    pub fn section(section: &'static str) -> impl FnOnce(CmlError) -> Self {
        move |source| Self::Section { section, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::invalid("cycle.interval_secs", 0, "必须为正");
        assert!(err.to_string().contains("cycle.interval_secs"));

        let err = ConfigError::section("kriging")(CmlError::config("n_lags 必须大于0"));
        assert!(err.to_string().contains("kriging"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
