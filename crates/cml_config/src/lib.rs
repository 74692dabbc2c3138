// crates/cml_config/src/lib.rs

//! CML Config Layer (Layer 4)
//!
//! 配置层，把各组件的配置结构汇总为一个服务配置。
//!
//! # 模块概览
//!
//! - [`service_config`]: ServiceConfig 服务配置与数据文件路径
//! - [`cycle`]: CycleConfig 周期调度配置
//! - [`error`]: 配置错误类型
//!
//! # 层级架构
//!
//! ```text
//! Layer 6: cml_cli       ─> loads ServiceConfig
//! Layer 5: cml_workflow  ─> CycleConfig, 组装各组件
//! Layer 4: cml_config    ─> ServiceConfig (本层)
//! Layer 3: cml_terrain / cml_pipeline ─> 组件配置
//! Layer 1-2: cml_foundation / cml_geo
//! ```
//!
//! # 设计原则
//!
//! 1. **显式不可变**: 组件构造时接收配置，运行期间不修改
//! 2. **全部有默认值**: 每个字段都有 `#[serde(default)]`
//! 3. **加载即校验**: `from_file` 返回前完成全部校验

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cycle;
pub mod error;
pub mod service_config;

/// 层级标识
pub const LAYER: u8 = 4;

// 重导出核心类型
pub use cycle::CycleConfig;
pub use error::ConfigError;
pub use service_config::{PathsConfig, ServiceConfig};
