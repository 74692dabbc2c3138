// crates/cml_foundation/src/lib.rs

//! CML Foundation Layer
//!
//! 零依赖基础层，提供整个项目共享的错误类型。
//!
//! # 模块概览
//!
//! - [`error`]: 统一错误类型与 `check_size` 校验
//!
//! # 示例
//!
//! ```
//! use cml_foundation::error::{CmlError, CmlResult};
//!
//! fn sum_weights(weights: &[f64], expected: usize) -> CmlResult<f64> {
//!     CmlError::check_size("weights", expected, weights.len())?;
//!     Ok(weights.iter().sum())
//! }
//!
//! assert!(sum_weights(&[0.5, 0.5], 2).is_ok());
//! assert!(sum_weights(&[1.0], 2).is_err());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;

// 重导出常用类型
pub use error::{CmlError, CmlResult};

/// Prelude 模块，包含常用类型
pub mod prelude {
    pub use crate::error::{CmlError, CmlResult};
}
