// crates/cml_terrain/src/interpolation/mod.rs

//! 插值模块
//!
//! 以回归克里金把点温度插值到规则经纬度网格。
//!
//! # 组成
//!
//! - [`trend`]: 温度对高程（及经纬度）的线性趋势
//! - [`variogram`]: 经验半变异函数与模型拟合
//! - [`kriging`]: 残差普通克里金
//! - [`solver`]: 可替换的线性求解器
//! - [`regression_kriging`]: 趋势 + 残差克里金的完整引擎
//! - [`grid`]: 网格定义与输出
//!
//! # 流程
//!
//! | 步骤 | 输入 | 输出 |
//! |------|------|------|
//! | 趋势 | 点温度、点高程 | 系数、残差 |
//! | 变异函数 | 残差 | 模型（拟合或默认） |
//! | 克里金 | 残差、模型 | 网格残差 |
//! | 合成 | 网格高程、网格残差 | 温度网格 |

pub mod error;
pub mod grid;
pub mod kriging;
pub mod regression_kriging;
pub mod solver;
pub mod trend;
pub mod variogram;

pub use error::{InterpolationError, InterpolationResult};
pub use grid::{GridSpec, InterpolationGrid};
pub use kriging::KrigingInterpolator;
pub use regression_kriging::{FittedRegressionKriging, KrigingConfig, RegressionKriging, SamplePoint};
pub use solver::{FactoredSystem, LinearSolver, LuSolver};
pub use trend::{TrendCovariates, TrendModel};
pub use variogram::{
    fit_variogram, EmpiricalVariogram, FallbackReason, VariogramFit, VariogramKind, VariogramModel,
    VariogramSource,
};
