// crates/cml_terrain/src/lib.rs

//! 地形与插值
//!
//! 提供 DEM 高程采样和温度场的回归克里金插值。
//!
//! # 模块
//!
//! - `raster`: 栅格数据与 ESRI ASCII Grid 读取
//! - `dem`: DEM 采样
//! - `provider`: 高程查询接口
//! - `interpolation`: 回归克里金

pub mod dem;
pub mod interpolation;
pub mod provider;
pub mod raster;

// 重导出常用类型
pub use dem::{RasterDem, SampleMethod};
pub use interpolation::{
    GridSpec, InterpolationError, InterpolationGrid, InterpolationResult, KrigingConfig,
    RegressionKriging, SamplePoint, VariogramModel,
};
pub use provider::ElevationLookup;
pub use raster::{GeoTransform, RasterData};
