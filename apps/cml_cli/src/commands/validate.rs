// apps/cml_cli/src/commands/validate.rs

//! 配置验证命令
//!
//! 验证服务配置以及它引用的 DEM、边界、模型和数据文件。

use anyhow::{bail, Result};
use clap::Args;
use cml_config::ServiceConfig;
use cml_geo::{BoundaryMask, BoundingBox};
use cml_pipeline::{LinearModel, StandardScaler, TemperatureModel};
use cml_terrain::RasterDem;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// 验证参数
#[derive(Args)]
pub struct ValidateArgs {
    /// 配置文件路径
    #[arg(short, long, default_value = "service.json")]
    pub config: PathBuf,

    /// 严格模式（警告也视为错误）
    #[arg(long)]
    pub strict: bool,
}

/// 验证结果
#[derive(Default)]
struct ValidationResult {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl ValidationResult {
    fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn is_ok_strict(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

/// 执行验证命令
pub fn execute(args: ValidateArgs) -> Result<()> {
    info!("=== CML 配置验证 ===");

    let mut result = ValidationResult::default();
    validate_all(&args.config, &mut result);
    print_validation_result(&result, args.strict)
}

fn validate_all(path: &Path, result: &mut ValidationResult) {
    println!("\n检查配置文件: {}", path.display());

    if !path.exists() {
        result.add_error(format!("配置文件不存在: {}", path.display()));
        return;
    }

    let config = match ServiceConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            result.add_error(format!("配置无效: {}", e));
            return;
        }
    };
    println!("  ✓ 配置格式与取值有效");

    validate_dem(&config, result);
    validate_boundary(&config, result);
    validate_model(&config, result);
    validate_sources(&config, result);
}

fn contains_bounds(outer: &BoundingBox, inner: &BoundingBox) -> bool {
    outer.min_x <= inner.min_x
        && outer.min_y <= inner.min_y
        && outer.max_x >= inner.max_x
        && outer.max_y >= inner.max_y
}

fn validate_dem(config: &ServiceConfig, result: &mut ValidationResult) {
    let path = &config.paths.dem;
    println!("\n检查 DEM: {}", path.display());

    match RasterDem::from_ascii_grid(path, config.features.sample_method) {
        Ok(dem) => {
            let coverage = dem.coverage();
            if !contains_bounds(&coverage, &config.grid.bounds) {
                result.add_warning(format!(
                    "网格范围超出 DEM 覆盖 [{:.3}, {:.3}] x [{:.3}, {:.3}]，超出部分使用采样点平均高程",
                    coverage.min_x, coverage.max_x, coverage.min_y, coverage.max_y
                ));
            }
            println!("  ✓ DEM 可读取");
        }
        Err(e) => result.add_error(format!("DEM 无法加载: {}", e)),
    }
}

fn validate_boundary(config: &ServiceConfig, result: &mut ValidationResult) {
    let Some(path) = &config.paths.boundary else {
        result.add_warning("未配置区域边界，所有网格单元都会输出");
        return;
    };
    println!("\n检查区域边界: {}", path.display());

    match BoundaryMask::from_geojson_file(path) {
        Ok(mask) => {
            let bounds = mask.bounds();
            if !contains_bounds(&config.grid.bounds, &bounds) {
                result.add_warning("区域边界超出网格范围，边界外缘的区域不会被覆盖");
            }
            println!("  ✓ {} 个多边形", mask.polygon_count());
        }
        Err(e) => result.add_error(format!("区域边界无法加载: {}", e)),
    }
}

fn validate_model(config: &ServiceConfig, result: &mut ValidationResult) {
    let path = &config.paths.model;
    println!("\n检查模型: {}", path.display());

    let columns = config.prediction.columns.len();
    match LinearModel::from_json_file(path) {
        Ok(model) if model.n_features() != columns => result.add_error(format!(
            "模型需要 {} 个特征, 配置的输入列为 {} 个",
            model.n_features(),
            columns
        )),
        Ok(_) => println!("  ✓ {} 个输入特征", columns),
        Err(e) => result.add_error(format!("模型无法加载: {}", e)),
    }

    if let Some(scaler_path) = &config.paths.scaler {
        match StandardScaler::from_json_file(scaler_path).and_then(|s| s.validate(columns)) {
            Ok(()) => println!("  ✓ 标准化参数有效"),
            Err(e) => result.add_error(format!("标准化参数无效: {}", e)),
        }
    } else if config.prediction.scaler.is_none() {
        result.add_warning("未配置标准化参数，特征将以原始尺度输入模型");
    }
}

fn validate_sources(config: &ServiceConfig, result: &mut ValidationResult) {
    println!("\n检查数据来源");
    let paths = &config.paths;
    for (name, path) in [("遥测", &paths.telemetry), ("设备元数据", &paths.metadata)] {
        if path.exists() {
            println!("  ✓ {}: {}", name, path.display());
        } else {
            result.add_warning(format!("{}文件尚不存在: {}", name, path.display()));
        }
    }
    if !paths.output_dir.exists() {
        result.add_warning(format!("输出目录将被创建: {}", paths.output_dir.display()));
    }
}

fn print_validation_result(result: &ValidationResult, strict: bool) -> Result<()> {
    println!("\n=== 验证结果 ===");

    // 输出错误
    if !result.errors.is_empty() {
        println!("\n错误 ({}):", result.errors.len());
        for err in &result.errors {
            error!("  ✗ {}", err);
            println!("  ✗ {}", err);
        }
    }

    // 输出警告
    if !result.warnings.is_empty() {
        println!("\n警告 ({}):", result.warnings.len());
        for warning in &result.warnings {
            warn!("  ⚠ {}", warning);
            println!("  ⚠ {}", warning);
        }
    }

    // 最终判定
    let success = if strict {
        result.is_ok_strict()
    } else {
        result.is_ok()
    };

    if success {
        println!("\n✓ 验证通过");
        Ok(())
    } else {
        println!("\n✗ 验证失败");
        bail!(
            "验证失败：发现 {} 个错误，{} 个警告",
            result.errors.len(),
            result.warnings.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_error() {
        let mut result = ValidationResult::default();
        validate_all(Path::new("/nonexistent/service.json"), &mut result);
        assert!(!result.is_ok());
    }

    #[test]
    fn test_missing_files_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        std::fs::write(&path, "{}").unwrap();

        let mut result = ValidationResult::default();
        validate_all(&path, &mut result);
        // DEM、边界、模型均不存在
        assert_eq!(result.errors.len(), 3);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn test_contains_bounds() {
        let outer = BoundingBox::new(12.0, 48.0, 19.0, 52.0);
        let inner = BoundingBox::new(14.0, 49.0, 15.0, 50.0);
        assert!(contains_bounds(&outer, &inner));
        assert!(!contains_bounds(&inner, &outer));
    }
}
