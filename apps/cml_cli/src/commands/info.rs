// apps/cml_cli/src/commands/info.rs

//! 信息显示命令
//!
//! 显示系统信息、默认配置和已加载配置的摘要。

use super::assemble::load_config;
use anyhow::Result;
use clap::Args;
use cml_config::ServiceConfig;
use std::path::PathBuf;
use tracing::info;

/// 信息显示参数
#[derive(Args)]
pub struct InfoArgs {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 显示系统信息
    #[arg(long)]
    pub system: bool,

    /// 以 JSON 输出默认配置
    #[arg(long)]
    pub defaults: bool,
}

/// 执行信息命令
pub fn execute(args: InfoArgs) -> Result<()> {
    info!("=== CML 温度场服务信息 ===");

    if args.system {
        print_system_info();
    }

    if args.defaults {
        print_default_config()?;
    }

    if let Some(path) = &args.config {
        let config = load_config(path)?;
        print_config_summary(&config);
    }

    if args.config.is_none() && !args.system && !args.defaults {
        // 默认显示所有信息
        print_system_info();
        println!();
        print_default_config()?;
    }

    Ok(())
}

fn print_system_info() {
    println!("=== 系统信息 ===");
    println!("cml_cli 版本: {}", env!("CARGO_PKG_VERSION"));
    println!("目标平台: {}", std::env::consts::ARCH);
    println!("操作系统: {}", std::env::consts::OS);
    println!(
        "可用线程: {}",
        std::thread::available_parallelism().map_or(1, |n| n.get())
    );
}

fn print_default_config() -> Result<()> {
    println!("=== 默认配置 ===");
    println!("{}", serde_json::to_string_pretty(&ServiceConfig::default())?);
    Ok(())
}

fn print_config_summary(config: &ServiceConfig) {
    println!("=== 配置摘要 ===");
    println!("DEM: {}", config.paths.dem.display());
    match &config.paths.boundary {
        Some(p) => println!("区域边界: {}", p.display()),
        None => println!("区域边界: 无"),
    }
    println!("模型: {}", config.paths.model.display());
    println!("输出目录: {}", config.paths.output_dir.display());

    println!("\n异常过滤通道: {}", config.anomaly.channel_names().join(", "));
    println!("模型输入列: {}", config.prediction.columns.len());
    println!(
        "克里金: 最大邻居 {}, 变差函数 {:?}",
        config.kriging.max_neighbors, config.kriging.variogram_kind
    );

    let grid = &config.grid;
    println!(
        "\n网格: {} x {}, 经度 [{}, {}], 纬度 [{}, {}]",
        grid.rows, grid.cols, grid.bounds.min_x, grid.bounds.max_x, grid.bounds.min_y, grid.bounds.max_y
    );
    println!(
        "周期: 每 {} s, 窗口 {} s, 最少 {} 个点",
        config.cycle.interval_secs, config.cycle.load_window_secs, config.cycle.min_viable_points
    );
}
