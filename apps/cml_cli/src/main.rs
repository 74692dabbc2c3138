// apps/cml_cli/src/main.rs

//! CML 温度场命令行界面
//!
//! 由微波链路读数生成地表温度网格的服务工具。
//!
//! # 架构层级
//!
//! 本模块属于 **Layer 6: Application**：加载 `ServiceConfig`，组装各层组件，
//! 把周期交给 `cml_workflow` 调度。

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// CML 温度场服务命令行工具
#[derive(Parser)]
#[command(name = "cml_cli")]
#[command(author = "CML Temperature Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Temperature field from commercial microwave links", long_about = None)]
struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 以服务方式按周期运行
    Run(commands::run::RunArgs),
    /// 执行单个周期
    Once(commands::once::OnceArgs),
    /// 验证配置与数据文件
    Validate(commands::validate::ValidateArgs),
    /// 显示信息
    Info(commands::info::InfoArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志，无法识别的级别按 info 处理
    let level = cli.log_level.parse::<Level>().unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // 执行命令
    match cli.command {
        Commands::Run(args) => commands::run::execute(args),
        Commands::Once(args) => commands::once::execute(args),
        Commands::Validate(args) => commands::validate::execute(args),
        Commands::Info(args) => commands::info::execute(args),
    }
}
