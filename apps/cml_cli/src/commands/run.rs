// apps/cml_cli/src/commands/run.rs

//! 服务运行命令
//!
//! 按配置的间隔循环执行周期，Ctrl-C 后在当前周期结束时退出。

use super::assemble::{build_orchestrator, load_config};
use anyhow::{Context, Result};
use clap::Args;
use cml_workflow::CycleScheduler;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 服务运行参数
#[derive(Args)]
pub struct RunArgs {
    /// 配置文件路径
    #[arg(short, long, default_value = "service.json")]
    pub config: PathBuf,

    /// 立即开始第一个周期（不等待间隔边界）
    #[arg(long)]
    pub no_align: bool,
}

/// 执行运行命令
pub fn execute(args: RunArgs) -> Result<()> {
    info!("=== CML 温度场服务启动 ===");

    let mut config = load_config(&args.config)?;
    if args.no_align {
        config.cycle.align_to_interval = false;
    }
    info!(
        "周期: 间隔 {} s, 加载窗口 {} s, 加载超时 {} s",
        config.cycle.interval_secs, config.cycle.load_window_secs, config.cycle.load_timeout_secs
    );
    info!(
        "网格: {} x {}, 经度 [{}, {}], 纬度 [{}, {}]",
        config.grid.rows,
        config.grid.cols,
        config.grid.bounds.min_x,
        config.grid.bounds.max_x,
        config.grid.bounds.min_y,
        config.grid.bounds.max_y
    );

    let orchestrator = Arc::new(build_orchestrator(&config)?);
    if orchestrator.resume_from_sink().context("读取上次结果失败")?.is_none() {
        info!("没有历史结果，从首个周期开始");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("创建运行时失败")?;

    let stats = runtime.block_on(async move {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("收到中断信号，当前周期结束后退出");
                    trigger.cancel();
                }
                Err(e) => warn!("无法监听中断信号: {}", e),
            }
        });

        CycleScheduler::new(orchestrator).run(cancel).await
    });

    info!("=== 服务停止 ===");
    info!("成功周期: {}, 失败周期: {}", stats.completed, stats.failed);

    Ok(())
}
