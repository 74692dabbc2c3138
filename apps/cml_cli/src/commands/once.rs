// apps/cml_cli/src/commands/once.rs

//! 单周期命令
//!
//! 以给定参考时间执行一个周期，成功时把周期结果以 JSON 输出到标准输出。

use super::assemble::{build_orchestrator, load_config};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

/// 单周期参数
#[derive(Args)]
pub struct OnceArgs {
    /// 配置文件路径
    #[arg(short, long, default_value = "service.json")]
    pub config: PathBuf,

    /// 参考时间 (RFC 3339)，缺省为当前时间
    #[arg(long)]
    pub at: Option<String>,
}

fn parse_reference(at: Option<&str>) -> Result<DateTime<Utc>> {
    match at {
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("无效的参考时间: {}", s))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

/// 执行单周期命令
pub fn execute(args: OnceArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let reference = parse_reference(args.at.as_deref())?;
    info!("参考时间: {}", reference.to_rfc3339());

    let orchestrator = build_orchestrator(&config)?;
    orchestrator.resume_from_sink().context("读取上次结果失败")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("创建运行时失败")?;

    let result = runtime
        .block_on(orchestrator.run_cycle(reference))
        .context("周期执行失败")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
