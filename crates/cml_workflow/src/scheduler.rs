// crates/cml_workflow/src/scheduler.rs

//! 周期调度器
//!
//! 按固定间隔触发周期。周期串行执行；某个周期超过间隔时，下一次触发
//! 顺延而不是补跑。停止信号只在两个周期之间生效。

use crate::orchestrator::CycleOrchestrator;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// 把时间向下取整到间隔整数倍（自 Unix 纪元起）
pub fn floor_to_interval(t: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let secs = interval.as_secs().max(1) as i64;
    let floored = t.timestamp().div_euclid(secs) * secs;
    DateTime::from_timestamp(floored, 0).unwrap_or(t)
}

/// 不早于 `now` 的下一个间隔边界
pub fn next_aligned_start(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let floor = floor_to_interval(now, interval);
    if floor == now {
        return now;
    }
    let step = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::zero());
    floor + step
}

/// 调度统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// 成功周期数
    pub completed: u64,
    /// 失败周期数
    pub failed: u64,
}

/// 周期调度器
#[derive(Debug, Clone)]
pub struct CycleScheduler {
    orchestrator: Arc<CycleOrchestrator>,
    interval: Duration,
    align: bool,
}

impl CycleScheduler {
    /// 按编排器的周期配置创建
    pub fn new(orchestrator: Arc<CycleOrchestrator>) -> Self {
        let config = orchestrator.config();
        let interval = config.interval();
        let align = config.align_to_interval;
        Self {
            orchestrator,
            interval,
            align,
        }
    }

    /// 编排器
    pub fn orchestrator(&self) -> &Arc<CycleOrchestrator> {
        &self.orchestrator
    }

    /// 首个周期的开始时间
    pub fn first_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.align {
            next_aligned_start(now, self.interval)
        } else {
            now
        }
    }

    /// 周期参考时间
    fn reference_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.align {
            floor_to_interval(now, self.interval)
        } else {
            now
        }
    }

    /// 运行调度循环直到 `cancel` 被触发
    pub async fn run(&self, cancel: CancellationToken) -> SchedulerStats {
        let now = Utc::now();
        let first = self.first_start(now);
        let delay = (first - now).to_std().unwrap_or(Duration::ZERO);
        if !delay.is_zero() {
            tracing::info!("首个周期将于 {} 开始", first.to_rfc3339());
        }

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + delay, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut stats = SchedulerStats::default();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("调度器停止: 成功 {} 个周期, 失败 {} 个", stats.completed, stats.failed);
                    break;
                }
                _ = ticker.tick() => {
                    let reference = self.reference_time(Utc::now());
                    match self.orchestrator.run_cycle(reference).await {
                        Ok(_) => stats.completed += 1,
                        Err(e) => {
                            stats.failed += 1;
                            if e.is_retryable() {
                                tracing::info!("等待下一个周期重试");
                            }
                        }
                    }
                }
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_floor_to_interval() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 34, 56).unwrap();
        assert_eq!(
            floor_to_interval(t, HOUR),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(
            floor_to_interval(t, Duration::from_secs(600)),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_next_aligned_start() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 34, 56).unwrap();
        assert_eq!(
            next_aligned_start(t, HOUR),
            Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
        );

        let on_boundary = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        assert_eq!(next_aligned_start(on_boundary, HOUR), on_boundary);
    }

    #[test]
    fn test_sub_second_not_on_boundary() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap() + chrono::Duration::milliseconds(5);
        assert_eq!(
            next_aligned_start(t, HOUR),
            Utc.with_ymd_and_hms(2024, 5, 1, 14, 0, 0).unwrap()
        );
    }
}
