// crates/cml_workflow/src/events.rs

//! 事件系统模块
//!
//! 提供周期事件的定义和分发机制。

use crate::cycle::{CycleId, CycleState};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// 周期事件
#[derive(Debug, Clone)]
pub enum CycleEvent {
    /// 周期已开始
    CycleStarted {
        /// 周期ID
        cycle_id: CycleId,
        /// 参考时间（加载窗口终点）
        reference_time: DateTime<Utc>,
    },
    /// 状态变更
    StateChanged {
        /// 周期ID
        cycle_id: CycleId,
        /// 旧状态
        old_state: CycleState,
        /// 新状态
        new_state: CycleState,
    },
    /// 记录被丢弃（逐条错误，不终止周期）
    RecordsDropped {
        /// 周期ID
        cycle_id: CycleId,
        /// 阶段
        stage: CycleState,
        /// 丢弃数量
        count: usize,
    },
    /// 阶段重试
    RetryScheduled {
        /// 周期ID
        cycle_id: CycleId,
        /// 阶段
        stage: CycleState,
        /// 第几次重试（从1计）
        attempt: u32,
        /// 原因
        reason: String,
    },
    /// 周期已完成并发布
    CycleCompleted {
        /// 周期ID
        cycle_id: CycleId,
        /// 运行时长 (秒)
        duration_secs: f64,
        /// 插值点数
        points: usize,
        /// 最低温度
        min_temp: f64,
        /// 最高温度
        max_temp: f64,
        /// 网格制品引用
        grid_reference: String,
    },
    /// 周期失败
    CycleFailed {
        /// 周期ID
        cycle_id: CycleId,
        /// 失败阶段
        stage: CycleState,
        /// 错误信息
        error: String,
    },
}

impl CycleEvent {
    /// 获取事件对应的周期ID
    pub fn cycle_id(&self) -> CycleId {
        match self {
            Self::CycleStarted { cycle_id, .. } => *cycle_id,
            Self::StateChanged { cycle_id, .. } => *cycle_id,
            Self::RecordsDropped { cycle_id, .. } => *cycle_id,
            Self::RetryScheduled { cycle_id, .. } => *cycle_id,
            Self::CycleCompleted { cycle_id, .. } => *cycle_id,
            Self::CycleFailed { cycle_id, .. } => *cycle_id,
        }
    }

    /// 获取事件名称
    pub fn name(&self) -> &'static str {
        match self {
            Self::CycleStarted { .. } => "CycleStarted",
            Self::StateChanged { .. } => "StateChanged",
            Self::RecordsDropped { .. } => "RecordsDropped",
            Self::RetryScheduled { .. } => "RetryScheduled",
            Self::CycleCompleted { .. } => "CycleCompleted",
            Self::CycleFailed { .. } => "CycleFailed",
        }
    }
}

/// 事件监听器trait
pub trait EventListener: Send + Sync {
    /// 处理事件
    fn on_event(&self, event: &CycleEvent);

    /// 获取监听器名称 (用于调试)
    fn name(&self) -> &str {
        "anonymous"
    }
}

/// 函数式事件监听器
pub struct FnListener<F>
where
    F: Fn(&CycleEvent) + Send + Sync,
{
    name: String,
    handler: F,
}

impl<F> FnListener<F>
where
    F: Fn(&CycleEvent) + Send + Sync,
{
    /// 创建函数式监听器
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> EventListener for FnListener<F>
where
    F: Fn(&CycleEvent) + Send + Sync,
{
    fn on_event(&self, event: &CycleEvent) {
        (self.handler)(event);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 日志事件监听器
pub struct LoggingListener {
    /// 日志前缀
    prefix: String,
    /// 是否输出状态变更
    verbose: bool,
}

impl LoggingListener {
    /// 创建日志监听器
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            verbose: false,
        }
    }

    /// 设置详细模式
    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }
}

impl EventListener for LoggingListener {
    fn on_event(&self, event: &CycleEvent) {
        let msg = match event {
            CycleEvent::CycleStarted {
                cycle_id,
                reference_time,
            } => {
                format!("Cycle {} started (t={})", cycle_id, reference_time.to_rfc3339())
            }
            CycleEvent::CycleCompleted {
                cycle_id,
                duration_secs,
                points,
                min_temp,
                max_temp,
                grid_reference,
            } => {
                format!(
                    "Cycle {} completed in {:.2}s ({} points, {:.2}..{:.2} °C, {})",
                    cycle_id, duration_secs, points, min_temp, max_temp, grid_reference
                )
            }
            CycleEvent::CycleFailed {
                cycle_id,
                stage,
                error,
            } => {
                format!("Cycle {} failed at {}: {}", cycle_id, stage, error)
            }
            CycleEvent::RetryScheduled {
                cycle_id,
                stage,
                attempt,
                reason,
            } => {
                format!("Cycle {} retry #{} at {}: {}", cycle_id, attempt, stage, reason)
            }
            CycleEvent::StateChanged {
                cycle_id,
                old_state,
                new_state,
            } if self.verbose => {
                format!("Cycle {} state: {} -> {}", cycle_id, old_state, new_state)
            }
            _ if self.verbose => {
                format!("{:?}", event)
            }
            _ => return,
        };

        tracing::info!("{}: {}", self.prefix, msg);
    }

    fn name(&self) -> &str {
        "LoggingListener"
    }
}

/// 事件分发器
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl EventDispatcher {
    /// 创建新的事件分发器
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// 添加监听器
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        let name = listener.name().to_string();
        self.listeners.write().push(listener);
        tracing::debug!("Added event listener: {}", name);
    }

    /// 添加函数式监听器
    pub fn add_fn_listener<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&CycleEvent) + Send + Sync + 'static,
    {
        let listener = Arc::new(FnListener::new(name, handler));
        self.add_listener(listener);
    }

    /// 移除监听器
    pub fn remove_listener(&self, listener: &Arc<dyn EventListener>) {
        self.listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// 清除所有监听器
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// 分发事件
    pub fn emit(&self, event: CycleEvent) {
        let listeners = self.listeners.read();

        tracing::trace!("Emitting event: {}", event.name());

        for listener in listeners.iter() {
            listener.on_event(&event);
        }
    }

    /// 获取监听器数量
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_event_dispatcher() {
        let dispatcher = EventDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        dispatcher.add_fn_listener("test", move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        let cycle_id = CycleId::new();
        dispatcher.emit(CycleEvent::CycleStarted {
            cycle_id,
            reference_time: Utc::now(),
        });
        dispatcher.emit(CycleEvent::CycleFailed {
            cycle_id,
            stage: CycleState::Loading,
            error: "timeout".into(),
        });

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove_listener() {
        let dispatcher = EventDispatcher::new();
        let listener: Arc<dyn EventListener> = Arc::new(LoggingListener::new("cycle").verbose());
        dispatcher.add_listener(listener.clone());
        dispatcher.add_fn_listener("noop", |_| {});
        assert_eq!(dispatcher.listener_count(), 2);

        dispatcher.remove_listener(&listener);
        assert_eq!(dispatcher.listener_count(), 1);

        dispatcher.clear();
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[test]
    fn test_event_cycle_id() {
        let cycle_id = CycleId::new();
        let event = CycleEvent::RecordsDropped {
            cycle_id,
            stage: CycleState::Filtering,
            count: 4,
        };

        assert_eq!(event.cycle_id(), cycle_id);
        assert_eq!(event.name(), "RecordsDropped");
    }
}
