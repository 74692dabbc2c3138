// crates/cml_workflow/src/lib.rs

//! CML 温度场工作流模块
//!
//! 把管线各阶段串成周期，定时执行并发布结果。
//!
//! # 模块结构
//!
//! - [`cycle`]: 周期标识、状态、结果与错误
//! - [`events`]: 事件系统
//! - [`sources`]: 遥测与元数据来源
//! - [`sink`]: 结果持久化
//! - [`publication`]: 最新结果发布点
//! - [`orchestrator`]: 周期编排器
//! - [`scheduler`]: 周期调度器
//!
//! # 示例
//!
//! ```rust,ignore
//! use cml_workflow::{CycleOrchestrator, CycleScheduler, Collaborators, CycleStages};
//! use tokio_util::sync::CancellationToken;
//!
//! let orchestrator = Arc::new(CycleOrchestrator::new(config.cycle, collaborators, stages));
//! let publication = orchestrator.publication().clone();
//!
//! let cancel = CancellationToken::new();
//! let stats = CycleScheduler::new(orchestrator).run(cancel.clone()).await;
//!
//! // HTTP 层
//! if let Some(result) = publication.latest() {
//!     println!("{}", result.grid_reference);
//! }
//! ```

#![warn(missing_docs)]

pub mod cycle;
pub mod events;
pub mod orchestrator;
pub mod publication;
pub mod scheduler;
pub mod sink;
pub mod sources;

// 重导出核心类型
pub use cml_config::CycleConfig;
pub use cycle::{CycleError, CycleId, CycleResult, CycleState};
pub use events::{CycleEvent, EventDispatcher, EventListener, FnListener, LoggingListener};
pub use orchestrator::{Collaborators, CycleOrchestrator, CycleStages};
pub use publication::{Publication, PublishedCycle};
pub use scheduler::{CycleScheduler, SchedulerStats};
pub use sink::{FileSink, GridArtifact, GridParameters, MemorySink, ResultSink, SinkError};
pub use sources::{
    JsonMetadataSource, JsonTelemetrySource, MetadataResolver, SourceError, TelemetryLoader,
    TimeRange,
};
