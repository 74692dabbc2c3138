// crates/cml_workflow/src/orchestrator.rs

//! 周期编排器
//!
//! 以显式状态机驱动一个周期：
//!
//! ```text
//! IDLE → LOADING → FILTERING → FEATURIZING → PREDICTING → INTERPOLATING → PERSISTING → IDLE
//!                                  (任一阶段失败) → FAILED → IDLE
//! ```
//!
//! 周期之间互斥；只有持久化成功后才替换发布点，失败的周期不会影响
//! 已发布的结果。阶段错误策略：
//!
//! | 阶段 | 错误 | 处理 |
//! |------|------|------|
//! | LOADING | 超时 / 来源失败 / 空结果 | 终止周期 |
//! | FILTERING / FEATURIZING | 逐条错误 / 离群记录 | 丢弃记录并计数 |
//! | PREDICTING | 推断失败 / 点数不足 | 终止周期 |
//! | INTERPOLATING | 方程组奇异 | 放宽正则化重试一次，再失败终止 |
//! | PERSISTING | 写入失败 | 指数退避重试，耗尽后丢弃网格并终止 |

use crate::cycle::{CycleError, CycleId, CycleResult, CycleState};
use crate::events::{CycleEvent, EventDispatcher};
use crate::publication::Publication;
use crate::sink::{ResultSink, SinkError};
use crate::sources::{MetadataResolver, SourceError, TelemetryLoader, TimeRange};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cml_config::CycleConfig;
use cml_pipeline::{
    aggregate_by_device, AnomalyFilter, DeviceId, DeviceMetadata, FeatureBuilder, PredictedPoint,
    PredictionAdapter, Reading,
};
use cml_terrain::interpolation::{
    GridSpec, InterpolationError, InterpolationGrid, InterpolationResult, RegressionKriging,
    SamplePoint,
};
use cml_terrain::ElevationLookup;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

/// 外部协作方
#[derive(Clone)]
pub struct Collaborators {
    /// 遥测加载
    pub telemetry: Arc<dyn TelemetryLoader>,
    /// 元数据解析
    pub metadata: Arc<dyn MetadataResolver>,
    /// DEM 高程查询
    pub dem: Arc<dyn ElevationLookup>,
    /// 结果持久化
    pub sink: Arc<dyn ResultSink>,
}

/// 周期各阶段组件
#[derive(Debug)]
pub struct CycleStages {
    /// 异常过滤（跨周期保留设备历史）
    pub filter: AnomalyFilter,
    /// 特征构建
    pub features: FeatureBuilder,
    /// 预测适配
    pub predictor: PredictionAdapter,
    /// 插值引擎
    pub engine: RegressionKriging,
    /// 输出网格
    pub grid: GridSpec,
}

/// 周期编排器
pub struct CycleOrchestrator {
    config: CycleConfig,
    collaborators: Collaborators,
    filter: Mutex<AnomalyFilter>,
    features: FeatureBuilder,
    predictor: PredictionAdapter,
    engine: RegressionKriging,
    grid: GridSpec,
    publication: Arc<Publication>,
    events: Arc<EventDispatcher>,
    state: RwLock<CycleState>,
    /// 周期互斥
    gate: tokio::sync::Mutex<()>,
    last_timestamp: Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for CycleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleOrchestrator")
            .field("config", &self.config)
            .field("grid", &self.grid)
            .field("state", &self.state())
            .field("events", &self.events)
            .finish()
    }
}

impl CycleOrchestrator {
    /// 创建编排器
    pub fn new(config: CycleConfig, collaborators: Collaborators, stages: CycleStages) -> Self {
        Self {
            config,
            collaborators,
            filter: Mutex::new(stages.filter),
            features: stages.features,
            predictor: stages.predictor,
            engine: stages.engine,
            grid: stages.grid,
            publication: Arc::new(Publication::new()),
            events: Arc::new(EventDispatcher::new()),
            state: RwLock::new(CycleState::Idle),
            gate: tokio::sync::Mutex::new(()),
            last_timestamp: Mutex::new(None),
        }
    }

    /// 使用共享的事件分发器
    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    /// 使用共享的发布点
    pub fn with_publication(mut self, publication: Arc<Publication>) -> Self {
        self.publication = publication;
        self
    }

    /// 周期配置
    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    /// 发布点
    pub fn publication(&self) -> &Arc<Publication> {
        &self.publication
    }

    /// 事件分发器
    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    /// 当前状态
    pub fn state(&self) -> CycleState {
        *self.state.read()
    }

    /// 最近一次成功周期的结果
    pub fn latest(&self) -> Option<CycleResult> {
        self.publication.latest()
    }

    /// 从持久化恢复
    ///
    /// 重启后的周期时间戳仍严格大于上次持久化的结果。上次结果的制品可读时
    /// 重新发布，[`latest`](Self::latest) 在首个新周期完成前即可返回；
    /// 制品读取失败只恢复时间戳序列。
    pub fn resume_from_sink(&self) -> Result<Option<CycleResult>, SinkError> {
        let sink = &self.collaborators.sink;
        let Some(result) = sink.latest_persisted()? else {
            return Ok(None);
        };

        *self.last_timestamp.lock() = Some(result.timestamp);
        tracing::info!(
            "上次持久化的周期: {} ({})",
            result.cycle_id,
            result.timestamp.to_rfc3339()
        );

        match sink.load_artifact(&result.grid_reference) {
            Ok(grid) => {
                self.publication.publish(result.clone(), Arc::new(grid));
                tracing::info!("已重新发布制品 {}", result.grid_reference);
            }
            Err(e) => tracing::warn!(
                "制品 {} 无法读取, 仅恢复时间戳: {}",
                result.grid_reference,
                e
            ),
        }
        Ok(Some(result))
    }

    /// 执行一个周期
    ///
    /// 若另一个周期正在执行，等待其结束后再开始。失败时发布点保持不变。
    pub async fn run_cycle(&self, reference_time: DateTime<Utc>) -> Result<CycleResult, CycleError> {
        let _gate = self.gate.lock().await;
        let cycle_id = CycleId::new();
        let started = Instant::now();

        tracing::info!("周期 {} 开始: 参考时间 {}", cycle_id, reference_time.to_rfc3339());
        self.events.emit(CycleEvent::CycleStarted {
            cycle_id,
            reference_time,
        });

        match self.execute(cycle_id, reference_time).await {
            Ok((result, points)) => {
                self.transition(cycle_id, CycleState::Idle);
                let duration_secs = started.elapsed().as_secs_f64();
                tracing::info!(
                    "周期 {} 完成: {:.2}s, {} 点, 温度 {:.2}..{:.2}, 制品 {}",
                    cycle_id,
                    duration_secs,
                    points,
                    result.min_temp,
                    result.max_temp,
                    result.grid_reference
                );
                self.events.emit(CycleEvent::CycleCompleted {
                    cycle_id,
                    duration_secs,
                    points,
                    min_temp: result.min_temp,
                    max_temp: result.max_temp,
                    grid_reference: result.grid_reference.clone(),
                });
                Ok(result)
            }
            Err(err) => {
                let stage = self.state();
                self.transition(cycle_id, CycleState::Failed);
                tracing::error!("周期 {} 在 {} 阶段失败: {}", cycle_id, stage, err);
                self.events.emit(CycleEvent::CycleFailed {
                    cycle_id,
                    stage,
                    error: err.to_string(),
                });
                self.transition(cycle_id, CycleState::Idle);
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        cycle_id: CycleId,
        reference_time: DateTime<Utc>,
    ) -> Result<(CycleResult, usize), CycleError> {
        // LOADING
        self.transition(cycle_id, CycleState::Loading);
        let range = TimeRange::trailing(reference_time, self.config.load_window());
        let (readings, metadata) = self.load(range).await?;

        // FILTERING
        self.transition(cycle_id, CycleState::Filtering);
        let outcome = self.filter.lock().filter(readings);
        self.report_dropped(cycle_id, CycleState::Filtering, outcome.stats.rejected());
        if outcome.clean.is_empty() {
            return Err(CycleError::unavailable(
                CycleState::Filtering,
                "异常过滤后无有效读数",
            ));
        }

        // FEATURIZING
        self.transition(cycle_id, CycleState::Featurizing);
        let batch = self
            .features
            .build(&outcome.clean, &metadata, self.collaborators.dem.as_ref());
        for (device, timestamp, reason) in batch.dropped.iter().take(5) {
            tracing::debug!("丢弃 {} @ {}: {}", device, timestamp.to_rfc3339(), reason);
        }
        if batch.records.is_empty() {
            self.report_dropped(cycle_id, CycleState::Featurizing, batch.dropped.len());
            return Err(CycleError::unavailable(
                CycleState::Featurizing,
                "没有可解析位置与高程的记录",
            ));
        }
        let screened = self.filter.lock().screen_spatial(batch.records);
        for (record, reason) in screened.rejected.iter().take(5) {
            tracing::debug!("剔除 {} @ {}: {}", record.device_id, record.timestamp.to_rfc3339(), reason);
        }
        self.report_dropped(
            cycle_id,
            CycleState::Featurizing,
            batch.dropped.len() + screened.rejected.len(),
        );
        if screened.kept.is_empty() {
            return Err(CycleError::unavailable(
                CycleState::Featurizing,
                "空间离群检测后无有效记录",
            ));
        }

        // PREDICTING
        self.transition(cycle_id, CycleState::Predicting);
        let predicted = self.predictor.predict(&screened.kept)?;
        let points = aggregate_by_device(&predicted);
        if points.len() < self.config.min_viable_points {
            return Err(CycleError::InsufficientPoints {
                required: self.config.min_viable_points,
                actual: points.len(),
            });
        }

        // INTERPOLATING
        self.transition(cycle_id, CycleState::Interpolating);
        let grid = Arc::new(self.interpolate(cycle_id, &points).await?);
        let (min_temp, max_temp) = grid.min_max().ok_or_else(|| {
            CycleError::Interpolation(InterpolationError::non_finite("网格没有有效单元"))
        })?;

        // PERSISTING
        self.transition(cycle_id, CycleState::Persisting);
        let timestamp = self.next_timestamp(reference_time);

        let sink = Arc::clone(&self.collaborators.sink);
        let artifact_grid = Arc::clone(&grid);
        let grid_reference = self
            .with_retry(cycle_id, "store_artifact", move || {
                sink.store_artifact(cycle_id, timestamp, &artifact_grid)
            })
            .await?;

        let result = CycleResult {
            cycle_id,
            timestamp,
            device_ids_used: points.iter().map(|p| p.device_id.clone()).collect(),
            min_temp,
            max_temp,
            grid_reference,
        };

        let sink = Arc::clone(&self.collaborators.sink);
        let record = result.clone();
        self.with_retry(cycle_id, "persist", move || sink.persist(&record))
            .await?;

        *self.last_timestamp.lock() = Some(timestamp);
        self.publication.publish(result.clone(), grid);
        Ok((result, points.len()))
    }

    /// 加载读数与元数据
    ///
    /// 超时后阻塞任务在后台结束，结果被丢弃。
    async fn load(
        &self,
        range: TimeRange,
    ) -> Result<(Vec<Reading>, HashMap<DeviceId, DeviceMetadata>), CycleError> {
        let telemetry = Arc::clone(&self.collaborators.telemetry);
        let resolver = Arc::clone(&self.collaborators.metadata);

        let task = tokio::task::spawn_blocking(move || -> Result<_, SourceError> {
            let readings = telemetry.load(&range)?;
            let ids: BTreeSet<DeviceId> = readings.iter().map(|r| r.device_id.clone()).collect();
            let metadata = if ids.is_empty() {
                HashMap::new()
            } else {
                resolver.resolve(&ids)?
            };
            Ok((readings, metadata))
        });

        let timeout = self.config.load_timeout();
        let (readings, metadata) = tokio::time::timeout(timeout, task)
            .await
            .map_err(|_| CycleError::Timeout {
                secs: timeout.as_secs(),
            })?
            .map_err(|e| CycleError::Internal(format!("加载任务异常: {}", e)))?
            .map_err(|e| CycleError::unavailable(CycleState::Loading, e.to_string()))?;

        if readings.is_empty() {
            return Err(CycleError::unavailable(
                CycleState::Loading,
                format!("{} 内没有读数", range),
            ));
        }

        tracing::info!(
            "加载完成: {} 条读数, {} 台设备有元数据",
            readings.len(),
            metadata.len()
        );
        Ok((readings, metadata))
    }

    /// 插值；方程组奇异时以放宽的正则化重试一次
    async fn interpolate(
        &self,
        cycle_id: CycleId,
        points: &[PredictedPoint],
    ) -> Result<InterpolationGrid, CycleError> {
        let samples: Vec<SamplePoint> = points
            .iter()
            .map(|p| SamplePoint::new(p.location, p.predicted_temperature))
            .collect();

        match self.run_engine(self.engine.clone(), samples.clone()).await? {
            Err(InterpolationError::Singular { nugget }) => {
                let relaxed = self.engine.relaxed();
                tracing::warn!(
                    "克里金方程组奇异 (块金={:.3e}), 以正则化 {:.3e} 重试",
                    nugget,
                    relaxed.config().regularization
                );
                self.events.emit(CycleEvent::RetryScheduled {
                    cycle_id,
                    stage: CycleState::Interpolating,
                    attempt: 1,
                    reason: format!("singular system, nugget={:.3e}", nugget),
                });
                Ok(self.run_engine(relaxed, samples).await??)
            }
            other => Ok(other?),
        }
    }

    async fn run_engine(
        &self,
        engine: RegressionKriging,
        samples: Vec<SamplePoint>,
    ) -> Result<InterpolationResult<InterpolationGrid>, CycleError> {
        let dem = Arc::clone(&self.collaborators.dem);
        let grid = self.grid;
        tokio::task::spawn_blocking(move || engine.interpolate(&samples, dem.as_ref(), &grid))
            .await
            .map_err(|e| CycleError::Internal(format!("插值任务异常: {}", e)))
    }

    /// 在阻塞线程池中执行持久化操作，失败后按退避重试
    async fn with_retry<T, F>(&self, cycle_id: CycleId, what: &str, op: F) -> Result<T, CycleError>
    where
        F: Fn() -> Result<T, SinkError> + Clone + Send + 'static,
        T: Send + 'static,
    {
        let attempts = self.config.persist_retries + 1;
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.config.persist_backoff(attempt - 1);
                tracing::warn!(
                    "{} 失败: {}, {}ms 后第{}次重试",
                    what,
                    last_error,
                    delay.as_millis(),
                    attempt
                );
                self.events.emit(CycleEvent::RetryScheduled {
                    cycle_id,
                    stage: CycleState::Persisting,
                    attempt,
                    reason: last_error.clone(),
                });
                tokio::time::sleep(delay).await;
            }

            match tokio::task::spawn_blocking(op.clone()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(e) => return Err(CycleError::Internal(format!("{} 任务异常: {}", what, e))),
            }
        }

        Err(CycleError::Persistence {
            attempts,
            message: format!("{}: {}", what, last_error),
        })
    }

    /// 严格递增的结果时间戳
    fn next_timestamp(&self, reference_time: DateTime<Utc>) -> DateTime<Utc> {
        match *self.last_timestamp.lock() {
            Some(prev) if reference_time <= prev => prev + ChronoDuration::milliseconds(1),
            _ => reference_time,
        }
    }

    fn transition(&self, cycle_id: CycleId, next: CycleState) {
        let old = std::mem::replace(&mut *self.state.write(), next);
        if old == next {
            return;
        }
        tracing::info!("周期 {}: {} -> {}", cycle_id, old, next);
        self.events.emit(CycleEvent::StateChanged {
            cycle_id,
            old_state: old,
            new_state: next,
        });
    }

    fn report_dropped(&self, cycle_id: CycleId, stage: CycleState, count: usize) {
        if count == 0 {
            return;
        }
        tracing::warn!("{} 阶段丢弃 {} 条记录", stage, count);
        self.events.emit(CycleEvent::RecordsDropped {
            cycle_id,
            stage,
            count,
        });
    }
}
