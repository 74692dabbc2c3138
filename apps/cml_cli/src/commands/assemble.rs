// apps/cml_cli/src/commands/assemble.rs

//! 由服务配置组装周期编排器

use anyhow::{Context, Result};
use cml_config::ServiceConfig;
use cml_geo::BoundaryMask;
use cml_pipeline::{AnomalyFilter, FeatureBuilder, LinearModel, PredictionAdapter, StandardScaler};
use cml_terrain::{RasterDem, RegressionKriging};
use cml_workflow::{
    Collaborators, CycleOrchestrator, CycleStages, FileSink, JsonMetadataSource,
    JsonTelemetrySource, LoggingListener,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// 加载并校验服务配置
pub fn load_config(path: &Path) -> Result<ServiceConfig> {
    ServiceConfig::from_file(path).with_context(|| format!("加载配置失败: {}", path.display()))
}

/// 组装编排器：DEM、边界、模型、数据来源与文件持久化
pub fn build_orchestrator(config: &ServiceConfig) -> Result<CycleOrchestrator> {
    let paths = &config.paths;

    let dem = RasterDem::from_ascii_grid(&paths.dem, config.features.sample_method)
        .with_context(|| format!("加载 DEM 失败: {}", paths.dem.display()))?;
    info!("DEM: {} ({} 采样)", paths.dem.display(), dem.method().name());

    let mut engine = RegressionKriging::new(config.kriging.clone());
    if let Some(boundary) = &paths.boundary {
        let mask = BoundaryMask::from_geojson_file(boundary)
            .with_context(|| format!("加载区域边界失败: {}", boundary.display()))?;
        info!("区域边界: {} 个多边形", mask.polygon_count());
        engine = engine.with_boundary(mask);
    }

    let model = LinearModel::from_json_file(&paths.model)
        .with_context(|| format!("加载模型失败: {}", paths.model.display()))?;
    let mut prediction = config.prediction.clone();
    if let Some(scaler) = &paths.scaler {
        prediction.scaler = Some(
            StandardScaler::from_json_file(scaler)
                .with_context(|| format!("加载标准化参数失败: {}", scaler.display()))?,
        );
    }
    let predictor = PredictionAdapter::new(&prediction, &config.anomaly.channel_names(), Arc::new(model))
        .context("构建预测适配器失败")?;

    let stages = CycleStages {
        filter: AnomalyFilter::new(config.anomaly.clone()).context("构建异常过滤器失败")?,
        features: FeatureBuilder::new(config.features.clone()).context("构建特征构建器失败")?,
        predictor,
        engine,
        grid: config.grid,
    };

    let sink = FileSink::new(&paths.output_dir)
        .with_context(|| format!("创建输出目录失败: {}", paths.output_dir.display()))?
        .with_grid_parameters(config.grid, config.cycle.interval_secs);

    let collaborators = Collaborators {
        telemetry: Arc::new(JsonTelemetrySource::new(&paths.telemetry)),
        metadata: Arc::new(JsonMetadataSource::new(&paths.metadata)),
        dem: Arc::new(dem),
        sink: Arc::new(sink),
    };

    let orchestrator = CycleOrchestrator::new(config.cycle.clone(), collaborators, stages);
    orchestrator
        .events()
        .add_listener(Arc::new(LoggingListener::new("cycle")));
    Ok(orchestrator)
}
