// crates/cml_config/src/service_config.rs

//! ServiceConfig - 服务配置
//!
//! 汇总各组件配置与数据文件路径，从 JSON 加载。所有字段都有默认值，
//! 配置文件只需写出与默认不同的部分。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cycle::CycleConfig;
use crate::error::ConfigError;
use cml_pipeline::{AnomalyConfig, FeatureConfig, PredictionConfig};
use cml_terrain::interpolation::{GridSpec, KrigingConfig};

/// 服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServiceConfig {
    /// 数据文件路径
    #[serde(default)]
    pub paths: PathsConfig,

    /// 异常过滤
    #[serde(default)]
    pub anomaly: AnomalyConfig,

    /// 特征构建
    #[serde(default)]
    pub features: FeatureConfig,

    /// 预测
    #[serde(default)]
    pub prediction: PredictionConfig,

    /// 回归克里金
    #[serde(default)]
    pub kriging: KrigingConfig,

    /// 输出网格
    #[serde(default)]
    pub grid: GridSpec,

    /// 周期调度
    #[serde(default)]
    pub cycle: CycleConfig,
}

/// 数据文件路径
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// DEM (ESRI ASCII Grid)
    #[serde(default = "default_dem")]
    pub dem: PathBuf,

    /// 区域边界 (GeoJSON)，缺省时不做掩膜
    #[serde(default = "default_boundary")]
    pub boundary: Option<PathBuf>,

    /// 估计器参数 (JSON)
    #[serde(default = "default_model")]
    pub model: PathBuf,

    /// 标准化参数 (JSON)，设置时覆盖 `prediction.scaler`
    #[serde(default)]
    pub scaler: Option<PathBuf>,

    /// 遥测读数 (JSON)
    #[serde(default = "default_telemetry")]
    pub telemetry: PathBuf,

    /// 设备元数据 (JSON)
    #[serde(default = "default_metadata")]
    pub metadata: PathBuf,

    /// 输出目录
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_dem() -> PathBuf { PathBuf::from("data/dem.asc") }
fn default_boundary() -> Option<PathBuf> { Some(PathBuf::from("data/boundary.geojson")) }
fn default_model() -> PathBuf { PathBuf::from("data/model.json") }
fn default_telemetry() -> PathBuf { PathBuf::from("data/telemetry.json") }
fn default_metadata() -> PathBuf { PathBuf::from("data/devices.json") }
fn default_output_dir() -> PathBuf { PathBuf::from("output") }

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            dem: default_dem(),
            boundary: default_boundary(),
            model: default_model(),
            scaler: None,
            telemetry: default_telemetry(),
            metadata: default_metadata(),
            output_dir: default_output_dir(),
        }
    }
}

impl PathsConfig {
    /// 把相对路径解析为相对 `base` 目录
    pub fn resolve_relative_to(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.dem);
        join(&mut self.model);
        join(&mut self.telemetry);
        join(&mut self.metadata);
        join(&mut self.output_dir);
        if let Some(p) = self.boundary.as_mut() {
            join(p);
        }
        if let Some(p) = self.scaler.as_mut() {
            join(p);
        }
    }
}

impl ServiceConfig {
    /// 从文件加载配置
    ///
    /// 相对路径以配置文件所在目录为基准。
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        let mut config: ServiceConfig = serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;

        if let Some(base) = path.parent() {
            config.paths.resolve_relative_to(base);
        }

        config.validate()?;
        tracing::debug!("配置已加载: {}", path.display());
        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.anomaly.validate().map_err(ConfigError::section("anomaly"))?;
        self.features.validate().map_err(ConfigError::section("features"))?;
        self.prediction.validate().map_err(ConfigError::section("prediction"))?;
        self.kriging.validate().map_err(ConfigError::section("kriging"))?;
        self.cycle.validate()?;

        self.grid.validate().map_err(|e| {
            ConfigError::invalid(
                "grid",
                format!("{}x{}", self.grid.rows, self.grid.cols),
                e.to_string(),
            )
        })?;

        // 预测列引用的指标必须是异常过滤中的必需通道，可选通道可能为 NaN
        for col in &self.prediction.columns {
            if let cml_pipeline::FeatureColumn::Metric(name) = col {
                match self.anomaly.channel_index(name) {
                    None => {
                        return Err(ConfigError::invalid(
                            "prediction.columns",
                            name,
                            "引用了 anomaly.channels 中未定义的指标",
                        ))
                    }
                    Some(idx) if !self.anomaly.channels[idx].required => {
                        return Err(ConfigError::invalid(
                            "prediction.columns",
                            name,
                            "引用的指标通道必须为必需通道",
                        ))
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(ConfigError::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.grid.rows, 500);
        assert_eq!(config.kriging.max_neighbors, 40);
        assert_eq!(config.cycle.min_viable_points, 3);
    }

    #[test]
    fn test_invalid_kriging_section() {
        let mut config = ServiceConfig::default();
        config.kriging.n_lags = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Section { section: "kriging", .. }));
    }

    #[test]
    fn test_unknown_metric_column() {
        let mut config = ServiceConfig::default();
        config
            .prediction
            .columns
            .push(cml_pipeline::FeatureColumn::Metric("rain_rate".into()));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_optional_metric_column_rejected() {
        let mut config = ServiceConfig::default();
        config
            .anomaly
            .channels
            .push(cml_pipeline::MetricChannel::new("humidity", Some(0.0), Some(100.0)).optional());
        assert!(config.validate().is_ok());

        config
            .prediction
            .columns
            .push(cml_pipeline::FeatureColumn::Metric("humidity".into()));
        match config.validate().unwrap_err() {
            ConfigError::InvalidValue { key, value, .. } => {
                assert_eq!(key, "prediction.columns");
                assert_eq!(value, "humidity");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_partial_file_and_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{
                "paths": {{ "dem": "dem.asc", "boundary": null }},
                "grid": {{ "bounds": {{ "min_x": 14.0, "min_y": 49.0, "max_x": 15.0, "max_y": 50.0 }}, "rows": 10, "cols": 20 }},
                "cycle": {{ "interval_secs": 600, "load_timeout_secs": 60 }}
            }}"#
        )
        .unwrap();

        let config = ServiceConfig::from_file(&path).unwrap();
        assert_eq!(config.paths.dem, dir.path().join("dem.asc"));
        assert!(config.paths.boundary.is_none());
        assert_eq!(config.paths.model, dir.path().join("data/model.json"));
        assert_eq!(config.grid.shape(), (10, 20));
        assert_eq!(config.cycle.interval_secs, 600);
        assert_eq!(config.anomaly, AnomalyConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.json");
        let mut config = ServiceConfig::default();
        config.paths.output_dir = PathBuf::from("/var/lib/cml/out");
        config.save_to_file(&path).unwrap();

        let loaded = ServiceConfig::from_file(&path).unwrap();
        assert_eq!(loaded.paths.output_dir, PathBuf::from("/var/lib/cml/out"));
        assert_eq!(loaded.kriging, config.kriging);
        assert_eq!(loaded.grid, config.grid);
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ServiceConfig::from_file(&path), Err(ConfigError::Parse(_))));
    }
}
