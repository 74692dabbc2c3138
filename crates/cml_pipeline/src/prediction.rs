// crates/cml_pipeline/src/prediction.rs

//! 点温度预测适配器
//!
//! 训练好的估计器作为黑盒：`predict(batch) -> outputs`。适配器负责
//! 按列布局组装特征矩阵、标准化，并保证输出与输入一一对应、顺序一致。
//! 估计器无法为整批给出有限输出时返回 [`ModelInferenceError`]，不允许部分结果。

use crate::types::{DeviceId, FeatureRecord, PredictedPoint};
use cml_foundation::error::{CmlError, CmlResult};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// 错误
// ============================================================================

/// 推理错误（整批失败）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelInferenceError {
    /// 特征列数与模型输入维度不符
    #[error("特征维度不匹配: 模型需要{expected}列, 实际{actual}列")]
    ShapeMismatch {
        /// 模型输入维度
        expected: usize,
        /// 特征列数
        actual: usize,
    },

    /// 输出个数与输入不符
    #[error("输出长度不匹配: 期望{expected}, 实际{actual}")]
    LengthMismatch {
        /// 输入行数
        expected: usize,
        /// 输出个数
        actual: usize,
    },

    /// 输入特征包含非有限值
    #[error("第{row}行特征 {column} 非有限")]
    NonFiniteInput {
        /// 行号
        row: usize,
        /// 列名
        column: String,
    },

    /// 输出包含非有限值
    #[error("第{index}个输出非有限")]
    NonFiniteOutput {
        /// 输出位置
        index: usize,
    },

    /// 估计器内部失败
    #[error("估计器失败: {message}")]
    Estimator {
        /// 原因
        message: String,
    },
}

impl ModelInferenceError {
    /// 估计器失败
    pub fn estimator(message: impl Into<String>) -> Self {
        Self::Estimator {
            message: message.into(),
        }
    }
}

// ============================================================================
// 列布局
// ============================================================================

/// 模型输入列
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureColumn {
    /// 按名称取信号指标
    Metric(String),
    /// 白昼标志 (0/1)
    Daylight,
    /// 本地小时
    Hour,
    /// 本地年积日
    DayOfYear,
    /// 天线方位角
    Azimuth,
    /// DEM 高程
    Elevation,
    /// 经度
    Longitude,
    /// 纬度
    Latitude,
}

impl FeatureColumn {
    /// 列名
    pub fn label(&self) -> String {
        match self {
            Self::Metric(name) => name.clone(),
            Self::Daylight => "daylight".into(),
            Self::Hour => "hour".into(),
            Self::DayOfYear => "day_of_year".into(),
            Self::Azimuth => "azimuth".into(),
            Self::Elevation => "elevation".into(),
            Self::Longitude => "longitude".into(),
            Self::Latitude => "latitude".into(),
        }
    }
}

/// 解析后的列（指标名已换成下标）
#[derive(Debug, Clone, Copy)]
enum ColumnSource {
    Metric(usize),
    Daylight,
    Hour,
    DayOfYear,
    Azimuth,
    Elevation,
    Longitude,
    Latitude,
}

impl ColumnSource {
    fn value(&self, record: &FeatureRecord) -> f64 {
        match *self {
            Self::Metric(i) => record.signal_metrics.get(i).copied().unwrap_or(f64::NAN),
            Self::Daylight => {
                if record.is_daylight {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Hour => record.hour_of_day as f64,
            Self::DayOfYear => record.day_of_year as f64,
            Self::Azimuth => record.azimuth,
            Self::Elevation => record.elevation,
            Self::Longitude => record.location.lon(),
            Self::Latitude => record.location.lat(),
        }
    }
}

fn default_columns() -> Vec<FeatureColumn> {
    vec![
        FeatureColumn::Metric("temperature_mw".into()),
        FeatureColumn::Daylight,
        FeatureColumn::Hour,
        FeatureColumn::DayOfYear,
        FeatureColumn::Metric("signal".into()),
        FeatureColumn::Azimuth,
    ]
}

// ============================================================================
// 标准化
// ============================================================================

/// 标准化器 `(x - mean) / scale`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    /// 列均值
    pub mean: Vec<f64>,
    /// 列尺度
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// 从 JSON 文件加载
    pub fn from_json_file(path: impl AsRef<Path>) -> CmlResult<Self> {
        let scaler: Self = read_json(path.as_ref())?;
        scaler.validate(scaler.mean.len())?;
        Ok(scaler)
    }

    /// 验证列数与尺度
    pub fn validate(&self, columns: usize) -> CmlResult<()> {
        CmlError::check_size("scaler.mean", columns, self.mean.len())?;
        CmlError::check_size("scaler.scale", columns, self.scale.len())?;
        if self.mean.iter().any(|v| !v.is_finite()) {
            return Err(CmlError::config("scaler.mean 包含非有限值"));
        }
        if self.scale.iter().any(|s| !(s.is_finite() && *s != 0.0)) {
            return Err(CmlError::config("scaler.scale 必须为非零有限值"));
        }
        Ok(())
    }

    /// 原地标准化
    pub fn transform(&self, batch: &mut Array2<f64>) {
        for mut row in batch.rows_mut() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (*v - self.mean[j]) / self.scale[j];
            }
        }
    }
}

/// 预测配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// 模型输入列顺序
    #[serde(default = "default_columns")]
    pub columns: Vec<FeatureColumn>,

    /// 输入标准化
    #[serde(default)]
    pub scaler: Option<StandardScaler>,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            columns: default_columns(),
            scaler: None,
        }
    }
}

impl PredictionConfig {
    /// 验证配置
    pub fn validate(&self) -> CmlResult<()> {
        if self.columns.is_empty() {
            return Err(CmlError::config("prediction.columns 不能为空"));
        }
        if let Some(scaler) = &self.scaler {
            scaler.validate(self.columns.len())?;
        }
        Ok(())
    }
}

// ============================================================================
// 估计器
// ============================================================================

/// 点温度估计器
///
/// 输入每行一条记录、每列一个特征（已标准化），输出每行一个温度。
pub trait TemperatureModel: Send + Sync + Debug {
    /// 输入特征维度
    fn n_features(&self) -> usize;

    /// 批量预测
    fn predict(&self, batch: ArrayView2<'_, f64>) -> Result<Vec<f64>, ModelInferenceError>;

    /// 模型名称
    fn name(&self) -> &str {
        "model"
    }
}

/// 线性估计器 `y = X·w + b`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    /// 权重
    pub weights: Vec<f64>,
    /// 截距
    #[serde(default)]
    pub intercept: f64,
}

impl LinearModel {
    /// 创建模型
    pub fn new(weights: Vec<f64>, intercept: f64) -> Self {
        Self { weights, intercept }
    }

    /// 从 JSON 文件加载
    pub fn from_json_file(path: impl AsRef<Path>) -> CmlResult<Self> {
        let path = path.as_ref();
        let model: Self = read_json(path)?;
        if model.weights.is_empty() {
            return Err(CmlError::config(format!("模型权重为空: {}", path.display())));
        }
        if model.weights.iter().any(|w| !w.is_finite()) || !model.intercept.is_finite() {
            return Err(CmlError::config(format!("模型参数包含非有限值: {}", path.display())));
        }
        tracing::info!("模型已加载: {} ({} 个特征)", path.display(), model.weights.len());
        Ok(model)
    }
}

impl TemperatureModel for LinearModel {
    fn n_features(&self) -> usize {
        self.weights.len()
    }

    fn predict(&self, batch: ArrayView2<'_, f64>) -> Result<Vec<f64>, ModelInferenceError> {
        if batch.ncols() != self.weights.len() {
            return Err(ModelInferenceError::ShapeMismatch {
                expected: self.weights.len(),
                actual: batch.ncols(),
            });
        }
        Ok(batch
            .rows()
            .into_iter()
            .map(|row| row.iter().zip(&self.weights).map(|(x, w)| x * w).sum::<f64>() + self.intercept)
            .collect())
    }

    fn name(&self) -> &str {
        "linear"
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> CmlResult<T> {
    if !path.exists() {
        return Err(CmlError::file_not_found(path));
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| CmlError::io_with_source(format!("读取失败: {}", path.display()), e))?;
    serde_json::from_str(&text)
        .map_err(|e| CmlError::serialization(format!("{}: {}", path.display(), e)))
}

// ============================================================================
// 适配器
// ============================================================================

/// 预测适配器
#[derive(Debug, Clone)]
pub struct PredictionAdapter {
    columns: Vec<(String, ColumnSource)>,
    scaler: Option<StandardScaler>,
    model: Arc<dyn TemperatureModel>,
}

impl PredictionAdapter {
    /// 创建适配器
    ///
    /// `channels` 为读数指标通道名，按 `Reading::signal_metrics` 顺序。
    pub fn new(
        config: &PredictionConfig,
        channels: &[String],
        model: Arc<dyn TemperatureModel>,
    ) -> CmlResult<Self> {
        config.validate()?;
        let columns = config
            .columns
            .iter()
            .map(|col| {
                let source = match col {
                    FeatureColumn::Metric(name) => channels
                        .iter()
                        .position(|c| c == name)
                        .map(ColumnSource::Metric)
                        .ok_or_else(|| CmlError::config(format!("模型输入列引用未知指标: {name}")))?,
                    FeatureColumn::Daylight => ColumnSource::Daylight,
                    FeatureColumn::Hour => ColumnSource::Hour,
                    FeatureColumn::DayOfYear => ColumnSource::DayOfYear,
                    FeatureColumn::Azimuth => ColumnSource::Azimuth,
                    FeatureColumn::Elevation => ColumnSource::Elevation,
                    FeatureColumn::Longitude => ColumnSource::Longitude,
                    FeatureColumn::Latitude => ColumnSource::Latitude,
                };
                Ok((col.label(), source))
            })
            .collect::<CmlResult<Vec<_>>>()?;

        Ok(Self {
            columns,
            scaler: config.scaler.clone(),
            model,
        })
    }

    /// 模型名称
    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// 组装（并标准化）特征矩阵
    pub fn feature_matrix(&self, features: &[FeatureRecord]) -> Result<Array2<f64>, ModelInferenceError> {
        let mut batch = Array2::zeros((features.len(), self.columns.len()));
        for (i, record) in features.iter().enumerate() {
            for (j, (label, source)) in self.columns.iter().enumerate() {
                let v = source.value(record);
                if !v.is_finite() {
                    return Err(ModelInferenceError::NonFiniteInput {
                        row: i,
                        column: label.clone(),
                    });
                }
                batch[(i, j)] = v;
            }
        }
        if let Some(scaler) = &self.scaler {
            scaler.transform(&mut batch);
        }
        Ok(batch)
    }

    /// 预测
    ///
    /// 输出与 `features` 等长同序。
    pub fn predict(&self, features: &[FeatureRecord]) -> Result<Vec<PredictedPoint>, ModelInferenceError> {
        if features.is_empty() {
            return Ok(Vec::new());
        }
        if self.model.n_features() != self.columns.len() {
            return Err(ModelInferenceError::ShapeMismatch {
                expected: self.model.n_features(),
                actual: self.columns.len(),
            });
        }

        let batch = self.feature_matrix(features)?;
        let outputs = self.model.predict(batch.view())?;
        if outputs.len() != features.len() {
            return Err(ModelInferenceError::LengthMismatch {
                expected: features.len(),
                actual: outputs.len(),
            });
        }
        if let Some(index) = outputs.iter().position(|v| !v.is_finite()) {
            return Err(ModelInferenceError::NonFiniteOutput { index });
        }

        tracing::debug!("{} 预测完成: {} 条", self.model.name(), outputs.len());
        Ok(features
            .iter()
            .zip(outputs)
            .map(|(record, t)| PredictedPoint {
                device_id: record.device_id.clone(),
                location: record.location,
                timestamp: record.timestamp,
                predicted_temperature: t,
            })
            .collect())
    }
}

/// 按设备平均预测值
///
/// 每台设备输出一个点：温度取均值，时间取最新，位置取首条记录。
/// 输出按设备标识排序。
pub fn aggregate_by_device(points: &[PredictedPoint]) -> Vec<PredictedPoint> {
    let mut groups: BTreeMap<&DeviceId, (PredictedPoint, f64, usize)> = BTreeMap::new();
    for p in points {
        groups
            .entry(&p.device_id)
            .and_modify(|(agg, sum, count)| {
                *sum += p.predicted_temperature;
                *count += 1;
                agg.timestamp = agg.timestamp.max(p.timestamp);
            })
            .or_insert_with(|| (p.clone(), p.predicted_temperature, 1));
    }
    groups
        .into_values()
        .map(|(mut agg, sum, count)| {
            agg.predicted_temperature = sum / count as f64;
            agg
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use cml_geo::Point2D;
    use std::io::Write;

    fn channels() -> Vec<String> {
        vec!["temperature_mw".into(), "signal".into(), "uptime".into()]
    }

    fn record(id: &str, temp: f64, hour: u32) -> FeatureRecord {
        FeatureRecord {
            device_id: DeviceId::new(id),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
            location: Point2D::from_lonlat(14.5, 50.0),
            hour_of_day: hour,
            day_of_year: 153,
            is_daylight: true,
            elevation: 300.0,
            azimuth: 90.0,
            signal_metrics: vec![temp, -50.0, 100.0],
        }
    }

    /// 只用设备温度列：y = 0.5 * temperature_mw + 1
    fn adapter() -> PredictionAdapter {
        let model = LinearModel::new(vec![0.5, 0.0, 0.0, 0.0, 0.0, 0.0], 1.0);
        PredictionAdapter::new(&PredictionConfig::default(), &channels(), Arc::new(model)).unwrap()
    }

    #[derive(Debug)]
    struct ShortModel;

    impl TemperatureModel for ShortModel {
        fn n_features(&self) -> usize {
            6
        }

        fn predict(&self, batch: ArrayView2<'_, f64>) -> Result<Vec<f64>, ModelInferenceError> {
            Ok(vec![0.0; batch.nrows().saturating_sub(1)])
        }
    }

    #[test]
    fn test_predict_preserves_order_and_length() {
        let features = vec![record("c", 10.0, 1), record("a", 20.0, 2), record("b", 30.0, 3)];
        let points = adapter().predict(&features).unwrap();
        assert_eq!(points.len(), 3);
        for (f, p) in features.iter().zip(&points) {
            assert_eq!(f.device_id, p.device_id);
            assert_eq!(f.timestamp, p.timestamp);
        }
        assert!((points[0].predicted_temperature - 6.0).abs() < 1e-12);
        assert!((points[2].predicted_temperature - 16.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_batch() {
        assert!(adapter().predict(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_feature_matrix_layout() {
        let m = adapter().feature_matrix(&[record("a", 20.0, 7)]).unwrap();
        assert_eq!(m.row(0).to_vec(), vec![20.0, 1.0, 7.0, 153.0, -50.0, 90.0]);
    }

    #[test]
    fn test_scaler_applied() {
        let config = PredictionConfig {
            scaler: Some(StandardScaler {
                mean: vec![10.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                scale: vec![2.0, 1.0, 1.0, 1.0, 1.0, 1.0],
            }),
            ..Default::default()
        };
        let model = LinearModel::new(vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0], 0.0);
        let adapter = PredictionAdapter::new(&config, &channels(), Arc::new(model)).unwrap();
        let points = adapter.predict(&[record("a", 20.0, 1)]).unwrap();
        assert!((points[0].predicted_temperature - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_shape_mismatch() {
        let model = LinearModel::new(vec![1.0, 2.0], 0.0);
        let adapter = PredictionAdapter::new(&PredictionConfig::default(), &channels(), Arc::new(model)).unwrap();
        let err = adapter.predict(&[record("a", 20.0, 1)]).unwrap_err();
        assert_eq!(err, ModelInferenceError::ShapeMismatch { expected: 2, actual: 6 });
    }

    #[test]
    fn test_length_mismatch() {
        let adapter = PredictionAdapter::new(&PredictionConfig::default(), &channels(), Arc::new(ShortModel)).unwrap();
        let err = adapter.predict(&[record("a", 20.0, 1), record("b", 21.0, 1)]).unwrap_err();
        assert!(matches!(err, ModelInferenceError::LengthMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn test_non_finite_input() {
        let mut r = record("a", 20.0, 1);
        r.signal_metrics[1] = f64::NAN;
        let err = adapter().predict(&[r]).unwrap_err();
        assert_eq!(
            err,
            ModelInferenceError::NonFiniteInput {
                row: 0,
                column: "signal".into()
            }
        );
    }

    #[test]
    fn test_unknown_metric_column() {
        let config = PredictionConfig {
            columns: vec![FeatureColumn::Metric("rain".into())],
            scaler: None,
        };
        let model = LinearModel::new(vec![1.0], 0.0);
        assert!(PredictionAdapter::new(&config, &channels(), Arc::new(model)).is_err());
    }

    #[test]
    fn test_scaler_length_validated() {
        let config = PredictionConfig {
            scaler: Some(StandardScaler {
                mean: vec![0.0],
                scale: vec![1.0],
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_column_serde() {
        let cols: Vec<FeatureColumn> =
            serde_json::from_str(r#"[{"metric": "signal"}, "daylight", "day_of_year"]"#).unwrap();
        assert_eq!(
            cols,
            vec![
                FeatureColumn::Metric("signal".into()),
                FeatureColumn::Daylight,
                FeatureColumn::DayOfYear
            ]
        );
    }

    #[test]
    fn test_linear_model_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"weights": [0.1, 0.2], "intercept": 3.0}}"#).unwrap();
        let model = LinearModel::from_json_file(file.path()).unwrap();
        assert_eq!(model.n_features(), 2);
        assert_eq!(model.intercept, 3.0);

        assert!(LinearModel::from_json_file("/nonexistent/model.json").is_err());
    }

    #[test]
    fn test_aggregate_by_device() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let point = |id: &str, t: f64, minutes: i64| PredictedPoint {
            device_id: DeviceId::new(id),
            location: Point2D::from_lonlat(14.0, 50.0),
            timestamp: t0 + chrono::Duration::minutes(minutes),
            predicted_temperature: t,
        };
        let agg = aggregate_by_device(&[point("b", 10.0, 0), point("a", 5.0, 0), point("b", 14.0, 10)]);
        assert_eq!(agg.len(), 2);
        assert_eq!(agg[0].device_id.as_str(), "a");
        assert!((agg[1].predicted_temperature - 12.0).abs() < 1e-12);
        assert_eq!(agg[1].timestamp, t0 + chrono::Duration::minutes(10));
    }
}
