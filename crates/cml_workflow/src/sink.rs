// crates/cml_workflow/src/sink.rs

//! 结果持久化模块
//!
//! 提供周期结果与插值网格持久化的抽象和实现。
//!
//! 文件布局（[`FileSink`]）：
//!
//! ```text
//! <dir>/grid_parameters.json                     网格参数，首次写入后不再覆盖
//! <dir>/artifacts/YYYY-MM-DD_HHMM_<cycle-id>.json 插值网格
//! <dir>/results/<cycle-id>.json                  周期结果
//! <dir>/latest.json                              最近一次成功的周期结果
//! ```
//!
//! 所有文件先写临时文件再重命名，进程在任意时刻退出都不会留下半写的文件。

use crate::cycle::{CycleId, CycleResult};
use chrono::{DateTime, Utc};
use cml_terrain::interpolation::{GridSpec, InterpolationGrid};
use ndarray::Array2;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 持久化错误
#[derive(Debug, Error)]
pub enum SinkError {
    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 制品不存在
    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// 其他错误
    #[error("{0}")]
    Other(String),
}

/// 结果持久化trait
///
/// 图像渲染等派生产物由实现方负责。
pub trait ResultSink: Send + Sync {
    /// 保存插值网格，返回制品引用
    fn store_artifact(
        &self,
        cycle_id: CycleId,
        reference_time: DateTime<Utc>,
        grid: &InterpolationGrid,
    ) -> Result<String, SinkError>;

    /// 保存周期结果
    fn persist(&self, result: &CycleResult) -> Result<(), SinkError>;

    /// 最近一次保存的周期结果
    fn latest_persisted(&self) -> Result<Option<CycleResult>, SinkError> {
        Ok(None)
    }

    /// 按 [`store_artifact`](ResultSink::store_artifact) 返回的引用读取插值网格
    fn load_artifact(&self, reference: &str) -> Result<InterpolationGrid, SinkError> {
        Err(SinkError::NotFound(reference.to_string()))
    }
}

/// 制品文件名 `YYYY-MM-DD_HHMM_<cycle-id>.json`
pub fn artifact_name(cycle_id: CycleId, reference_time: DateTime<Utc>) -> String {
    format!("{}_{}.json", reference_time.format("%Y-%m-%d_%H%M"), cycle_id)
}

// ============================================================================
// 制品格式
// ============================================================================

/// 网格制品
///
/// JSON 无法表示 NaN，掩膜单元写为 `null`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridArtifact {
    /// 周期ID
    pub cycle_id: CycleId,
    /// 参考时间
    pub reference_time: DateTime<Utc>,
    /// 行数
    pub rows: usize,
    /// 列数
    pub cols: usize,
    /// 经度矩阵（按行）
    pub x_coords: Vec<Vec<f64>>,
    /// 纬度矩阵（按行）
    pub y_coords: Vec<Vec<f64>>,
    /// 温度矩阵（按行）
    pub temperature: Vec<Vec<Option<f64>>>,
}

impl GridArtifact {
    /// 由插值网格生成
    pub fn from_grid(cycle_id: CycleId, reference_time: DateTime<Utc>, grid: &InterpolationGrid) -> Self {
        let (rows, cols) = grid.shape();
        let to_rows = |a: &Array2<f64>| a.outer_iter().map(|r| r.to_vec()).collect::<Vec<_>>();
        Self {
            cycle_id,
            reference_time,
            rows,
            cols,
            x_coords: to_rows(&grid.x_coords),
            y_coords: to_rows(&grid.y_coords),
            temperature: grid
                .temperature
                .outer_iter()
                .map(|r| r.iter().map(|v| v.is_finite().then_some(*v)).collect())
                .collect(),
        }
    }

    /// 还原为插值网格
    pub fn into_grid(self) -> Result<InterpolationGrid, SinkError> {
        let shape = (self.rows, self.cols);
        let build = |name: &str, flat: Vec<f64>| {
            Array2::from_shape_vec(shape, flat)
                .map_err(|e| SinkError::Serialization(format!("{}: {}", name, e)))
        };
        let x_coords = build("x_coords", self.x_coords.into_iter().flatten().collect())?;
        let y_coords = build("y_coords", self.y_coords.into_iter().flatten().collect())?;
        let temperature = build(
            "temperature",
            self.temperature
                .into_iter()
                .flatten()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect(),
        )?;
        Ok(InterpolationGrid {
            x_coords,
            y_coords,
            temperature,
        })
    }
}

/// 网格参数记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridParameters {
    /// 网格定义
    pub grid: GridSpec,
    /// 周期间隔 [s]
    pub interval_secs: u64,
    /// 写入时间
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// 内存实现
// ============================================================================

/// 内存持久化
#[derive(Debug, Default)]
pub struct MemorySink {
    results: RwLock<Vec<CycleResult>>,
    artifacts: RwLock<HashMap<String, InterpolationGrid>>,
}

impl MemorySink {
    /// 创建新的内存持久化
    pub fn new() -> Self {
        Self::default()
    }

    /// 已保存的周期结果（按保存顺序）
    pub fn results(&self) -> Vec<CycleResult> {
        self.results.read().clone()
    }

    /// 按引用取制品
    pub fn artifact(&self, reference: &str) -> Option<InterpolationGrid> {
        self.artifacts.read().get(reference).cloned()
    }

    /// 制品数量
    pub fn artifact_count(&self) -> usize {
        self.artifacts.read().len()
    }
}

impl ResultSink for MemorySink {
    fn store_artifact(
        &self,
        cycle_id: CycleId,
        reference_time: DateTime<Utc>,
        grid: &InterpolationGrid,
    ) -> Result<String, SinkError> {
        let reference = format!("memory://{}", artifact_name(cycle_id, reference_time));
        self.artifacts.write().insert(reference.clone(), grid.clone());
        Ok(reference)
    }

    fn persist(&self, result: &CycleResult) -> Result<(), SinkError> {
        self.results.write().push(result.clone());
        Ok(())
    }

    fn latest_persisted(&self) -> Result<Option<CycleResult>, SinkError> {
        Ok(self.results.read().last().cloned())
    }

    fn load_artifact(&self, reference: &str) -> Result<InterpolationGrid, SinkError> {
        self.artifact(reference)
            .ok_or_else(|| SinkError::NotFound(reference.to_string()))
    }
}

// ============================================================================
// 文件实现
// ============================================================================

/// 文件持久化
#[derive(Debug)]
pub struct FileSink {
    /// 输出目录
    dir: PathBuf,
    /// 网格参数（首次保存制品时写入）
    grid_parameters: Option<GridParameters>,
    /// 网格参数是否已确认存在
    parameters_written: Mutex<bool>,
}

impl FileSink {
    /// 创建文件持久化
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        std::fs::create_dir_all(dir.join("artifacts"))?;
        std::fs::create_dir_all(dir.join("results"))?;

        Ok(Self {
            dir,
            grid_parameters: None,
            parameters_written: Mutex::new(false),
        })
    }

    /// 记录网格参数
    pub fn with_grid_parameters(mut self, grid: GridSpec, interval_secs: u64) -> Self {
        self.grid_parameters = Some(GridParameters {
            grid,
            interval_secs,
            created_at: Utc::now(),
        });
        self
    }

    /// 获取输出目录
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// 读取网格参数记录
    pub fn load_grid_parameters(&self) -> Result<Option<GridParameters>, SinkError> {
        let path = self.dir.join("grid_parameters.json");
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    fn ensure_grid_parameters(&self) -> Result<(), SinkError> {
        let Some(params) = &self.grid_parameters else {
            return Ok(());
        };
        let mut written = self.parameters_written.lock();
        if *written {
            return Ok(());
        }
        let path = self.dir.join("grid_parameters.json");
        if !path.exists() {
            write_json_atomic(&path, params)?;
            tracing::info!("网格参数已写入: {}", path.display());
        }
        *written = true;
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, SinkError> {
    let json = std::fs::read_to_string(path)?;
    serde_json::from_str(&json).map_err(|e| SinkError::Serialization(e.to_string()))
}

/// 先写 `.tmp` 再重命名
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), SinkError> {
    let json = serde_json::to_vec(value).map_err(|e| SinkError::Serialization(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl ResultSink for FileSink {
    fn store_artifact(
        &self,
        cycle_id: CycleId,
        reference_time: DateTime<Utc>,
        grid: &InterpolationGrid,
    ) -> Result<String, SinkError> {
        self.ensure_grid_parameters()?;

        let reference = format!("artifacts/{}", artifact_name(cycle_id, reference_time));
        let artifact = GridArtifact::from_grid(cycle_id, reference_time, grid);
        write_json_atomic(&self.dir.join(&reference), &artifact)?;

        tracing::debug!("网格制品已保存: {}", reference);
        Ok(reference)
    }

    fn persist(&self, result: &CycleResult) -> Result<(), SinkError> {
        let path = self.dir.join("results").join(format!("{}.json", result.cycle_id));
        write_json_atomic(&path, result)?;
        write_json_atomic(&self.dir.join("latest.json"), result)?;
        Ok(())
    }

    fn latest_persisted(&self) -> Result<Option<CycleResult>, SinkError> {
        let path = self.dir.join("latest.json");
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    fn load_artifact(&self, reference: &str) -> Result<InterpolationGrid, SinkError> {
        let path = self.dir.join(reference);
        if !path.exists() {
            return Err(SinkError::NotFound(reference.to_string()));
        }
        let artifact: GridArtifact = read_json(&path)?;
        artifact.into_grid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use cml_geo::BoundingBox;
    use std::collections::BTreeSet;

    fn sample_grid() -> (GridSpec, InterpolationGrid) {
        let spec = GridSpec::new(BoundingBox::new(14.0, 49.0, 15.0, 50.0), 2, 3);
        let mut t = Array2::from_elem((2, 3), 12.5);
        t[(0, 0)] = f64::NAN;
        let grid = InterpolationGrid::from_spec(&spec, t).unwrap();
        (spec, grid)
    }

    fn sample_result(cycle_id: CycleId, reference: &str) -> CycleResult {
        CycleResult {
            cycle_id,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            device_ids_used: BTreeSet::from(["a".into(), "b".into()]),
            min_temp: 12.5,
            max_temp: 12.5,
            grid_reference: reference.to_string(),
        }
    }

    #[test]
    fn test_artifact_name() {
        let id: CycleId = "67e55044-10b1-426f-9247-bb680e5fe0c8".parse().unwrap();
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 9, 5, 0).unwrap();
        assert_eq!(
            artifact_name(id, t),
            "2024-05-01_0905_67e55044-10b1-426f-9247-bb680e5fe0c8.json"
        );
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemorySink::new();
        let (_, grid) = sample_grid();
        let id = CycleId::new();
        let reference = sink.store_artifact(id, Utc::now(), &grid).unwrap();
        assert!(reference.starts_with("memory://"));
        assert_eq!(sink.artifact_count(), 1);

        sink.persist(&sample_result(id, &reference)).unwrap();
        assert_eq!(sink.latest_persisted().unwrap().unwrap().cycle_id, id);
    }

    #[test]
    fn test_memory_sink_load_artifact() {
        let sink = MemorySink::new();
        let (_, grid) = sample_grid();
        let reference = sink.store_artifact(CycleId::new(), Utc::now(), &grid).unwrap();

        let loaded = sink.load_artifact(&reference).unwrap();
        assert_eq!(loaded.shape(), (2, 3));
        assert_eq!(loaded.temperature[(1, 2)], 12.5);
        assert!(matches!(
            sink.load_artifact("memory://none.json"),
            Err(SinkError::NotFound(_))
        ));
    }

    #[test]
    fn test_file_sink_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (spec, grid) = sample_grid();
        let sink = FileSink::new(temp_dir.path())
            .unwrap()
            .with_grid_parameters(spec, 3600);

        let id = CycleId::new();
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let reference = sink.store_artifact(id, t, &grid).unwrap();
        assert!(temp_dir.path().join(&reference).exists());

        let loaded = sink.load_artifact(&reference).unwrap();
        assert_eq!(loaded.shape(), (2, 3));
        assert!(loaded.temperature[(0, 0)].is_nan());
        assert_eq!(loaded.temperature[(1, 2)], 12.5);
        assert_eq!(loaded.x_coords, grid.x_coords);

        let params = sink.load_grid_parameters().unwrap().unwrap();
        assert_eq!(params.grid, spec);
        assert_eq!(params.interval_secs, 3600);
    }

    #[test]
    fn test_file_sink_latest() {
        let temp_dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(temp_dir.path()).unwrap();
        assert!(sink.latest_persisted().unwrap().is_none());

        let first = sample_result(CycleId::new(), "artifacts/a.json");
        let second = sample_result(CycleId::new(), "artifacts/b.json");
        sink.persist(&first).unwrap();
        sink.persist(&second).unwrap();

        assert_eq!(sink.latest_persisted().unwrap().unwrap(), second);
        let history = temp_dir
            .path()
            .join("results")
            .join(format!("{}.json", first.cycle_id));
        assert!(history.exists());
        assert!(!temp_dir.path().join("latest.json.tmp").exists());
    }

    #[test]
    fn test_missing_artifact() {
        let temp_dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(temp_dir.path()).unwrap();
        assert!(matches!(
            sink.load_artifact("artifacts/none.json"),
            Err(SinkError::NotFound(_))
        ));
    }
}
