// crates/cml_terrain/src/raster.rs

//! 栅格数据管理
//!
//! 提供栅格高程数据的存储、仿射变换以及 ESRI ASCII Grid 读取。

use cml_foundation::error::{CmlError, CmlResult};
use std::path::Path;

/// 栅格数据（行优先，第 0 行为最北一行）
#[derive(Debug, Clone)]
pub struct RasterData {
    /// 数据
    pub data: Vec<f64>,
    /// 宽度
    pub width: usize,
    /// 高度
    pub height: usize,
    /// 无数据值
    pub nodata: f64,
}

impl RasterData {
    /// 从数据创建
    pub fn from_data(data: Vec<f64>, width: usize, height: usize, nodata: f64) -> CmlResult<Self> {
        if width == 0 || height == 0 {
            return Err(CmlError::invalid_input("栅格宽高必须大于0"));
        }
        CmlError::check_size("raster data", width * height, data.len())?;
        Ok(Self {
            data,
            width,
            height,
            nodata,
        })
    }

    /// 获取像素值
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        if x < self.width && y < self.height {
            Some(self.data[y * self.width + x])
        } else {
            None
        }
    }

    /// 获取有效像素值（无数据返回 None）
    #[inline]
    pub fn valid(&self, x: usize, y: usize) -> Option<f64> {
        self.get(x, y).filter(|v| !self.is_nodata(*v))
    }

    /// 判断是否为无数据
    #[inline]
    pub fn is_nodata(&self, value: f64) -> bool {
        value.is_nan() || (self.nodata.is_finite() && (value - self.nodata).abs() < 1e-10)
    }
}

/// 仿射变换（栅格坐标 ↔ 地理坐标）
///
/// 原点为左上角像素的中心，因此整数像素坐标对应像素中心。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// 左上像素中心 x 坐标
    pub origin_x: f64,
    /// 左上像素中心 y 坐标
    pub origin_y: f64,
    /// 像素宽度（x 方向分辨率）
    pub pixel_width: f64,
    /// 像素高度（y 方向分辨率，北朝上时为负）
    pub pixel_height: f64,
}

impl GeoTransform {
    /// 创建仿射变换（无旋转）
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
        }
    }

    /// 地理坐标转栅格坐标
    #[inline]
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let px = (x - self.origin_x) / self.pixel_width;
        let py = (y - self.origin_y) / self.pixel_height;
        (px, py)
    }

    /// 栅格坐标转地理坐标
    #[inline]
    pub fn pixel_to_geo(&self, px: f64, py: f64) -> (f64, f64) {
        let x = self.origin_x + px * self.pixel_width;
        let y = self.origin_y + py * self.pixel_height;
        (x, y)
    }
}

// ============================================================================
// ESRI ASCII Grid
// ============================================================================

/// 读取 ESRI ASCII Grid 文件
pub fn read_ascii_grid(path: impl AsRef<Path>) -> CmlResult<(RasterData, GeoTransform)> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(CmlError::file_not_found(path));
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| CmlError::io_with_source(format!("读取DEM失败: {}", path.display()), e))?;
    parse_ascii_grid(&text, path)
}

/// 解析 ESRI ASCII Grid 文本
///
/// 头部关键字不区分大小写，支持 `xllcorner`/`xllcenter` 两种原点写法，
/// `NODATA_value` 可省略（默认 -9999）。
pub fn parse_ascii_grid(text: &str, source: impl AsRef<Path>) -> CmlResult<(RasterData, GeoTransform)> {
    let source = source.as_ref();
    let mut ncols: Option<usize> = None;
    let mut nrows: Option<usize> = None;
    let mut xll: Option<(f64, bool)> = None;
    let mut yll: Option<(f64, bool)> = None;
    let mut cellsize: Option<f64> = None;
    let mut nodata = -9999.0;

    let mut lines = text.lines().enumerate().peekable();
    while let Some((idx, line)) = lines.peek().copied() {
        let mut parts = line.split_whitespace();
        let Some(key) = parts.next() else {
            lines.next();
            continue;
        };
        let key = key.to_ascii_lowercase();
        if !key.starts_with(|c: char| c.is_ascii_alphabetic()) {
            break;
        }
        let value = parts
            .next()
            .ok_or_else(|| CmlError::parse(source, idx + 1, format!("{key} 缺少取值")))?;
        let number: f64 = value
            .parse()
            .map_err(|_| CmlError::parse(source, idx + 1, format!("无法解析数值: {value}")))?;

        match key.as_str() {
            "ncols" => ncols = Some(number as usize),
            "nrows" => nrows = Some(number as usize),
            "xllcorner" => xll = Some((number, false)),
            "xllcenter" => xll = Some((number, true)),
            "yllcorner" => yll = Some((number, false)),
            "yllcenter" => yll = Some((number, true)),
            "cellsize" => cellsize = Some(number),
            "nodata_value" => nodata = number,
            other => {
                return Err(CmlError::parse(source, idx + 1, format!("未知的头部字段: {other}")));
            }
        }
        lines.next();
    }

    let ncols = ncols.ok_or_else(|| CmlError::parse(source, 0, "ncols 缺失"))?;
    let nrows = nrows.ok_or_else(|| CmlError::parse(source, 0, "nrows 缺失"))?;
    let (xll, x_center) = xll.ok_or_else(|| CmlError::parse(source, 0, "xllcorner 缺失"))?;
    let (yll, y_center) = yll.ok_or_else(|| CmlError::parse(source, 0, "yllcorner 缺失"))?;
    let cellsize = cellsize.ok_or_else(|| CmlError::parse(source, 0, "cellsize 缺失"))?;
    if !(cellsize > 0.0) {
        return Err(CmlError::parse(source, 0, format!("cellsize 必须为正: {cellsize}")));
    }

    let mut data = Vec::with_capacity(ncols * nrows);
    for (idx, line) in lines {
        for token in line.split_whitespace() {
            let v: f64 = token
                .parse()
                .map_err(|_| CmlError::parse(source, idx + 1, format!("无法解析数值: {token}")))?;
            data.push(v);
        }
    }

    let half = cellsize / 2.0;
    let origin_x = if x_center { xll } else { xll + half };
    let bottom_center = if y_center { yll } else { yll + half };
    let origin_y = bottom_center + (nrows.saturating_sub(1)) as f64 * cellsize;

    let raster = RasterData::from_data(data, ncols, nrows, nodata)?;
    Ok((raster, GeoTransform::new(origin_x, origin_y, cellsize, -cellsize)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "ncols 3
nrows 2
xllcorner 12.0
yllcorner 48.0
cellsize 1.0
NODATA_value -9999
100 200 300
400 -9999 600
";

    #[test]
    fn test_geo_transform() {
        let transform = GeoTransform::new(0.0, 100.0, 10.0, -10.0);

        let (px, py) = transform.geo_to_pixel(10.0, 90.0);
        assert!((px - 1.0).abs() < 1e-10);
        assert!((py - 1.0).abs() < 1e-10);

        let (x, y) = transform.pixel_to_geo(px, py);
        assert!((x - 10.0).abs() < 1e-10);
        assert!((y - 90.0).abs() < 1e-10);
    }

    #[test]
    fn test_raster_size_mismatch() {
        assert!(RasterData::from_data(vec![1.0; 5], 2, 3, -9999.0).is_err());
        assert!(RasterData::from_data(vec![], 0, 0, -9999.0).is_err());
    }

    #[test]
    fn test_parse_ascii_grid() {
        let (raster, transform) = parse_ascii_grid(SAMPLE, "sample.asc").unwrap();
        assert_eq!(raster.width, 3);
        assert_eq!(raster.height, 2);
        assert_eq!(raster.get(2, 0), Some(300.0));
        assert_eq!(raster.valid(1, 1), None);

        // 左上像素中心 (12.5, 49.5)
        assert!((transform.origin_x - 12.5).abs() < 1e-10);
        assert!((transform.origin_y - 49.5).abs() < 1e-10);
        assert!((transform.pixel_height + 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_parse_ascii_grid_center_origin() {
        let text = "NCOLS 2\nNROWS 2\nXLLCENTER 0\nYLLCENTER 0\nCELLSIZE 0.5\n1 2\n3 4\n";
        let (raster, transform) = parse_ascii_grid(text, "center.asc").unwrap();
        assert!((transform.origin_x - 0.0).abs() < 1e-10);
        assert!((transform.origin_y - 0.5).abs() < 1e-10);
        assert!((raster.nodata + 9999.0).abs() < 1e-10);
    }

    #[test]
    fn test_parse_ascii_grid_truncated() {
        let text = "ncols 3\nnrows 2\nxllcorner 0\nyllcorner 0\ncellsize 1\n1 2 3\n";
        assert!(parse_ascii_grid(text, "short.asc").is_err());
    }

    #[test]
    fn test_parse_ascii_grid_missing_header() {
        let text = "ncols 1\nnrows 1\nxllcorner 0\ncellsize 1\n5\n";
        let err = parse_ascii_grid(text, "nohdr.asc").unwrap_err();
        assert!(err.to_string().contains("yllcorner"));
    }

    #[test]
    fn test_read_ascii_grid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dem.asc");
        std::fs::write(&path, SAMPLE).unwrap();
        let (raster, _) = read_ascii_grid(&path).unwrap();
        assert_eq!(raster.data.len(), 6);

        assert!(read_ascii_grid(dir.path().join("missing.asc")).is_err());
    }
}
