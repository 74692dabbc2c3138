// crates/cml_workflow/src/publication.rs

//! 结果发布
//!
//! 保存最近一次成功周期的结果与网格。读取方（HTTP 层）只会看到完整的
//! 旧结果或完整的新结果，指针替换在持久化成功之后进行。

use crate::cycle::CycleResult;
use cml_terrain::interpolation::InterpolationGrid;
use parking_lot::RwLock;
use std::sync::Arc;

/// 已发布的周期
#[derive(Debug, Clone)]
pub struct PublishedCycle {
    /// 周期结果
    pub result: CycleResult,
    /// 插值网格
    pub grid: Arc<InterpolationGrid>,
}

/// 发布点
#[derive(Debug, Default)]
pub struct Publication {
    current: RwLock<Option<Arc<PublishedCycle>>>,
}

impl Publication {
    /// 创建空发布点
    pub fn new() -> Self {
        Self::default()
    }

    /// 最近一次成功周期的结果，首个周期成功之前为 `None`
    pub fn latest(&self) -> Option<CycleResult> {
        self.current.read().as_ref().map(|p| p.result.clone())
    }

    /// 最近一次成功周期（结果与网格）
    pub fn latest_cycle(&self) -> Option<Arc<PublishedCycle>> {
        self.current.read().clone()
    }

    /// 是否已有发布
    pub fn is_empty(&self) -> bool {
        self.current.read().is_none()
    }

    /// 原子替换，返回被替换的周期
    pub(crate) fn publish(
        &self,
        result: CycleResult,
        grid: Arc<InterpolationGrid>,
    ) -> Option<Arc<PublishedCycle>> {
        let next = Arc::new(PublishedCycle { result, grid });
        self.current.write().replace(next)
    }
}
