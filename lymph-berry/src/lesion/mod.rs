//! 病灶实例: 提取, 区域分类, 定量指标.
//!
//! 三个阶段依次产生 [`LesionInstance`], [`RegionOverlap`], [`LesionMetrics`],
//! 最后组合为只读的 [`LesionRecord`]. 每一阶段都只读取上一阶段的结果与原始体数据.

use serde::Serialize;

use crate::region::RegionAssignment;
use crate::Idx3d;

mod classify;
mod extract;
mod metrics;

pub use classify::{classify, RegionOverlap};
pub use extract::{extract, Connectivity, Extraction};
pub use metrics::{measure, percentile, IntensityStats, LesionMetrics};

/// 病灶编号. 在单个受试者内唯一, 从 1 开始.
pub type LesionId = u32;

/// 轴对齐包围盒, `min` 与 `max` 均为闭区间端点.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BoundingBox {
    /// `(z, h, w)` 最小索引.
    pub min: Idx3d,
    /// `(z, h, w)` 最大索引.
    pub max: Idx3d,
}

impl BoundingBox {
    /// 只包含一个体素的包围盒.
    #[inline]
    fn point(p: Idx3d) -> Self {
        Self { min: p, max: p }
    }

    /// 扩展以包含 `p`.
    #[inline]
    fn grow(&mut self, (z, h, w): Idx3d) {
        self.min = (self.min.0.min(z), self.min.1.min(h), self.min.2.min(w));
        self.max = (self.max.0.max(z), self.max.1.max(h), self.max.2.max(w));
    }

    /// 各方向体素跨度 `(z, h, w)`.
    #[inline]
    pub fn extent(&self) -> Idx3d {
        (
            self.max.0 - self.min.0 + 1,
            self.max.1 - self.min.1 + 1,
            self.max.2 - self.min.2 + 1,
        )
    }
}

/// 病灶 mask 的一个连通域.
#[derive(Debug, Clone, PartialEq)]
pub struct LesionInstance {
    id: LesionId,
    /// 行优先升序.
    voxels: Vec<Idx3d>,
    bbox: BoundingBox,
}

impl LesionInstance {
    /// 由编号和体素集合创建. `voxels` 必须非空.
    pub(crate) fn new(id: LesionId, mut voxels: Vec<Idx3d>) -> Self {
        debug_assert!(!voxels.is_empty());
        voxels.sort_unstable();
        let mut bbox = BoundingBox::point(voxels[0]);
        voxels.iter().skip(1).for_each(|p| bbox.grow(*p));
        Self { id, voxels, bbox }
    }

    /// 病灶编号.
    #[inline]
    pub fn id(&self) -> LesionId {
        self.id
    }

    /// 病灶体素索引, 行优先升序.
    #[inline]
    pub fn voxels(&self) -> &[Idx3d] {
        &self.voxels
    }

    /// 体素个数.
    #[inline]
    pub fn voxel_count(&self) -> usize {
        self.voxels.len()
    }

    /// 包围盒.
    #[inline]
    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// 行优先扫描时遇到的第一个体素.
    #[inline]
    pub fn first_voxel(&self) -> Idx3d {
        self.voxels[0]
    }
}

/// 分类和度量完成后的病灶记录. 创建后只读.
#[derive(Debug, Clone)]
pub struct LesionRecord {
    instance: LesionInstance,
    overlap: RegionOverlap,
    metrics: LesionMetrics,
}

impl LesionRecord {
    /// 组合三个阶段的结果.
    #[inline]
    pub fn new(instance: LesionInstance, overlap: RegionOverlap, metrics: LesionMetrics) -> Self {
        debug_assert_eq!(instance.voxel_count(), metrics.voxel_count);
        Self {
            instance,
            overlap,
            metrics,
        }
    }

    /// 病灶编号.
    #[inline]
    pub fn id(&self) -> LesionId {
        self.instance.id()
    }

    /// 连通域本身.
    #[inline]
    pub fn instance(&self) -> &LesionInstance {
        &self.instance
    }

    /// 区域重叠信息.
    #[inline]
    pub fn overlap(&self) -> &RegionOverlap {
        &self.overlap
    }

    /// 定量指标.
    #[inline]
    pub fn metrics(&self) -> &LesionMetrics {
        &self.metrics
    }

    /// 归属区域.
    #[inline]
    pub fn region(&self) -> RegionAssignment {
        self.overlap.assigned()
    }

    /// 物理体积, 立方毫米.
    #[inline]
    pub fn volume_mm3(&self) -> f64 {
        self.metrics.volume_mm3
    }
}
