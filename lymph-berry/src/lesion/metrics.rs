//! 病灶定量指标: 体积, 质心, 强度统计.

use ordered_float::OrderedFloat;
use serde::Serialize;

use super::LesionInstance;
use crate::data::{Geometry, IntensityVolume};

/// 病灶强度统计 (如 SUV).
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct IntensityStats {
    /// 最小值.
    pub min: f64,
    /// 平均值.
    pub mean: f64,
    /// 最大值.
    pub max: f64,
    /// 百分位数取值.
    pub percentile: f64,
    /// 使用的百分位, `[0, 1]`.
    pub fraction: f64,
}

/// 单个病灶的定量指标.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LesionMetrics {
    /// 体素个数.
    pub voxel_count: usize,
    /// 物理体积, 立方毫米.
    pub volume_mm3: f64,
    /// 质心的体素坐标 `(z, h, w)`.
    pub centroid_voxel: (f64, f64, f64),
    /// 质心的物理坐标 `[x, y, z]`, 毫米.
    pub centroid: [f64; 3],
    /// 强度统计. 没有强度数据时为 `None`, 不是 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intensity: Option<IntensityStats>,
}

impl LesionMetrics {
    /// 物理体积, 毫升.
    #[inline]
    pub fn volume_ml(&self) -> f64 {
        self.volume_mm3 / 1000.0
    }
}

/// 在已升序排列的 `sorted` 上计算 `q` 分位数 (`0 <= q <= 1`).
///
/// 使用相邻顺序统计量之间的线性插值: 秩为 `q * (n - 1)`.
/// 单个元素时任何分位数都等于该元素. 空序列返回 `None`.
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    debug_assert!((0.0..=1.0).contains(&q));
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let rank = q * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let t = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * t)
}

/// 计算病灶的体积, 质心, 以及 (如果给出 `intensity`) 强度统计.
///
/// 强度统计忽略非有限值 (NaN, inf); 若病灶内没有任何有限值则统计为 `None`.
pub fn measure(
    lesion: &LesionInstance,
    geometry: &Geometry,
    intensity: Option<&IntensityVolume>,
    fraction: f64,
) -> LesionMetrics {
    let voxel_count = lesion.voxel_count();
    let n = voxel_count as f64;

    let (mut sz, mut sh, mut sw) = (0.0, 0.0, 0.0);
    for &(z, h, w) in lesion.voxels() {
        sz += z as f64;
        sh += h as f64;
        sw += w as f64;
    }
    let centroid_voxel = (sz / n, sh / n, sw / n);

    LesionMetrics {
        voxel_count,
        volume_mm3: n * geometry.voxel_mm3(),
        centroid_voxel,
        centroid: geometry.to_world(centroid_voxel),
        intensity: intensity.and_then(|pet| intensity_stats(lesion, pet, fraction)),
    }
}

fn intensity_stats(
    lesion: &LesionInstance,
    pet: &IntensityVolume,
    fraction: f64,
) -> Option<IntensityStats> {
    let mut values: Vec<OrderedFloat<f64>> = lesion
        .voxels()
        .iter()
        .map(|&pos| pet[pos] as f64)
        .filter(|v| v.is_finite())
        .map(OrderedFloat)
        .collect();
    values.sort_unstable();
    let values: Vec<f64> = values.into_iter().map(|v| v.0).collect();

    let (&min, &max) = (values.first()?, values.last()?);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some(IntensityStats {
        min,
        mean,
        max,
        percentile: percentile(&values, fraction)?,
        fraction,
    })
}
