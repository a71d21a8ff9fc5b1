//! 病灶与解剖图谱的重叠分类.

use itertools::Itertools;
use std::collections::BTreeMap;

use super::LesionInstance;
use crate::data::AtlasVolume;
use crate::region::RegionAssignment;
use crate::RegionCode;

/// 单个病灶与图谱各区域的重叠情况.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionOverlap {
    /// 全部重叠计数 (含背景), 按计数降序, 计数相同按编码升序.
    histogram: Vec<(RegionCode, usize)>,
    background: RegionCode,
    assigned: RegionAssignment,
    assigned_count: usize,
    /// 与非背景区域重叠的体素总数.
    labelled: usize,
}

impl RegionOverlap {
    /// 归属区域.
    #[inline]
    pub fn assigned(&self) -> RegionAssignment {
        self.assigned
    }

    /// 完整重叠直方图 (含背景).
    #[inline]
    pub fn histogram(&self) -> &[(RegionCode, usize)] {
        &self.histogram
    }

    /// 与非背景区域重叠的体素总数.
    #[inline]
    pub fn labelled_voxels(&self) -> usize {
        self.labelled
    }

    /// 归属区域在全部已标注重叠体素中所占比例, `[0, 1]`. 无法归类时为 0.
    pub fn assigned_fraction(&self) -> f64 {
        if self.labelled == 0 {
            0.0
        } else {
            self.assigned_count as f64 / self.labelled as f64
        }
    }

    /// 前 `n` 个非背景区域及其在已标注重叠体素中的百分比.
    pub fn dominant(&self, n: usize) -> Vec<(RegionCode, f64)> {
        let total = self.labelled.max(1) as f64;
        self.histogram
            .iter()
            .filter(|(code, _)| *code != self.background)
            .take(n)
            .map(|&(code, cnt)| (code, cnt as f64 * 100.0 / total))
            .collect()
    }

    /// 病灶是否跨越了多个已标注区域?
    #[inline]
    pub fn is_straddling(&self) -> bool {
        self.histogram
            .iter()
            .filter(|(code, _)| *code != self.background)
            .count()
            > 1
    }

    /// 直方图的文本形式: `code:count` 以 `|` 连接.
    pub fn histogram_text(&self) -> String {
        self.histogram
            .iter()
            .map(|(code, cnt)| format!("{code}:{cnt}"))
            .join("|")
    }
}

/// 计算 `lesion` 与 `atlas` 各区域的重叠, 并决定归属区域.
///
/// 1. 编码为 `background` 的区域不参与竞争;
/// 2. 重叠体素最多的区域胜出, 计数相同时编码较小者胜出;
/// 3. 完全落在背景中的病灶归为 [`RegionAssignment::Unclassified`].
///
/// 调用方保证 `lesion` 来自与 `atlas` 几何一致的 mask.
pub fn classify(lesion: &LesionInstance, atlas: &AtlasVolume, background: RegionCode) -> RegionOverlap {
    let mut counts: BTreeMap<RegionCode, usize> = BTreeMap::new();
    for &pos in lesion.voxels() {
        *counts.entry(atlas[pos]).or_insert(0) += 1;
    }

    // BTreeMap 按编码升序迭代, 严格大于才替换, 因此平局时保留编码较小者.
    let mut best: Option<(RegionCode, usize)> = None;
    let mut labelled = 0usize;
    for (&code, &cnt) in counts.iter().filter(|(c, _)| **c != background) {
        labelled += cnt;
        if best.map_or(true, |(_, b)| cnt > b) {
            best = Some((code, cnt));
        }
    }
    let (assigned, assigned_count) = match best {
        Some((code, cnt)) => (RegionAssignment::Region(code), cnt),
        None => (RegionAssignment::Unclassified, 0),
    };

    let histogram = counts
        .into_iter()
        .sorted_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)))
        .collect();

    RegionOverlap {
        histogram,
        background,
        assigned,
        assigned_count,
        labelled,
    }
}

#[cfg(test)]
mod tests {
    use super::classify;
    use crate::lesion::LesionInstance;
    use crate::region::RegionAssignment;
    use crate::{AtlasVolume, Geometry, RegionCode};
    use ndarray::Array3;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-8
    }

    /// 1 x 1 x 10 的图谱, 病灶覆盖整行.
    fn row(codes: [RegionCode; 10]) -> (LesionInstance, AtlasVolume) {
        let data = Array3::from_shape_vec((1, 1, 10), codes.to_vec()).unwrap();
        let atlas = AtlasVolume::from_array(data, Geometry::isotropic((1, 1, 10), 1.0)).unwrap();
        let lesion = LesionInstance::new(1, (0..10).map(|w| (0, 0, w)).collect());
        (lesion, atlas)
    }

    #[test]
    fn test_fully_contained() {
        let (l, a) = row([4; 10]);
        let o = classify(&l, &a, 0);
        assert_eq!(o.assigned(), RegionAssignment::Region(4));
        assert!(f64_eq(o.assigned_fraction(), 1.0));
        assert!(!o.is_straddling());
        assert_eq!(o.histogram_text(), "4:10");
    }

    #[test]
    fn test_majority_wins() {
        let (l, a) = row([2, 2, 2, 2, 9, 9, 9, 9, 9, 9]);
        let o = classify(&l, &a, 0);
        assert_eq!(o.assigned(), RegionAssignment::Region(9));
        assert!(f64_eq(o.assigned_fraction(), 0.6));
        assert!(o.is_straddling());
        let d = o.dominant(3);
        assert_eq!(d.len(), 2);
        assert_eq!(d[0].0, 9);
        assert!(f64_eq(d[0].1, 60.0));
        assert_eq!(d[1].0, 2);
        assert!(f64_eq(d[1].1, 40.0));
    }

    #[test]
    fn test_tie_lower_code_wins() {
        let (l, a) = row([7, 7, 7, 7, 7, 3, 3, 3, 3, 3]);
        let o = classify(&l, &a, 0);
        assert_eq!(o.assigned(), RegionAssignment::Region(3));
        assert!(f64_eq(o.assigned_fraction(), 0.5));
        assert_eq!(o.histogram_text(), "3:5|7:5");
    }

    #[test]
    fn test_background_excluded() {
        let (l, a) = row([0, 0, 0, 0, 0, 0, 0, 5, 5, 5]);
        let o = classify(&l, &a, 0);
        assert_eq!(o.assigned(), RegionAssignment::Region(5));
        assert!(f64_eq(o.assigned_fraction(), 1.0));
        assert_eq!(o.labelled_voxels(), 3);
        assert_eq!(o.histogram()[0], (0, 7));
        assert_eq!(o.dominant(3), vec![(5, 100.0)]);
    }

    #[test]
    fn test_background_only_is_unclassified() {
        let (l, a) = row([0; 10]);
        let o = classify(&l, &a, 0);
        assert_eq!(o.assigned(), RegionAssignment::Unclassified);
        assert!(f64_eq(o.assigned_fraction(), 0.0));
        assert!(o.dominant(3).is_empty());
    }

    #[test]
    fn test_custom_background_code() {
        // 0 在这里是普通区域, 255 才是背景.
        let (l, a) = row([255, 255, 255, 255, 255, 255, 0, 0, 0, 0]);
        let o = classify(&l, &a, 255);
        assert_eq!(o.assigned(), RegionAssignment::Region(0));
        assert!(f64_eq(o.assigned_fraction(), 1.0));
    }
}
