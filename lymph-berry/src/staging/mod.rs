//! 受试者级汇总与分期.

use binary_heap_plus::BinaryHeap;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::AnalysisConfig;
use crate::lesion::{LesionId, LesionRecord};
use crate::region::{RegionAssignment, RegionCatalog};
use crate::RegionCode;

mod table;

pub use table::{StageRule, StageTable};

/// 区域编码与名称.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionRef {
    /// 区域编码.
    pub code: RegionCode,
    /// 区域名称.
    pub name: String,
}

/// 单个区域 (或 `unclassified`) 下的病灶个数与体积.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionTally {
    /// 区域归属. JSON 中写为整数, 无法归类为 `-1`.
    pub region: RegionAssignment,
    /// 区域名称.
    pub name: String,
    /// 病灶个数.
    pub lesion_count: usize,
    /// 病灶总体积, 毫升.
    pub volume_ml: f64,
}

/// 受试者汇总, 即 `<subject>_summary.json` 的内容.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectSummary {
    /// 受试者编号.
    pub subject_id: String,
    /// 病灶个数.
    pub lesion_count: usize,
    /// 病灶总体积, 毫升.
    pub total_volume_ml: f64,
    /// 受累区域 (不含 `unclassified`), 按编码升序.
    pub involved_regions: Vec<RegionRef>,
    /// 受累分区, 按名称升序.
    pub involved_compartments: Vec<String>,
    /// 按区域分组的病灶个数与体积. 区域按编码升序, `unclassified` 在最后.
    pub by_region: Vec<RegionTally>,
    /// 无法归类的病灶个数.
    pub unclassified_count: usize,
    /// 分期标签.
    pub stage: String,
    /// 体积最大的前 N 个病灶编号, 从大到小.
    pub top_n: Vec<LesionId>,
    /// 强度统计使用的分位.
    pub percentile: f64,
    /// 是否计算了强度统计?
    pub has_intensity: bool,
    /// 分析时间.
    #[serde(serialize_with = "rfc3339")]
    pub generated_at: DateTime<Utc>,
}

fn rfc3339<S: serde::Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// 单个受试者的完整分析结果. 创建后只读.
#[derive(Debug, Clone)]
pub struct SubjectReport {
    lesions: Vec<LesionRecord>,
    summary: SubjectSummary,
}

impl SubjectReport {
    /// 受试者编号.
    #[inline]
    pub fn subject_id(&self) -> &str {
        &self.summary.subject_id
    }

    /// 全部病灶记录, 按编号升序.
    #[inline]
    pub fn lesions(&self) -> &[LesionRecord] {
        &self.lesions
    }

    /// 汇总信息.
    #[inline]
    pub fn summary(&self) -> &SubjectSummary {
        &self.summary
    }

    /// 分期标签.
    #[inline]
    pub fn stage(&self) -> &str {
        &self.summary.stage
    }

    /// 编号为 `id` 的病灶记录.
    pub fn lesion(&self, id: LesionId) -> Option<&LesionRecord> {
        // 编号从 1 开始连续分配.
        self.lesions
            .get((id as usize).wrapping_sub(1))
            .filter(|r| r.id() == id)
    }

    /// 病灶是否在前 N 个之中?
    #[inline]
    pub fn is_top(&self, id: LesionId) -> bool {
        self.summary.top_n.contains(&id)
    }

    /// 前 N 个病灶记录, 从大到小.
    pub fn top_lesions(&self) -> impl Iterator<Item = &LesionRecord> + '_ {
        self.summary.top_n.iter().filter_map(|&id| self.lesion(id))
    }
}

/// 体积大者优先, 体积相同时编号小者优先. 返回 `Greater` 表示 `a` 排名更靠前.
fn rank(a: &LesionRecord, b: &LesionRecord) -> Ordering {
    a.volume_mm3()
        .total_cmp(&b.volume_mm3())
        .then_with(|| b.id().cmp(&a.id()))
}

/// 选出排名最靠前的 `n` 个病灶, 按排名返回编号.
pub fn top_n(lesions: &[LesionRecord], n: usize) -> Vec<LesionId> {
    if n == 0 {
        return vec![];
    }
    // 堆顶是当前候选中排名最靠后的那个.
    let mut heap = BinaryHeap::new_by(|a: &&LesionRecord, b: &&LesionRecord| rank(b, a));
    for r in lesions {
        heap.push(r);
        if heap.len() > n {
            heap.pop();
        }
    }
    let mut top = heap.into_vec();
    top.sort_by(|a, b| rank(b, a));
    top.into_iter().map(LesionRecord::id).collect()
}

/// 汇总一个受试者的全部病灶记录, 并按 `config.stage_table` 给出分期.
///
/// `lesions` 会按编号排序. 没有病灶时得到 `none_label` 分期和全 0 汇总, 不是错误.
pub fn aggregate(
    subject_id: &str,
    mut lesions: Vec<LesionRecord>,
    config: &AnalysisConfig,
    has_intensity: bool,
    generated_at: DateTime<Utc>,
) -> SubjectReport {
    lesions.sort_by_key(LesionRecord::id);
    let catalog: &RegionCatalog = config.catalog();
    let table = &config.stage_table;

    let mut groups: BTreeMap<RegionAssignment, (usize, f64)> = BTreeMap::new();
    for r in lesions.iter() {
        let g = groups.entry(r.region()).or_insert((0, 0.0));
        g.0 += 1;
        g.1 += r.metrics().volume_ml();
    }
    let total_volume_ml: f64 = lesions.iter().map(|r| r.metrics().volume_ml()).sum();

    let involved: BTreeSet<RegionCode> = groups.keys().filter_map(|g| g.code()).collect();
    let compartments = table.involved_compartments(&involved);
    let stage = table.stage(lesions.len(), &compartments).to_string();

    let unclassified_count = groups
        .get(&RegionAssignment::Unclassified)
        .map_or(0, |g| g.0);
    let by_region = groups
        .into_iter()
        .map(|(region, (lesion_count, volume_ml))| RegionTally {
            region,
            name: catalog.name_of(region).to_string(),
            lesion_count,
            volume_ml,
        })
        .collect();

    let summary = SubjectSummary {
        subject_id: subject_id.to_string(),
        lesion_count: lesions.len(),
        total_volume_ml,
        involved_regions: involved
            .iter()
            .map(|&code| RegionRef {
                code,
                name: catalog.name(code).to_string(),
            })
            .collect(),
        involved_compartments: compartments.into_iter().collect(),
        by_region,
        unclassified_count,
        stage,
        top_n: top_n(&lesions, config.top_n),
        percentile: config.percentile,
        has_intensity,
        generated_at,
    };
    SubjectReport { lesions, summary }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{aggregate, top_n};
    use crate::config::AnalysisConfig;
    use crate::lesion::{classify, measure, LesionInstance, LesionRecord};
    use crate::region::RegionAssignment;
    use crate::{AtlasVolume, Geometry};
    use chrono::{TimeZone, Utc};
    use ndarray::Array3;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-8
    }

    /// 在 1 x 1 x 64 的一行上构造病灶: 每项为 `(起点, 长度)`. 图谱按 `codes` 给出.
    pub(crate) fn records(spans: &[(usize, usize)], codes: &[u16]) -> Vec<LesionRecord> {
        let g = Geometry::with_spacing((1, 1, 64), [2.0, 1.0, 1.0]);
        let mut data = Array3::zeros((1, 1, 64));
        for (w, &c) in codes.iter().enumerate() {
            data[(0, 0, w)] = c;
        }
        let atlas = AtlasVolume::from_array(data, g.clone()).unwrap();
        spans
            .iter()
            .enumerate()
            .map(|(i, &(start, len))| {
                let inst = LesionInstance::new(i as u32 + 1, (start..start + len).map(|w| (0, 0, w)).collect());
                let overlap = classify(&inst, &atlas, 0);
                let metrics = measure(&inst, &g, None, 0.95);
                LesionRecord::new(inst, overlap, metrics)
            })
            .collect()
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_empty_subject() {
        let r = aggregate("S0", vec![], &AnalysisConfig::default(), false, now());
        let s = r.summary();
        assert_eq!(s.lesion_count, 0);
        assert_eq!(s.total_volume_ml, 0.0);
        assert!(s.involved_regions.is_empty());
        assert!(s.by_region.is_empty());
        assert!(s.top_n.is_empty());
        assert_eq!(r.stage(), "no disease detected");
    }

    #[test]
    fn test_breakdown_and_stage() {
        // 病灶 1, 2 在区域 5; 病灶 3 在区域 13; 病灶 4 在背景.
        let mut codes = vec![0u16; 64];
        codes[0..10].iter_mut().for_each(|c| *c = 5);
        codes[20..30].iter_mut().for_each(|c| *c = 13);
        let recs = records(&[(0, 3), (5, 2), (20, 4), (40, 1)], &codes);

        let r = aggregate("S1", recs, &AnalysisConfig::default(), false, now());
        let s = r.summary();
        assert_eq!(s.lesion_count, 4);
        // 每个体素 2 mm^3.
        assert!(f64_eq(s.total_volume_ml, 0.02));
        assert_eq!(
            s.involved_regions.iter().map(|x| x.code).collect::<Vec<_>>(),
            [5, 13]
        );
        assert_eq!(s.involved_regions[0].name, "liver");
        assert_eq!(s.unclassified_count, 1);
        assert_eq!(r.stage(), "multi-region");

        let regions: Vec<_> = s.by_region.iter().map(|t| t.region).collect();
        assert_eq!(
            regions,
            [
                RegionAssignment::Region(5),
                RegionAssignment::Region(13),
                RegionAssignment::Unclassified
            ]
        );
        assert_eq!(s.by_region[0].lesion_count, 2);
        assert_eq!(s.by_region[2].name, "unclassified");
        let sum: f64 = s.by_region.iter().map(|t| t.volume_ml).sum();
        assert!(f64_eq(sum, s.total_volume_ml));
    }

    #[test]
    fn test_unclassified_only_uses_fallback() {
        let recs = records(&[(0, 2)], &[0; 64]);
        let r = aggregate("S2", recs, &AnalysisConfig::default(), false, now());
        assert_eq!(r.stage(), "indeterminate");
        assert!(r.summary().involved_regions.is_empty());
        assert_eq!(r.summary().lesion_count, 1);
    }

    #[test]
    fn test_top_n_ties_by_id() {
        let recs = records(&[(0, 2), (4, 5), (12, 2), (20, 5), (30, 1)], &[3; 64]);
        assert_eq!(top_n(&recs, 3), [2, 4, 1]);
        assert_eq!(top_n(&recs, 10), [2, 4, 1, 3, 5]);
        assert!(top_n(&recs, 0).is_empty());

        let mut c = AnalysisConfig::default();
        c.top_n = 2;
        let r = aggregate("S3", recs, &c, false, now());
        assert_eq!(r.summary().top_n, [2, 4]);
        assert!(r.is_top(4));
        assert!(!r.is_top(1));
        assert_eq!(r.top_lesions().map(|l| l.id()).collect::<Vec<_>>(), [2, 4]);
        assert_eq!(r.stage(), "single-region");
    }

    #[test]
    fn test_summary_json() {
        let recs = records(&[(0, 1)], &[0; 64]);
        let r = aggregate("S4", recs, &AnalysisConfig::default(), false, now());
        let v = serde_json::to_value(r.summary()).unwrap();
        assert_eq!(v["generated_at"], "2024-05-01T08:30:00Z");
        assert_eq!(v["by_region"][0]["region"], -1);
        assert_eq!(v["top_n"][0], 1);
    }
}
