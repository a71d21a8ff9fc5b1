//! 单个受试者的分析流水线与批处理.
//!
//! 流水线: 加载/校验 -> 连通域提取 -> 区域分类 -> 定量指标 -> 汇总分期 -> 输出.
//! 受试者之间没有共享状态; 批处理时单个受试者失败只会被记录, 不影响其他受试者.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::btree_map::{BTreeMap, Entry};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::AnalysisConfig;
use crate::consts::{DOMINANCE_WARN_PCT, DOMINANT_ENTRIES};
use crate::data::{save::save_instance_map, SubjectVolumes, VolumeAttr};
use crate::dataset::SubjectPaths;
use crate::error::{StageError, StageResult};
use crate::lesion::{classify, extract, measure, LesionInstance, LesionRecord};
use crate::report::{instance_map_path, save_report};
use crate::staging::{aggregate, SubjectReport};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{
            IndexedParallelIterator, IntoParallelIterator, IntoParallelRefIterator, ParallelIterator,
        };
    }
}

/// 分类并度量单个病灶.
fn assess(
    subject_id: &str,
    lesion: LesionInstance,
    volumes: &SubjectVolumes,
    config: &AnalysisConfig,
) -> LesionRecord {
    let overlap = classify(&lesion, volumes.atlas(), config.background);
    if overlap.assigned().is_unclassified() {
        log::warn!(
            "subject {subject_id}: lesion #{} ({} voxel(s)) does not overlap any labelled region",
            lesion.id(),
            lesion.voxel_count()
        );
    } else if let Some(&(code, pct)) = overlap.dominant(DOMINANT_ENTRIES).first() {
        if pct < DOMINANCE_WARN_PCT {
            log::warn!(
                "subject {subject_id}: lesion #{} straddles regions, top region {code} covers only {pct:.1}%",
                lesion.id()
            );
        }
    }
    let metrics = measure(&lesion, volumes.geometry(), volumes.intensity(), config.percentile);
    LesionRecord::new(lesion, overlap, metrics)
}

/// 对已提取的病灶做分类, 度量和汇总.
///
/// 启用 `rayon` 特性时, 各病灶并行处理; 结果顺序与 `lesions` 一致.
pub fn assess_lesions(
    subject_id: &str,
    lesions: Vec<LesionInstance>,
    volumes: &SubjectVolumes,
    config: &AnalysisConfig,
    generated_at: DateTime<Utc>,
) -> SubjectReport {
    #[cfg(feature = "rayon")]
    let records: Vec<LesionRecord> = lesions
        .into_par_iter()
        .map(|l| assess(subject_id, l, volumes, config))
        .collect();
    #[cfg(not(feature = "rayon"))]
    let records: Vec<LesionRecord> = lesions
        .into_iter()
        .map(|l| assess(subject_id, l, volumes, config))
        .collect();

    aggregate(
        subject_id,
        records,
        config,
        volumes.intensity().is_some(),
        generated_at,
    )
}

/// 分析一个已加载的受试者. 不做任何文件输出.
///
/// 空 mask 得到 0 个病灶的报告, 不是错误.
pub fn analyze(
    subject_id: &str,
    volumes: &SubjectVolumes,
    config: &AnalysisConfig,
    generated_at: DateTime<Utc>,
) -> SubjectReport {
    let extraction = extract(volumes.mask(), config.connectivity, config.min_size);
    assess_lesions(subject_id, extraction.lesions, volumes, config, generated_at)
}

/// 输出选项.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputOptions {
    /// 输出目录.
    pub out_dir: PathBuf,
    /// 是否同时保存病灶实例图 (`<subject>_inst.nii.gz`).
    pub save_instances: bool,
}

impl OutputOptions {
    /// 只输出报告, 不保存实例图.
    pub fn new<P: AsRef<Path>>(out_dir: P) -> Self {
        Self {
            out_dir: out_dir.as_ref().to_owned(),
            save_instances: false,
        }
    }
}

/// 完整处理一个受试者: 加载, 分析, 写出 CSV/JSON (以及可选的实例图).
pub fn process_subject(
    paths: &SubjectPaths,
    config: &AnalysisConfig,
    output: &OutputOptions,
    generated_at: DateTime<Utc>,
) -> StageResult<SubjectReport> {
    let subject_id = paths.subject_id.as_str();
    log::info!("subject {subject_id}: analysing {}", paths.mask.display());

    let volumes = paths.open()?;
    let extraction = extract(volumes.mask(), config.connectivity, config.min_size);
    let instance_map = output.save_instances.then(|| extraction.instance_map());

    let report = assess_lesions(subject_id, extraction.lesions, &volumes, config, generated_at);
    save_report(&report, config, &output.out_dir)?;
    // 报告写成功后才写实例图, 失败的受试者不留下孤立的实例图.
    if let Some(map) = instance_map {
        let path = instance_map_path(&output.out_dir, subject_id);
        save_instance_map(&path, volumes.mask().header(), map.view())?;
    }
    log::info!(
        "subject {subject_id}: {} lesion(s), {:.3} ml, stage `{}`",
        report.summary().lesion_count,
        report.summary().total_volume_ml,
        report.stage()
    );
    Ok(report)
}

/// 单个受试者的批处理结果.
#[derive(Debug)]
pub struct SubjectOutcome {
    /// 受试者编号.
    pub subject_id: String,
    /// 报告或失败原因.
    pub result: StageResult<SubjectReport>,
}

/// 批处理结果, 按受试者输入顺序排列.
#[derive(Debug)]
pub struct BatchResult {
    outcomes: Vec<SubjectOutcome>,
}

#[derive(Serialize)]
struct OutcomeEntry<'a> {
    subject_id: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    lesion_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Serialize)]
struct BatchSummary<'a> {
    succeeded: usize,
    failed: usize,
    subjects: Vec<OutcomeEntry<'a>>,
}

impl BatchResult {
    /// 全部结果.
    #[inline]
    pub fn outcomes(&self) -> &[SubjectOutcome] {
        &self.outcomes
    }

    /// 成功的报告.
    pub fn reports(&self) -> impl Iterator<Item = &SubjectReport> + '_ {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    /// 失败的受试者及原因.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &StageError)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.subject_id.as_str(), e)))
    }

    /// 成功个数.
    #[inline]
    pub fn succeeded(&self) -> usize {
        self.reports().count()
    }

    /// 失败个数.
    #[inline]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// 受试者总数.
    #[inline]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// 是否没有任何受试者?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// 将各受试者状态写入 `<out_dir>/batch_summary.json`.
    pub fn save_summary<P: AsRef<Path>>(&self, out_dir: P) -> StageResult<PathBuf> {
        let subjects = self
            .outcomes
            .iter()
            .map(|o| match &o.result {
                Ok(r) => OutcomeEntry {
                    subject_id: &o.subject_id,
                    status: "ok",
                    lesion_count: Some(r.summary().lesion_count),
                    stage: Some(r.stage()),
                    error_kind: None,
                    reason: None,
                },
                Err(e) => OutcomeEntry {
                    subject_id: &o.subject_id,
                    status: "failed",
                    lesion_count: None,
                    stage: None,
                    error_kind: Some(e.kind()),
                    reason: Some(e.to_string()),
                },
            })
            .collect();
        let summary = BatchSummary {
            succeeded: self.succeeded(),
            failed: self.failed(),
            subjects,
        };

        let path = out_dir.as_ref().join("batch_summary.json");
        let text = serde_json::to_string_pretty(&summary).map_err(|e| StageError::Write {
            path: path.clone(),
            source: e.into(),
        })?;
        match fs::write(&path, text + "\n") {
            Ok(()) => Ok(path),
            Err(source) => Err(StageError::Write { path, source }),
        }
    }
}

/// 批处理选项.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// 输出选项.
    pub output: OutputOptions,
    /// 并行处理的受试者个数上限. 0 表示使用 `rayon` 的缺省值.
    pub workers: usize,
}

/// 对每个受试者给出同名受试者中最先出现者的 mask 路径 (自身即最先出现者时为 `None`).
fn earlier_duplicates(subjects: &[SubjectPaths]) -> Vec<Option<PathBuf>> {
    let mut first: BTreeMap<&str, &Path> = BTreeMap::new();
    subjects
        .iter()
        .map(|s| match first.entry(s.subject_id.as_str()) {
            Entry::Occupied(e) => Some(e.get().to_path_buf()),
            Entry::Vacant(e) => {
                e.insert(&s.mask);
                None
            }
        })
        .collect()
}

/// 处理一批受试者.
///
/// 配置在处理任何受试者之前校验, 不合法时直接返回 `Err`; 这是唯一的批处理级错误
/// (另外还有输出目录无法创建, 线程池无法创建). 之后单个受试者的失败只记录在结果中.
///
/// 输出文件按受试者编号命名. 编号重复时只处理第一个, 其余记为
/// [`StageError::DuplicateSubject`] 失败.
pub fn run_batch(
    subjects: &[SubjectPaths],
    config: &AnalysisConfig,
    options: &BatchOptions,
    generated_at: DateTime<Utc>,
) -> StageResult<BatchResult> {
    config.validate()?;
    let out_dir = &options.output.out_dir;
    fs::create_dir_all(out_dir).map_err(|source| StageError::Write {
        path: out_dir.clone(),
        source,
    })?;

    let duplicates = earlier_duplicates(subjects);
    let run_one = |(paths, duplicate): (&SubjectPaths, &Option<PathBuf>)| {
        let result = match duplicate {
            Some(first) => Err(StageError::DuplicateSubject {
                subject: paths.subject_id.clone(),
                first: first.clone(),
            }),
            None => process_subject(paths, config, &options.output, generated_at),
        };
        if let Err(ref e) = result {
            log::error!("subject {} failed: {e}", paths.subject_id);
        }
        SubjectOutcome {
            subject_id: paths.subject_id.clone(),
            result,
        }
    };

    #[cfg(feature = "rayon")]
    let outcomes: Vec<SubjectOutcome> = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers)
        .build()
        .map_err(|e| StageError::WorkerPool(e.to_string()))?
        .install(|| {
            subjects
                .par_iter()
                .zip(duplicates.par_iter())
                .map(run_one)
                .collect()
        });
    #[cfg(not(feature = "rayon"))]
    let outcomes: Vec<SubjectOutcome> = subjects
        .iter()
        .zip(duplicates.iter())
        .map(run_one)
        .collect();

    let batch = BatchResult { outcomes };
    log::info!(
        "batch finished: {} succeeded, {} failed",
        batch.succeeded(),
        batch.failed()
    );
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::{analyze, run_batch, BatchOptions, OutputOptions};
    use crate::config::AnalysisConfig;
    use crate::dataset::SubjectPaths;
    use crate::lesion::Connectivity;
    use crate::{AtlasVolume, Geometry, LesionMask, NiftiWrite, StageError, SubjectVolumes};
    use chrono::{TimeZone, Utc};
    use ndarray::Array3;
    use std::path::Path;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-8
    }

    fn at() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()
    }

    /// 4 x 4 x 4, 左半边 (w < 2) 为区域 3, 右半边为区域 7.
    fn volumes(on: &[(usize, usize, usize)]) -> SubjectVolumes {
        let g = Geometry::isotropic((4, 4, 4), 2.0);
        let mut mask = Array3::zeros((4, 4, 4));
        for &p in on {
            mask[p] = 1u8;
        }
        let atlas = Array3::from_shape_fn((4, 4, 4), |(_, _, w)| if w < 2 { 3u16 } else { 7 });
        SubjectVolumes::new(
            LesionMask::from_array(mask, g.clone()).unwrap(),
            AtlasVolume::from_array(atlas, g).unwrap(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_empty_mask() {
        let r = analyze("E", &volumes(&[]), &AnalysisConfig::default(), at());
        assert_eq!(r.summary().lesion_count, 0);
        assert_eq!(r.summary().total_volume_ml, 0.0);
        assert_eq!(r.stage(), "no disease detected");
    }

    #[test]
    fn test_corner_clusters_end_to_end() {
        let v = volumes(&[(0, 0, 0), (1, 1, 1), (3, 3, 3)]);
        let mut c = AnalysisConfig::default();
        let r = analyze("C", &v, &c, at());
        assert_eq!(r.summary().lesion_count, 2);
        assert_eq!(r.lesions()[0].metrics().voxel_count, 2);
        assert!(f64_eq(r.lesions()[0].volume_mm3(), 16.0));
        assert_eq!(r.stage(), "multi-region");

        c.connectivity = Connectivity::Face6;
        let r = analyze("C", &v, &c, at());
        assert_eq!(r.summary().lesion_count, 3);
    }

    #[test]
    fn test_idempotent() {
        let v = volumes(&[(0, 0, 1), (0, 0, 2), (2, 2, 2), (2, 3, 3)]);
        let c = AnalysisConfig::default();
        let a = analyze("I", &v, &c, at());
        let b = analyze("I", &v, &c, at());
        let json = |r: &crate::staging::SubjectReport| serde_json::to_string(r.summary()).unwrap();
        assert_eq!(json(&a), json(&b));
        let regions = |r: &crate::staging::SubjectReport| {
            r.lesions().iter().map(|l| (l.id(), l.region())).collect::<Vec<_>>()
        };
        assert_eq!(regions(&a), regions(&b));
    }

    fn write_subject(dir: &Path, id: &str, atlas_shape: (usize, usize, usize)) -> SubjectPaths {
        let g = Geometry::isotropic((4, 4, 4), 1.0);
        let mut mask = Array3::zeros((4, 4, 4));
        mask[(1, 1, 1)] = 1u8;
        let mask_path = dir.join(format!("{id}_LYM_label.nii.gz"));
        LesionMask::from_array(mask, g).unwrap().save(&mask_path).unwrap();

        let ga = Geometry::isotropic(atlas_shape, 1.0);
        let atlas_path = dir.join(format!("{id}_all.nii.gz"));
        AtlasVolume::from_array(Array3::from_elem(atlas_shape, 4u16), ga)
            .unwrap()
            .save(&atlas_path)
            .unwrap();

        SubjectPaths {
            subject_id: id.to_string(),
            mask: mask_path,
            atlas: Some(atlas_path),
            intensity: None,
        }
    }

    #[test]
    fn test_batch_isolates_failures() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let subjects = [
            write_subject(input.path(), "A", (4, 4, 4)),
            write_subject(input.path(), "B", (4, 4, 5)),
            write_subject(input.path(), "C", (4, 4, 4)),
        ];
        let options = BatchOptions {
            output: OutputOptions::new(out.path()),
            workers: 2,
        };
        let batch = run_batch(&subjects, &AnalysisConfig::default(), &options, at()).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.succeeded(), 2);
        let failures: Vec<_> = batch.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "B");
        assert!(matches!(
            failures[0].1,
            StageError::GeometryMismatch { attribute: "shape", .. }
        ));
        assert!(out.path().join("A_lesion_stats.csv").is_file());
        assert!(out.path().join("C_summary.json").is_file());
        assert!(!out.path().join("B_summary.json").exists());

        let p = batch.save_summary(out.path()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(p).unwrap()).unwrap();
        assert_eq!(v["failed"], 1);
        assert_eq!(v["subjects"][1]["status"], "failed");
        assert_eq!(v["subjects"][1]["error_kind"], "GeometryMismatch");
    }

    #[test]
    fn test_duplicate_ids_do_not_share_outputs() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let (a, b) = (input.path().join("site_a"), input.path().join("site_b"));
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        let subjects = [
            write_subject(&a, "P1", (4, 4, 4)),
            write_subject(&b, "P1", (4, 4, 4)),
        ];
        let options = BatchOptions {
            output: OutputOptions::new(out.path()),
            workers: 2,
        };
        let batch = run_batch(&subjects, &AnalysisConfig::default(), &options, at()).unwrap();
        assert_eq!(batch.succeeded(), 1);
        let failures: Vec<_> = batch.failures().collect();
        assert_eq!(failures.len(), 1);
        match failures[0].1 {
            StageError::DuplicateSubject { subject, first } => {
                assert_eq!(subject, "P1");
                assert_eq!(first, &subjects[0].mask);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_failed_report_leaves_no_instance_map() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let subjects = [write_subject(input.path(), "W", (4, 4, 4))];
        // 占住 CSV 的路径, 使报告写入失败.
        std::fs::create_dir(out.path().join("W_lesion_stats.csv")).unwrap();
        let options = BatchOptions {
            output: OutputOptions {
                out_dir: out.path().to_owned(),
                save_instances: true,
            },
            workers: 1,
        };
        let batch = run_batch(&subjects, &AnalysisConfig::default(), &options, at()).unwrap();
        assert_eq!(batch.failed(), 1);
        assert_eq!(batch.failures().next().unwrap().1.kind(), "WriteFailure");
        assert!(!out.path().join("W_inst.nii.gz").exists());
    }

    #[test]
    fn test_invalid_config_is_batch_fatal() {
        let out = tempfile::tempdir().unwrap();
        let mut c = AnalysisConfig::default();
        c.percentile = -0.1;
        let options = BatchOptions {
            output: OutputOptions::new(out.path()),
            workers: 1,
        };
        assert!(matches!(
            run_batch(&[], &c, &options, at()),
            Err(StageError::InvalidConfig(_))
        ));
    }
}
