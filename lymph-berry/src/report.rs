//! 报告输出: 病灶 CSV 表, 受试者 JSON 汇总, 控制台文本.

use chrono::SecondsFormat;
use itertools::Itertools;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::AnalysisConfig;
use crate::consts::DOMINANT_ENTRIES;
use crate::error::{StageError, StageResult};
use crate::lesion::{IntensityStats, LesionRecord};
use crate::region::RegionCatalog;
use crate::staging::SubjectReport;

/// CSV 表头中百分位列之前的部分.
const CSV_HEAD: [&str; 14] = [
    "subject_id",
    "lesion_id",
    "voxel_count",
    "volume_ml",
    "centroid_x",
    "centroid_y",
    "centroid_z",
    "region_code",
    "region_name",
    "region_fraction",
    "overlap",
    "intensity_min",
    "intensity_mean",
    "intensity_max",
];

/// 病灶表路径: `<out_dir>/<subject>_lesion_stats.csv`.
pub fn lesion_table_path<P: AsRef<Path>>(out_dir: P, subject_id: &str) -> PathBuf {
    out_dir.as_ref().join(format!("{subject_id}_lesion_stats.csv"))
}

/// 汇总路径: `<out_dir>/<subject>_summary.json`.
pub fn summary_path<P: AsRef<Path>>(out_dir: P, subject_id: &str) -> PathBuf {
    out_dir.as_ref().join(format!("{subject_id}_summary.json"))
}

/// 病灶实例图路径: `<out_dir>/<subject>_inst.nii.gz`.
pub fn instance_map_path<P: AsRef<Path>>(out_dir: P, subject_id: &str) -> PathBuf {
    out_dir.as_ref().join(format!("{subject_id}_inst.nii.gz"))
}

/// 将 `report` 的病灶表以 CSV 写入 `w`. 每个病灶一行, 按编号升序.
///
/// 没有强度数据时四个强度列留空.
pub fn write_lesion_table<W: Write>(
    report: &SubjectReport,
    config: &AnalysisConfig,
    w: W,
) -> io::Result<()> {
    let catalog = config.catalog();
    let mut wtr = csv::Writer::from_writer(w);
    let percentile_column = config.percentile_column();
    wtr.write_record(
        CSV_HEAD
            .iter()
            .copied()
            .chain([percentile_column.as_str(), "top_n"]),
    )?;

    for r in report.lesions() {
        let m = r.metrics();
        let region = r.region();
        let [x, y, z] = m.centroid;
        let intensity = match m.intensity {
            Some(IntensityStats {
                min,
                mean,
                max,
                percentile,
                ..
            }) => [min, mean, max, percentile].map(|v| format!("{v:.4}")),
            None => Default::default(),
        };
        let head = [
            report.subject_id().to_string(),
            r.id().to_string(),
            m.voxel_count.to_string(),
            format!("{:.6}", m.volume_ml()),
            format!("{x:.3}"),
            format!("{y:.3}"),
            format!("{z:.3}"),
            region.to_string(),
            catalog.name_of(region).to_string(),
            format!("{:.4}", r.overlap().assigned_fraction()),
            r.overlap().histogram_text(),
        ];
        let top = u8::from(report.is_top(r.id())).to_string();
        wtr.write_record(head.iter().chain(intensity.iter()).chain([&top]))?;
    }
    wtr.flush()
}

/// 将 `report` 的汇总以格式化 JSON 写入 `w`.
pub fn write_summary<W: Write>(report: &SubjectReport, w: &mut W) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *w, report.summary())?;
    writeln!(w)
}

/// 输出文件.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFiles {
    /// 病灶 CSV 表.
    pub lesion_table: PathBuf,
    /// JSON 汇总.
    pub summary: PathBuf,
}

fn write_file<F>(path: PathBuf, f: F) -> StageResult<PathBuf>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let result = File::create(&path).and_then(|file| {
        let mut w = BufWriter::new(file);
        f(&mut w)?;
        w.flush()
    });
    match result {
        Ok(()) => Ok(path),
        Err(source) => Err(StageError::Write { path, source }),
    }
}

/// 将病灶表和汇总写入 `out_dir`. 每个受试者的文件名互不相同, 可并发调用.
pub fn save_report<P: AsRef<Path>>(
    report: &SubjectReport,
    config: &AnalysisConfig,
    out_dir: P,
) -> StageResult<ReportFiles> {
    let out_dir = out_dir.as_ref();
    let id = report.subject_id();
    Ok(ReportFiles {
        lesion_table: write_file(lesion_table_path(out_dir, id), |w| {
            write_lesion_table(report, config, w)
        })?,
        summary: write_file(summary_path(out_dir, id), |w| write_summary(report, w))?,
    })
}

fn describe_lesion<W: Write>(
    r: &LesionRecord,
    catalog: &RegionCatalog,
    fraction: f64,
    w: &mut W,
) -> io::Result<()> {
    const S8: &str = "        ";
    let m = r.metrics();
    let region = r.region();
    writeln!(
        w,
        "    #{}: {} voxel(s), {:.3} ml, region {region} `{}`",
        r.id(),
        m.voxel_count,
        m.volume_ml(),
        catalog.name_of(region),
    )?;

    let dominant = r.overlap().dominant(DOMINANT_ENTRIES);
    if !dominant.is_empty() {
        let text = dominant
            .iter()
            .map(|&(code, pct)| format!("{} {pct:.1}%", catalog.name(code)))
            .join(", ");
        writeln!(w, "{S8}Overlap: {text}")?;
    }

    let [x, y, z] = m.centroid;
    writeln!(w, "{S8}Centroid: ({x:.1}, {y:.1}, {z:.1}) mm")?;
    match m.intensity {
        Some(s) => writeln!(
            w,
            "{S8}Intensity: max {:.3}, mean {:.3}, p{:.1} {:.3}",
            s.max,
            s.mean,
            fraction * 100.0,
            s.percentile
        ),
        None => writeln!(w, "{S8}Intensity: /"),
    }
}

/// 将 `report` 的可读摘要写进 `w` 中: 先列出体积最大的前 N 个病灶 (从大到小), 再给出汇总.
pub fn describe_into<W: Write>(
    report: &SubjectReport,
    catalog: &RegionCatalog,
    w: &mut W,
) -> io::Result<()> {
    const S4: &str = "    ";
    let s = report.summary();

    writeln!(w, "Top {} lesion(s) of `{}`:", s.top_n.len(), s.subject_id)?;
    if s.top_n.is_empty() {
        writeln!(w, "{S4}/")?;
    }
    for r in report.top_lesions() {
        describe_lesion(r, catalog, s.percentile, w)?;
    }

    writeln!(w, "Summary of `{}`:", s.subject_id)?;
    writeln!(w, "{S4}Lesions: {}", s.lesion_count)?;
    writeln!(w, "{S4}Total volume: {:.3} ml", s.total_volume_ml)?;
    let involved = if s.involved_regions.is_empty() {
        "/".to_string()
    } else {
        s.involved_regions
            .iter()
            .map(|r| format!("{} `{}`", r.code, r.name))
            .join(", ")
    };
    writeln!(w, "{S4}Involved regions: {involved}")?;
    for t in s.by_region.iter() {
        writeln!(
            w,
            "{S4}{S4}{} `{}`: {} lesion(s), {:.3} ml",
            t.region, t.name, t.lesion_count, t.volume_ml
        )?;
    }
    writeln!(w, "{S4}Unclassified lesions: {}", s.unclassified_count)?;
    writeln!(w, "{S4}Stage: {}", s.stage)?;
    write!(
        w,
        "{S4}Generated at: {}",
        s.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )?;
    Ok(())
}
