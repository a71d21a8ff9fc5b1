//! 分析配置.
//!
//! 以 JSON 保存. 所有字段都有缺省值, 因此 `{}` 也是合法配置.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::consts::{label, DEFAULT_MIN_SIZE, DEFAULT_PERCENTILE, DEFAULT_TOP_N};
use crate::error::{StageError, StageResult};
use crate::lesion::Connectivity;
use crate::region::RegionCatalog;
use crate::staging::StageTable;
use crate::RegionCode;

fn default_min_size() -> usize {
    DEFAULT_MIN_SIZE
}

fn default_percentile() -> f64 {
    DEFAULT_PERCENTILE
}

fn default_top_n() -> usize {
    DEFAULT_TOP_N
}

fn default_background() -> RegionCode {
    label::ATLAS_BACKGROUND
}

/// 单个受试者分析所需的全部参数. 批处理中所有受试者共享同一份配置.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// 体素个数小于该值的连通域视为噪声丢弃. 1 表示不过滤.
    #[serde(default = "default_min_size")]
    pub min_size: usize,

    /// 强度百分位统计使用的分位, `[0, 1]`.
    #[serde(default = "default_percentile")]
    pub percentile: f64,

    /// 报告中单独列出的最大病灶个数.
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// 图谱中表示背景的区域编码.
    #[serde(default = "default_background")]
    pub background: RegionCode,

    /// 连通规则, `26` 或 `6`.
    #[serde(default)]
    pub connectivity: Connectivity,

    /// 分期查找表.
    #[serde(default)]
    pub stage_table: StageTable,

    /// 自定义区域词表. 缺省使用内置 MR 图谱词表.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regions: Option<RegionCatalog>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            percentile: DEFAULT_PERCENTILE,
            top_n: DEFAULT_TOP_N,
            background: label::ATLAS_BACKGROUND,
            connectivity: Connectivity::default(),
            stage_table: StageTable::default(),
            regions: None,
        }
    }
}

impl AnalysisConfig {
    /// 从 JSON 文件读取配置. 读取后不自动校验, 需调用 [`AnalysisConfig::validate`].
    pub fn load<P: AsRef<Path>>(path: P) -> StageResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            StageError::InvalidConfig(format!("cannot open {}: {e}", path.display()))
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            StageError::InvalidConfig(format!("cannot parse {}: {e}", path.display()))
        })
    }

    /// 以格式化 JSON 保存到 `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> StageResult<()> {
        let path = path.as_ref();
        let write_err = |source| StageError::Write {
            path: path.to_owned(),
            source,
        };
        let mut w = BufWriter::new(File::create(path).map_err(write_err)?);
        serde_json::to_writer_pretty(&mut w, self).map_err(|e| write_err(e.into()))?;
        w.flush().map_err(write_err)
    }

    /// 检查配置是否可用. 必须在处理任何受试者之前调用.
    pub fn validate(&self) -> StageResult<()> {
        if !(0.0..=1.0).contains(&self.percentile) {
            return Err(StageError::InvalidConfig(format!(
                "percentile must be within [0, 1], got {}",
                self.percentile
            )));
        }
        if self.min_size == 0 {
            return Err(StageError::InvalidConfig(
                "min_size must be at least 1".to_string(),
            ));
        }
        self.stage_table.validate(self.background)
    }

    /// 实际使用的区域词表.
    #[inline]
    pub fn catalog(&self) -> &RegionCatalog {
        self.regions.as_ref().unwrap_or_else(|| RegionCatalog::mr_atlas())
    }

    /// CSV 中百分位列的列名, 如 `intensity_p95`.
    pub fn percentile_column(&self) -> String {
        let pct = self.percentile * 100.0;
        if (pct - pct.round()).abs() < 1e-9 {
            format!("intensity_p{}", pct.round() as u32)
        } else {
            let text = format!("{pct:.4}");
            let text = text.trim_end_matches('0').trim_end_matches('.');
            format!("intensity_p{}", text.replace('.', "_"))
        }
    }
}
