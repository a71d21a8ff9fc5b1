//! 受试者发现与加载.
//!
//! 每个受试者由其病灶 mask 文件确定. 同一目录下:
//!
//! 1. 病灶 mask: 文件名包含 `pattern` (缺省 `LYM_label.nii.gz`);
//! 2. 强度数据: `<前缀>_LYM.nii.gz`, 其中前缀为 mask 文件名中 `_LYM` 之前的部分; 可缺失;
//! 3. 解剖图谱: 文件名包含 `atlas_pattern` (缺省 `_all.nii.gz`). 优先选择以同一前缀开头的文件;
//!   目录中只有一个受试者时, 也接受该目录中唯一的图谱. 必需.
//!
//! 递归发现时不同目录下可能出现同名受试者, 此时编号前会加上相对目录, 见 [`discover`].
//!
//! 提供迭代器风格的加载器 [`SubjectLoader`].

use itertools::Itertools;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::data::SubjectVolumes;
use crate::error::{StageError, StageResult};

/// 受试者编号与 mask 文件名其余部分的分隔标记.
const SUBJECT_MARK: &str = "_LYM";

/// 缺省病灶 mask 文件名模式.
pub const DEFAULT_MASK_PATTERN: &str = "LYM_label.nii.gz";

/// 缺省解剖图谱文件名模式.
pub const DEFAULT_ATLAS_PATTERN: &str = "_all.nii.gz";

/// 受试者发现选项.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// 病灶 mask 文件名须包含的子串.
    pub pattern: String,
    /// 解剖图谱文件名须包含的子串.
    pub atlas_pattern: String,
    /// 只搜索给定目录本身, 不进入子目录.
    pub onedir: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_MASK_PATTERN.to_string(),
            atlas_pattern: DEFAULT_ATLAS_PATTERN.to_string(),
            onedir: false,
        }
    }
}

/// 单个受试者的输入文件.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPaths {
    /// 受试者编号.
    pub subject_id: String,
    /// 病灶 mask.
    pub mask: PathBuf,
    /// 解剖图谱. 没找到时为 `None`, 打开时报错.
    pub atlas: Option<PathBuf>,
    /// 强度数据. 没找到时为 `None`, 不计算强度统计.
    pub intensity: Option<PathBuf>,
}

impl SubjectPaths {
    /// 打开该受试者的全部体数据并校验几何一致性.
    pub fn open(&self) -> StageResult<SubjectVolumes> {
        let atlas = self.atlas.as_ref().ok_or_else(|| StageError::MissingInput {
            subject: self.subject_id.clone(),
            what: format!("no atlas next to {}", self.mask.display()),
        })?;
        if self.intensity.is_none() {
            log::warn!(
                "subject {}: no intensity volume, intensity statistics are omitted",
                self.subject_id
            );
        }
        SubjectVolumes::open(&self.mask, atlas, self.intensity.as_ref())
    }
}

/// 去掉 `.nii.gz` 或 `.nii` 后缀.
fn strip_nii(name: &str) -> &str {
    name.strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .unwrap_or(name)
}

/// 由 mask 文件名得到受试者编号: `_LYM` 之前的部分. 不含 `_LYM` 时为去掉后缀的整个文件名.
///
/// ```
/// use lymph_berry::dataset::subject_id_from_mask;
///
/// assert_eq!(subject_id_from_mask("P017_LYM_label.nii.gz"), "P017");
/// assert_eq!(subject_id_from_mask("case3.nii.gz"), "case3");
/// ```
pub fn subject_id_from_mask(file_name: &str) -> &str {
    let stem = strip_nii(file_name);
    stem.split_once(SUBJECT_MARK).map_or(stem, |(prefix, _)| prefix)
}

/// 强度数据文件名: `<受试者编号>_LYM.nii.gz`.
#[inline]
pub fn intensity_file_name(subject_id: &str) -> String {
    format!("{subject_id}{SUBJECT_MARK}.nii.gz")
}

/// `name` 是否属于 `subject_id`: 以该编号开头, 且紧随其后的不是字母或数字.
fn belongs_to(name: &str, subject_id: &str) -> bool {
    name.strip_prefix(subject_id)
        .and_then(|rest| rest.chars().next())
        .map_or(false, |c| !c.is_alphanumeric())
}

/// 在 `dir` 中寻找 `subject_id` 的解剖图谱.
///
/// 优先选择属于该受试者的图谱. 只有当目录中恰好一个病灶 mask 和一个图谱时,
/// 才把那个图谱当作该受试者的; 否则它可能属于别的受试者, 返回 `None`.
pub fn find_atlas(dir: &Path, subject_id: &str, options: &DiscoveryOptions) -> Option<PathBuf> {
    let names: Vec<String> = fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map_or(false, |t| t.is_file()))
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    let mut candidates: Vec<&String> = names
        .iter()
        .filter(|name| name.contains(options.atlas_pattern.as_str()))
        .collect();
    candidates.sort_unstable();

    if let Some(own) = candidates.iter().find(|name| belongs_to(name, subject_id)) {
        return Some(dir.join(own));
    }
    let masks = names
        .iter()
        .filter(|name| name.contains(options.pattern.as_str()))
        .count();
    match candidates[..] {
        [only] if masks == 1 => Some(dir.join(only)),
        _ => None,
    }
}

/// 重复的受试者编号前加上 mask 所在目录相对 `root` 的路径 (以 `_` 连接), 使输出文件名互不冲突.
fn disambiguate(root: &Path, subjects: &mut [SubjectPaths]) {
    let counts = subjects.iter().counts_by(|s| s.subject_id.clone());
    for s in subjects.iter_mut().filter(|s| counts[&s.subject_id] > 1) {
        let dir = s
            .mask
            .parent()
            .and_then(|d| d.strip_prefix(root).ok())
            .map(|d| d.components().filter_map(|c| c.as_os_str().to_str()).join("_"))
            .unwrap_or_default();
        if dir.is_empty() {
            continue;
        }
        let id = format!("{dir}_{}", s.subject_id);
        log::warn!(
            "subject id {} occurs more than once, using {id} for {}",
            s.subject_id,
            s.mask.display()
        );
        s.subject_id = id;
    }
}

/// 在 `input` 下发现全部受试者, 按 mask 路径排序.
///
/// 无法访问的目录项会被记录并跳过. 同一编号出现多次时, 子目录中的受试者编号改为
/// `<相对目录>_<编号>` (如 `site_a_P1`), 保证各受试者的输出文件互不冲突.
pub fn discover<P: AsRef<Path>>(input: P, options: &DiscoveryOptions) -> Vec<SubjectPaths> {
    let walker = WalkDir::new(input.as_ref())
        .min_depth(1)
        .max_depth(if options.onedir { 1 } else { usize::MAX })
        .sort_by_file_name();

    let mut subjects = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if !name.contains(options.pattern.as_str()) {
            continue;
        }

        let mask = entry.path().to_owned();
        let dir = mask.parent().unwrap_or_else(|| Path::new("."));
        let subject_id = subject_id_from_mask(name).to_string();
        let intensity = Some(dir.join(intensity_file_name(&subject_id))).filter(|p| p.is_file());
        let atlas = find_atlas(dir, &subject_id, options);
        subjects.push(SubjectPaths {
            subject_id,
            mask,
            atlas,
            intensity,
        });
    }
    subjects.sort_by(|a, b| a.mask.cmp(&b.mask));
    disambiguate(input.as_ref(), &mut subjects);
    log::debug!("discovered {} subject(s)", subjects.len());
    subjects
}

/// 从受试者列表创建加载器. 按列表顺序打开每个受试者.
pub fn subject_loader<I: IntoIterator<Item = SubjectPaths>>(subjects: I) -> SubjectLoader {
    let mut data: Vec<SubjectPaths> = subjects.into_iter().collect();
    data.reverse();
    SubjectLoader { data_rev: data }
}

/// 受试者体数据加载器. 每项为受试者输入路径及其加载结果.
#[derive(Debug)]
pub struct SubjectLoader {
    data_rev: Vec<SubjectPaths>,
}

impl Iterator for SubjectLoader {
    type Item = (SubjectPaths, StageResult<SubjectVolumes>);

    fn next(&mut self) -> Option<Self::Item> {
        let paths = self.data_rev.pop()?;
        let volumes = paths.open();
        Some((paths, volumes))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.data_rev.len(), Some(self.data_rev.len()))
    }
}

impl ExactSizeIterator for SubjectLoader {
    #[inline]
    fn len(&self) -> usize {
        self.data_rev.len()
    }
}
