//! 解剖区域词表与病灶的区域归属.
//!
//! 区域编码由外部图谱给出, 本 crate 只负责查名字, 不生成区域.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::consts::{MR_ATLAS_LABELS, UNCLASSIFIED_CODE_TEXT, UNCLASSIFIED_NAME, UNKNOWN_REGION_NAME};
use crate::RegionCode;

static MR_CATALOG: Lazy<RegionCatalog> = Lazy::new(|| {
    RegionCatalog::from_iter(
        MR_ATLAS_LABELS
            .iter()
            .map(|&(code, name)| (code, name.to_string())),
    )
});

/// 区域编码到名称的查找表.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionCatalog {
    names: BTreeMap<RegionCode, String>,
}

impl FromIterator<(RegionCode, String)> for RegionCatalog {
    fn from_iter<I: IntoIterator<Item = (RegionCode, String)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}

impl RegionCatalog {
    /// 融合 MR 图谱 (器官 + 躯干/四肢) 的内置词表.
    #[inline]
    pub fn mr_atlas() -> &'static RegionCatalog {
        &MR_CATALOG
    }

    /// 查询编码对应的名称. 未登记的编码返回 `"unknown"`.
    #[inline]
    pub fn name(&self, code: RegionCode) -> &str {
        self.names
            .get(&code)
            .map_or(UNKNOWN_REGION_NAME, String::as_str)
    }

    /// 查询区域归属对应的名称.
    #[inline]
    pub fn name_of(&self, region: RegionAssignment) -> &str {
        match region {
            RegionAssignment::Region(code) => self.name(code),
            RegionAssignment::Unclassified => UNCLASSIFIED_NAME,
        }
    }

    /// 词表是否登记了 `code`?
    #[inline]
    pub fn contains(&self, code: RegionCode) -> bool {
        self.names.contains_key(&code)
    }

    /// 登记条目个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// 词表是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// 病灶的区域归属.
///
/// 排序时所有具体区域 (按编码升序) 排在 `Unclassified` 之前.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RegionAssignment {
    /// 归属到某个图谱区域.
    Region(RegionCode),

    /// 与任何已标注区域都没有重叠.
    Unclassified,
}

impl RegionAssignment {
    /// 区域编码. `Unclassified` 返回 `None`.
    #[inline]
    pub fn code(&self) -> Option<RegionCode> {
        match self {
            Self::Region(c) => Some(*c),
            Self::Unclassified => None,
        }
    }

    /// 是否无法归类?
    #[inline]
    pub fn is_unclassified(&self) -> bool {
        matches!(self, Self::Unclassified)
    }
}

/// 文本形式: 区域编码, 或 `-1` (无法归类).
impl fmt::Display for RegionAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Region(c) => write!(f, "{c}"),
            Self::Unclassified => f.write_str(UNCLASSIFIED_CODE_TEXT),
        }
    }
}

/// JSON 中写为整数编码, 无法归类为 `-1`.
impl Serialize for RegionAssignment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Region(c) => serializer.serialize_i32(*c as i32),
            Self::Unclassified => serializer.serialize_i32(-1),
        }
    }
}
