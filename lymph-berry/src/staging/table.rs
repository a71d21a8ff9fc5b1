//! 区域集合 -> 分期标签 的查找表.
//!
//! 分期惯例随临床方案变化, 因此整张表都是配置数据: 本模块只负责一致且确定地应用它.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{StageError, StageResult};
use crate::RegionCode;

fn default_none_label() -> String {
    "no disease detected".to_string()
}

fn default_fallback() -> String {
    "indeterminate".to_string()
}

/// 一条分期规则. 所有给出的条件同时满足时命中.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRule {
    /// 命中时给出的分期标签.
    pub label: String,

    /// 受累分区个数下限 (含).
    #[serde(default)]
    pub min_compartments: usize,

    /// 受累分区个数上限 (含). 缺省为不限.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_compartments: Option<usize>,

    /// 必须全部受累的分区.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_of: Vec<String>,

    /// 至少一个受累的分区. 为空时不作要求.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<String>,
}

impl StageRule {
    /// 只按受累分区个数判断的规则.
    pub fn by_count(label: &str, min: usize, max: Option<usize>) -> Self {
        Self {
            label: label.to_string(),
            min_compartments: min,
            max_compartments: max,
            all_of: vec![],
            any_of: vec![],
        }
    }

    fn matches(&self, involved: &BTreeSet<String>) -> bool {
        let n = involved.len();
        n >= self.min_compartments
            && self.max_compartments.map_or(true, |max| n <= max)
            && self.all_of.iter().all(|c| involved.contains(c))
            && (self.any_of.is_empty() || self.any_of.iter().any(|c| involved.contains(c)))
    }
}

/// 分期查找表.
///
/// 区域先按 `compartments` 合并为分区 (未登记的区域编码各自成为一个分区, 以编码命名),
/// 然后按顺序匹配 `rules`, 第一条命中的规则给出标签; 都不命中时使用 `fallback`.
/// 没有任何病灶时直接给出 `none_label`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTable {
    /// 无病灶时的标签.
    #[serde(default = "default_none_label")]
    pub none_label: String,

    /// 分区名 -> 区域编码集合.
    #[serde(default)]
    pub compartments: BTreeMap<String, Vec<RegionCode>>,

    /// 有序规则.
    pub rules: Vec<StageRule>,

    /// 所有规则都不命中时的标签.
    #[serde(default = "default_fallback")]
    pub fallback: String,
}

/// 只按受累范围分级, 不带任何临床假设.
impl Default for StageTable {
    fn default() -> Self {
        Self {
            none_label: default_none_label(),
            compartments: BTreeMap::new(),
            rules: vec![
                StageRule::by_count("single-region", 1, Some(1)),
                StageRule::by_count("multi-region", 2, None),
            ],
            fallback: default_fallback(),
        }
    }
}

impl StageTable {
    /// 检查表本身是否合法. `background` 为图谱背景编码, 不允许出现在任何分区中.
    pub fn validate(&self, background: RegionCode) -> StageResult<()> {
        let bad = |msg: String| Err(StageError::InvalidConfig(msg));

        if self.none_label.trim().is_empty() || self.fallback.trim().is_empty() {
            return bad("stage table labels must not be empty".into());
        }
        if self.rules.is_empty() {
            return bad("stage table has no rules".into());
        }

        let mut seen: BTreeMap<RegionCode, &str> = BTreeMap::new();
        for (name, codes) in self.compartments.iter() {
            if name.trim().is_empty() {
                return bad("compartment name must not be empty".into());
            }
            // 未登记的区域以编码命名分区, 纯数字名会与之混淆.
            if name.bytes().all(|b| b.is_ascii_digit()) {
                return bad(format!(
                    "compartment name `{name}` is numeric and would clash with unlisted region codes"
                ));
            }
            for &code in codes {
                if code == background {
                    return bad(format!(
                        "background code {code} must not belong to compartment `{name}`"
                    ));
                }
                if let Some(prev) = seen.insert(code, name) {
                    return bad(format!(
                        "region {code} is listed in both `{prev}` and `{name}`"
                    ));
                }
            }
        }

        for (i, rule) in self.rules.iter().enumerate() {
            if rule.label.trim().is_empty() {
                return bad(format!("rule #{i} has an empty label"));
            }
            if let Some(max) = rule.max_compartments {
                if max < rule.min_compartments {
                    return bad(format!(
                        "rule `{}`: max_compartments {max} < min_compartments {}",
                        rule.label, rule.min_compartments
                    ));
                }
            }
            if let Some(c) = rule
                .all_of
                .iter()
                .chain(rule.any_of.iter())
                .find(|c| !self.compartments.contains_key(*c))
            {
                return bad(format!(
                    "rule `{}` references unknown compartment `{c}`",
                    rule.label
                ));
            }
        }
        Ok(())
    }

    /// 区域所属分区名.
    pub fn compartment_of(&self, code: RegionCode) -> String {
        self.compartments
            .iter()
            .find(|(_, codes)| codes.contains(&code))
            .map_or_else(|| code.to_string(), |(name, _)| name.clone())
    }

    /// 受累区域集合对应的受累分区集合.
    pub fn involved_compartments<'a, I>(&self, regions: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a RegionCode>,
    {
        regions.into_iter().map(|&c| self.compartment_of(c)).collect()
    }

    /// 给出分期标签. `lesion_count` 为 0 时返回 `none_label`.
    pub fn stage(&self, lesion_count: usize, involved: &BTreeSet<String>) -> &str {
        if lesion_count == 0 {
            return &self.none_label;
        }
        self.rules
            .iter()
            .find(|r| r.matches(involved))
            .map_or(self.fallback.as_str(), |r| r.label.as_str())
    }
}
