//! 通用常量.

use crate::RegionCode;

/// 标签取值.
pub mod label {
    use crate::RegionCode;

    /// 病灶 mask 中背景的体素值.
    pub const MASK_BACKGROUND: u8 = 0;

    /// 图谱中默认的背景 (未标注) 区域编码.
    pub const ATLAS_BACKGROUND: RegionCode = 0;

    /// 图谱中躯干区域的编码 (来自 body 分割, 原值 1 重映射为 101).
    pub const TRUNC: RegionCode = 101;

    /// 图谱中四肢区域的编码 (来自 body 分割, 原值 2 重映射为 102).
    pub const EXTREMITIES: RegionCode = 102;

    /// 体素是否属于病灶?
    #[inline]
    pub const fn is_lesion(p: u8) -> bool {
        p != MASK_BACKGROUND
    }
}

/// 无法归属任何区域的病灶使用的名称.
pub const UNCLASSIFIED_NAME: &str = "unclassified";

/// 未知区域编码使用的名称.
pub const UNKNOWN_REGION_NAME: &str = "unknown";

/// CSV 中 "unclassified" 的区域编码写法.
pub const UNCLASSIFIED_CODE_TEXT: &str = "-1";

/// 主区域覆盖率低于该值 (百分比) 时给出警告.
pub const DOMINANCE_WARN_PCT: f64 = 50.0;

/// 保留的主导重叠条目个数.
pub const DOMINANT_ENTRIES: usize = 3;

/// 默认病灶最小体素个数 (1 即不过滤).
pub const DEFAULT_MIN_SIZE: usize = 1;

/// 默认强度百分位数.
pub const DEFAULT_PERCENTILE: f64 = 0.95;

/// 默认 top-N.
pub const DEFAULT_TOP_N: usize = 5;

/// 融合 MR 图谱 (器官 1..=50 + 躯干/四肢 101, 102) 的编码与名称.
pub const MR_ATLAS_LABELS: [(RegionCode, &str); 52] = [
    (1, "spleen"),
    (2, "kidney_right"),
    (3, "kidney_left"),
    (4, "gallbladder"),
    (5, "liver"),
    (6, "stomach"),
    (7, "pancreas"),
    (8, "adrenal_gland_right"),
    (9, "adrenal_gland_left"),
    (10, "lung_left"),
    (11, "lung_right"),
    (12, "esophagus"),
    (13, "small_bowel"),
    (14, "duodenum"),
    (15, "colon"),
    (16, "urinary_bladder"),
    (17, "prostate"),
    (18, "sacrum"),
    (19, "vertebrae"),
    (20, "intervertebral_discs"),
    (21, "spinal_cord"),
    (22, "heart"),
    (23, "aorta"),
    (24, "inferior_vena_cava"),
    (25, "portal_vein_and_splenic_vein"),
    (26, "iliac_artery_left"),
    (27, "iliac_artery_right"),
    (28, "iliac_vena_left"),
    (29, "iliac_vena_right"),
    (30, "humerus_left"),
    (31, "humerus_right"),
    (32, "scapula_left"),
    (33, "scapula_right"),
    (34, "clavicula_left"),
    (35, "clavicula_right"),
    (36, "femur_left"),
    (37, "femur_right"),
    (38, "hip_left"),
    (39, "hip_right"),
    (40, "gluteus_maximus_left"),
    (41, "gluteus_maximus_right"),
    (42, "gluteus_medius_left"),
    (43, "gluteus_medius_right"),
    (44, "gluteus_minimus_left"),
    (45, "gluteus_minimus_right"),
    (46, "autochthon_left"),
    (47, "autochthon_right"),
    (48, "iliopsoas_left"),
    (49, "iliopsoas_right"),
    (50, "brain"),
    (label::TRUNC, "trunc"),
    (label::EXTREMITIES, "extremities"),
];
