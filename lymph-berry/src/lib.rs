#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 从 PET/MR 淋巴瘤病灶分割 (二值 mask) 和解剖图谱 (器官 + 躯干/四肢)
//! 出发, 提取病灶实例, 定位解剖区域, 计算定量指标并给出分期汇总.
//!
//! 该 crate 仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 重采样/配准、图谱生成都在上游完成. 本 crate 只检查三个体数据的网格形状和空间元信息是否一致,
//!   不一致则该受试者直接失败, 不做任何隐式重采样.
//! 2. 所有受试者相互独立. 批处理中单个受试者失败不会影响其他受试者.
//!
//! # 开发计划
//!
//! ### 体数据加载与几何一致性校验 ✅
//!
//! 实现位于 `lymph-berry/src/data`.
//!
//! ### 26-连通三维连通域提取 ✅
//!
//! 行优先扫描, 按首个体素出现顺序分配病灶编号, 结果可复现.
//! 同时保留 6-连通版本以便对照实验.
//!
//! 实现位于 `lymph-berry/src/lesion/extract.rs`.
//!
//! ### 解剖区域重叠分类 ✅
//!
//! 最大重叠计数优先, 计数相同时区域编码小者优先. 与背景完全重叠的病灶记为 "unclassified".
//!
//! 实现位于 `lymph-berry/src/lesion/classify.rs`.
//!
//! ### 体积/质心/强度统计 ✅
//!
//! 百分位数使用顺序统计量之间的线性插值.
//!
//! 实现位于 `lymph-berry/src/lesion/metrics.rs`.
//!
//! ### 分期汇总 ✅
//!
//! 分期规则表由调用方注入 (JSON 配置), 本库不猜测临床含义.
//!
//! 实现位于 `lymph-berry/src/staging`.
//!
//! ### 报告输出 ✅
//!
//! CSV 病灶表, JSON 受试者汇总, 控制台文本摘要.
//!
//! 实现位于 `lymph-berry/src/report.rs`.
//!
//! ### 受试者发现与配置 ✅
//!
//! 按文件名模式发现 mask/图谱/PET 三元组; 分析参数与分期表统一由 JSON 配置给出.
//!
//! 实现位于 `lymph-berry/src/dataset.rs`, `lymph-berry/src/config.rs`.
//!
//! ### 批处理 ✅
//!
//! 以受试者为单位的 `rayon` 线程池, 部分失败容忍.
//!
//! 实现位于 `lymph-berry/src/pipeline.rs`.

/// 三维索引 `(z, h, w)`, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 区域编码类型. 图谱体素值以 `u16` 保存.
pub type RegionCode = u16;

/// 3D nii 体数据基础结构与几何信息.
mod data;

pub use data::save::{save_instance_map, NiftiWrite};
pub use data::{AtlasVolume, Geometry, IntensityVolume, LesionMask, SubjectVolumes, VolumeAttr};

pub mod config;
pub mod consts;
pub mod dataset;
pub mod error;
pub mod lesion;
pub mod pipeline;
pub mod prelude;
pub mod region;
pub mod report;
pub mod staging;

pub use error::{StageError, StageResult};
