//! 体数据的持久化存储.

use ndarray::ArrayView3;
use nifti::writer::WriterOptions;
use nifti::NiftiHeader;
use std::path::Path;

use super::{AtlasVolume, IntensityVolume, LesionMask, VolumeAttr};
use crate::error::{StageError, StageResult};
use crate::lesion::LesionId;

/// 表明一个可以按原样以 nii 格式持久化存储的体数据.
///
/// 写出时沿用自身 header 的空间信息, 数据类型由元素类型决定.
pub trait NiftiWrite {
    /// 按原样将体数据保存到 `path` 路径. 以 `.gz` 结尾时自动压缩.
    fn save<P: AsRef<Path>>(&self, path: P) -> StageResult<()>;
}

macro_rules! impl_nifti_write {
    ($($volume: ty),+) => {
        $(
            impl NiftiWrite for $volume {
                fn save<P: AsRef<Path>>(&self, path: P) -> StageResult<()> {
                    // (z, H, W) -> [W, H, z]
                    let data = self.data().permuted_axes([2, 1, 0]);
                    WriterOptions::new(path.as_ref())
                        .reference_header(self.header())
                        .write_nifti(&data)
                        .map_err(|source| StageError::WriteVolume {
                            path: path.as_ref().to_owned(),
                            source,
                        })
                }
            }
        )+
    };
}

impl_nifti_write!(LesionMask, AtlasVolume, IntensityVolume);

/// 保存病灶实例图: 每个体素的值为其所属病灶编号, 背景为 0.
///
/// `labels` 按 `(z, h, w)` 组织, `header` 一般取自原病灶 mask.
pub fn save_instance_map<P: AsRef<Path>>(
    path: P,
    header: &NiftiHeader,
    labels: ArrayView3<'_, LesionId>,
) -> StageResult<()> {
    let data = labels.permuted_axes([2, 1, 0]);
    WriterOptions::new(path.as_ref())
        .reference_header(header)
        .write_nifti(&data)
        .map_err(|source| StageError::WriteVolume {
            path: path.as_ref().to_owned(),
            source,
        })
}
