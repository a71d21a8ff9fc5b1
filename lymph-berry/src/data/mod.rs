use std::ops::Index;
use std::path::Path;

use ndarray::{Array3, ArrayView, Axis, Ix3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::consts::label::is_lesion;
use crate::error::{StageError, StageResult};
use crate::{Idx3d, RegionCode};

mod geometry;
pub mod save;

pub use geometry::Geometry;

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 读取 nii 文件, 返回 header 和按 `(z, h, w)` 组织的数据.
///
/// 允许末尾存在长度为 1 的多余维度 (如 `[W, H, z, 1]`), 其他情况视为损坏文件.
macro_rules! read_nifti {
    ($path: expr, $elem: ty) => {{
        let path: &Path = $path;
        let obj = ReaderOptions::new()
            .read_file(path)
            .map_err(|source| StageError::Io {
                path: path.to_owned(),
                source,
            })?;
        let header = Box::new(obj.header().clone());
        let geometry = Geometry::from_header(&header);

        let ndim = header.dim[0];
        if ndim < 3 || header.dim[4..=(ndim as usize).min(7)].iter().any(|&d| d > 1) {
            return Err(StageError::Corrupt {
                path: path.to_owned(),
                reason: format!("expected a 3D volume, header dim is {:?}", header.dim),
            });
        }

        // [W, H, z] -> [z, H, W].
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = obj
            .into_volume()
            .into_ndarray::<$elem>()
            .map_err(|source| StageError::Io {
                path: path.to_owned(),
                source,
            })?
            .reversed_axes();
        let raw = data.as_standard_layout().into_owned().into_raw_vec();

        let data = Array3::<$elem>::from_shape_vec(geometry.shape(), raw).map_err(|e| {
            StageError::Corrupt {
                path: path.to_owned(),
                reason: e.to_string(),
            }
        })?;
        (header, geometry, data)
    }};
}

/// 3D nii 体数据的共用属性和部分通用操作.
pub trait VolumeAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取几何信息.
    fn geometry(&self) -> &Geometry;

    /// 获取数据形状大小 `(z, h, w)`.
    #[inline]
    fn shape(&self) -> Idx3d {
        self.geometry().shape()
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        self.geometry().size()
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取单个体素分辨率 `[z, h, w]`, 以毫米为单位.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        self.geometry().spacing()
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.geometry().voxel_mm3()
    }
}

/// 为三种体数据生成相同的基础结构与方法.
macro_rules! impl_volume {
    ($name: ident, $elem: ty, $what: literal) => {
        impl VolumeAttr for $name {
            #[inline]
            fn header(&self) -> &NiftiHeader {
                &self.header
            }

            #[inline]
            fn geometry(&self) -> &Geometry {
                &self.geometry
            }
        }

        impl Index<Idx3d> for $name {
            type Output = $elem;

            #[inline]
            fn index(&self, index: Idx3d) -> &Self::Output {
                &self.data[index]
            }
        }

        impl $name {
            #[doc = concat!("打开 nii 文件格式的 3D ", $what, ". `path` 为 nii 文件的本地路径.")]
            pub fn open<P: AsRef<Path>>(path: P) -> StageResult<Self> {
                let (header, geometry, data) = read_nifti!(path.as_ref(), $elem);
                Ok(Self {
                    header,
                    geometry,
                    data,
                })
            }

            #[doc = concat!("根据 `(z, h, w)` 组织的裸数据和几何信息直接创建 3D ", $what, ".")]
            ///
            /// 若数据形状与 `geometry` 不符, 返回 `StageError::Corrupt`.
            pub fn from_array(data: Array3<$elem>, geometry: Geometry) -> StageResult<Self> {
                let (z, h, w) = geometry.shape();
                if data.shape() != [z, h, w] {
                    return Err(StageError::Corrupt {
                        path: "<memory>".into(),
                        reason: format!(
                            "array shape {:?} does not match geometry {:?}",
                            data.shape(),
                            geometry.shape()
                        ),
                    });
                }
                let header = Box::new(geometry.to_header());
                Ok(Self {
                    header,
                    geometry,
                    data,
                })
            }

            /// 获得数据的一份不可变 shallow copy.
            #[inline]
            pub fn data(&self) -> ArrayView<'_, $elem, Ix3> {
                self.data.view()
            }

            /// 获取给定位置的体素值. 越界时返回 `None`.
            #[inline]
            pub fn get(&self, pos: Idx3d) -> Option<&$elem> {
                self.data.get(pos)
            }

            /// 获取水平切片个数.
            #[inline]
            pub fn len_z(&self) -> usize {
                self.data.len_of(Axis(0))
            }
        }
    };
}

/// nii 格式的 3D 二值病灶分割. 非 0 体素即为病灶.
#[derive(Debug, Clone)]
pub struct LesionMask {
    header: BoxedHeader,
    geometry: Geometry,
    data: Array3<u8>,
}

impl_volume!(LesionMask, u8, "病灶 mask");

impl LesionMask {
    /// 获取病灶体素个数.
    #[inline]
    pub fn lesion_voxels(&self) -> usize {
        self.data.iter().filter(|p| is_lesion(**p)).count()
    }

    /// 是否不含任何病灶体素?
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|p| is_lesion(*p))
    }
}

/// nii 格式的 3D 解剖图谱. 体素值为区域编码.
#[derive(Debug, Clone)]
pub struct AtlasVolume {
    header: BoxedHeader,
    geometry: Geometry,
    data: Array3<RegionCode>,
}

impl_volume!(AtlasVolume, RegionCode, "解剖图谱");

impl AtlasVolume {
    /// 获取图谱中值为 `code` 的体素个数.
    #[inline]
    pub fn count(&self, code: RegionCode) -> usize {
        self.data.iter().filter(|p| **p == code).count()
    }
}

/// nii 格式的 3D 强度数据 (如 PET SUV). 数值以 `f32` 保存.
#[derive(Debug, Clone)]
pub struct IntensityVolume {
    header: BoxedHeader,
    geometry: Geometry,
    data: Array3<f32>,
}

impl_volume!(IntensityVolume, f32, "强度数据");

/// 同一受试者的病灶 mask, 解剖图谱和 (可选的) 强度数据.
///
/// 构造时保证三者几何一致; 之后只读.
#[derive(Debug, Clone)]
pub struct SubjectVolumes {
    mask: LesionMask,
    atlas: AtlasVolume,
    intensity: Option<IntensityVolume>,
}

impl SubjectVolumes {
    /// 组合三个体数据. 几何不一致时返回 `StageError::GeometryMismatch`.
    pub fn new(
        mask: LesionMask,
        atlas: AtlasVolume,
        intensity: Option<IntensityVolume>,
    ) -> StageResult<Self> {
        mask.geometry().ensure_same(atlas.geometry(), "mask/atlas")?;
        if let Some(ref pet) = intensity {
            mask.geometry().ensure_same(pet.geometry(), "mask/intensity")?;
        }
        Ok(Self {
            mask,
            atlas,
            intensity,
        })
    }

    /// 分别打开三个 nii 文件并校验几何一致性. 任一文件失败则返回 `Err`.
    pub fn open(
        mask_path: impl AsRef<Path>,
        atlas_path: impl AsRef<Path>,
        intensity_path: Option<impl AsRef<Path>>,
    ) -> StageResult<Self> {
        let mask = LesionMask::open(mask_path)?;
        let atlas = AtlasVolume::open(atlas_path)?;
        let intensity = intensity_path.map(IntensityVolume::open).transpose()?;
        Self::new(mask, atlas, intensity)
    }

    /// 病灶 mask.
    #[inline]
    pub fn mask(&self) -> &LesionMask {
        &self.mask
    }

    /// 解剖图谱.
    #[inline]
    pub fn atlas(&self) -> &AtlasVolume {
        &self.atlas
    }

    /// 强度数据 (若有).
    #[inline]
    pub fn intensity(&self) -> Option<&IntensityVolume> {
        self.intensity.as_ref()
    }

    /// 共同的几何信息.
    #[inline]
    pub fn geometry(&self) -> &Geometry {
        self.mask.geometry()
    }
}
