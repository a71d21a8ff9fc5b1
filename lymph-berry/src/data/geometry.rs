//! 体数据的空间几何信息: 网格形状, 体素分辨率, 体素到物理坐标的仿射变换.
//!
//! 索引统一按 `(z, h, w)` 组织, 与 nifti 文件中的 `[W, H, z]` 相反.
//! 仿射矩阵则保持 nifti 惯例, 作用于 `(i, j, k) = (w, h, z)`.

use nifti::NiftiHeader;
use serde::Serialize;

use crate::error::{StageError, StageResult};
use crate::Idx3d;

/// 浮点元信息比较容差. header 中保存的是 `f32`, 不同工具写出的值会有微小差异.
const GEOMETRY_TOLERANCE: f64 = 1e-4;

/// 体数据的空间几何信息.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Geometry {
    /// `(z, h, w)` 体素个数.
    shape: Idx3d,

    /// `[z, h, w]` 方向体素分辨率, 毫米.
    spacing: [f64; 3],

    /// 体素 `(i, j, k)` 到物理坐标 `(x, y, z)` 的 3x4 仿射矩阵.
    affine: [[f64; 4]; 3],
}

/// 将 (W, H, z) 转换成 (z, H, W).
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

impl Geometry {
    /// 以对角仿射 (原点为 0) 创建几何信息. `spacing` 按 `[z, h, w]` 给出.
    pub fn with_spacing(shape: Idx3d, spacing: [f64; 3]) -> Self {
        let [z, h, w] = spacing;
        Self {
            shape,
            spacing,
            affine: [
                [w, 0.0, 0.0, 0.0],
                [0.0, h, 0.0, 0.0],
                [0.0, 0.0, z, 0.0],
            ],
        }
    }

    /// 各向同性版本的 [`Self::with_spacing`].
    #[inline]
    pub fn isotropic(shape: Idx3d, mm: f64) -> Self {
        Self::with_spacing(shape, [mm; 3])
    }

    /// 替换仿射矩阵.
    #[inline]
    pub fn with_affine(mut self, affine: [[f64; 4]; 3]) -> Self {
        self.affine = affine;
        self
    }

    /// 从 nifti header 读取几何信息.
    ///
    /// 仿射矩阵优先取 sform (`sform_code > 0`), 其次是 qform 四元数,
    /// 都没有时退化为按分辨率缩放的单位阵.
    pub fn from_header(h: &NiftiHeader) -> Self {
        let shape = get_shape_from_header(h);
        let [_, pw, ph, pz, ..] = h.pixdim;
        let spacing = [pz.abs() as f64, ph.abs() as f64, pw.abs() as f64];

        let affine = if h.sform_code > 0 {
            [h.srow_x, h.srow_y, h.srow_z].map(|r| r.map(f64::from))
        } else if h.qform_code > 0 {
            qform_affine(h)
        } else {
            Self::with_spacing(shape, spacing).affine
        };
        Self {
            shape,
            spacing,
            affine,
        }
    }

    /// 以该几何信息生成一个最小可用的 nifti header (sform 形式).
    pub fn to_header(&self) -> NiftiHeader {
        let (z, h, w) = self.shape;
        let [sz, sh, sw] = self.spacing;
        let mut header = NiftiHeader::default();
        header.dim = [3, w as u16, h as u16, z as u16, 1, 1, 1, 1];
        header.pixdim = [1.0, sw as f32, sh as f32, sz as f32, 1.0, 1.0, 1.0, 1.0];
        header.sform_code = 1;
        header.qform_code = 0;
        let [x, y, zr] = self.affine.map(|r| r.map(|v| v as f32));
        (header.srow_x, header.srow_y, header.srow_z) = (x, y, zr);
        header
    }

    /// 网格形状 `(z, h, w)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.shape
    }

    /// 体素分辨率 `[z, h, w]`, 毫米.
    #[inline]
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// 仿射矩阵.
    #[inline]
    pub fn affine(&self) -> &[[f64; 4]; 3] {
        &self.affine
    }

    /// 体素个数.
    #[inline]
    pub fn size(&self) -> usize {
        let (z, h, w) = self.shape;
        z * h * w
    }

    /// 单个体素的体积, 立方毫米.
    #[inline]
    pub fn voxel_mm3(&self) -> f64 {
        self.spacing.iter().product()
    }

    /// 将 (可以是小数的) 体素坐标 `(z, h, w)` 转换为物理坐标 `[x, y, z]`.
    pub fn to_world(&self, (z, h, w): (f64, f64, f64)) -> [f64; 3] {
        self.affine.map(|[a, b, c, t]| a * w + b * h + c * z + t)
    }

    /// 检查 `other` 与 `self` 是否处于同一网格. `pair` 用于错误信息.
    ///
    /// 依次比较 shape, spacing, orientation (含原点), 报告第一个不一致的属性.
    pub fn ensure_same(&self, other: &Geometry, pair: &'static str) -> StageResult<()> {
        if self.shape != other.shape {
            return Err(StageError::GeometryMismatch {
                pair,
                attribute: "shape",
                detail: format!("{:?} vs {:?}", self.shape, other.shape),
            });
        }
        if !all_close(self.spacing.iter(), other.spacing.iter()) {
            return Err(StageError::GeometryMismatch {
                pair,
                attribute: "spacing",
                detail: format!("{:?} vs {:?}", self.spacing, other.spacing),
            });
        }
        if !all_close(self.affine.iter().flatten(), other.affine.iter().flatten()) {
            return Err(StageError::GeometryMismatch {
                pair,
                attribute: "orientation",
                detail: format!("{:?} vs {:?}", self.affine, other.affine),
            });
        }
        Ok(())
    }
}

#[inline]
fn all_close<'a>(a: impl Iterator<Item = &'a f64>, b: impl Iterator<Item = &'a f64>) -> bool {
    a.zip(b).all(|(x, y)| (x - y).abs() <= GEOMETRY_TOLERANCE)
}

/// 由 qform 四元数和 qoffset 计算仿射矩阵.
fn qform_affine(h: &NiftiHeader) -> [[f64; 4]; 3] {
    let (b, c, d) = (
        h.quatern_b as f64,
        h.quatern_c as f64,
        h.quatern_d as f64,
    );
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
    let r = [
        [
            a * a + b * b - c * c - d * d,
            2.0 * (b * c - a * d),
            2.0 * (b * d + a * c),
        ],
        [
            2.0 * (b * c + a * d),
            a * a + c * c - b * b - d * d,
            2.0 * (c * d - a * b),
        ],
        [
            2.0 * (b * d - a * c),
            2.0 * (c * d + a * b),
            a * a + d * d - b * b - c * c,
        ],
    ];
    let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
    let [_, pi, pj, pk, ..] = h.pixdim.map(f64::from);
    let scale = [pi, pj, pk * qfac];
    let offset = [h.quatern_x, h.quatern_y, h.quatern_z].map(f64::from);
    let mut out = [[0.0; 4]; 3];
    for (row, (r, t)) in out.iter_mut().zip(r.iter().zip(offset)) {
        for col in 0..3 {
            row[col] = r[col] * scale[col];
        }
        row[3] = t;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::Geometry;
    use crate::StageError;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-8
    }

    #[test]
    fn test_geometry_world() {
        let g = Geometry::with_spacing((4, 5, 6), [3.0, 2.0, 1.0]);
        let [x, y, z] = g.to_world((1.0, 2.0, 3.0));
        assert!(f64_eq(x, 3.0));
        assert!(f64_eq(y, 4.0));
        assert!(f64_eq(z, 3.0));
        assert!(f64_eq(g.voxel_mm3(), 6.0));
    }

    #[test]
    fn test_geometry_mismatch_attribute() {
        let a = Geometry::isotropic((2, 2, 2), 1.0);

        let b = Geometry::isotropic((2, 2, 3), 1.0);
        match a.ensure_same(&b, "mask/atlas").unwrap_err() {
            StageError::GeometryMismatch {
                pair, attribute, ..
            } => {
                assert_eq!(pair, "mask/atlas");
                assert_eq!(attribute, "shape");
            }
            e => panic!("unexpected error: {e}"),
        }

        let c = Geometry::isotropic((2, 2, 2), 2.0);
        assert!(matches!(
            a.ensure_same(&c, "mask/atlas"),
            Err(StageError::GeometryMismatch {
                attribute: "spacing",
                ..
            })
        ));

        let mut shifted = *a.affine();
        shifted[0][3] = 10.0;
        let d = a.clone().with_affine(shifted);
        assert!(matches!(
            a.ensure_same(&d, "mask/intensity"),
            Err(StageError::GeometryMismatch {
                attribute: "orientation",
                ..
            })
        ));

        // header 浮点噪声不算不一致.
        let mut noisy = *a.affine();
        noisy[1][1] += 1e-6;
        assert!(a.ensure_same(&a.clone().with_affine(noisy), "mask/atlas").is_ok());
    }

    #[test]
    fn test_geometry_header_round_trip() {
        let g = Geometry::with_spacing((3, 4, 5), [2.5, 0.8, 0.8]);
        let back = Geometry::from_header(&g.to_header());
        assert!(g.ensure_same(&back, "header").is_ok());
    }
}
