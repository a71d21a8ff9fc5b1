//! 三维连通域提取.
//!
//! 按行优先 `(z, h, w)` 扫描病灶 mask, 每遇到一个尚未归属的病灶体素就以其为种子做广度优先搜索.
//! 保留下来的连通域按种子出现顺序依次编号, 因此同一输入总是得到同样的编号.

use itertools::iproduct;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::{LesionId, LesionInstance};
use crate::consts::label::is_lesion;
use crate::data::{LesionMask, VolumeAttr};
use crate::Idx3d;

/// 三维体素邻接规则.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Connectivity {
    /// 仅共面的 6 个体素相邻.
    Face6,

    /// 共面, 共边, 共顶点的 26 个体素均相邻.
    #[default]
    Full26,
}

impl Connectivity {
    /// 邻域偏移量 `(dz, dh, dw)`.
    pub fn offsets(&self) -> Vec<(isize, isize, isize)> {
        iproduct!(-1isize..=1, -1isize..=1, -1isize..=1)
            .filter(|&(z, h, w)| {
                let manhattan = z.abs() + h.abs() + w.abs();
                match self {
                    Self::Face6 => manhattan == 1,
                    Self::Full26 => manhattan != 0,
                }
            })
            .collect()
    }
}

impl TryFrom<u8> for Connectivity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            6 => Ok(Self::Face6),
            26 => Ok(Self::Full26),
            other => Err(format!("connectivity must be 6 or 26, got {other}")),
        }
    }
}

impl From<Connectivity> for u8 {
    fn from(c: Connectivity) -> Self {
        match c {
            Connectivity::Face6 => 6,
            Connectivity::Full26 => 26,
        }
    }
}

/// 连通域提取结果.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// 保留的病灶, 按编号升序.
    pub lesions: Vec<LesionInstance>,

    /// 因体素个数不足 `min_size` 而丢弃的连通域个数.
    pub dropped: usize,

    shape: Idx3d,
}

impl Extraction {
    /// 生成病灶实例图: 每个体素的值为所属病灶编号, 其余为 0.
    pub fn instance_map(&self) -> Array3<LesionId> {
        let mut map = Array3::zeros(self.shape);
        for lesion in self.lesions.iter() {
            for &pos in lesion.voxels() {
                map[pos] = lesion.id();
            }
        }
        map
    }

    /// 保留的病灶个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.lesions.len()
    }

    /// 是否没有保留任何病灶?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lesions.is_empty()
    }
}

/// 提取 `mask` 中所有按 `connectivity` 规则连通的病灶, 丢弃体素个数小于 `min_size` 的连通域.
///
/// 空 mask 返回空结果, 不是错误.
pub fn extract(mask: &LesionMask, connectivity: Connectivity, min_size: usize) -> Extraction {
    let shape = mask.shape();
    let offsets = connectivity.offsets();
    let data = mask.data();

    let mut visited = Array3::from_elem(shape, false);
    let mut lesions = Vec::new();
    let mut dropped = 0usize;
    let mut q = VecDeque::with_capacity(64);

    for (seed, &pix) in data.indexed_iter() {
        if !is_lesion(pix) || visited[seed] {
            continue;
        }
        visited[seed] = true;
        q.push_back(seed);
        let mut component = Vec::with_capacity(16);

        while let Some(cur) = q.pop_front() {
            component.push(cur);
            for neigh in neighbours(cur, &offsets, shape) {
                if !visited[neigh] && is_lesion(data[neigh]) {
                    visited[neigh] = true;
                    q.push_back(neigh);
                }
            }
        }

        if component.len() < min_size {
            dropped += 1;
            continue;
        }
        let id = lesions.len() as LesionId + 1;
        lesions.push(LesionInstance::new(id, component));
    }

    log::debug!(
        "extracted {} lesion(s) with {:?}, dropped {} below {} voxel(s)",
        lesions.len(),
        connectivity,
        dropped,
        min_size
    );
    Extraction {
        lesions,
        dropped,
        shape,
    }
}

/// 获取 `pos` 在 `offsets` 下的邻居坐标. 越界坐标会被过滤掉.
#[inline]
fn neighbours<'a>(
    (z, h, w): Idx3d,
    offsets: &'a [(isize, isize, isize)],
    (lz, lh, lw): Idx3d,
) -> impl Iterator<Item = Idx3d> + 'a {
    offsets.iter().filter_map(move |&(dz, dh, dw)| {
        let p = (
            z.checked_add_signed(dz)?,
            h.checked_add_signed(dh)?,
            w.checked_add_signed(dw)?,
        );
        (p.0 < lz && p.1 < lh && p.2 < lw).then_some(p)
    })
}
