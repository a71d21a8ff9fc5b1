//! 数据集路径解析.

use std::env;
use std::path::{Path, PathBuf};

/// 数据集根目录环境变量.
pub const DATA_DIR_ENV: &str = "LYMPH_DATA_DIR";

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}

/// 获取 PET/MR 数据集基本路径.
///
/// 1. 若环境变量 `$LYMPH_DATA_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/lymphoma`. 无法确定用户主目录时返回 `None`.
pub fn data_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var(DATA_DIR_ENV) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => home_dataset_dir_with(["lymphoma"]),
    }
}
