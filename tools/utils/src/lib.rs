//! 命令行工具依赖的通用组件.

use std::io::{self, Write};

pub mod loader;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
pub fn sep_to<W: Write>(mut w: W) -> io::Result<()> {
    writeln!(&mut w, "{SEP}")
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 解析工作线程数: 0 表示使用全部可并行核心.
#[inline]
pub fn workers_or_cpus(workers: usize) -> usize {
    if workers == 0 {
        cpus()
    } else {
        workers
    }
}
