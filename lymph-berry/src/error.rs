//! 运行时错误.

use std::path::PathBuf;
use thiserror::Error;

/// 单个受试者处理 (或批处理配置) 的错误.
///
/// 除 [`StageError::InvalidConfig`] 和 [`StageError::WorkerPool`] 之外, 所有错误都只影响当前受试者.
#[derive(Error, Debug)]
pub enum StageError {
    /// 两个体数据的网格形状或空间元信息不一致.
    ///
    /// `pair` 形如 `"mask/atlas"`, `attribute` 为 `shape`, `spacing` 或 `orientation`.
    #[error("geometry mismatch between {pair}: {attribute} differs ({detail})")]
    GeometryMismatch {
        /// 不一致的体数据对.
        pair: &'static str,
        /// 不一致的属性.
        attribute: &'static str,
        /// 双方取值.
        detail: String,
    },

    /// 输入文件缺失或无法读取.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: nifti::NiftiError,
    },

    /// 输入文件能读取, 但内容不合规 (维数不对, 大小不符等).
    #[error("corrupt input {}: {reason}", path.display())]
    Corrupt {
        /// 文件路径.
        path: PathBuf,
        /// 原因.
        reason: String,
    },

    /// 受试者缺少必需的输入文件.
    #[error("missing input for subject {subject}: {what}")]
    MissingInput {
        /// 受试者编号.
        subject: String,
        /// 缺失内容.
        what: String,
    },

    /// 输出写入失败.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: std::io::Error,
    },

    /// nii 输出写入失败.
    #[error("failed to write volume {}: {source}", path.display())]
    WriteVolume {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: nifti::NiftiError,
    },

    /// 配置错误. 在处理任何受试者之前检测.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// 批处理工作线程池无法启动.
    #[error("cannot start worker pool: {0}")]
    WorkerPool(String),

    /// 同一批次中出现重复的受试者编号. 后出现者不处理, 以免覆盖前者的输出.
    #[error("duplicate subject id {subject}: already taken by {}", first.display())]
    DuplicateSubject {
        /// 受试者编号.
        subject: String,
        /// 先出现的同名受试者的 mask 路径.
        first: PathBuf,
    },
}

impl StageError {
    /// 是否是输入 I/O 类错误 (缺失/损坏)?
    #[inline]
    pub fn is_io_failure(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Corrupt { .. } | Self::MissingInput { .. }
        )
    }

    /// 简短的错误类别名, 用于批处理汇总.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GeometryMismatch { .. } => "GeometryMismatch",
            Self::Io { .. } | Self::Corrupt { .. } | Self::MissingInput { .. } => "IOFailure",
            Self::Write { .. } | Self::WriteVolume { .. } => "WriteFailure",
            Self::InvalidConfig(_) => "InvalidConfig",
            Self::WorkerPool(_) => "WorkerPool",
            Self::DuplicateSubject { .. } => "DuplicateSubject",
        }
    }
}

/// 带 [`StageError`] 的结果类型.
pub type StageResult<T> = Result<T, StageError>;

#[cfg(test)]
mod tests {
    use super::StageError;
    use std::path::PathBuf;

    #[test]
    fn test_kind() {
        let e = StageError::WorkerPool("no threads".into());
        assert_eq!(e.kind(), "WorkerPool");
        assert!(!e.is_io_failure());
        assert_eq!(e.to_string(), "cannot start worker pool: no threads");

        let e = StageError::DuplicateSubject {
            subject: "P1".into(),
            first: PathBuf::from("a/P1_LYM_label.nii.gz"),
        };
        assert_eq!(e.kind(), "DuplicateSubject");
        assert!(e.to_string().contains("a/P1_LYM_label.nii.gz"));

        assert_eq!(StageError::InvalidConfig("x".into()).kind(), "InvalidConfig");
    }
}
