//! 注册阶段错误
//!
//! 只有注册错误会直接抛给调用方；请求和传输阶段的错误都在各自
//! 的上下文中被转换成结构化结果。

use std::path::PathBuf;

use crate::model::ShareType;

#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("{path:?} is already shared over {share_type}")]
    Duplicate { path: PathBuf, share_type: ShareType },

    #[error("{0:?} does not exist")]
    NotFound(PathBuf),

    #[error("cannot read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup file is malformed: {0}")]
    Backup(#[from] serde_json::Error),
}

impl ShareError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
