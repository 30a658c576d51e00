//! 断点续传下载引擎
//!
//! 配套下载器使用的传输层，消费共享链接并从 HTTP/FTP 服务下载文件：
//!
//! - **HTTP**: 先进先出队列，每批最多 5 个任务并发；本地已有部分文件时
//!   使用 `Range: bytes=<已下载大小>-` 续传
//! - **FTP**: 按批次处理，每批获取一次连接参数，每个文件使用独立的
//!   控制连接，使用 `REST` 续传
//!
//! 暂停是协作式的：[`TransferEngine::pause`] 只做标记，传输循环在读取
//! 下一块数据前检查，发出一次 [`DownloadStatus::Pause`] 后返回，保留
//! 已下载的部分。

pub mod browse;
pub mod engine;
pub mod ftp_client;

mod ftp;
mod http;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub use browse::fetch_listing;
pub use engine::{EngineConfig, TransferEngine};
pub use ftp_client::{FtpClient, FtpError};

/// 下载任务标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 单个文件的下载任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub id: JobId,
    pub url: String,
    /// 相对下载目录的保存路径
    pub relative_path: PathBuf,
    pub file_name: String,
    /// 受密码保护的共享需要的密码
    pub password: Option<String>,
}

impl DownloadJob {
    pub fn new(url: impl Into<String>, relative_path: impl Into<PathBuf>) -> Self {
        let relative_path = relative_path.into();
        let file_name = relative_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            id: JobId::next(),
            url: url.into(),
            relative_path,
            file_name,
            password: None,
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub(crate) fn local_path(&self, download_dir: &Path) -> PathBuf {
        download_dir.join(&self.relative_path)
    }
}

/// 同一个 FTP 共享下的一批任务
///
/// `params_url` 为该共享（或其中某个目录）的下载链接，用来获取 FTP
/// 连接参数；任务的 `relative_path` 相对于这个节点的所在目录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpBatch {
    pub params_url: String,
    pub password: Option<String>,
    pub jobs: Vec<DownloadJob>,
}

/// 下载失败原因
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("failed to connect to the sharing host")]
    ConnectionRefused,

    #[error("remote error: {0}")]
    RemoteError(String),

    #[error("the file no longer exists on the sharing host")]
    RemoteDeleted,

    #[error("connection lost during download")]
    Disconnected,

    #[error("FTP service is unavailable, make sure it is running on the sharing host")]
    FtpUnavailable,

    #[error("FTP login failed")]
    FtpLoginFailed,

    #[error("the directory containing the file no longer exists")]
    DirectoryGone,

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl FailureReason {
    pub(crate) fn io(e: &std::io::Error) -> Self {
        Self::Unknown(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    /// 下载中，百分比
    Doing(u8),
    Pause,
    Success,
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadEvent {
    pub job: JobId,
    pub status: DownloadStatus,
}

/// 单个任务的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Done,
    Paused,
}

#[derive(Debug, Default)]
struct PauseState {
    active: HashSet<JobId>,
    pending: HashSet<JobId>,
}

/// 待暂停的任务集合
///
/// 只记录排队中或正在下载的任务；任务结束时连同暂停标记一起移除。
#[derive(Debug, Clone, Default)]
pub struct PauseSet(Arc<Mutex<PauseState>>);

impl PauseSet {
    /// 任务入队，清除旧的暂停标记
    pub fn activate(&self, job: JobId) {
        if let Ok(mut state) = self.0.lock() {
            state.pending.remove(&job);
            state.active.insert(job);
        }
    }

    /// 任务结束
    pub fn retire(&self, job: JobId) {
        if let Ok(mut state) = self.0.lock() {
            state.active.remove(&job);
            state.pending.remove(&job);
        }
    }

    /// 标记暂停；未入队或已结束的任务忽略
    pub fn mark(&self, job: JobId) {
        if let Ok(mut state) = self.0.lock() {
            if state.active.contains(&job) {
                state.pending.insert(job);
            }
        }
    }

    /// 取出标记，返回任务是否应当暂停
    pub fn take(&self, job: JobId) -> bool {
        self.0.lock().is_ok_and(|mut state| state.pending.remove(&job))
    }

    /// 待处理的暂停标记数
    pub fn pending(&self) -> usize {
        self.0.lock().map_or(0, |state| state.pending.len())
    }
}

/// 进度百分比
pub(crate) fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    u8::try_from(done.min(total) * 100 / total).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_set_take_once() {
        let set = PauseSet::default();
        let job = JobId::next();
        set.activate(job);
        set.mark(job);
        set.mark(job);
        assert!(set.take(job));
        assert!(!set.take(job));

        set.mark(job);
        set.activate(job);
        assert!(!set.take(job));
    }

    #[test]
    fn test_pause_set_ignores_inactive_jobs() {
        let set = PauseSet::default();
        let unknown = JobId::next();
        set.mark(unknown);
        assert!(!set.take(unknown));
        assert_eq!(set.pending(), 0);

        let job = JobId::next();
        set.activate(job);
        set.mark(job);
        set.retire(job);
        assert_eq!(set.pending(), 0);
        set.mark(job);
        assert_eq!(set.pending(), 0);
    }

    #[test]
    fn test_job_file_name() {
        let job = DownloadJob::new("http://h/download/x", "docs/sub/b.txt");
        assert_eq!(job.file_name, "b.txt");
        assert_ne!(job.id, DownloadJob::new("u", "a").id);
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(5, 10), 50);
        assert_eq!(percent(11, 10), 100);
    }
}
