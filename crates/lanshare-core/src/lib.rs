//! LanShare Core Library
//!
//! 局域网文件共享后端的核心实现库
//!
//! # 模块
//!
//! - **model**: 共享实体（文件/目录树）与各端视图
//! - **registry**: 全局共享登记表，带 JSON 备份
//! - **credentials**: 共享密码的派生与校验
//! - **service**: HTTP/FTP worker 进程及其管理器
//! - **transfer**: 支持暂停和断点续传的下载引擎
//! - **logging**: 控制台与文件日志
//!
//! # 使用示例
//!
//! ```ignore
//! use lanshare_core::{FuseSharingModel, ServiceProcessManager, ShareType, WorkerProgram};
//!
//! let mut registry = FuseSharingModel::with_backup(settings.backup_path.clone())?;
//! let (mut manager, mut notifications) = ServiceProcessManager::new(WorkerProgram::current_exe(vec![])?);
//!
//! let entity = registry.share(Path::new("/srv/docs"), ShareType::Http, Some("secret"))?;
//! manager.add_share(entity);
//! println!("{}", entity.to_dict_client(&settings.endpoint()).browse_url);
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod model;
pub mod net;
pub mod registry;
pub mod service;
pub mod transfer;

pub use config::{LogSettings, SettingUpdate, ShareSettings};
pub use credentials::{Credentials, SecretPair};
pub use error::ShareError;
pub use logging::LogHandle;
pub use model::{ClientEntry, FtpData, ServiceEndpoint, ShareEntity, ShareType};
pub use registry::FuseSharingModel;
pub use service::{Command, Notification, ServiceProcessManager, WorkerProgram};
pub use transfer::{
    DownloadEvent, DownloadJob, DownloadStatus, EngineConfig, FailureReason, FtpBatch, JobId,
    TransferEngine,
};
