//! worker 进程入口
//!
//! 由 `lanshare-daemon worker <http|ftp>` 调用：stdin 读命令，stdout 写
//! 访问事件，日志只写 stderr 和日志文件。stdin 关闭（控制进程退出）
//! 时命令循环结束，worker 随之退出。

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::ftp::FtpService;
use super::http::HttpService;
use super::pipe::{read_json_lines, write_json_lines};
use super::{Command, Notification};
use crate::config::{LogSettings, SettingUpdate, ShareSettings};
use crate::logging::LogHandle;
use crate::model::ShareType;

/// worker 内的日志设置，命令循环独占
pub struct SettingsApplier {
    settings: LogSettings,
    handle: Option<LogHandle>,
}

impl SettingsApplier {
    pub fn new(settings: LogSettings, handle: Option<LogHandle>) -> Self {
        Self { settings, handle }
    }

    pub fn settings(&self) -> &LogSettings {
        &self.settings
    }

    /// 应用设置修改，日志相关的修改会立即重新打开日志文件
    pub fn apply(&mut self, update: &SettingUpdate) {
        if !self.settings.apply(update) {
            return;
        }
        info!("Setting changed: {:?}", update);
        if let Some(handle) = &self.handle
            && let Err(e) = handle.apply(&self.settings)
        {
            warn!("Failed to reload log files: {}", e);
        }
    }
}

/// 运行 worker 直到 stdin 关闭
pub async fn run_worker(
    kind: ShareType,
    settings: ShareSettings,
    log: Option<LogHandle>,
) -> anyhow::Result<()> {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (note_tx, note_rx) = mpsc::unbounded_channel::<Notification>();

    tokio::spawn(read_json_lines(tokio::io::stdin(), cmd_tx));
    let writer = tokio::spawn(write_json_lines(tokio::io::stdout(), note_rx));

    let applier = SettingsApplier::new(settings.log.clone(), log);
    info!("Starting {} worker (pid {})", kind, std::process::id());

    match kind {
        ShareType::Http => {
            let listener =
                TcpListener::bind((settings.bind_host.as_str(), settings.http_port)).await?;
            let service = HttpService::new(settings.endpoint(), applier, note_tx);
            service.run(listener, cmd_rx).await?;
        }
        ShareType::Ftp => {
            let service = FtpService::new(settings.bind_host.clone(), applier);
            drop(note_tx);
            service.run(cmd_rx).await;
        }
    }

    // 把已排队的事件写完再退出
    let _ = writer.await;
    info!("{} worker stopped", kind);
    Ok(())
}
