//! LanShare Daemon
//!
//! 后台守护进程，负责：
//! - 共享登记与备份恢复
//! - 启动和结束 HTTP/FTP worker 进程
//! - 通过 Unix Socket 与 CLI 通信
//!
//! 以 `worker <http|ftp>` 子命令启动时作为 worker 运行，由守护进程
//! 通过 stdin/stdout 驱动。

mod controller;
mod ipc;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use lanshare_core::config::ShareSettings;
use lanshare_core::logging::{self, LogHandle};
use lanshare_core::model::ShareType;
use lanshare_core::service::worker::run_worker;
use tokio::sync::{Mutex, Notify};

use controller::Controller;

#[derive(Parser)]
#[command(name = "lanshare-daemon", version, about = "局域网文件共享后台服务")]
struct Cli {
    /// 配置文件路径（默认为用户配置目录下的 lanshare/settings.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand)]
enum Mode {
    /// 作为共享服务 worker 运行（由守护进程启动）
    #[command(hide = true)]
    Worker {
        #[arg(value_enum)]
        kind: WorkerKind,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum WorkerKind {
    Http,
    Ftp,
}

impl From<WorkerKind> for ShareType {
    fn from(kind: WorkerKind) -> Self {
        match kind {
            WorkerKind::Http => ShareType::Http,
            WorkerKind::Ftp => ShareType::Ftp,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(ShareSettings::config_path);
    let settings = ShareSettings::load_from(&config_path);

    let log = logging::init(&settings.log, "info,lanshare_core=debug")?;
    // 桥接依赖中的 log 记录到 tracing
    let _ = tracing_log::LogTracer::init();

    match cli.mode {
        Some(Mode::Worker { kind }) => run_worker(kind.into(), settings, Some(log)).await,
        None => run_daemon(settings, config_path, log).await,
    }
}

async fn run_daemon(settings: ShareSettings, config_path: PathBuf, log: LogHandle) -> Result<()> {
    tracing::info!("LanShare Daemon starting...");

    let (mut controller, mut notifications) = Controller::new(settings, config_path, log)?;
    controller.restore();
    let controller = Arc::new(Mutex::new(controller));
    let stop = Arc::new(Notify::new());

    // worker 上报的访问事件
    let recorder = controller.clone();
    tokio::spawn(async move {
        while let Some(event) = notifications.recv().await {
            recorder.lock().await.record(&event);
        }
    });

    let ipc_handle = tokio::spawn(ipc::run_ipc_server(controller.clone(), stop.clone()));

    tokio::select! {
        res = ipc_handle => {
            tracing::error!("IPC server exited: {:?}", res);
        }
        () = stop.notified() => {
            tracing::info!("Stop requested");
        }
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("Interrupted");
        }
    }

    controller.lock().await.shutdown();
    let _ = std::fs::remove_file(ipc::socket_path());
    tracing::info!("LanShare Daemon stopped");
    Ok(())
}
