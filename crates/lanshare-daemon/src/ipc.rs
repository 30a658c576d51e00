//! IPC Server - Unix Domain Socket 通信
//!
//! 每行一个 JSON 请求，按 `type` 字段区分，每个请求回复一行。

use anyhow::Result;
use lanshare_core::config::SettingUpdate;
use lanshare_core::model::ShareType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, Notify};

use crate::controller::Controller;

pub fn socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("lanshare.sock")
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    Share {
        path: PathBuf,
        #[serde(default)]
        ftp: bool,
        password: Option<String>,
    },
    Unshare {
        uuid: String,
    },
    List,
    FreeSecret {
        uuid: String,
        value: bool,
    },
    Settings {
        update: SettingUpdate,
    },
    CloseFtp,
    Status,
    Stop,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Ok { message: String },
    Error { message: String },
    Shares { shares: Vec<ShareInfo> },
    Status {
        http_pid: Option<u32>,
        ftp_pid: Option<u32>,
        shares: usize,
    },
}

impl IpcResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self::Ok {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// 列表中的一条共享
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShareInfo {
    pub uuid: String,
    pub path: PathBuf,
    pub share_type: ShareType,
    pub is_dir: bool,
    pub browse_url: String,
    pub download_url: String,
    pub ftp_port: Option<u16>,
    pub needs_password: bool,
    pub browse_number: u64,
    pub download_number: u64,
}

pub async fn run_ipc_server(controller: Arc<Mutex<Controller>>, stop: Arc<Notify>) -> Result<()> {
    let path = socket_path();

    // 删除旧的 socket 文件
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)?;
    tracing::info!("IPC server listening on {:?}", path);

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let controller = controller.clone();
                let stop = stop.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, controller, stop).await {
                        tracing::debug!("IPC client error: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("Failed to accept IPC connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: UnixStream,
    controller: Arc<Mutex<Controller>>,
    stop: Arc<Notify>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<IpcRequest>(&line) {
            Ok(request) => {
                tracing::debug!("IPC request: {:?}", request);
                let stopping = request == IpcRequest::Stop;
                let response = controller.lock().await.handle(request);
                if stopping {
                    stop.notify_one();
                }
                response
            }
            Err(e) => IpcResponse::error(format!("Invalid request: {e}")),
        };

        writer
            .write_all(serde_json::to_string(&response)?.as_bytes())
            .await?;
        writer.write_all(b"\n").await?;
        line.clear();
    }

    Ok(())
}
