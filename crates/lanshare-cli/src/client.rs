//! IPC Client - 与守护进程通信

use anyhow::Result;
use lanshare_core::config::SettingUpdate;
use lanshare_core::model::ShareType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

pub fn socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("lanshare.sock")
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    Share {
        path: PathBuf,
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

#[derive(Serialize, Deserialize, Debug)]
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

#[derive(Serialize, Deserialize, Debug, Clone)]
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

pub async fn send_request(request: IpcRequest) -> Result<IpcResponse> {
    let path = socket_path();

    let stream = match UnixStream::connect(&path).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ 无法连接到守护进程: {}", e);
            eprintln!("   请确保 lanshare-daemon 正在运行");
            return Err(e.into());
        }
    };

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // 发送请求
    let json = serde_json::to_string(&request)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    // 读取响应
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: IpcResponse = serde_json::from_str(&line)?;

    match &response {
        IpcResponse::Ok { message } => println!("✅ {}", message),
        IpcResponse::Error { message } => eprintln!("❌ {}", message),
        _ => {}
    }

    Ok(response)
}
