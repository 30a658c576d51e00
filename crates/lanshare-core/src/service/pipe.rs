//! 进程间 JSON 行管道
//!
//! 每条消息占一行。解析失败的行被记录后丢弃，不会中断管道。

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// 从 `reader` 逐行读取消息并转发到 `tx`，直到 EOF 或接收端关闭
pub async fn read_json_lines<T, R>(reader: R, tx: mpsc::UnboundedSender<T>)
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str(&line) {
                    Ok(msg) => {
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping malformed message: {} ({})", line, e),
                }
            }
            Ok(None) => {
                debug!("Pipe reached EOF");
                break;
            }
            Err(e) => {
                warn!("Pipe read error: {}", e);
                break;
            }
        }
    }
}

/// 把 `rx` 中的消息逐行写入 `writer`，直到发送端全部关闭或写入失败
pub async fn write_json_lines<T, W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<T>)
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        let mut line = match serde_json::to_vec(&msg) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode message: {}", e);
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = writer.write_all(&line).await {
            warn!("Pipe write error: {}", e);
            break;
        }
        if let Err(e) = writer.flush().await {
            warn!("Pipe flush error: {}", e);
            break;
        }
    }
}
