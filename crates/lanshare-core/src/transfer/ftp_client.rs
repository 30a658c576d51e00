//! 最小的 FTP 客户端
//!
//! 只实现下载需要的命令：登录、`TYPE I`、`CWD`、`SIZE`、被动模式、
//! `REST` 与 `RETR`。数据连接直接交给调用方读取，便于在两次读取之间
//! 检查暂停标记。

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum FtpError {
    #[error("FTP I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected FTP reply {code}: {message}")]
    Reply { code: u16, message: String },

    #[error("malformed FTP reply: {0}")]
    Malformed(String),

    #[error("FTP connection closed by server")]
    Closed,
}

/// 一条（可能是多行的）服务器响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub message: String,
}

impl Reply {
    fn expect(self, codes: &[u16]) -> Result<Self, FtpError> {
        if codes.contains(&self.code) {
            Ok(self)
        } else {
            Err(FtpError::Reply {
                code: self.code,
                message: self.message,
            })
        }
    }
}

pub struct FtpClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
}

impl FtpClient {
    pub async fn connect(host: &str, port: u16) -> Result<Self, FtpError> {
        let stream = TcpStream::connect((host, port)).await?;
        let peer = stream.peer_addr()?;
        let (read_half, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half),
            writer,
            peer,
        };
        client.read_reply().await?.expect(&[220])?;
        Ok(client)
    }

    pub async fn login(&mut self, user: &str, password: &str) -> Result<(), FtpError> {
        let reply = self
            .command(&format!("USER {user}"))
            .await?
            .expect(&[230, 331])?;
        if reply.code == 331 {
            self.command(&format!("PASS {password}"))
                .await?
                .expect(&[230])?;
        }
        Ok(())
    }

    /// 发送一条命令并读取响应
    pub async fn command(&mut self, cmd: &str) -> Result<Reply, FtpError> {
        if cmd.starts_with("PASS ") {
            debug!("FTP <- PASS ****");
        } else {
            debug!("FTP <- {}", cmd);
        }
        self.writer.write_all(cmd.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        self.read_reply().await
    }

    /// 读取一条响应，多行响应以 `<code> ` 开头的行结束
    pub async fn read_reply(&mut self) -> Result<Reply, FtpError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(FtpError::Closed);
        }
        let first = line.trim_end().to_string();
        let code = parse_code(&first)?;

        let mut message = first.get(4..).unwrap_or_default().to_string();
        if first.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{code} ");
            loop {
                line.clear();
                if self.reader.read_line(&mut line).await? == 0 {
                    return Err(FtpError::Closed);
                }
                let text = line.trim_end();
                if text.starts_with(&terminator) {
                    break;
                }
                message.push('\n');
                message.push_str(text);
            }
        }
        debug!("FTP -> {} {}", code, message);
        Ok(Reply { code, message })
    }

    pub async fn type_binary(&mut self) -> Result<(), FtpError> {
        self.command("TYPE I").await?.expect(&[200])?;
        Ok(())
    }

    pub async fn cwd(&mut self, dir: &str) -> Result<(), FtpError> {
        self.command(&format!("CWD {dir}")).await?.expect(&[250])?;
        Ok(())
    }

    pub async fn size(&mut self, name: &str) -> Result<u64, FtpError> {
        let reply = self.command(&format!("SIZE {name}")).await?.expect(&[213])?;
        reply
            .message
            .trim()
            .parse()
            .map_err(|_| FtpError::Malformed(reply.message.clone()))
    }

    /// 进入被动模式，返回数据端口地址
    ///
    /// 数据连接总是连向控制连接的对端地址，忽略服务器声明的 IP。
    pub async fn pasv(&mut self) -> Result<SocketAddr, FtpError> {
        let reply = self.command("PASV").await?.expect(&[227])?;
        let port = parse_pasv_port(&reply.message)?;
        Ok(SocketAddr::new(self.peer.ip(), port))
    }

    /// 从 `offset` 开始下载，返回数据连接
    ///
    /// 读完数据后需要调用 [`FtpClient::finish_transfer`] 读取结束响应。
    pub async fn retr(&mut self, name: &str, offset: u64) -> Result<TcpStream, FtpError> {
        let addr = self.pasv().await?;
        let data = TcpStream::connect(addr).await?;
        if offset > 0 {
            self.command(&format!("REST {offset}"))
                .await?
                .expect(&[350])?;
        }
        self.command(&format!("RETR {name}"))
            .await?
            .expect(&[125, 150])?;
        Ok(data)
    }

    pub async fn finish_transfer(&mut self) -> Result<(), FtpError> {
        self.read_reply().await?.expect(&[226, 250])?;
        Ok(())
    }

    /// 中途放弃传输后读取服务器的结束响应，超时则忽略
    pub async fn discard_transfer_reply(&mut self, wait: Duration) {
        match tokio::time::timeout(wait, self.read_reply()).await {
            Ok(Ok(reply)) => debug!("Transfer aborted with reply {}", reply.code),
            Ok(Err(e)) => debug!("Transfer aborted: {}", e),
            Err(_) => debug!("No reply after aborting transfer"),
        }
    }

    pub async fn quit(mut self) {
        let _ = self.command("QUIT").await;
    }
}

fn parse_code(line: &str) -> Result<u16, FtpError> {
    line.get(..3)
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| FtpError::Malformed(line.to_string()))
}

/// 解析 `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` 中的端口
fn parse_pasv_port(message: &str) -> Result<u16, FtpError> {
    let malformed = || FtpError::Malformed(message.to_string());
    let start = message.find('(').ok_or_else(malformed)?;
    let end = message[start..].find(')').ok_or_else(malformed)? + start;
    let numbers: Vec<u16> = message[start + 1..end]
        .split(',')
        .map(|n| n.trim().parse::<u16>())
        .collect::<Result<_, _>>()
        .map_err(|_| malformed())?;
    match numbers.as_slice() {
        [_, _, _, _, high, low] if *high <= 255 && *low <= 255 => Ok(high * 256 + low),
        _ => Err(malformed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pasv_port() {
        assert_eq!(
            parse_pasv_port("Entering Passive Mode (192,168,1,2,39,16)").unwrap(),
            39 * 256 + 16
        );
        assert!(parse_pasv_port("Entering Passive Mode").is_err());
        assert!(parse_pasv_port("(1,2,3,4,5)").is_err());
        assert!(parse_pasv_port("(1,2,3,4,300,1)").is_err());
    }

    #[test]
    fn test_parse_code() {
        assert_eq!(parse_code("226 Transfer complete").unwrap(), 226);
        assert!(parse_code("ok").is_err());
    }

    #[tokio::test]
    async fn test_multiline_reply() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream
                .write_all(b"220 hi\r\n211-Features:\r\n SIZE\r\n211 End\r\n")
                .await
                .unwrap();
            // 保持连接直到客户端读取完毕
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut client = FtpClient::connect("127.0.0.1", port).await.unwrap();
        let reply = client.read_reply().await.unwrap();
        assert_eq!(reply.code, 211);
        assert!(reply.message.contains("SIZE"));
    }
}
