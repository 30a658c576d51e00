//! 只读 FTP 服务端
//!
//! 每个监听端口一个 [`FtpListener`]：单一用户 `a`，以 `root` 为虚拟根目录，
//! 只支持浏览和下载。关闭监听器后立即停止接受新连接，已建立的会话在
//! 当前命令结束后断开。

use std::io::{self, SeekFrom};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::path::{confine, normalize, to_real};
use crate::logging::SHARER_TARGET;
use crate::model::FTP_USER;

/// 等待客户端连接数据端口的时间
const DATA_TIMEOUT: Duration = Duration::from_secs(30);

const FEATURES: &str = "211-Features:\r\n SIZE\r\n MDTM\r\n REST STREAM\r\n EPSV\r\n UTF8\r\n211 End\r\n";

/// 监听器配置
#[derive(Debug, Clone)]
pub struct FtpConfig {
    pub root: PathBuf,
    pub password: String,
}

/// 一个正在运行的监听器，drop 时关闭
#[derive(Debug)]
pub struct FtpListener {
    port: u16,
    shutdown: CancellationToken,
}

impl FtpListener {
    pub async fn bind(host: &str, port: u16, config: FtpConfig) -> io::Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        let port = listener.local_addr()?.port();
        let shutdown = CancellationToken::new();
        info!(
            "FTP listener on port {} serving {}",
            port,
            config.root.display()
        );
        tokio::spawn(accept_loop(listener, Arc::new(config), shutdown.clone()));
        Ok(Self { port, shutdown })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for FtpListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(listener: TcpListener, config: Arc<FtpConfig>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("FTP listener {:?} closed", listener.local_addr().ok());
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("FTP connection from {}", peer);
                    let session = Session::new(config.clone(), peer);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = session.run(stream, shutdown).await {
                            debug!("FTP session {} ended: {}", peer, e);
                        }
                    });
                }
                Err(e) => warn!("FTP accept failed: {}", e),
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

struct Session {
    config: Arc<FtpConfig>,
    peer: SocketAddr,
    user: Option<String>,
    logged_in: bool,
    cwd: String,
    rest: u64,
    passive: Option<TcpListener>,
}

async fn reply<W: AsyncWrite + Unpin>(w: &mut W, code: u16, msg: &str) -> io::Result<()> {
    w.write_all(format!("{code} {msg}\r\n").as_bytes()).await?;
    w.flush().await
}

/// 拆分命令动词和参数
fn split_command(line: &str) -> (String, &str) {
    let line = line.trim_end_matches(['\r', '\n']);
    match line.split_once(' ') {
        Some((verb, arg)) => (verb.to_ascii_uppercase(), arg),
        None => (line.to_ascii_uppercase(), ""),
    }
}

/// 去掉 `LIST -la` 之类的选项
fn strip_list_options(arg: &str) -> &str {
    let mut rest = arg.trim();
    while rest.starts_with('-') {
        rest = rest.split_once(' ').map_or("", |(_, r)| r).trim_start();
    }
    rest
}

fn list_line(name: &str, metadata: &std::fs::Metadata) -> String {
    let perms = if metadata.is_dir() {
        "drwxr-xr-x"
    } else {
        "-r--r--r--"
    };
    let modified = metadata
        .modified()
        .map(chrono::DateTime::<chrono::Local>::from)
        .unwrap_or_else(|_| chrono::Local::now());
    format!(
        "{} 1 owner group {:>13} {} {}\r\n",
        perms,
        metadata.len(),
        modified.format("%b %d %H:%M"),
        name
    )
}

impl Session {
    fn new(config: Arc<FtpConfig>, peer: SocketAddr) -> Self {
        Self {
            config,
            peer,
            user: None,
            logged_in: false,
            cwd: "/".to_string(),
            rest: 0,
            passive: None,
        }
    }

    async fn run(mut self, stream: TcpStream, shutdown: CancellationToken) -> io::Result<()> {
        let local_ip = stream.local_addr()?.ip();
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        reply(&mut writer, 220, "lanshare FTP service ready").await?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = tokio::select! {
                () = shutdown.cancelled() => {
                    let _ = reply(&mut writer, 421, "Service closing").await;
                    break;
                }
                read = reader.read_line(&mut line) => read?,
            };
            if read == 0 {
                break;
            }

            let (verb, arg) = split_command(&line);
            if verb == "PASS" {
                debug!("FTP {} -> PASS ****", self.peer);
            } else {
                debug!("FTP {} -> {} {}", self.peer, verb, arg);
            }
            if self.handle(&verb, arg, local_ip, &mut writer).await? == Flow::Quit {
                break;
            }
        }
        Ok(())
    }

    async fn handle<W: AsyncWrite + Unpin>(
        &mut self,
        verb: &str,
        arg: &str,
        local_ip: IpAddr,
        w: &mut W,
    ) -> io::Result<Flow> {
        match verb {
            "USER" => {
                self.user = Some(arg.trim().to_string());
                self.logged_in = false;
                reply(w, 331, "Password required").await?;
            }
            "PASS" => {
                if self.user.as_deref() == Some(FTP_USER) && arg == self.config.password {
                    self.logged_in = true;
                    info!(target: SHARER_TARGET, client = %self.peer.ip(), "FTP login");
                    reply(w, 230, "Login successful").await?;
                } else {
                    warn!(target: SHARER_TARGET, client = %self.peer.ip(), "FTP login failed");
                    reply(w, 530, "Login incorrect").await?;
                }
            }
            "QUIT" => {
                reply(w, 221, "Goodbye").await?;
                return Ok(Flow::Quit);
            }
            "SYST" => reply(w, 215, "UNIX Type: L8").await?,
            "FEAT" => {
                w.write_all(FEATURES.as_bytes()).await?;
                w.flush().await?;
            }
            "NOOP" => reply(w, 200, "OK").await?,
            "OPTS" => {
                if arg.trim().eq_ignore_ascii_case("UTF8 ON") {
                    reply(w, 200, "Always in UTF8 mode").await?;
                } else {
                    reply(w, 501, "Option not understood").await?;
                }
            }
            _ if !self.logged_in => reply(w, 530, "Please login with USER and PASS").await?,
            "PWD" | "XPWD" => {
                let msg = format!("\"{}\" is the current directory", self.cwd);
                reply(w, 257, &msg).await?;
            }
            "CWD" | "XCWD" => self.change_dir(arg, w).await?,
            "CDUP" | "XCUP" => self.change_dir("..", w).await?,
            "TYPE" => match arg.trim().to_ascii_uppercase().as_str() {
                "I" | "L 8" => reply(w, 200, "Type set to I").await?,
                "A" | "A N" => reply(w, 200, "Type set to A").await?,
                _ => reply(w, 504, "Type not supported").await?,
            },
            "MODE" => {
                if arg.trim().eq_ignore_ascii_case("S") {
                    reply(w, 200, "Mode set to S").await?;
                } else {
                    reply(w, 504, "Mode not supported").await?;
                }
            }
            "STRU" => {
                if arg.trim().eq_ignore_ascii_case("F") {
                    reply(w, 200, "Structure set to F").await?;
                } else {
                    reply(w, 504, "Structure not supported").await?;
                }
            }
            "PASV" => self.enter_passive(local_ip, false, w).await?,
            "EPSV" => self.enter_passive(local_ip, true, w).await?,
            "LIST" => self.list(arg, false, w).await?,
            "NLST" => self.list(arg, true, w).await?,
            "SIZE" => match self.metadata(arg).await {
                Some((_, m)) if m.is_file() => reply(w, 213, &m.len().to_string()).await?,
                _ => reply(w, 550, "No such file").await?,
            },
            "MDTM" => match self.metadata(arg).await.map(|(_, m)| m.modified()) {
                Some(Ok(modified)) => {
                    let stamp = chrono::DateTime::<chrono::Utc>::from(modified)
                        .format("%Y%m%d%H%M%S")
                        .to_string();
                    reply(w, 213, &stamp).await?;
                }
                _ => reply(w, 550, "No such file").await?,
            },
            "REST" => match arg.trim().parse::<u64>() {
                Ok(offset) => {
                    self.rest = offset;
                    reply(w, 350, &format!("Restarting at {offset}")).await?;
                }
                Err(_) => reply(w, 501, "Invalid offset").await?,
            },
            "RETR" => self.retrieve(arg, w).await?,
            "STOR" | "STOU" | "APPE" | "DELE" | "MKD" | "XMKD" | "RMD" | "XRMD" | "RNFR"
            | "RNTO" | "SITE" => reply(w, 550, "Permission denied").await?,
            _ => reply(w, 502, "Command not implemented").await?,
        }
        Ok(Flow::Continue)
    }

    /// 客户端路径对应的真实路径，越出根目录的一律视为不存在
    async fn resolve(&self, virtual_path: &str) -> Option<PathBuf> {
        confine(&self.config.root, &to_real(&self.config.root, virtual_path)).await
    }

    async fn metadata(&self, arg: &str) -> Option<(PathBuf, std::fs::Metadata)> {
        let path = self.resolve(&normalize(&self.cwd, arg)).await?;
        let metadata = fs::metadata(&path).await.ok()?;
        Some((path, metadata))
    }

    async fn change_dir<W: AsyncWrite + Unpin>(&mut self, arg: &str, w: &mut W) -> io::Result<()> {
        let target = normalize(&self.cwd, arg);
        let resolved = match self.resolve(&target).await {
            Some(path) => fs::metadata(path).await.ok(),
            None => None,
        };
        match resolved {
            Some(m) if m.is_dir() => {
                self.cwd = target;
                reply(w, 250, "Directory changed").await
            }
            _ => reply(w, 550, "No such directory").await,
        }
    }

    async fn enter_passive<W: AsyncWrite + Unpin>(
        &mut self,
        local_ip: IpAddr,
        extended: bool,
        w: &mut W,
    ) -> io::Result<()> {
        let listener = match TcpListener::bind((local_ip, 0)).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!("Failed to open passive port: {}", e);
                return reply(w, 425, "Cannot open passive connection").await;
            }
        };
        let port = listener.local_addr()?.port();
        self.passive = Some(listener);

        if extended {
            return reply(w, 229, &format!("Entering Extended Passive Mode (|||{port}|)")).await;
        }
        let IpAddr::V4(ip) = local_ip else {
            self.passive = None;
            return reply(w, 522, "Use EPSV for IPv6").await;
        };
        let [a, b, c, d] = ip.octets();
        let msg = format!(
            "Entering Passive Mode ({},{},{},{},{},{})",
            a,
            b,
            c,
            d,
            port >> 8,
            port & 0xff
        );
        reply(w, 227, &msg).await
    }

    /// 等待客户端连接被动端口
    async fn open_data(&mut self) -> Option<TcpStream> {
        let listener = self.passive.take()?;
        match tokio::time::timeout(DATA_TIMEOUT, listener.accept()).await {
            Ok(Ok((stream, _))) => Some(stream),
            Ok(Err(e)) => {
                warn!("Data connection failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Data connection timed out");
                None
            }
        }
    }

    async fn list<W: AsyncWrite + Unpin>(
        &mut self,
        arg: &str,
        names_only: bool,
        w: &mut W,
    ) -> io::Result<()> {
        let target = normalize(&self.cwd, strip_list_options(arg));
        let Some((path, metadata)) = self.metadata(&target).await else {
            return reply(w, 550, "No such file or directory").await;
        };

        let mut listing = String::new();
        if metadata.is_dir() {
            let mut entries = Vec::new();
            let mut dir = fs::read_dir(&path).await?;
            while let Some(entry) = dir.next_entry().await? {
                if let Ok(m) = entry.metadata().await {
                    entries.push((entry.file_name().to_string_lossy().into_owned(), m));
                }
            }
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (name, m) in &entries {
                if names_only {
                    listing.push_str(name);
                    listing.push_str("\r\n");
                } else {
                    listing.push_str(&list_line(name, m));
                }
            }
        } else {
            let name = target.rsplit('/').next().unwrap_or_default().to_string();
            if names_only {
                listing.push_str(&name);
                listing.push_str("\r\n");
            } else {
                listing.push_str(&list_line(&name, &metadata));
            }
        }

        let Some(mut data) = self.open_data().await else {
            return reply(w, 425, "Use PASV or EPSV first").await;
        };
        reply(w, 150, "Here comes the directory listing").await?;
        let sent = async {
            data.write_all(listing.as_bytes()).await?;
            data.shutdown().await
        }
        .await;
        match sent {
            Ok(()) => reply(w, 226, "Directory send OK").await,
            Err(_) => reply(w, 426, "Connection closed; transfer aborted").await,
        }
    }

    async fn retrieve<W: AsyncWrite + Unpin>(&mut self, arg: &str, w: &mut W) -> io::Result<()> {
        let offset = std::mem::take(&mut self.rest);
        let path = match self.metadata(arg).await {
            Some((path, m)) if m.is_file() => path,
            _ => return reply(w, 550, "No such file").await,
        };
        let file = File::open(&path).await;
        let mut file = match file {
            Ok(file) => file,
            Err(_) => return reply(w, 550, "Cannot open file").await,
        };
        if offset > 0 && file.seek(SeekFrom::Start(offset)).await.is_err() {
            return reply(w, 550, "Invalid restart offset").await;
        }

        let Some(mut data) = self.open_data().await else {
            return reply(w, 425, "Use PASV or EPSV first").await;
        };
        reply(w, 150, "Opening BINARY mode data connection").await?;

        let sent = async {
            let n = tokio::io::copy(&mut file, &mut data).await?;
            data.shutdown().await?;
            Ok::<_, io::Error>(n)
        }
        .await;
        match sent {
            Ok(n) => {
                info!(
                    target: SHARER_TARGET,
                    client = %self.peer.ip(),
                    "FTP download {} ({} bytes from offset {})",
                    path.display(),
                    n,
                    offset
                );
                reply(w, 226, "Transfer complete").await
            }
            Err(e) => {
                debug!("RETR aborted: {}", e);
                reply(w, 426, "Connection closed; transfer aborted").await
            }
        }
    }
}
