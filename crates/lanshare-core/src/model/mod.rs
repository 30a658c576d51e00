//! 共享实体模型
//!
//! - **entity**: 文件/目录树（arena 存储，父节点通过索引引用）
//! - **sharing**: 每个 worker 进程私有的 uuid → 实体映射

pub mod entity;
pub mod sharing;

pub use entity::{BackupRecord, ClientEntry, Entry, EntryNode, FtpData, MobileEntry, ShareEntity};
pub use sharing::SharingModel;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// 文件列表接口路径
pub const FILE_LIST_URI: &str = "/file_list";
/// 下载接口路径
pub const DOWNLOAD_URI: &str = "/download";
/// FTP 服务唯一的登录用户名
pub const FTP_USER: &str = "a";

/// 共享方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareType {
    Http,
    Ftp,
}

impl ShareType {
    /// uuid 前缀，仅用于保持链接格式，不再反向解析
    pub fn prefix(self) -> char {
        match self {
            ShareType::Http => 'h',
            ShareType::Ftp => 'f',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShareType::Http => "http",
            ShareType::Ftp => "ftp",
        }
    }
}

impl fmt::Display for ShareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// FTP 传输参数
///
/// 同一祖先目录下的所有 FTP 共享复用同一组参数，也就复用同一个监听端口。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtpParams {
    pub port: u16,
    pub password: String,
    pub base_path: PathBuf,
}

impl FtpParams {
    /// 分配新的端口和密码
    pub fn allocate(base_path: PathBuf) -> Self {
        Self {
            port: crate::net::generate_ftp_port(),
            password: crate::net::generate_ftp_passwd(),
            base_path,
        }
    }
}

/// 本机 HTTP 服务的对外地址，用于生成浏览/下载链接
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub host: String,
    pub http_port: u16,
}

impl ServiceEndpoint {
    pub fn new(host: impl Into<String>, http_port: u16) -> Self {
        Self {
            host: host.into(),
            http_port,
        }
    }

    pub fn browse_url(&self, uuid: &str) -> String {
        format!(
            "http://{}:{}{}/{}",
            self.host, self.http_port, FILE_LIST_URI, uuid
        )
    }

    pub fn download_url(&self, uuid: &str) -> String {
        format!(
            "http://{}:{}{}/{}",
            self.host, self.http_port, DOWNLOAD_URI, uuid
        )
    }
}

/// HTTP 接口统一返回体
///
/// 业务错误也以 HTTP 200 返回，由 `errno` 区分。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub errno: u16,
    pub errmsg: String,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub const OK: u16 = 200;
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const INTERNAL: u16 = 500;

    pub fn ok(data: T) -> Self {
        Self {
            errno: Self::OK,
            errmsg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errno == Self::OK
    }
}
