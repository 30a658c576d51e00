//! 网络与标识工具函数

use rand::Rng;
use rand::seq::SliceRandom;
use std::net::{Ipv4Addr, TcpListener};

use crate::model::ShareType;

const PASSWD_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890";

/// FTP 端口随机范围
pub const FTP_PORT_RANGE: std::ops::RangeInclusive<u16> = 10000..=65500;

/// 32 位十六进制 uuid 片段
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// 带共享方式前缀的根 uuid
pub fn generate_share_uuid(share_type: ShareType) -> String {
    format!("{}{}", share_type.prefix(), generate_uuid())
}

/// 5 位互不重复的字母数字密码
pub fn generate_ftp_passwd() -> String {
    let mut rng = rand::thread_rng();
    PASSWD_CHARS
        .choose_multiple(&mut rng, 5)
        .map(|&c| c as char)
        .collect()
}

/// 在 [`FTP_PORT_RANGE`] 中挑选一个本机未被占用的端口
pub fn generate_ftp_port() -> u16 {
    let mut rng = rand::thread_rng();
    loop {
        let port = rng.gen_range(FTP_PORT_RANGE);
        if !port_in_use(port) {
            return port;
        }
    }
}

/// 端口是否已被本机占用
pub fn port_in_use(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_err()
}

/// 本机局域网地址，探测失败时退回回环地址
pub fn local_host() -> String {
    match local_ip_address::local_ip() {
        Ok(ip) => ip.to_string(),
        Err(e) => {
            tracing::warn!("Failed to detect LAN address: {}, using 127.0.0.1", e);
            Ipv4Addr::LOCALHOST.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ftp_passwd_chars_unique() {
        for _ in 0..50 {
            let pwd = generate_ftp_passwd();
            assert_eq!(pwd.len(), 5);
            let unique: HashSet<char> = pwd.chars().collect();
            assert_eq!(unique.len(), 5);
            assert!(pwd.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_share_uuid_prefix() {
        assert!(generate_share_uuid(ShareType::Http).starts_with('h'));
        assert!(generate_share_uuid(ShareType::Ftp).starts_with('f'));
        assert_eq!(generate_uuid().len(), 32);
    }

    #[test]
    fn test_port_in_use() {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(port_in_use(port));
        assert!(FTP_PORT_RANGE.contains(&generate_ftp_port()));
    }
}
