//! 共享密码凭据
//!
//! 凭据格式: `pbkdf2_sha256$<base64(PBKDF2-HMAC-SHA256(pwd, salt, 120000))>`
//!
//! 盐值 (`secret_key`) 与派生结果 (`credentials`) 一起随共享实体保存；
//! 校验在本地完成，不涉及网络往返。

use base64::{Engine as _, engine::general_purpose};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::model::ShareEntity;

const ITERATIONS: u32 = 120_000;
const HASH_PREFIX: &str = "pbkdf2_sha256$";
const SALT_LEN: usize = 16;

/// 盐值与派生凭据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretPair {
    pub secret_key: String,
    pub credentials: String,
}

pub struct Credentials;

impl Credentials {
    /// 生成凭据
    pub fn encode(secret_key: &str, pwd: &str) -> String {
        let mut hash = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            pwd.as_bytes(),
            secret_key.as_bytes(),
            ITERATIONS,
            &mut hash,
        );
        format!("{}{}", HASH_PREFIX, general_purpose::STANDARD.encode(hash))
    }

    /// 用随机盐值为密码生成一组凭据
    pub fn generate(pwd: &str) -> SecretPair {
        let secret_key: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LEN)
            .map(char::from)
            .collect();
        let credentials = Self::encode(&secret_key, pwd);
        SecretPair {
            secret_key,
            credentials,
        }
    }

    /// 凭据校验
    ///
    /// 未设置密码或开启了免密时任何输入都通过。
    pub fn verification(entity: &ShareEntity, pwd: &str) -> bool {
        if entity.free_secret {
            return true;
        }
        entity
            .secret()
            .is_none_or(|secret| Self::verify_pair(secret, pwd))
    }

    /// 只针对凭据本身校验，不考虑免密开关
    ///
    /// 派生计算较慢，HTTP 服务在释放共享表读锁后通过 `spawn_blocking` 调用。
    pub fn verify_pair(secret: &SecretPair, pwd: &str) -> bool {
        if secret.secret_key.is_empty() {
            return true;
        }
        let encoded = Self::encode(&secret.secret_key, pwd);
        constant_time_eq(encoded.as_bytes(), secret.credentials.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ShareType;

    fn entity_with(secret: Option<SecretPair>) -> (tempfile::TempDir, ShareEntity) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"a").unwrap();
        let entity = ShareEntity::new(&path, ShareType::Http, None, secret).unwrap();
        (dir, entity)
    }

    #[test]
    fn test_encode_format() {
        let encoded = Credentials::encode("salt", "password");
        assert!(encoded.starts_with("pbkdf2_sha256$"));
        // 32 字节摘要的 base64 长度为 44
        assert_eq!(encoded.len(), "pbkdf2_sha256$".len() + 44);
        assert_eq!(encoded, Credentials::encode("salt", "password"));
        assert_ne!(encoded, Credentials::encode("salt2", "password"));
    }

    #[test]
    fn test_no_secret_accepts_anything() {
        let (_dir, entity) = entity_with(None);
        assert!(Credentials::verification(&entity, ""));
        assert!(Credentials::verification(&entity, "whatever"));
    }

    #[test]
    fn test_secret_checked() {
        let (_dir, mut entity) = entity_with(Some(Credentials::generate("open sesame")));
        assert!(Credentials::verification(&entity, "open sesame"));
        assert!(!Credentials::verification(&entity, "open"));
        assert!(!Credentials::verification(&entity, ""));

        entity.free_secret = true;
        assert!(Credentials::verification(&entity, "open"));
    }
}
