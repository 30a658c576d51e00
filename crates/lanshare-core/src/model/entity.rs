//! 文件/目录实体
//!
//! 一次共享对应一个 [`ShareEntity`]。目录在构造时被完整递归遍历，
//! 所有后代节点存放在同一个 arena (`Vec<EntryNode>`) 中，父子关系通过
//! 索引表示，根节点固定为下标 0。构造完成后树结构不再变化，只有
//! `free_secret` 与计数器会被后端修改。
//!
//! # uuid 格式
//!
//! - 根节点: `h<32 hex>` (HTTP) 或 `f<32 hex>` (FTP)
//! - 后代节点: `<父节点 uuid>><32 hex>`，例如 `h1a..>9c..>04..`

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{FTP_USER, FtpParams, ServiceEndpoint, ShareType};
use crate::credentials::SecretPair;
use crate::error::ShareError;

/// 组合 uuid 的分隔符
pub const UUID_SEPARATOR: char = '>';

/// arena 中的单个节点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryNode {
    /// 本节点自身的 uuid 片段
    pub id: String,
    /// 从根节点开始拼接的完整 uuid
    pub uuid: String,
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    /// 注册时的文件大小，目录为 0
    pub size: u64,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// 一个已注册的共享
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareEntity {
    share_type: ShareType,
    ftp: Option<FtpParams>,
    secret: Option<SecretPair>,
    /// 临时免密开关，对所有后代生效
    pub free_secret: bool,
    pub browse_number: u64,
    pub download_number: u64,
    pub is_sharing: bool,
    nodes: Vec<EntryNode>,
}

impl ShareEntity {
    /// 为 `path` 创建新的共享实体
    ///
    /// `reuse_ftp` 为祖先目录已有 FTP 共享的参数；为 `None` 时重新分配
    /// 端口与密码。HTTP 共享忽略该参数。
    pub fn new(
        path: &Path,
        share_type: ShareType,
        reuse_ftp: Option<FtpParams>,
        secret: Option<SecretPair>,
    ) -> Result<Self, ShareError> {
        let uuid = crate::net::generate_share_uuid(share_type);
        Self::build(path, uuid, share_type, reuse_ftp, secret)
    }

    /// 从备份记录恢复，保留原有的根 uuid 与 FTP 参数
    pub fn restore(record: &BackupRecord) -> Result<Self, ShareError> {
        let ftp = match (&record.pwd, record.port, &record.ftp_base_path) {
            (Some(password), Some(port), Some(base_path)) => Some(FtpParams {
                port,
                password: password.clone(),
                base_path: base_path.clone(),
            }),
            _ => None,
        };
        let secret = match (&record.secret_key, &record.credentials) {
            (Some(secret_key), Some(credentials)) => Some(SecretPair {
                secret_key: secret_key.clone(),
                credentials: credentials.clone(),
            }),
            _ => None,
        };
        Self::build(
            &record.path,
            record.uuid.clone(),
            record.share_type,
            ftp,
            secret,
        )
    }

    fn build(
        path: &Path,
        uuid: String,
        share_type: ShareType,
        ftp: Option<FtpParams>,
        secret: Option<SecretPair>,
    ) -> Result<Self, ShareError> {
        let path = normalize_path(path);
        let metadata = fs::metadata(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ShareError::NotFound(path.clone())
            } else {
                ShareError::io(&path, e)
            }
        })?;
        let is_dir = metadata.is_dir();

        let ftp = match share_type {
            ShareType::Http => None,
            ShareType::Ftp => Some(ftp.unwrap_or_else(|| {
                let base_path = if is_dir {
                    path.clone()
                } else {
                    path.parent().map_or_else(|| path.clone(), Path::to_path_buf)
                };
                FtpParams::allocate(base_path)
            })),
        };

        let root = EntryNode {
            id: uuid.clone(),
            uuid,
            name: file_name_of(&path),
            path,
            is_dir,
            size: if is_dir { 0 } else { metadata.len() },
            parent: None,
            children: Vec::new(),
        };
        let mut nodes = vec![root];
        if is_dir {
            walk_dir(&mut nodes, 0)?;
        }

        Ok(Self {
            share_type,
            ftp,
            secret,
            free_secret: false,
            browse_number: 0,
            download_number: 0,
            is_sharing: false,
            nodes,
        })
    }

    pub fn uuid(&self) -> &str {
        &self.nodes[0].uuid
    }

    pub fn share_type(&self) -> ShareType {
        self.share_type
    }

    pub fn target_path(&self) -> &Path {
        &self.nodes[0].path
    }

    pub fn is_dir(&self) -> bool {
        self.nodes[0].is_dir
    }

    pub fn ftp(&self) -> Option<&FtpParams> {
        self.ftp.as_ref()
    }

    pub fn secret(&self) -> Option<&SecretPair> {
        self.secret.as_ref()
    }

    /// 是否需要密码才能访问
    pub fn needs_password(&self) -> bool {
        self.secret.is_some() && !self.free_secret
    }

    /// 树中的节点总数（包括根节点）
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Entry<'_> {
        Entry {
            share: self,
            idx: 0,
        }
    }

    /// 按组合 uuid 逐级查找节点
    pub fn resolve(&self, uuid: &str) -> Option<Entry<'_>> {
        let mut segments = uuid.split(UUID_SEPARATOR);
        if segments.next()? != self.nodes[0].id {
            return None;
        }

        let mut idx = 0;
        for segment in segments {
            idx = *self.nodes[idx]
                .children
                .iter()
                .find(|&&child| self.nodes[child].id == segment)?;
        }
        Some(Entry { share: self, idx })
    }

    /// 遍历所有节点（先序）
    pub fn entries(&self) -> impl Iterator<Item = Entry<'_>> {
        (0..self.nodes.len()).map(move |idx| Entry { share: self, idx })
    }

    pub fn to_dict_client(&self, endpoint: &ServiceEndpoint) -> ClientEntry {
        self.root().to_dict_client(endpoint)
    }

    pub fn to_dict_mobile(&self, endpoint: &ServiceEndpoint) -> MobileEntry {
        self.root().to_dict_mobile(endpoint)
    }

    pub fn to_ftp_data(&self, endpoint: &ServiceEndpoint) -> Option<FtpData> {
        self.root().to_ftp_data(endpoint)
    }

    /// 生成备份记录
    pub fn to_dump_backup(&self) -> BackupRecord {
        BackupRecord {
            path: self.target_path().to_path_buf(),
            uuid: self.uuid().to_string(),
            share_type: self.share_type,
            is_dir: self.is_dir(),
            pwd: self.ftp.as_ref().map(|f| f.password.clone()),
            port: self.ftp.as_ref().map(|f| f.port),
            ftp_base_path: self.ftp.as_ref().map(|f| f.base_path.clone()),
            secret_key: self.secret.as_ref().map(|s| s.secret_key.clone()),
            credentials: self.secret.as_ref().map(|s| s.credentials.clone()),
        }
    }
}

/// 递归遍历目录，将子节点追加到 arena
fn walk_dir(nodes: &mut Vec<EntryNode>, parent: usize) -> Result<(), ShareError> {
    let dir = nodes[parent].path.clone();
    let read_dir = fs::read_dir(&dir).map_err(|e| ShareError::io(&dir, e))?;

    for dir_entry in read_dir {
        let dir_entry = dir_entry.map_err(|e| ShareError::io(&dir, e))?;
        let path = dir_entry.path();
        let file_type = dir_entry
            .file_type()
            .map_err(|e| ShareError::io(&path, e))?;

        // 符号链接按目标类型记录，但不进入链接目录，避免环路
        let (is_dir, size, descend) = if file_type.is_symlink() {
            match fs::metadata(&path) {
                Ok(m) if m.is_dir() => (true, 0, false),
                Ok(m) => (false, m.len(), false),
                Err(_) => continue,
            }
        } else if file_type.is_dir() {
            (true, 0, true)
        } else {
            let len = dir_entry
                .metadata()
                .map_err(|e| ShareError::io(&path, e))?
                .len();
            (false, len, false)
        };

        let id = crate::net::generate_uuid();
        let uuid = format!("{}{}{}", nodes[parent].uuid, UUID_SEPARATOR, id);
        let idx = nodes.len();
        nodes.push(EntryNode {
            id,
            uuid,
            name: dir_entry.file_name().to_string_lossy().into_owned(),
            path,
            is_dir,
            size,
            parent: Some(parent),
            children: Vec::new(),
        });
        nodes[parent].children.push(idx);

        if descend {
            walk_dir(nodes, idx)?;
        }
    }

    Ok(())
}

/// 转为绝对路径并去掉末尾分隔符
fn normalize_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    absolute.components().collect()
}

fn file_name_of(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.to_string_lossy().into_owned(),
        |n| n.to_string_lossy().into_owned(),
    )
}

/// 树中某个节点的只读视图
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    share: &'a ShareEntity,
    idx: usize,
}

impl<'a> Entry<'a> {
    pub fn share(&self) -> &'a ShareEntity {
        self.share
    }

    pub fn node(&self) -> &'a EntryNode {
        &self.share.nodes[self.idx]
    }

    pub fn uuid(&self) -> &'a str {
        &self.node().uuid
    }

    pub fn file_name(&self) -> &'a str {
        &self.node().name
    }

    pub fn path(&self) -> &'a Path {
        &self.node().path
    }

    pub fn is_dir(&self) -> bool {
        self.node().is_dir
    }

    pub fn is_root(&self) -> bool {
        self.idx == 0
    }

    /// 访问时重新确认路径仍然存在
    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    pub fn parent(&self) -> Option<Entry<'a>> {
        self.node().parent.map(|idx| Entry {
            share: self.share,
            idx,
        })
    }

    pub fn children(self) -> impl Iterator<Item = Entry<'a>> + 'a {
        let share = self.share;
        self.node()
            .children
            .iter()
            .map(move |&idx| Entry { share, idx })
    }

    /// 相对 FTP 根目录的工作目录，始终以 `/` 开头
    ///
    /// 文件为其所在目录，目录为其自身。
    pub fn ftp_cwd(&self) -> String {
        let Some(ftp) = self.share.ftp.as_ref() else {
            return "/".to_string();
        };
        let Ok(relative) = self.path().strip_prefix(&ftp.base_path) else {
            return "/".to_string();
        };
        let dir = if self.is_dir() {
            Some(relative)
        } else {
            relative.parent()
        };
        let parts: Vec<String> = dir
            .map(|p| {
                p.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        format!("/{}", parts.join("/"))
    }

    /// 给远端浏览客户端的视图
    pub fn to_dict_client(&self, endpoint: &ServiceEndpoint) -> ClientEntry {
        let node = self.node();
        ClientEntry {
            uuid: node.uuid.clone(),
            file_name: node.name.clone(),
            share_type: self.share.share_type,
            is_dir: node.is_dir,
            size: (!node.is_dir).then_some(node.size),
            download_url: endpoint.download_url(&node.uuid),
            browse_url: endpoint.browse_url(&node.uuid),
            children: self.children().map(|c| c.to_dict_client(endpoint)).collect(),
        }
    }

    /// 给移动端网页的视图，额外携带本地路径
    pub fn to_dict_mobile(&self, endpoint: &ServiceEndpoint) -> MobileEntry {
        let node = self.node();
        MobileEntry {
            uuid: node.uuid.clone(),
            file_name: node.name.clone(),
            share_type: self.share.share_type,
            is_dir: node.is_dir,
            size: (!node.is_dir).then_some(node.size),
            target_path: node.path.clone(),
            need_password: self.share.needs_password(),
            download_url: endpoint.download_url(&node.uuid),
            browse_url: endpoint.browse_url(&node.uuid),
            children: self.children().map(|c| c.to_dict_mobile(endpoint)).collect(),
        }
    }

    /// FTP 客户端连接参数，HTTP 共享返回 `None`
    pub fn to_ftp_data(&self, endpoint: &ServiceEndpoint) -> Option<FtpData> {
        let ftp = self.share.ftp.as_ref()?;
        Some(FtpData {
            uuid: self.uuid().to_string(),
            host: endpoint.host.clone(),
            port: ftp.port,
            user: FTP_USER.to_string(),
            passwd: ftp.password.clone(),
            cwd: self.ftp_cwd(),
            filename: self.file_name().to_string(),
        })
    }
}

/// 远端浏览视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEntry {
    pub uuid: String,
    pub file_name: String,
    pub share_type: ShareType,
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub download_url: String,
    pub browse_url: String,
    #[serde(default)]
    pub children: Vec<ClientEntry>,
}

/// 移动端视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileEntry {
    pub uuid: String,
    pub file_name: String,
    pub share_type: ShareType,
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub target_path: PathBuf,
    pub need_password: bool,
    pub download_url: String,
    pub browse_url: String,
    #[serde(default)]
    pub children: Vec<MobileEntry>,
}

/// FTP 连接参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtpData {
    pub uuid: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub passwd: String,
    pub cwd: String,
    pub filename: String,
}

/// 备份文件中的一条记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub path: PathBuf,
    pub uuid: String,
    pub share_type: ShareType,
    #[serde(rename = "isDir")]
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ftp_base_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> ServiceEndpoint {
        ServiceEndpoint::new("192.168.1.2", 8080)
    }

    fn sample_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.txt"), b"hello").unwrap();
        fs::write(dir.path().join("y.bin"), vec![0u8; 32]).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("z.txt"), b"zz").unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        dir
    }

    fn count(entry: &ClientEntry) -> usize {
        1 + entry.children.iter().map(count).sum::<usize>()
    }

    #[test]
    fn test_file_entity() {
        let dir = sample_tree();
        let entity =
            ShareEntity::new(&dir.path().join("x.txt"), ShareType::Http, None, None).unwrap();

        assert!(entity.uuid().starts_with('h'));
        assert!(!entity.is_dir());
        assert_eq!(entity.len(), 1);
        assert!(entity.ftp().is_none());

        let dict = entity.to_dict_client(&endpoint());
        assert_eq!(dict.file_name, "x.txt");
        assert_eq!(dict.size, Some(5));
        assert!(dict.children.is_empty());
        assert_eq!(
            dict.browse_url,
            format!("http://192.168.1.2:8080/file_list/{}", entity.uuid())
        );
    }

    #[test]
    fn test_dir_tree_matches_filesystem() {
        let dir = sample_tree();
        let entity = ShareEntity::new(dir.path(), ShareType::Http, None, None).unwrap();

        // 根 + x.txt + y.bin + sub + sub/z.txt + empty
        assert_eq!(entity.len(), 6);

        let client = entity.to_dict_client(&endpoint());
        assert_eq!(count(&client), 6);
        assert_eq!(client.children.len(), 4);

        let mut names: Vec<_> = client.children.iter().map(|c| c.file_name.clone()).collect();
        names.sort();
        assert_eq!(names, ["empty", "sub", "x.txt", "y.bin"]);

        let mobile = entity.to_dict_mobile(&endpoint());
        assert_eq!(mobile.children.len(), 4);
        assert_eq!(mobile.target_path, entity.target_path());
        assert!(!mobile.need_password);
    }

    #[test]
    fn test_resolve_composite_uuid() {
        let dir = sample_tree();
        let entity = ShareEntity::new(dir.path(), ShareType::Http, None, None).unwrap();

        let sub = entity
            .root()
            .children()
            .find(|c| c.file_name() == "sub")
            .unwrap();
        let z = sub.children().next().unwrap();

        assert_eq!(z.uuid().matches(UUID_SEPARATOR).count(), 2);
        let resolved = entity.resolve(z.uuid()).unwrap();
        assert_eq!(resolved.file_name(), "z.txt");
        assert_eq!(resolved.parent().unwrap().file_name(), "sub");

        assert!(entity.resolve(entity.uuid()).unwrap().is_root());
        assert!(entity.resolve("hdeadbeef").is_none());
        assert!(entity.resolve(&format!("{}>nope", entity.uuid())).is_none());
    }

    #[test]
    fn test_ftp_params_and_cwd() {
        let dir = sample_tree();
        let entity = ShareEntity::new(dir.path(), ShareType::Ftp, None, None).unwrap();

        let ftp = entity.ftp().unwrap();
        assert!(entity.uuid().starts_with('f'));
        assert!((10000..=65500).contains(&ftp.port));
        assert_eq!(ftp.password.len(), 5);
        assert_eq!(ftp.base_path, entity.target_path());

        let root_data = entity.to_ftp_data(&endpoint()).unwrap();
        assert_eq!(root_data.cwd, "/");
        assert_eq!(root_data.user, "a");

        let sub = entity
            .root()
            .children()
            .find(|c| c.file_name() == "sub")
            .unwrap();
        let z = sub.children().next().unwrap();
        assert_eq!(z.ftp_cwd(), "/sub");
        assert_eq!(sub.ftp_cwd(), "/sub");

        let file = ShareEntity::new(&dir.path().join("x.txt"), ShareType::Ftp, None, None).unwrap();
        assert_eq!(file.ftp().unwrap().base_path, entity.target_path());
        assert_eq!(file.root().ftp_cwd(), "/");
    }

    #[test]
    fn test_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShareEntity::new(&dir.path().join("gone"), ShareType::Http, None, None)
            .unwrap_err();
        assert!(matches!(err, ShareError::NotFound(_)));
    }

    #[test]
    fn test_trailing_separator_stripped() {
        let dir = sample_tree();
        let with_slash = PathBuf::from(format!("{}/", dir.path().display()));
        let entity = ShareEntity::new(&with_slash, ShareType::Http, None, None).unwrap();
        assert_eq!(entity.target_path(), dir.path());
    }

    #[test]
    fn test_backup_restore_keeps_identity() {
        let dir = sample_tree();
        let mut entity = ShareEntity::new(dir.path(), ShareType::Ftp, None, None).unwrap();
        entity.browse_number = 3;

        let record = entity.to_dump_backup();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"isDir\":true"));
        assert!(!json.contains("secret_key"));

        let restored = ShareEntity::restore(&serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(restored.uuid(), entity.uuid());
        assert_eq!(restored.ftp(), entity.ftp());
        assert_eq!(restored.len(), entity.len());
        assert_eq!(restored.browse_number, 0);
    }
}
