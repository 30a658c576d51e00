//! 全局共享登记表
//!
//! 按添加顺序保存所有共享（任意传输方式），是行号、重复检测和 FTP
//! 端口复用查找的唯一依据。配置了备份路径时，每次增删都会同步写入
//! JSON 备份文件，启动时再从该文件恢复。

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::credentials::{Credentials, SecretPair};
use crate::error::ShareError;
use crate::model::{BackupRecord, FtpParams, ShareEntity, ShareType};

#[derive(Debug, Default)]
pub struct FuseSharingModel {
    shares: Vec<ShareEntity>,
    backup_path: Option<PathBuf>,
}

impl FuseSharingModel {
    /// 不做持久化的登记表
    pub fn new() -> Self {
        Self::default()
    }

    /// 以 `backup_path` 为备份文件的登记表，文件存在时立即加载
    pub fn with_backup(backup_path: impl Into<PathBuf>) -> Result<Self, ShareError> {
        let backup_path = backup_path.into();
        let shares = if backup_path.exists() {
            Self::load(&backup_path)?
        } else {
            Vec::new()
        };
        Ok(Self {
            shares,
            backup_path: Some(backup_path),
        })
    }

    /// 已登记的 `(path, share_type)` 所在行号
    pub fn contains(&self, path: &Path, share_type: ShareType) -> Option<usize> {
        let path = strip_trailing(path);
        self.shares
            .iter()
            .position(|s| s.share_type() == share_type && s.target_path() == path)
    }

    /// 沿 `path` 及其祖先目录查找可以复用的 FTP 共享参数
    pub fn get_ftp_shared(&self, path: &Path) -> Option<&FtpParams> {
        let path = strip_trailing(path);
        path.ancestors().find_map(|candidate| {
            self.shares
                .iter()
                .filter_map(ShareEntity::ftp)
                .find(|ftp| ftp.base_path == candidate)
        })
    }

    /// 登记一个新共享
    ///
    /// 重复共享、路径不存在或目录不可读时直接返回错误，不会触及任何
    /// worker 进程。
    pub fn share(
        &mut self,
        path: &Path,
        share_type: ShareType,
        password: Option<&str>,
    ) -> Result<&ShareEntity, ShareError> {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        if self.contains(&path, share_type).is_some() {
            return Err(ShareError::Duplicate {
                path,
                share_type,
            });
        }
        if !path.exists() {
            return Err(ShareError::NotFound(path));
        }

        let reuse = match share_type {
            ShareType::Ftp => self.get_ftp_shared(&path).cloned(),
            ShareType::Http => None,
        };
        if let Some(ftp) = &reuse {
            debug!("Reusing FTP listener on port {} for {:?}", ftp.port, path);
        }
        let secret: Option<SecretPair> = password
            .filter(|p| !p.is_empty())
            .map(Credentials::generate);

        let entity = ShareEntity::new(&path, share_type, reuse, secret)?;
        info!("Registered {} share {} -> {:?}", share_type, entity.uuid(), path);
        self.shares.push(entity);
        self.persist();

        Ok(&self.shares[self.shares.len() - 1])
    }

    /// 移除共享，未知 uuid 返回 `None`
    pub fn remove(&mut self, uuid: &str) -> Option<ShareEntity> {
        let idx = self.shares.iter().position(|s| s.uuid() == uuid)?;
        let entity = self.shares.remove(idx);
        info!("Removed share {} ({:?})", uuid, entity.target_path());
        self.persist();
        Some(entity)
    }

    pub fn get(&self, uuid: &str) -> Option<&ShareEntity> {
        self.shares.iter().find(|s| s.uuid() == uuid)
    }

    pub fn get_mut(&mut self, uuid: &str) -> Option<&mut ShareEntity> {
        self.shares.iter_mut().find(|s| s.uuid() == uuid)
    }

    pub fn set_free_secret(&mut self, uuid: &str, value: bool) -> bool {
        match self.get_mut(uuid) {
            Some(entity) => {
                entity.free_secret = value;
                true
            }
            None => false,
        }
    }

    /// worker 上报的浏览通知，`uuid` 可以是后代节点的组合 uuid
    pub fn record_browse(&mut self, uuid: &str) -> Option<u64> {
        let entity = self.root_of_mut(uuid)?;
        entity.browse_number += 1;
        Some(entity.browse_number)
    }

    pub fn record_download(&mut self, uuid: &str) -> Option<u64> {
        let entity = self.root_of_mut(uuid)?;
        entity.download_number += 1;
        Some(entity.download_number)
    }

    fn root_of_mut(&mut self, uuid: &str) -> Option<&mut ShareEntity> {
        let root = uuid.split(crate::model::entity::UUID_SEPARATOR).next()?;
        self.get_mut(root)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShareEntity> {
        self.shares.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ShareEntity> {
        self.shares.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    /// 写入备份文件
    pub fn dump(&self, path: &Path) -> Result<(), ShareError> {
        let records: Vec<BackupRecord> =
            self.shares.iter().map(ShareEntity::to_dump_backup).collect();
        let content = serde_json::to_string_pretty(&records)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ShareError::io(parent, e))?;
        }
        fs::write(path, content).map_err(|e| ShareError::io(path, e))?;
        debug!("Dumped {} shares to {:?}", records.len(), path);
        Ok(())
    }

    /// 读取备份文件
    ///
    /// 相同 `(path, share_type)` 只保留第一条；路径已不存在或无法读取的
    /// 记录被跳过。
    pub fn load(path: &Path) -> Result<Vec<ShareEntity>, ShareError> {
        let content = fs::read_to_string(path).map_err(|e| ShareError::io(path, e))?;
        let records: Vec<BackupRecord> = serde_json::from_str(&content)?;

        let mut seen = HashSet::new();
        let mut shares = Vec::with_capacity(records.len());
        for record in records {
            if !seen.insert((record.path.clone(), record.share_type)) {
                continue;
            }
            if !record.path.exists() {
                debug!("Skipping vanished share {:?}", record.path);
                continue;
            }
            match ShareEntity::restore(&record) {
                Ok(entity) => shares.push(entity),
                Err(e) => warn!("Skipping unreadable share {:?}: {}", record.path, e),
            }
        }

        info!("Loaded {} shares from {:?}", shares.len(), path);
        Ok(shares)
    }

    /// 按当前状态重写备份（若配置了备份路径）
    pub fn persist(&self) {
        if let Some(path) = &self.backup_path
            && let Err(e) = self.dump(path)
        {
            warn!("Failed to write share backup: {}", e);
        }
    }
}

fn strip_trailing(path: &Path) -> PathBuf {
    path.components().collect()
}
