//! FTP 共享服务
//!
//! 同一祖先目录下的 FTP 共享使用同一组端口/密码/根目录，因此共用一个
//! 监听器。[`ListenerTable`] 按端口记录每个监听器的使用者，最后一个
//! 使用者移除时才关闭监听器。

pub mod path;
pub mod server;

use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::Command;
use super::worker::SettingsApplier;
use crate::model::{FtpParams, SharingModel};
pub use server::{FtpConfig, FtpListener};

/// 一个端口上的监听器及其使用者
#[derive(Debug)]
pub struct ListenerSlot {
    owner: String,
    users: BTreeSet<String>,
    listener: Option<FtpListener>,
}

impl ListenerSlot {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn users(&self) -> &BTreeSet<String> {
        &self.users
    }

    /// 监听器是否在运行（绑定失败时为 `false`）
    pub fn is_listening(&self) -> bool {
        self.listener.as_ref().is_some_and(|l| !l.is_closed())
    }
}

/// 端口 → 监听器
#[derive(Debug)]
pub struct ListenerTable {
    bind_host: String,
    slots: HashMap<u16, ListenerSlot>,
}

impl ListenerTable {
    pub fn new(bind_host: impl Into<String>) -> Self {
        Self {
            bind_host: bind_host.into(),
            slots: HashMap::new(),
        }
    }

    /// 为共享登记监听器，端口已有监听器时直接复用
    pub async fn add(&mut self, uuid: &str, params: &FtpParams) {
        if let Some(slot) = self.slots.get_mut(&params.port) {
            slot.users.insert(uuid.to_string());
            if slot.listener.is_none() {
                slot.listener = bind(&self.bind_host, params).await;
            }
            debug!(
                "FTP port {} reused by {} ({} users)",
                params.port,
                uuid,
                slot.users.len()
            );
            return;
        }

        let listener = bind(&self.bind_host, params).await;
        self.slots.insert(
            params.port,
            ListenerSlot {
                owner: uuid.to_string(),
                users: BTreeSet::from([uuid.to_string()]),
                listener,
            },
        );
    }

    /// 移除使用者，返回监听器是否因此关闭
    pub fn remove(&mut self, uuid: &str, port: u16) -> bool {
        let Some(slot) = self.slots.get_mut(&port) else {
            return false;
        };
        if !slot.users.remove(uuid) {
            return false;
        }

        if let Some(next) = slot.users.first() {
            if slot.owner == uuid {
                slot.owner = next.clone();
                debug!("FTP port {} now owned by {}", port, slot.owner);
            }
            return false;
        }

        if let Some(slot) = self.slots.remove(&port)
            && let Some(listener) = slot.listener
        {
            listener.close();
        }
        info!("FTP listener on port {} closed", port);
        true
    }

    pub fn slot(&self, port: u16) -> Option<&ListenerSlot> {
        self.slots.get(&port)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn close_all(&mut self) {
        for (_, slot) in self.slots.drain() {
            if let Some(listener) = slot.listener {
                listener.close();
            }
        }
    }
}

async fn bind(host: &str, params: &FtpParams) -> Option<FtpListener> {
    let config = FtpConfig {
        root: params.base_path.clone(),
        password: params.password.clone(),
    };
    match FtpListener::bind(host, params.port, config).await {
        Ok(listener) => Some(listener),
        Err(e) => {
            error!("Failed to bind FTP port {}: {}", params.port, e);
            None
        }
    }
}

/// FTP 服务：共享表 + 监听器表 + 命令循环
pub struct FtpService {
    model: SharingModel,
    table: ListenerTable,
    settings: SettingsApplier,
}

impl FtpService {
    pub fn new(bind_host: impl Into<String>, settings: SettingsApplier) -> Self {
        Self {
            model: SharingModel::new(),
            table: ListenerTable::new(bind_host),
            settings,
        }
    }

    pub fn table(&self) -> &ListenerTable {
        &self.table
    }

    pub fn model(&self) -> &SharingModel {
        &self.model
    }

    pub async fn apply(&mut self, command: Command) {
        match command {
            Command::Add { entity } => {
                let Some(params) = entity.ftp().cloned() else {
                    error!("Share {} has no FTP parameters, ignored", entity.uuid());
                    return;
                };
                info!(
                    "FTP share added: {} -> {} (port {})",
                    entity.uuid(),
                    entity.target_path().display(),
                    params.port
                );
                self.table.add(entity.uuid(), &params).await;
                self.model.insert(*entity);
            }
            Command::Remove { uuid } => {
                let Some(entity) = self.model.remove(&uuid) else {
                    debug!("Remove for unknown share {}", uuid);
                    return;
                };
                if let Some(params) = entity.ftp() {
                    self.table.remove(&uuid, params.port);
                }
                info!("FTP share removed: {}", uuid);
            }
            Command::Settings { update } => self.settings.apply(&update),
            Command::FreeSecret { uuid, value } => {
                if let Some(share) = self.model.get_mut(&uuid) {
                    share.free_secret = value;
                }
            }
        }
    }

    /// 命令循环，通道关闭后关闭所有监听器
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            self.apply(command).await;
        }
        info!("Command channel closed, stopping FTP service");
        self.table.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn params(port: u16) -> FtpParams {
        FtpParams {
            port,
            password: "abcde".to_string(),
            base_path: PathBuf::from("/tmp"),
        }
    }

    #[tokio::test]
    async fn test_slot_refcount_and_owner_handoff() {
        let port = crate::net::generate_ftp_port();
        let mut table = ListenerTable::new("127.0.0.1");

        table.add("fb", &params(port)).await;
        table.add("fa", &params(port)).await;
        table.add("fc", &params(port)).await;
        assert_eq!(table.len(), 1);

        let slot = table.slot(port).unwrap();
        assert_eq!(slot.owner(), "fb");
        assert_eq!(slot.users().len(), 3);
        assert!(slot.is_listening());

        assert!(!table.remove("fb", port));
        assert_eq!(table.slot(port).unwrap().owner(), "fa");

        assert!(!table.remove("unknown", port));
        assert!(!table.remove("fc", port));
        assert!(table.remove("fa", port));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_bind_failure_keeps_slot() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let mut table = ListenerTable::new("127.0.0.1");
        table.add("fa", &params(port)).await;
        let slot = table.slot(port).unwrap();
        assert!(!slot.is_listening());
        assert_eq!(slot.owner(), "fa");
    }
}
