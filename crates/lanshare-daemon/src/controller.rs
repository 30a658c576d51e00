//! 控制进程：登记表 + worker 管理

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::Result;
use lanshare_core::config::{SettingUpdate, ShareSettings};
use lanshare_core::error::ShareError;
use lanshare_core::logging::LogHandle;
use lanshare_core::model::{ServiceEndpoint, ShareEntity, ShareType};
use lanshare_core::registry::FuseSharingModel;
use lanshare_core::service::{Notification, ServiceProcessManager, WorkerProgram};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ipc::{IpcRequest, IpcResponse, ShareInfo};

pub struct Controller {
    settings: ShareSettings,
    config_path: PathBuf,
    registry: FuseSharingModel,
    manager: ServiceProcessManager,
    log: Option<LogHandle>,
}

impl Controller {
    /// 加载备份并准备 worker 管理器；worker 以当前可执行文件启动
    pub fn new(
        settings: ShareSettings,
        config_path: PathBuf,
        log: LogHandle,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Notification>)> {
        let program = WorkerProgram::current_exe(vec![
            OsString::from("--config"),
            config_path.clone().into_os_string(),
        ])?;
        Self::with_program(settings, config_path, program, Some(log))
    }

    pub fn with_program(
        settings: ShareSettings,
        config_path: PathBuf,
        program: WorkerProgram,
        log: Option<LogHandle>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Notification>)> {
        let registry = FuseSharingModel::with_backup(settings.backup_path.clone())?;
        let (manager, notifications) = ServiceProcessManager::new(program);
        Ok((
            Self {
                settings,
                config_path,
                registry,
                manager,
                log,
            },
            notifications,
        ))
    }

    /// 把备份中恢复的共享交给 worker
    pub fn restore(&mut self) {
        let mut restored = 0;
        for entity in self.registry.iter() {
            if self.manager.add_share(entity) {
                restored += 1;
            }
        }
        if restored > 0 {
            info!("Restored {} shares from backup", restored);
        }
    }

    pub fn handle(&mut self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Share {
                path,
                ftp,
                password,
            } => {
                let share_type = if ftp { ShareType::Ftp } else { ShareType::Http };
                match self.share(&path, share_type, password.as_deref()) {
                    Ok(info) => IpcResponse::Shares { shares: vec![info] },
                    Err(e) => IpcResponse::error(e.to_string()),
                }
            }
            IpcRequest::Unshare { uuid } => {
                if self.unshare(&uuid) {
                    IpcResponse::ok(format!("Share {uuid} removed"))
                } else {
                    IpcResponse::error(format!("Unknown share {uuid}"))
                }
            }
            IpcRequest::List => IpcResponse::Shares {
                shares: self.list(),
            },
            IpcRequest::FreeSecret { uuid, value } => {
                if self.free_secret(&uuid, value) {
                    IpcResponse::ok(format!("Free secret for {uuid} set to {value}"))
                } else {
                    IpcResponse::error(format!("Unknown share {uuid}"))
                }
            }
            IpcRequest::Settings { update } => {
                self.update_setting(&update);
                IpcResponse::ok("Settings updated")
            }
            IpcRequest::CloseFtp => {
                if self.manager.close_ftp() {
                    IpcResponse::ok("FTP service stopped")
                } else {
                    IpcResponse::error("Failed to stop FTP service")
                }
            }
            IpcRequest::Status => IpcResponse::Status {
                http_pid: self.manager.pid(ShareType::Http),
                ftp_pid: self.manager.pid(ShareType::Ftp),
                shares: self.registry.len(),
            },
            IpcRequest::Stop => IpcResponse::ok("Stopping"),
        }
    }

    /// 登记新共享并交给 worker
    ///
    /// 对应的 worker 是新启动的（首次共享或之前被关闭）时，把其余共享
    /// 也重新发给它。
    pub fn share(
        &mut self,
        path: &Path,
        share_type: ShareType,
        password: Option<&str>,
    ) -> Result<ShareInfo, ShareError> {
        let respawn = !self.manager.is_running(ShareType::Http)
            || (share_type == ShareType::Ftp && !self.manager.is_running(ShareType::Ftp));

        let entity = self.registry.share(path, share_type, password)?;
        if !self.manager.add_share(entity) {
            warn!("Share {} registered but no worker accepted it", entity.uuid());
        }
        let info = share_info(entity, &self.settings.endpoint());

        if respawn {
            for other in self.registry.iter().filter(|s| s.uuid() != info.uuid) {
                self.manager.add_share(other);
            }
        }
        Ok(info)
    }

    pub fn unshare(&mut self, uuid: &str) -> bool {
        match self.registry.remove(uuid) {
            Some(entity) => {
                self.manager.remove_share(uuid, entity.share_type());
                true
            }
            None => false,
        }
    }

    pub fn list(&self) -> Vec<ShareInfo> {
        let endpoint = self.settings.endpoint();
        self.registry
            .iter()
            .map(|s| share_info(s, &endpoint))
            .collect()
    }

    pub fn free_secret(&mut self, uuid: &str, value: bool) -> bool {
        let Some(share_type) = self.registry.get(uuid).map(ShareEntity::share_type) else {
            return false;
        };
        self.registry.set_free_secret(uuid, value);
        self.registry.persist();
        self.manager.change_free_secret(uuid, share_type, value);
        true
    }

    /// 修改设置：保存配置文件、切换本进程日志并通知 worker
    pub fn update_setting(&mut self, update: &SettingUpdate) {
        if !self.settings.apply(update) {
            debug!("Setting unchanged: {:?}", update);
            return;
        }
        if let Err(e) = self.settings.save_to(&self.config_path) {
            warn!("Failed to save settings: {}", e);
        }
        if let Some(log) = &self.log
            && let Err(e) = log.apply(&self.settings.log)
        {
            warn!("Failed to reload log files: {}", e);
        }
        self.manager.modify_settings(update);
        info!("Setting changed: {:?}", update);
    }

    pub fn record(&mut self, event: &Notification) {
        let count = match event {
            Notification::Browsed { uuid } => self.registry.record_browse(uuid),
            Notification::Downloaded { uuid } => self.registry.record_download(uuid),
        };
        debug!("{:?} -> {:?}", event, count);
    }

    /// 写入备份并结束所有 worker
    pub fn shutdown(&mut self) {
        self.registry.persist();
        self.manager.close_all();
    }
}

fn share_info(entity: &ShareEntity, endpoint: &ServiceEndpoint) -> ShareInfo {
    let view = entity.to_dict_client(endpoint);
    ShareInfo {
        uuid: view.uuid,
        path: entity.target_path().to_path_buf(),
        share_type: entity.share_type(),
        is_dir: entity.is_dir(),
        browse_url: view.browse_url,
        download_url: view.download_url,
        ftp_port: entity.ftp().map(|f| f.port),
        needs_password: entity.needs_password(),
        browse_number: entity.browse_number,
        download_number: entity.download_number,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    fn controller(dir: &Path) -> Controller {
        let settings = ShareSettings {
            local_host: "10.0.0.2".to_string(),
            backup_path: dir.join("shares.json"),
            ..Default::default()
        };
        let program = WorkerProgram::new(
            "sh",
            vec![
                OsString::from("-c"),
                OsString::from("exec cat >/dev/null"),
                OsString::from("sh"),
            ],
        );
        Controller::with_program(settings, dir.join("settings.toml"), program, None)
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn test_share_list_and_backup() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"a").unwrap();

        let mut ctl = controller(dir.path());
        let IpcResponse::Shares { shares } = ctl.handle(IpcRequest::Share {
            path: file.clone(),
            ftp: false,
            password: Some("pw".into()),
        }) else {
            panic!("expected shares");
        };
        let info = &shares[0];
        assert!(info.needs_password);
        assert!(info.browse_url.starts_with("http://10.0.0.2:8080/file_list/h"));

        // 重复共享返回错误
        let dup = ctl.handle(IpcRequest::Share {
            path: file.clone(),
            ftp: false,
            password: None,
        });
        assert!(matches!(dup, IpcResponse::Error { .. }));

        ctl.record(&Notification::Browsed {
            uuid: info.uuid.clone(),
        });
        assert_eq!(ctl.list()[0].browse_number, 1);

        assert!(ctl.free_secret(&info.uuid, true));
        assert!(!ctl.list()[0].needs_password);
        assert!(!ctl.unshare("hmissing"));

        ctl.shutdown();
        let restored = FuseSharingModel::load(&dir.path().join("shares.json")).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].uuid(), info.uuid);
    }

    #[tokio::test]
    async fn test_setting_saved() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctl = controller(dir.path());
        ctl.update_setting(&SettingUpdate::SaveSharerLog(true));

        let saved = ShareSettings::load_from(&dir.path().join("settings.toml"));
        assert!(saved.log.save_sharer_log);
    }
}
