//! 应用配置和持久化
//!
//! 配置以显式结构体的形式传给各组件；运行期修改通过 [`SettingUpdate`]
//! 和对应的 `apply` 方法完成，不存在全局可变配置对象。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::model::ServiceEndpoint;

/// 默认 HTTP 端口
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// 日志设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// 是否保存系统日志
    pub save_system_log: bool,
    /// 是否保存共享日志（用户浏览/下载记录）
    pub save_sharer_log: bool,
    /// 日志目录
    pub logs_path: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            save_system_log: false,
            save_sharer_log: false,
            logs_path: data_dir().join("logs"),
        }
    }
}

impl LogSettings {
    /// 应用一条修改，返回是否需要重新加载日志输出
    pub fn apply(&mut self, update: &SettingUpdate) -> bool {
        match update {
            SettingUpdate::SaveSystemLog(v) => {
                let changed = self.save_system_log != *v;
                self.save_system_log = *v;
                changed
            }
            SettingUpdate::SaveSharerLog(v) => {
                let changed = self.save_sharer_log != *v;
                self.save_sharer_log = *v;
                changed
            }
            SettingUpdate::LogsPath(path) => {
                let changed = self.logs_path != *path;
                self.logs_path.clone_from(path);
                changed
            }
        }
    }

    pub fn system_log_file(&self) -> PathBuf {
        self.logs_path.join("system.log")
    }

    pub fn sharer_log_file(&self) -> PathBuf {
        self.logs_path.join("sharer.log")
    }
}

/// 后端会响应的运行期设置修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "key", content = "value", rename_all = "snake_case")]
pub enum SettingUpdate {
    SaveSystemLog(bool),
    SaveSharerLog(bool),
    LogsPath(PathBuf),
}

/// 应用设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareSettings {
    /// HTTP 服务端口
    pub http_port: u16,
    /// 对外公布的本机地址（生成链接用）
    pub local_host: String,
    /// HTTP 服务监听地址
    pub bind_host: String,
    /// 下载目录
    pub download_dir: PathBuf,
    /// 共享记录备份文件
    pub backup_path: PathBuf,
    pub log: LogSettings,
}

impl Default for ShareSettings {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            local_host: crate::net::local_host(),
            bind_host: "0.0.0.0".to_string(),
            download_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            backup_path: data_dir().join("shares.json"),
            log: LogSettings::default(),
        }
    }
}

impl ShareSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lanshare")
            .join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &std::path::Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// 生成链接用的服务地址
    pub fn endpoint(&self) -> ServiceEndpoint {
        ServiceEndpoint::new(self.local_host.clone(), self.http_port)
    }

    pub fn apply(&mut self, update: &SettingUpdate) -> bool {
        self.log.apply(update)
    }
}

/// 程序数据目录（备份、日志）
fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lanshare")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_reports_change() {
        let mut log = LogSettings::default();
        assert!(!log.apply(&SettingUpdate::SaveSystemLog(false)));
        assert!(log.apply(&SettingUpdate::SaveSystemLog(true)));
        assert!(log.save_system_log);

        let path = PathBuf::from("/tmp/lanshare-logs");
        assert!(log.apply(&SettingUpdate::LogsPath(path.clone())));
        assert!(!log.apply(&SettingUpdate::LogsPath(path.clone())));
        assert_eq!(log.sharer_log_file(), path.join("sharer.log"));
    }

    #[test]
    fn test_setting_update_wire_format() {
        let json = serde_json::to_string(&SettingUpdate::SaveSharerLog(true)).unwrap();
        assert_eq!(json, r#"{"key":"save_sharer_log","value":true}"#);
    }

    #[test]
    fn test_settings_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        let settings = ShareSettings {
            http_port: 9090,
            local_host: "10.0.0.5".to_string(),
            ..Default::default()
        };
        settings.save_to(&path).unwrap();

        let loaded = ShareSettings::load_from(&path);
        assert_eq!(loaded.http_port, 9090);
        assert_eq!(loaded.endpoint(), ServiceEndpoint::new("10.0.0.5", 9090));
    }

    #[test]
    fn test_broken_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "http_port = \"nope\"").unwrap();
        assert_eq!(ShareSettings::load_from(&path).http_port, DEFAULT_HTTP_PORT);
    }
}
