//! 共享服务子系统
//!
//! 控制进程通过 [`manager::ServiceProcessManager`] 为每种共享方式维护一个
//! worker 子进程。两者之间只交换不可变的消息：
//!
//! - 控制进程 → worker: [`Command`]，按行写入 worker 的 stdin
//! - worker → 控制进程: [`Notification`]，按行写到 worker 的 stdout
//!
//! worker 内部由单个命令循环修改私有的 [`SharingModel`](crate::model::SharingModel)，
//! 请求处理只读它。

pub mod ftp;
pub mod http;
pub mod manager;
pub mod pipe;
pub mod worker;

use serde::{Deserialize, Serialize};

use crate::config::SettingUpdate;
use crate::model::ShareEntity;

pub use manager::{ServiceProcessManager, WorkerProgram};

/// 发给 worker 的命令
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Add { entity: Box<ShareEntity> },
    Remove { uuid: String },
    Settings { update: SettingUpdate },
    FreeSecret { uuid: String, value: bool },
}

/// worker 上报的访问事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Browsed { uuid: String },
    Downloaded { uuid: String },
}

impl Notification {
    pub fn uuid(&self) -> &str {
        match self {
            Notification::Browsed { uuid } | Notification::Downloaded { uuid } => uuid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let json = serde_json::to_string(&Command::FreeSecret {
            uuid: "habc".to_string(),
            value: true,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"free_secret","uuid":"habc","value":true}"#);

        let cmd: Command = serde_json::from_str(
            r#"{"type":"settings","update":{"key":"save_system_log","value":true}}"#,
        )
        .unwrap();
        assert!(matches!(
            cmd,
            Command::Settings {
                update: SettingUpdate::SaveSystemLog(true)
            }
        ));
    }

    #[test]
    fn test_notification_wire_format() {
        let note: Notification =
            serde_json::from_str(r#"{"type":"downloaded","uuid":"h1>2"}"#).unwrap();
        assert_eq!(note.uuid(), "h1>2");
    }
}
