//! 日志模块
//!
//! 控制台输出使用 `tracing-subscriber` 的 fmt 层（受 `RUST_LOG` 控制）；
//! 文件输出由 [`FileLogLayer`] 负责，分为两份：
//!
//! - `system.log`: 除访问记录以外的所有日志
//! - `sharer.log`: target 为 [`SHARER_TARGET`] 的浏览/下载记录
//!
//! 修改日志设置后调用 [`LogHandle::apply`] 即可切换输出文件，无需重建
//! subscriber。

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LogSettings;

/// 访问记录使用的 target
pub const SHARER_TARGET: &str = "sharer";

#[derive(Default)]
struct FileSinks {
    system: Option<File>,
    sharer: Option<File>,
}

/// 日志文件切换句柄
#[derive(Clone)]
pub struct LogHandle {
    sinks: Arc<Mutex<FileSinks>>,
}

impl LogHandle {
    /// 按设置重新打开（或关闭）日志文件
    pub fn apply(&self, settings: &LogSettings) -> io::Result<()> {
        let mut next = FileSinks::default();
        if settings.save_system_log || settings.save_sharer_log {
            fs::create_dir_all(&settings.logs_path)?;
        }
        if settings.save_system_log {
            next.system = Some(open_append(&settings.system_log_file())?);
        }
        if settings.save_sharer_log {
            next.sharer = Some(open_append(&settings.sharer_log_file())?);
        }

        let mut sinks = self
            .sinks
            .lock()
            .map_err(|_| io::Error::other("log sink lock poisoned"))?;
        *sinks = next;
        Ok(())
    }
}

fn open_append(path: &std::path::Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// 写日志文件的 Layer
pub struct FileLogLayer {
    sinks: Arc<Mutex<FileSinks>>,
}

impl FileLogLayer {
    pub fn new(settings: &LogSettings) -> io::Result<(Self, LogHandle)> {
        let sinks = Arc::new(Mutex::new(FileSinks::default()));
        let handle = LogHandle {
            sinks: sinks.clone(),
        };
        handle.apply(settings)?;
        Ok((Self { sinks }, handle))
    }
}

impl<S> Layer<S> for FileLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > Level::INFO {
            return;
        }

        let mut message = String::new();
        event.record(&mut MessageVisitor(&mut message));

        let line = format!(
            "{} {:>5} {}: {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            metadata.level(),
            metadata.target(),
            message
        );

        let Ok(mut sinks) = self.sinks.lock() else {
            return;
        };
        let sink = if metadata.target() == SHARER_TARGET {
            sinks.sharer.as_mut()
        } else {
            sinks.system.as_mut()
        };
        if let Some(file) = sink {
            let _ = file.write_all(line.as_bytes());
        }
    }
}

/// 访问者，把消息和其余字段拼成一行
struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0.insert_str(0, &format!("{value:?}"));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.0.insert_str(0, value);
        } else {
            self.0.push_str(&format!(" {}={}", field.name(), value));
        }
    }
}

/// 初始化全局 subscriber，返回日志文件切换句柄
///
/// `default_filter` 在未设置 `RUST_LOG` 时用于控制台输出。`log` 记录的
/// 桥接由可执行文件自行安装。
pub fn init(settings: &LogSettings, default_filter: &str) -> anyhow::Result<LogHandle> {
    let (file_layer, handle) = FileLogLayer::new(settings)?;
    let console = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        );

    let subscriber = tracing_subscriber::registry().with(file_layer).with(console);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(handle)
}
