//! 服务进程管理
//!
//! 每种共享方式对应一个 worker 子进程，第一次添加共享时启动。
//! 子进程运行在独立的进程组中，关闭时整组强制结束，连同它可能派生
//! 的子进程一起回收。
//!
//! 所有操作都是"投递即返回"：返回值只表示命令是否成功入队。

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::pipe::{read_json_lines, write_json_lines};
use super::{Command, Notification};
use crate::config::SettingUpdate;
use crate::model::{ShareEntity, ShareType};

/// worker 的启动方式: `<program> <args...> worker <http|ftp>`
#[derive(Debug, Clone)]
pub struct WorkerProgram {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerProgram {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// 以当前可执行文件作为 worker
    pub fn current_exe(args: Vec<OsString>) -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, args))
    }

    fn command(&self, kind: ShareType) -> ProcessCommand {
        let mut cmd = ProcessCommand::new(&self.program);
        cmd.args(&self.args)
            .arg("worker")
            .arg(kind.name())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

struct WorkerProcess {
    child: Child,
    pid: u32,
    input: mpsc::UnboundedSender<Command>,
}

impl WorkerProcess {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn send(&self, command: Command) -> bool {
        self.input.send(command).is_ok()
    }
}

pub struct ServiceProcessManager {
    program: WorkerProgram,
    http: Option<WorkerProcess>,
    ftp: Option<WorkerProcess>,
    output: mpsc::UnboundedSender<Notification>,
}

impl ServiceProcessManager {
    /// 创建管理器，返回所有 worker 共用的事件接收端
    pub fn new(program: WorkerProgram) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (output, rx) = mpsc::unbounded_channel();
        (
            Self {
                program,
                http: None,
                ftp: None,
                output,
            },
            rx,
        )
    }

    fn slot(&mut self, kind: ShareType) -> &mut Option<WorkerProcess> {
        match kind {
            ShareType::Http => &mut self.http,
            ShareType::Ftp => &mut self.ftp,
        }
    }

    /// 取得运行中的 worker，必要时启动
    fn ensure(&mut self, kind: ShareType) -> Option<&WorkerProcess> {
        let program = self.program.clone();
        let output = self.output.clone();
        let slot = self.slot(kind);

        if let Some(worker) = slot.as_mut()
            && !worker.is_alive()
        {
            warn!("{} worker (pid {}) exited, restarting", kind, worker.pid);
            *slot = None;
        }

        if slot.is_none() {
            match spawn_worker(&program, kind, output) {
                Ok(worker) => {
                    info!("Started {} worker (pid {})", kind, worker.pid);
                    *slot = Some(worker);
                }
                Err(e) => {
                    error!("Failed to start {} worker: {}", kind, e);
                    return None;
                }
            }
        }
        slot.as_ref()
    }

    /// 已运行的 worker，不会启动新进程
    fn running(&mut self, kind: ShareType) -> Option<&WorkerProcess> {
        let slot = self.slot(kind);
        if slot.as_mut().is_some_and(WorkerProcess::is_alive) {
            slot.as_ref()
        } else {
            None
        }
    }

    pub fn is_running(&mut self, kind: ShareType) -> bool {
        self.running(kind).is_some()
    }

    pub fn pid(&mut self, kind: ShareType) -> Option<u32> {
        self.running(kind).map(|w| w.pid)
    }

    /// 添加共享；FTP 共享同时登记到 HTTP 服务以提供连接参数
    pub fn add_share(&mut self, entity: &ShareEntity) -> bool {
        let command = Command::Add {
            entity: Box::new(entity.clone()),
        };
        let Some(http) = self.ensure(ShareType::Http) else {
            return false;
        };
        if !http.send(command.clone()) {
            return false;
        }
        if entity.share_type() == ShareType::Ftp {
            return self.ensure(ShareType::Ftp).is_some_and(|ftp| ftp.send(command));
        }
        true
    }

    pub fn remove_share(&mut self, uuid: &str, share_type: ShareType) -> bool {
        let command = Command::Remove {
            uuid: uuid.to_string(),
        };
        let mut sent = self
            .running(ShareType::Http)
            .is_some_and(|w| w.send(command.clone()));
        if share_type == ShareType::Ftp {
            sent &= self.running(ShareType::Ftp).is_some_and(|w| w.send(command));
        }
        sent
    }

    /// 设置修改发给所有运行中的 worker
    pub fn modify_settings(&mut self, update: &SettingUpdate) -> bool {
        let mut sent = false;
        for kind in [ShareType::Http, ShareType::Ftp] {
            if let Some(worker) = self.running(kind) {
                sent |= worker.send(Command::Settings {
                    update: update.clone(),
                });
            }
        }
        sent
    }

    pub fn change_free_secret(&mut self, uuid: &str, share_type: ShareType, value: bool) -> bool {
        let command = Command::FreeSecret {
            uuid: uuid.to_string(),
            value,
        };
        let mut sent = self
            .running(ShareType::Http)
            .is_some_and(|w| w.send(command.clone()));
        if share_type == ShareType::Ftp {
            sent &= self.running(ShareType::Ftp).is_some_and(|w| w.send(command));
        }
        sent
    }

    pub fn close_ftp(&mut self) -> bool {
        self.close(ShareType::Ftp)
    }

    pub fn close_all(&mut self) -> bool {
        let ftp = self.close(ShareType::Ftp);
        let http = self.close(ShareType::Http);
        ftp && http
    }

    /// 结束 worker 的整个进程组，已退出视为成功
    fn close(&mut self, kind: ShareType) -> bool {
        let Some(worker) = self.slot(kind).take() else {
            return true;
        };
        let WorkerProcess {
            mut child, pid, ..
        } = worker;

        let killed = match kill_tree(pid) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to stop {} worker (pid {}): {}", kind, pid, e);
                let _ = child.start_kill();
                false
            }
        };
        info!("Stopped {} worker (pid {})", kind, pid);

        // 回收僵尸进程
        tokio::spawn(async move {
            let status = child.wait().await;
            debug!("Worker {} reaped: {:?}", pid, status);
        });
        killed
    }
}

impl Drop for ServiceProcessManager {
    fn drop(&mut self) {
        for worker in [self.http.take(), self.ftp.take()].into_iter().flatten() {
            let _ = kill_tree(worker.pid);
        }
    }
}

fn spawn_worker(
    program: &WorkerProgram,
    kind: ShareType,
    output: mpsc::UnboundedSender<Notification>,
) -> io::Result<WorkerProcess> {
    let mut child = program.command(kind).spawn()?;
    let pid = child
        .id()
        .ok_or_else(|| io::Error::other("worker exited immediately"))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::other("worker stdin unavailable"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("worker stdout unavailable"))?;

    let (input, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_json_lines(stdin, rx));
    tokio::spawn(read_json_lines(stdout, output));

    Ok(WorkerProcess { child, pid, input })
}

#[cfg(unix)]
fn kill_tree(pid: u32) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(pid).map_err(io::Error::other)?;
    // 负数 pid 表示整个进程组
    let ret = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if ret == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(windows)]
fn kill_tree(pid: u32) -> io::Result<()> {
    use std::os::windows::process::CommandExt;

    let status = std::process::Command::new("taskkill")
        .creation_flags(0x0800_0000)
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    // 128: 进程不存在
    if status.success() || status.code() == Some(128) {
        Ok(())
    } else {
        Err(io::Error::other(format!("taskkill exited with {status}")))
    }
}
