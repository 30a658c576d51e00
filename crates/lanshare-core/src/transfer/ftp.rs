//! FTP 下载

use std::path::{Component, Path};
use std::time::Duration;

use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::engine::Context;
use super::ftp_client::{FtpClient, FtpError};
use super::http::{read_envelope, request_reason};
use super::{DownloadJob, DownloadStatus, FailureReason, FtpBatch, Outcome, percent};
use crate::model::FtpData;
use crate::service::http::{CLIENT_HEADER, PASSWORD_HEADER};

/// 每次从数据连接读取的大小
const READ_CHUNK: usize = 64 * 1024;
/// 暂停后等待服务器结束响应的时间
const ABORT_WAIT: Duration = Duration::from_secs(5);

/// 获取 FTP 连接参数
pub(crate) async fn fetch_params(ctx: &Context, batch: &FtpBatch) -> Result<FtpData, FailureReason> {
    let mut request = ctx
        .client
        .get(&batch.params_url)
        .header(CLIENT_HEADER, "lanshare client");
    if let Some(password) = &batch.password {
        request = request.header(PASSWORD_HEADER, password);
    }
    let response = request.send().await.map_err(|e| request_reason(&e))?;
    read_envelope(response).await
}

/// 连接并登录
pub(crate) async fn open_session(params: &FtpData) -> Result<FtpClient, FailureReason> {
    let mut client = FtpClient::connect(&params.host, params.port)
        .await
        .map_err(|_| FailureReason::FtpUnavailable)?;
    client
        .login(&params.user, &params.passwd)
        .await
        .map_err(|_| FailureReason::FtpLoginFailed)?;
    Ok(client)
}

/// 文件在服务器上的目录
///
/// `relative` 的第一段是批次节点本身：节点为目录时 `base` 已经指向它，
/// 节点为文件时 `relative` 只有文件名。
pub(crate) fn job_cwd(base: &str, relative: &Path) -> String {
    let mut parts: Vec<String> = base
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if let Some(parent) = relative.parent() {
        parts.extend(
            parent
                .components()
                .filter_map(|c| match c {
                    Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                    _ => None,
                })
                .skip(1),
        );
    }
    format!("/{}", parts.join("/"))
}

fn transfer_reason(e: FtpError) -> FailureReason {
    match e {
        FtpError::Reply { code: 550, .. } => FailureReason::RemoteDeleted,
        FtpError::Reply { code, message } => FailureReason::RemoteError(format!("{code} {message}")),
        FtpError::Io(_) | FtpError::Closed => FailureReason::Disconnected,
        FtpError::Malformed(msg) => FailureReason::RemoteError(msg),
    }
}

pub(crate) async fn download(
    ctx: &Context,
    client: &mut FtpClient,
    base_cwd: &str,
    job: &DownloadJob,
) -> Result<Outcome, FailureReason> {
    let path = job.local_path(&ctx.download_dir);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| FailureReason::io(&e))?;
    }
    let local_size = fs::metadata(&path).await.map_or(0, |m| m.len());

    if ctx.paused.take(job.id) {
        return Ok(Outcome::Paused);
    }

    client.type_binary().await.map_err(transfer_reason)?;
    let cwd = job_cwd(base_cwd, &job.relative_path);
    if let Err(e) = client.cwd(&cwd).await {
        return Err(match e {
            FtpError::Reply { .. } => FailureReason::DirectoryGone,
            other => transfer_reason(other),
        });
    }

    let total = match client.size(&job.file_name).await {
        Ok(size) => Some(size),
        Err(FtpError::Reply { code: 550, .. }) => return Err(FailureReason::RemoteDeleted),
        Err(e @ (FtpError::Io(_) | FtpError::Closed)) => return Err(transfer_reason(e)),
        Err(_) => None,
    };
    if total.is_some_and(|total| local_size >= total && total > 0) {
        debug!("{} already complete", path.display());
        return Ok(Outcome::Done);
    }

    let mut data = client
        .retr(&job.file_name, local_size)
        .await
        .map_err(transfer_reason)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(|e| FailureReason::io(&e))?;

    let mut buf = vec![0u8; READ_CHUNK];
    let mut written = local_size;
    let mut last = None;
    loop {
        if ctx.paused.take(job.id) {
            drop(data);
            file.flush().await.map_err(|e| FailureReason::io(&e))?;
            client.discard_transfer_reply(ABORT_WAIT).await;
            return Ok(Outcome::Paused);
        }
        let n = data
            .read(&mut buf)
            .await
            .map_err(|_| FailureReason::Disconnected)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .await
            .map_err(|e| FailureReason::io(&e))?;
        written += n as u64;

        if let Some(total) = total {
            let pct = percent(written, total);
            if last != Some(pct) {
                last = Some(pct);
                ctx.emit(job.id, DownloadStatus::Doing(pct));
            }
        }
    }
    drop(data);
    file.flush().await.map_err(|e| FailureReason::io(&e))?;
    client.finish_transfer().await.map_err(transfer_reason)?;
    Ok(Outcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_cwd() {
        assert_eq!(job_cwd("/", Path::new("x.txt")), "/");
        assert_eq!(job_cwd("/", Path::new("docs/sub/b.txt")), "/sub");
        assert_eq!(job_cwd("/docs", Path::new("docs/a.txt")), "/docs");
        assert_eq!(job_cwd("/docs", Path::new("docs/sub/deep/c.txt")), "/docs/sub/deep");
        assert_eq!(job_cwd("", Path::new("a.txt")), "/");
    }
}
