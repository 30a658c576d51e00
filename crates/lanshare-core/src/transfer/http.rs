//! HTTP 下载

use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, RANGE};
use serde::de::DeserializeOwned;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::engine::Context;
use super::{DownloadJob, DownloadStatus, FailureReason, Outcome, percent};
use crate::model::Envelope;
use crate::service::http::PASSWORD_HEADER;

pub(crate) fn request_reason(e: &reqwest::Error) -> FailureReason {
    if e.is_connect() {
        FailureReason::ConnectionRefused
    } else if e.is_timeout() || e.is_body() {
        FailureReason::Disconnected
    } else {
        FailureReason::Unknown(e.to_string())
    }
}

pub(crate) fn unexpected_reply() -> FailureReason {
    FailureReason::RemoteError("unexpected response from the sharing host".into())
}

/// 解析统一返回体，errno 404 视为远端已删除
pub(crate) async fn read_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, FailureReason> {
    let envelope = response
        .json::<Envelope<serde_json::Value>>()
        .await
        .map_err(|_| unexpected_reply())?;
    if envelope.errno == Envelope::<()>::NOT_FOUND {
        return Err(FailureReason::RemoteDeleted);
    }
    if !envelope.is_ok() {
        return Err(FailureReason::RemoteError(envelope.errmsg));
    }
    let data = envelope.data.ok_or_else(unexpected_reply)?;
    serde_json::from_value(data).map_err(|_| unexpected_reply())
}

pub(crate) async fn download(ctx: &Context, job: &DownloadJob) -> Result<Outcome, FailureReason> {
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

    let mut request = ctx.client.get(&job.url);
    if local_size > 0 {
        request = request.header(RANGE, format!("bytes={local_size}-"));
    }
    if let Some(password) = &job.password {
        request = request.header(PASSWORD_HEADER, password);
    }
    let response = request.send().await.map_err(|e| request_reason(&e))?;
    let status = response.status();

    if status == StatusCode::RANGE_NOT_SATISFIABLE {
        debug!("{} already complete", path.display());
        return Ok(Outcome::Done);
    }

    let is_file = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/octet-stream"));
    if !is_file {
        return Err(match read_envelope::<serde_json::Value>(response).await {
            Ok(_) => unexpected_reply(),
            Err(reason) => reason,
        });
    }

    let remaining = response.content_length();
    let (mut file, mut written) = match status {
        StatusCode::PARTIAL_CONTENT => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| FailureReason::io(&e))?;
            (file, local_size)
        }
        StatusCode::OK => {
            if local_size > 0 {
                warn!("Server ignored range for {}, restarting", job.url);
            }
            let file = fs::File::create(&path)
                .await
                .map_err(|e| FailureReason::io(&e))?;
            (file, 0)
        }
        other => return Err(FailureReason::RemoteError(format!("HTTP {other}"))),
    };
    let total = remaining.map(|r| r + written);

    let mut stream = response.bytes_stream();
    let mut last = None;
    loop {
        if ctx.paused.take(job.id) {
            file.flush().await.map_err(|e| FailureReason::io(&e))?;
            return Ok(Outcome::Paused);
        }
        let Some(chunk) = stream.next().await else {
            break;
        };
        let chunk = chunk.map_err(|_| FailureReason::Disconnected)?;
        file.write_all(&chunk)
            .await
            .map_err(|e| FailureReason::io(&e))?;
        written += chunk.len() as u64;

        if let Some(total) = total {
            let pct = percent(written, total);
            if last != Some(pct) {
                last = Some(pct);
                ctx.emit(job.id, DownloadStatus::Doing(pct));
            }
        }
    }
    file.flush().await.map_err(|e| FailureReason::io(&e))?;

    if total.is_some_and(|total| written < total) {
        return Err(FailureReason::Disconnected);
    }
    Ok(Outcome::Done)
}
