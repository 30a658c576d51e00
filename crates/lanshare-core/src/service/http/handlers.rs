//! 浏览与下载接口

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

use super::range::{ByteRange, OCTET_STREAM, stream_file};
use super::response::{ApiError, ok};
use super::{AppState, CLIENT_HEADER, PASSWORD_HEADER, check_password, required_secret};
use crate::model::{ClientEntry, Entry, FtpData, ShareType};
use crate::service::Notification;

#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    pub confirm: Option<bool>,
    pub hit_log: Option<bool>,
    pub password: Option<String>,
}

pub async fn file_list(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Response, ApiError> {
    let view = {
        let model = state.model.read().await;
        let entry = model
            .resolve(&uuid)
            .filter(Entry::exists)
            .ok_or_else(ApiError::not_found)?;
        entry.to_dict_client(&state.endpoint)
    };

    state.record(Notification::Browsed { uuid }).await;
    Ok(ok(view))
}

enum DownloadPlan {
    File { path: PathBuf, name: String },
    Listing(ClientEntry),
    Ftp(FtpData),
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let confirmed = query.confirm.unwrap_or(false);

    let (plan, secret) = {
        let model = state.model.read().await;
        let entry = model
            .resolve(&uuid)
            .filter(Entry::exists)
            .ok_or_else(ApiError::not_found)?;

        let plan = match entry.share().share_type() {
            ShareType::Ftp => {
                if !headers.contains_key(CLIENT_HEADER) {
                    return Err(ApiError::bad_request("FTP 共享仅支持使用客户端下载"));
                }
                if entry.is_dir() && !confirmed {
                    return Err(ApiError::bad_request("下载目录需要确认"));
                }
                let data = entry
                    .to_ftp_data(&state.endpoint)
                    .ok_or_else(|| ApiError::Internal("FTP share without parameters".into()))?;
                DownloadPlan::Ftp(data)
            }
            ShareType::Http if entry.is_dir() => {
                if !confirmed {
                    return Err(ApiError::bad_request("下载目录需要确认"));
                }
                DownloadPlan::Listing(entry.to_dict_client(&state.endpoint))
            }
            ShareType::Http => DownloadPlan::File {
                path: entry.path().to_path_buf(),
                name: entry.file_name().to_string(),
            },
        };
        (plan, required_secret(entry.share()))
    };

    let password = headers
        .get(PASSWORD_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(query.password)
        .unwrap_or_default();
    check_password(secret, password).await?;

    match plan {
        DownloadPlan::File { path, name } => {
            let range = ByteRange::from_headers(&headers);
            let response = stream_file(&path, &name, range, OCTET_STREAM).await?;
            let from_start = range.is_none_or(|r| r.start == 0);
            if query.hit_log.unwrap_or(from_start) && response.status().is_success() {
                state.record(Notification::Downloaded { uuid }).await;
            }
            Ok(response)
        }
        DownloadPlan::Listing(view) => {
            state.record(Notification::Downloaded { uuid }).await;
            Ok(ok(view))
        }
        DownloadPlan::Ftp(data) => {
            state.record(Notification::Downloaded { uuid }).await;
            Ok(ok(data))
        }
    }
}
