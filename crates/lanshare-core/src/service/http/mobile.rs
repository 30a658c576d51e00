//! 移动端网页接口
//!
//! 与桌面端接口共享同一张共享表，但密码通过请求体传递，文件下载
//! 按扩展名返回 `Content-Type`，并支持向 HTTP 目录共享分片上传。
//!
//! 分片文件保存在目标目录下，命名为 `.<文件名>.<序号>.part`，合并时按
//! 序号顺序拼接。

use axum::Json;
use axum::Router;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::range::{ByteRange, stream_file};
use super::response::{ApiError, ok};
use super::{AppState, check_password, required_secret};
use crate::credentials::SecretPair;
use crate::logging::SHARER_TARGET;
use crate::model::{Entry, ShareType};
use crate::service::Notification;

/// 上传请求体上限（单个分片）
const UPLOAD_BODY_LIMIT: usize = 64 * 1024 * 1024;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/file_list/:uuid", get(file_list_open).post(file_list))
        .route("/file_size/:uuid", get(file_size))
        .route("/download/:uuid", post(download))
        .route("/upload/:uuid", post(upload))
        .route("/upload/merge/:uuid", post(merge))
        .route("/upload/remove/:uuid", post(remove_parts))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
}

#[derive(Debug, Default, Deserialize)]
pub struct PasswordBody {
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct MobileQuery {
    pub password: Option<String>,
    pub hit_log: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct MergeBody {
    #[serde(default)]
    pub password: String,
    pub file_name: String,
    pub chunk_count: u32,
}

#[derive(Debug, Deserialize)]
pub struct RemoveBody {
    #[serde(default)]
    pub password: String,
    pub file_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileSize {
    pub size: u64,
}

/// 解析出的目标节点
struct Target {
    path: PathBuf,
    name: String,
    is_dir: bool,
    share_type: ShareType,
    secret: Option<SecretPair>,
}

async fn lookup(state: &AppState, uuid: &str) -> Result<Target, ApiError> {
    let model = state.model.read().await;
    let entry = model
        .resolve(uuid)
        .filter(Entry::exists)
        .ok_or_else(ApiError::not_found)?;
    Ok(Target {
        path: entry.path().to_path_buf(),
        name: entry.file_name().to_string(),
        is_dir: entry.is_dir(),
        share_type: entry.share().share_type(),
        secret: required_secret(entry.share()),
    })
}

/// 查找并校验密码
async fn authorized(state: &AppState, uuid: &str, password: String) -> Result<Target, ApiError> {
    let mut target = lookup(state, uuid).await?;
    check_password(target.secret.take(), password).await?;
    Ok(target)
}

async fn listing(state: &AppState, uuid: String, password: String) -> Result<Response, ApiError> {
    authorized(state, &uuid, password).await?;
    let view = {
        let model = state.model.read().await;
        let entry = model.resolve(&uuid).ok_or_else(ApiError::not_found)?;
        entry.to_dict_mobile(&state.endpoint)
    };
    state.record(Notification::Browsed { uuid }).await;
    Ok(ok(view))
}

/// 无密码共享可以直接 GET 浏览
async fn file_list_open(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<MobileQuery>,
) -> Result<Response, ApiError> {
    listing(&state, uuid, query.password.unwrap_or_default()).await
}

async fn file_list(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Json(body): Json<PasswordBody>,
) -> Result<Response, ApiError> {
    listing(&state, uuid, body.password).await
}

async fn file_size(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<MobileQuery>,
) -> Result<Response, ApiError> {
    let target = authorized(&state, &uuid, query.password.unwrap_or_default()).await?;
    if target.is_dir {
        return Err(ApiError::bad_request("目录没有文件大小"));
    }
    let size = fs::metadata(&target.path).await?.len();
    Ok(ok(FileSize { size }))
}

async fn download(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<MobileQuery>,
    headers: HeaderMap,
    Json(body): Json<PasswordBody>,
) -> Result<Response, ApiError> {
    let target = authorized(&state, &uuid, body.password).await?;
    if target.share_type == ShareType::Ftp {
        return Err(ApiError::bad_request("FTP 共享仅支持使用客户端下载"));
    }
    if target.is_dir {
        return Err(ApiError::bad_request("目录请逐个文件下载"));
    }

    let range = ByteRange::from_headers(&headers);
    let content_type = mime_guess::from_path(&target.path)
        .first_or_octet_stream()
        .to_string();
    let response = stream_file(&target.path, &target.name, range, &content_type).await?;

    let from_start = range.is_none_or(|r| r.start == 0);
    if query.hit_log.unwrap_or(from_start) && response.status().is_success() {
        state.record(Notification::Downloaded { uuid }).await;
    }
    Ok(response)
}

/// 上传文件名不能包含路径
fn checked_name(name: &str) -> Result<&str, ApiError> {
    let name = name.trim();
    if name.is_empty()
        || name.contains(['/', '\\', '\0'])
        || name.contains("..")
        || name == "."
    {
        return Err(ApiError::bad_request("非法的文件名"));
    }
    Ok(name)
}

fn part_path(dir: &FsPath, name: &str, chunk_id: u32) -> PathBuf {
    dir.join(format!(".{name}.{chunk_id}.part"))
}

/// 上传目标目录：只允许 HTTP 目录共享
async fn upload_dir(state: &AppState, uuid: &str, password: String) -> Result<PathBuf, ApiError> {
    let target = authorized(state, uuid, password).await?;
    if target.share_type != ShareType::Http || !target.is_dir {
        return Err(ApiError::bad_request("只能上传到 HTTP 共享的目录"));
    }
    Ok(target.path)
}

fn ensure_absent(path: &FsPath) -> Result<(), ApiError> {
    if path.exists() {
        Err(ApiError::bad_request("同名文件已存在"))
    } else {
        Ok(())
    }
}

#[derive(Default)]
struct UploadForm {
    password: String,
    file_name: String,
    chunk_id: Option<u32>,
    data: Option<axum::body::Bytes>,
}

async fn upload(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "password" => form.password = field_text(field).await?,
            "file_name" => form.file_name = field_text(field).await?,
            "chunk_id" => {
                let text = field_text(field).await?;
                form.chunk_id = Some(
                    text.trim()
                        .parse()
                        .map_err(|_| ApiError::bad_request("分片序号无效"))?,
                );
            }
            "file" => {
                form.data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::bad_request(e.to_string()))?,
                );
            }
            _ => {}
        }
    }

    let dir = upload_dir(&state, &uuid, form.password).await?;
    let name = checked_name(&form.file_name)?;
    ensure_absent(&dir.join(name))?;
    let chunk_id = form
        .chunk_id
        .ok_or_else(|| ApiError::bad_request("缺少分片序号"))?;
    let data = form
        .data
        .ok_or_else(|| ApiError::bad_request("缺少文件内容"))?;

    fs::write(part_path(&dir, name, chunk_id), &data).await?;
    debug!("Stored chunk {} of {} ({} bytes)", chunk_id, name, data.len());
    Ok(ok(chunk_id))
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

async fn concat_parts(dir: &FsPath, name: &str, count: u32, out: &mut File) -> Result<(), ApiError> {
    for chunk_id in 0..count {
        let mut part = match File::open(part_path(dir, name, chunk_id)).await {
            Ok(part) => part,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ApiError::bad_request(format!("缺少第 {chunk_id} 个分片")));
            }
            Err(e) => return Err(e.into()),
        };
        tokio::io::copy(&mut part, out).await?;
    }
    out.flush().await?;
    Ok(())
}

async fn merge(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Json(body): Json<MergeBody>,
) -> Result<Response, ApiError> {
    let dir = upload_dir(&state, &uuid, body.password).await?;
    let name = checked_name(&body.file_name)?;
    let target = dir.join(name);
    ensure_absent(&target)?;

    let mut out = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                ApiError::bad_request("同名文件已存在")
            } else {
                e.into()
            }
        })?;

    if let Err(e) = concat_parts(&dir, name, body.chunk_count, &mut out).await {
        drop(out);
        let _ = fs::remove_file(&target).await;
        return Err(e);
    }

    for chunk_id in 0..body.chunk_count {
        let _ = fs::remove_file(part_path(&dir, name, chunk_id)).await;
    }
    info!(
        target: SHARER_TARGET,
        "Upload merged into {} ({} chunks)",
        target.display(),
        body.chunk_count
    );
    Ok(ok(name.to_string()))
}

async fn remove_parts(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Json(body): Json<RemoveBody>,
) -> Result<Response, ApiError> {
    let dir = upload_dir(&state, &uuid, body.password).await?;
    let name = checked_name(&body.file_name)?;
    let prefix = format!(".{name}.");

    let mut removed = 0u32;
    let mut entries = fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if file_name.starts_with(&prefix)
            && file_name.ends_with(".part")
            && fs::remove_file(entry.path()).await.is_ok()
        {
            removed += 1;
        }
    }
    debug!("Removed {} stray chunks of {}", removed, name);
    Ok(ok(removed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_name() {
        assert_eq!(checked_name(" a.txt ").unwrap(), "a.txt");
        assert!(checked_name("").is_err());
        assert!(checked_name("../x").is_err());
        assert!(checked_name("a/b").is_err());
        assert!(checked_name("a\\b").is_err());
        assert!(checked_name("..").is_err());
    }

    #[test]
    fn test_part_naming() {
        let dir = FsPath::new("/tmp/up");
        assert_eq!(part_path(dir, "a.txt", 3), dir.join(".a.txt.3.part"));
    }
}
