//! 断点续传的分段读取
//!
//! `Range: bytes=start-[end]`，其中 `end` 为开区间（移动端按
//! `end = start + 分片大小` 发送），超出文件大小时截断。
//!
//! 只有 `start > 0` 时返回 206；从 0 开始的分片仍为 200，但
//! `Content-Length`/`Content-Range` 按实际范围计算。空范围返回 416。

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use super::response::ApiError;

/// 每次读取的块大小
pub const CHUNK_SIZE: usize = 1024 * 1024;

pub const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    /// 解析 `bytes=start-[end]`，不支持的格式返回 `None`（按整文件处理）
    pub fn parse(value: &str) -> Option<Self> {
        let spec = value.trim().strip_prefix("bytes=")?;
        let (start, end) = spec.split_once('-')?;
        let start = start.trim().parse().ok()?;
        let end = match end.trim() {
            "" => None,
            end => Some(end.parse().ok()?),
        };
        Some(Self { start, end })
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse)
    }
}

/// `attachment; filename*=UTF-8''<name>`
pub fn content_disposition(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    format!("attachment; filename*=UTF-8''{encoded}")
}

/// 按范围流式返回文件
pub async fn stream_file(
    path: &Path,
    name: &str,
    range: Option<ByteRange>,
    content_type: &str,
) -> Result<Response, ApiError> {
    let mut file = File::open(path).await?;
    let size = file.metadata().await?.len();

    let (start, end) = match range {
        None => (0, size),
        Some(r) => (r.start, r.end.map_or(size, |e| e.min(size))),
    };

    // 空文件从头读取时按整文件返回
    if range.is_some() && start >= end && !(start == 0 && size == 0) {
        return Ok((
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{size}"))],
        )
            .into_response());
    }

    let len = end - start;
    if start > 0 {
        file.seek(SeekFrom::Start(start)).await?;
    }
    let body = Body::from_stream(ReaderStream::with_capacity(file.take(len), CHUNK_SIZE));

    let mut builder = Response::builder()
        .status(if start > 0 {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        })
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, len)
        .header(header::ACCEPT_RANGES, "bytes");
    if let Ok(value) = HeaderValue::from_str(&content_disposition(name)) {
        builder = builder.header(header::CONTENT_DISPOSITION, value);
    }
    if range.is_some() && len > 0 {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end.saturating_sub(1), size),
        );
    }

    builder
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(
            ByteRange::parse("bytes=100-"),
            Some(ByteRange {
                start: 100,
                end: None
            })
        );
        assert_eq!(
            ByteRange::parse("bytes=0-1048576"),
            Some(ByteRange {
                start: 0,
                end: Some(1_048_576)
            })
        );
        assert_eq!(ByteRange::parse("bytes=-500"), None);
        assert_eq!(ByteRange::parse("items=0-1"), None);
        assert_eq!(ByteRange::parse("bytes=a-"), None);
    }

    #[test]
    fn test_content_disposition_encoding() {
        assert_eq!(
            content_disposition("a b.txt"),
            "attachment; filename*=UTF-8''a%20b.txt"
        );
        assert_eq!(
            content_disposition("文"),
            "attachment; filename*=UTF-8''%E6%96%87"
        );
    }

    async fn body_of(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_stream_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let data: Vec<u8> = (0..=255u8).collect();
        std::fs::write(&path, &data).unwrap();

        let full = stream_file(&path, "f.bin", None, OCTET_STREAM).await.unwrap();
        assert_eq!(full.status(), StatusCode::OK);
        assert!(full.headers().get(header::CONTENT_RANGE).is_none());
        assert_eq!(body_of(full).await, data);

        let tail = stream_file(&path, "f.bin", ByteRange::parse("bytes=200-"), OCTET_STREAM)
            .await
            .unwrap();
        assert_eq!(tail.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(tail.headers()[header::CONTENT_RANGE], "bytes 200-255/256");
        assert_eq!(tail.headers()[header::CONTENT_LENGTH], "56");
        assert_eq!(body_of(tail).await, &data[200..]);

        // end 为开区间且超出部分被截断
        let window = stream_file(&path, "f.bin", ByteRange::parse("bytes=10-20"), OCTET_STREAM)
            .await
            .unwrap();
        assert_eq!(window.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(window.headers()[header::CONTENT_RANGE], "bytes 10-19/256");
        assert_eq!(body_of(window).await, &data[10..20]);

        let clamped = stream_file(&path, "f.bin", ByteRange::parse("bytes=250-999"), OCTET_STREAM)
            .await
            .unwrap();
        assert_eq!(body_of(clamped).await, &data[250..]);

        let beyond = stream_file(&path, "f.bin", ByteRange::parse("bytes=256-"), OCTET_STREAM)
            .await
            .unwrap();
        assert_eq!(beyond.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(beyond.headers()[header::CONTENT_RANGE], "bytes */256");
    }

    #[tokio::test]
    async fn test_first_chunk_is_ok_not_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let data: Vec<u8> = (0..=255u8).collect();
        std::fs::write(&path, &data).unwrap();

        let head = stream_file(&path, "f.bin", ByteRange::parse("bytes=0-50"), OCTET_STREAM)
            .await
            .unwrap();
        assert_eq!(head.status(), StatusCode::OK);
        assert_eq!(head.headers()[header::CONTENT_LENGTH], "50");
        assert_eq!(head.headers()[header::CONTENT_RANGE], "bytes 0-49/256");
        assert_eq!(body_of(head).await, &data[..50]);
    }

    #[tokio::test]
    async fn test_empty_range_not_satisfiable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, [7u8; 256]).unwrap();

        let reversed = stream_file(&path, "f.bin", ByteRange::parse("bytes=10-5"), OCTET_STREAM)
            .await
            .unwrap();
        assert_eq!(reversed.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(reversed.headers()[header::CONTENT_RANGE], "bytes */256");

        let empty = dir.path().join("empty.bin");
        std::fs::write(&empty, b"").unwrap();
        let past_end = stream_file(&empty, "empty.bin", ByteRange::parse("bytes=5-"), OCTET_STREAM)
            .await
            .unwrap();
        assert_eq!(past_end.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(past_end.headers()[header::CONTENT_RANGE], "bytes */0");

        let whole = stream_file(&empty, "empty.bin", ByteRange::parse("bytes=0-"), OCTET_STREAM)
            .await
            .unwrap();
        assert_eq!(whole.status(), StatusCode::OK);
        assert!(body_of(whole).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = stream_file(&dir.path().join("gone"), "gone", None, OCTET_STREAM)
            .await
            .unwrap_err();
        assert_eq!(err.errno(), 404);
    }
}
