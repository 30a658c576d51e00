//! 统一返回体与错误映射

use axum::Json;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::model::Envelope;

/// 成功返回
pub fn ok<T: Serialize>(data: T) -> Response {
    Json(Envelope::ok(data)).into_response()
}

/// 请求处理错误，统一渲染为 HTTP 200 + errno
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found() -> Self {
        Self::NotFound("错误的路径或文件已不存在".to_string())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn wrong_password() -> Self {
        Self::BadRequest("密码错误".to_string())
    }

    pub fn errno(&self) -> u16 {
        match self {
            ApiError::NotFound(_) => Envelope::<()>::NOT_FOUND,
            ApiError::BadRequest(_) => Envelope::<()>::BAD_REQUEST,
            ApiError::Internal(_) => Envelope::<()>::INTERNAL,
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::not_found()
        } else {
            Self::Internal(e.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(msg) = &self {
            tracing::error!(error = %msg, "Internal server error");
        }
        let body: Envelope<()> = Envelope {
            errno: self.errno(),
            errmsg: self.to_string(),
            data: None,
        };
        Json(body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_errors_are_http_200() {
        let response = ApiError::bad_request("no").into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(ApiError::from(io).errno(), 404);
    }
}
