//! HTTP 共享服务
//!
//! 运行在独立的 worker 进程中。路由：
//!
//! - `GET /file_list/{uuid}`: 浏览文件或目录
//! - `GET /download/{uuid}`: 下载文件（支持 Range）/ 目录确认 / 获取 FTP 参数
//! - `/mobile/...`: 移动端网页使用的接口，见 [`mobile`]
//!
//! 所有业务错误以 HTTP 200 + `errno` 返回。

pub mod handlers;
pub mod mobile;
pub mod range;
pub mod response;

use axum::Router;
use axum::extract::{ConnectInfo, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use super::worker::SettingsApplier;
use super::{Command, Notification};
use crate::credentials::{Credentials, SecretPair};
use crate::logging::SHARER_TARGET;
use crate::model::{DOWNLOAD_URI, FILE_LIST_URI, ServiceEndpoint, ShareEntity, SharingModel};
use response::ApiError;

/// 携带共享密码的请求头
pub const PASSWORD_HEADER: &str = "x-share-password";
/// FTP 共享只返回给带有该请求头的桌面客户端
pub const CLIENT_HEADER: &str = "x-client";

/// 请求处理共享的状态
pub struct AppState {
    pub(crate) model: RwLock<SharingModel>,
    pub(crate) endpoint: ServiceEndpoint,
    notify: mpsc::UnboundedSender<Notification>,
}

impl AppState {
    /// 更新本地计数并上报给控制进程
    pub(crate) async fn record(&self, event: Notification) {
        {
            let mut model = self.model.write().await;
            if let Some(share) = model.root_of_mut(event.uuid()) {
                match event {
                    Notification::Browsed { .. } => share.browse_number += 1,
                    Notification::Downloaded { .. } => share.download_number += 1,
                }
            }
        }
        debug!("Recording {:?}", event);
        if self.notify.send(event).is_err() {
            warn!("Notification channel closed");
        }
    }
}

/// 需要校验的凭据；未设置密码或已免密时为 `None`
pub(crate) fn required_secret(share: &ShareEntity) -> Option<SecretPair> {
    if share.needs_password() {
        share.secret().cloned()
    } else {
        None
    }
}

/// 校验共享密码，派生计算放到阻塞线程池
pub(crate) async fn check_password(
    secret: Option<SecretPair>,
    password: String,
) -> Result<(), ApiError> {
    let Some(secret) = secret else {
        return Ok(());
    };
    let verified =
        tokio::task::spawn_blocking(move || Credentials::verify_pair(&secret, &password))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
    if verified {
        Ok(())
    } else {
        Err(ApiError::wrong_password())
    }
}

/// 记录每个请求到共享日志
async fn access_log(request: Request, next: Next) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |c| c.0.ip().to_string());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    info!(
        target: SHARER_TARGET,
        client = %client,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        "request"
    );
    response
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&format!("{FILE_LIST_URI}/:uuid"), get(handlers::file_list))
        .route(&format!("{DOWNLOAD_URI}/:uuid"), get(handlers::download))
        .nest("/mobile", mobile::router())
        .layer(middleware::from_fn(access_log))
        .with_state(state)
}

/// HTTP 服务：共享表 + 命令循环
pub struct HttpService {
    state: Arc<AppState>,
    settings: SettingsApplier,
}

impl HttpService {
    pub fn new(
        endpoint: ServiceEndpoint,
        settings: SettingsApplier,
        notify: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        Self {
            state: Arc::new(AppState {
                model: RwLock::new(SharingModel::new()),
                endpoint,
                notify,
            }),
            settings,
        }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// 执行一条命令（命令循环是唯一调用者）
    pub async fn apply(&mut self, command: Command) {
        match command {
            Command::Add { entity } => {
                info!(
                    "HTTP share added: {} -> {}",
                    entity.uuid(),
                    entity.target_path().display()
                );
                self.state.model.write().await.insert(*entity);
            }
            Command::Remove { uuid } => {
                if self.state.model.write().await.remove(&uuid).is_some() {
                    info!("HTTP share removed: {}", uuid);
                } else {
                    debug!("Remove for unknown share {}", uuid);
                }
            }
            Command::Settings { update } => self.settings.apply(&update),
            Command::FreeSecret { uuid, value } => {
                if let Some(share) = self.state.model.write().await.get_mut(&uuid) {
                    share.free_secret = value;
                    info!("Free secret for {} set to {}", uuid, value);
                }
            }
        }
    }

    /// 同时运行 HTTP 服务与命令循环，命令通道关闭时返回
    pub async fn run(
        mut self,
        listener: TcpListener,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) -> std::io::Result<()> {
        info!("HTTP service listening on {}", listener.local_addr()?);
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let server = async move { axum::serve(listener, app).await };
        let drain = async {
            while let Some(command) = commands.recv().await {
                self.apply(command).await;
            }
        };

        tokio::select! {
            result = server => result,
            () = drain => {
                info!("Command channel closed, stopping HTTP service");
                Ok(())
            }
        }
    }
}
