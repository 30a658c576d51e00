//! 下载引擎：两个后台任务分别处理 HTTP 与 FTP 队列

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    DownloadEvent, DownloadJob, DownloadStatus, FailureReason, FtpBatch, JobId, Outcome, PauseSet,
    ftp, http,
};
use crate::model::ClientEntry;

/// 每批并发的 HTTP 任务数
pub const HTTP_BATCH: usize = 5;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub download_dir: PathBuf,
    pub http_batch: usize,
}

impl EngineConfig {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            http_batch: HTTP_BATCH,
        }
    }
}

/// 两个后台任务共享的上下文
pub(crate) struct Context {
    pub(crate) client: reqwest::Client,
    pub(crate) download_dir: PathBuf,
    pub(crate) paused: PauseSet,
    events: mpsc::UnboundedSender<DownloadEvent>,
}

impl Context {
    pub(crate) fn emit(&self, job: JobId, status: DownloadStatus) {
        let _ = self.events.send(DownloadEvent { job, status });
    }

    fn finish(&self, job: JobId, result: Result<Outcome, FailureReason>) {
        let status = match result {
            Ok(Outcome::Done) => DownloadStatus::Success,
            Ok(Outcome::Paused) => DownloadStatus::Pause,
            Err(reason) => {
                warn!("Download {} failed: {}", job, reason);
                DownloadStatus::Failed(reason)
            }
        };
        debug!("Download {} finished: {:?}", job, status);
        self.paused.retire(job);
        self.emit(job, status);
    }
}

pub struct TransferEngine {
    ctx: Arc<Context>,
    http_tx: mpsc::UnboundedSender<DownloadJob>,
    ftp_tx: mpsc::UnboundedSender<FtpBatch>,
}

impl TransferEngine {
    /// 创建引擎并启动后台任务，返回进度事件接收端
    pub fn new(config: EngineConfig) -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client: {}, using defaults", e);
                reqwest::Client::new()
            });

        let (events, events_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(Context {
            client,
            download_dir: config.download_dir,
            paused: PauseSet::default(),
            events,
        });

        let (http_tx, http_rx) = mpsc::unbounded_channel();
        let (ftp_tx, ftp_rx) = mpsc::unbounded_channel();
        tokio::spawn(http_worker(http_rx, ctx.clone(), config.http_batch.max(1)));
        tokio::spawn(ftp_worker(ftp_rx, ctx.clone()));

        (
            Self {
                ctx,
                http_tx,
                ftp_tx,
            },
            events_rx,
        )
    }

    /// 加入 HTTP 下载队列
    pub fn enqueue_http(&self, jobs: impl IntoIterator<Item = DownloadJob>) {
        for job in jobs {
            self.ctx.paused.activate(job.id);
            if self.http_tx.send(job).is_err() {
                warn!("HTTP download worker is gone");
            }
        }
    }

    /// 加入 FTP 下载队列
    pub fn enqueue_ftp(&self, batch: FtpBatch) {
        for job in &batch.jobs {
            self.ctx.paused.activate(job.id);
        }
        if self.ftp_tx.send(batch).is_err() {
            warn!("FTP download worker is gone");
        }
    }

    /// 请求暂停；多次调用等同一次
    pub fn pause(&self, job: JobId) {
        self.ctx.paused.mark(job);
    }

    /// 读取共享链接对应的文件树
    pub async fn fetch_listing(
        &self,
        url: &str,
        password: Option<&str>,
    ) -> Result<ClientEntry, FailureReason> {
        super::browse::fetch_listing(&self.ctx.client, url, password).await
    }

    pub fn download_dir(&self) -> &std::path::Path {
        &self.ctx.download_dir
    }
}

async fn http_worker(
    mut rx: mpsc::UnboundedReceiver<DownloadJob>,
    ctx: Arc<Context>,
    batch_size: usize,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(job) => batch.push(job),
                Err(_) => break,
            }
        }
        info!("Starting HTTP batch of {} downloads", batch.len());

        join_all(batch.iter().map(|job| {
            let ctx = &ctx;
            async move {
                let result = http::download(ctx, job).await;
                ctx.finish(job.id, result);
            }
        }))
        .await;
    }
    debug!("HTTP download worker stopped");
}

async fn ftp_worker(mut rx: mpsc::UnboundedReceiver<FtpBatch>, ctx: Arc<Context>) {
    while let Some(batch) = rx.recv().await {
        run_ftp_batch(&ctx, batch).await;
    }
    debug!("FTP download worker stopped");
}

/// 连接参数每批只取一次；每个任务使用独立的控制连接
async fn run_ftp_batch(ctx: &Context, batch: FtpBatch) {
    let params = match ftp::fetch_params(ctx, &batch).await {
        Ok(params) => params,
        Err(reason) => {
            for job in &batch.jobs {
                ctx.finish(job.id, Err(reason.clone()));
            }
            return;
        }
    };
    info!(
        "Starting FTP batch of {} downloads from {}:{}",
        batch.jobs.len(),
        params.host,
        params.port
    );

    for job in &batch.jobs {
        let result = match ftp::open_session(&params).await {
            Ok(mut client) => {
                let result = ftp::download(ctx, &mut client, &params.cwd, job).await;
                client.quit().await;
                result
            }
            Err(reason) => Err(reason),
        };
        ctx.finish(job.id, result);
    }
}
