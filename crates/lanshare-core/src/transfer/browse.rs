//! 浏览共享链接，把文件树展开成下载任务

use std::path::Path;

use super::http::{read_envelope, request_reason};
use super::{DownloadJob, FailureReason, FtpBatch};
use crate::model::ClientEntry;
use crate::service::http::PASSWORD_HEADER;

/// 读取 `file_list`（或确认后的目录 `download`）链接返回的文件树
pub async fn fetch_listing(
    client: &reqwest::Client,
    url: &str,
    password: Option<&str>,
) -> Result<ClientEntry, FailureReason> {
    let mut request = client.get(url);
    if let Some(password) = password {
        request = request.header(PASSWORD_HEADER, password);
    }
    let response = request.send().await.map_err(|e| request_reason(&e))?;
    read_envelope(response).await
}

impl ClientEntry {
    /// 展开为 HTTP 下载任务，保存路径为 `base/<本节点名>/...`
    pub fn flatten(&self, base: &Path) -> Vec<DownloadJob> {
        let mut jobs = Vec::new();
        self.collect_jobs(base, &mut jobs);
        jobs
    }

    fn collect_jobs(&self, base: &Path, jobs: &mut Vec<DownloadJob>) {
        let relative = base.join(&self.file_name);
        if self.is_dir {
            for child in &self.children {
                child.collect_jobs(&relative, jobs);
            }
        } else {
            jobs.push(DownloadJob::new(self.download_url.clone(), relative));
        }
    }

    /// 目录下载链接需要带上确认参数
    pub fn confirmed_download_url(&self) -> String {
        if self.is_dir {
            format!("{}?confirm=true", self.download_url)
        } else {
            self.download_url.clone()
        }
    }

    /// FTP 共享的下载批次，任务路径相对于本节点所在目录
    pub fn ftp_batch(&self, password: Option<String>) -> FtpBatch {
        FtpBatch {
            params_url: self.confirmed_download_url(),
            password: password.clone(),
            jobs: self
                .flatten(Path::new(""))
                .into_iter()
                .map(|job| job.with_password(password.clone()))
                .collect(),
        }
    }
}
