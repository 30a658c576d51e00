//! `lanshare download`：浏览共享链接并下载到本地
//!
//! Ctrl-C 会暂停所有未完成的任务，已下载的部分保留，再次运行同一命令
//! 即从断点继续。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use lanshare_core::config::LogSettings;
use lanshare_core::logging;
use lanshare_core::model::ShareType;
use lanshare_core::transfer::{
    DownloadJob, DownloadStatus, EngineConfig, FtpBatch, JobId, TransferEngine,
};

pub async fn run(url: &str, password: Option<String>, dir: PathBuf) -> Result<()> {
    logging::init(&LogSettings::default(), "warn")?;

    let (engine, mut events) = TransferEngine::new(EngineConfig::new(&dir));
    let tree = engine
        .fetch_listing(&listing_url(url), password.as_deref())
        .await?;

    let (http_jobs, ftp_batch): (Vec<DownloadJob>, Option<FtpBatch>) = match tree.share_type {
        ShareType::Http => {
            let jobs = tree
                .flatten(Path::new(""))
                .into_iter()
                .map(|job| job.with_password(password.clone()))
                .collect();
            (jobs, None)
        }
        ShareType::Ftp => (Vec::new(), Some(tree.ftp_batch(password))),
    };

    let mut names: HashMap<JobId, PathBuf> = http_jobs
        .iter()
        .chain(ftp_batch.iter().flat_map(|batch| &batch.jobs))
        .map(|job| (job.id, job.relative_path.clone()))
        .collect();
    if names.is_empty() {
        println!("   没有可下载的文件");
        return Ok(());
    }
    println!("📥 下载 {} 个文件到 {}", names.len(), dir.display());

    engine.enqueue_http(http_jobs);
    if let Some(batch) = ftp_batch {
        engine.enqueue_ftp(batch);
    }

    let mut failed = 0;
    let mut paused = 0;
    let mut interrupted = false;
    while !names.is_empty() {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                println!("⏸️  暂停中...");
                for id in names.keys() {
                    engine.pause(*id);
                }
                continue;
            }
        };

        let Some(name) = names.get(&event.job) else {
            continue;
        };
        match event.status {
            DownloadStatus::Doing(pct) => {
                tracing::debug!("{} {}%", name.display(), pct);
            }
            DownloadStatus::Success => {
                println!("✅ {}", name.display());
                names.remove(&event.job);
            }
            DownloadStatus::Pause => {
                println!("⏸️  {}", name.display());
                paused += 1;
                names.remove(&event.job);
            }
            DownloadStatus::Failed(reason) => {
                eprintln!("❌ {}: {}", name.display(), reason);
                failed += 1;
                names.remove(&event.job);
            }
        }
    }

    if paused > 0 {
        println!("   {} 个文件已暂停，重新运行即可继续", paused);
    }
    if failed > 0 {
        bail!("{failed} downloads failed");
    }
    Ok(())
}

/// 下载链接换成对应的浏览链接
fn listing_url(url: &str) -> String {
    let url = url.split('?').next().unwrap_or(url);
    url.replacen("/download/", "/file_list/", 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_url() {
        assert_eq!(
            listing_url("http://10.0.0.2:8080/download/habc?confirm=true"),
            "http://10.0.0.2:8080/file_list/habc"
        );
        assert_eq!(
            listing_url("http://10.0.0.2:8080/file_list/habc"),
            "http://10.0.0.2:8080/file_list/habc"
        );
    }
}
