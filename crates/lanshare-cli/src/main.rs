//! LanShare CLI
//!
//! 命令行客户端：通过 Unix Socket 管理守护进程中的共享，并可以直接
//! 下载其他主机共享的文件。

mod client;
mod download;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use lanshare_core::config::{SettingUpdate, ShareSettings};

use client::{IpcRequest, IpcResponse, ShareInfo};

#[derive(Parser)]
#[command(name = "lanshare", version, about = "局域网文件共享工具")]
struct Cli {
    /// 配置文件路径
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 共享文件或目录
    Share {
        /// 要共享的路径
        path: PathBuf,
        /// 通过 FTP 传输
        #[arg(long)]
        ftp: bool,
        /// 访问密码 (可选)
        #[arg(short, long)]
        password: Option<String>,
    },
    /// 取消共享
    Unshare { uuid: String },
    /// 列出所有共享
    List,
    /// 开启或关闭免密访问
    FreeSecret {
        uuid: String,
        #[arg(action = ArgAction::Set)]
        value: bool,
    },
    /// 修改日志设置
    Settings {
        #[arg(long)]
        save_system_log: Option<bool>,
        #[arg(long)]
        save_sharer_log: Option<bool>,
        #[arg(long)]
        logs_path: Option<PathBuf>,
    },
    /// 停止 FTP 服务
    CloseFtp,
    /// 查看守护进程状态
    Status,
    /// 停止守护进程
    Stop,
    /// 下载共享链接 (浏览或下载链接)
    Download {
        url: String,
        #[arg(short, long)]
        password: Option<String>,
        /// 保存目录 (默认: 设置中的下载目录)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn print_shares(shares: &[ShareInfo]) {
    if shares.is_empty() {
        println!("   没有共享");
        return;
    }
    for share in shares {
        let lock = if share.needs_password { "🔒" } else { "  " };
        println!(
            "{} [{}] {} ({})",
            lock,
            share.share_type,
            share.path.display(),
            share.uuid
        );
        println!("     浏览: {}", share.browse_url);
        if let Some(port) = share.ftp_port {
            println!("     FTP 端口: {}", port);
        }
        println!(
            "     浏览 {} 次, 下载 {} 次",
            share.browse_number, share.download_number
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Share {
            path,
            ftp,
            password,
        } => {
            let path = std::path::absolute(&path).unwrap_or(path);
            println!("📤 共享: {}", path.display());
            if let IpcResponse::Shares { shares } = client::send_request(IpcRequest::Share {
                path,
                ftp,
                password,
            })
            .await?
            {
                print_shares(&shares);
            }
        }
        Commands::Unshare { uuid } => {
            client::send_request(IpcRequest::Unshare { uuid }).await?;
        }
        Commands::List => {
            if let IpcResponse::Shares { shares } = client::send_request(IpcRequest::List).await? {
                print_shares(&shares);
            }
        }
        Commands::FreeSecret { uuid, value } => {
            client::send_request(IpcRequest::FreeSecret { uuid, value }).await?;
        }
        Commands::Settings {
            save_system_log,
            save_sharer_log,
            logs_path,
        } => {
            let updates = save_system_log
                .map(SettingUpdate::SaveSystemLog)
                .into_iter()
                .chain(save_sharer_log.map(SettingUpdate::SaveSharerLog))
                .chain(logs_path.map(SettingUpdate::LogsPath));
            for update in updates {
                client::send_request(IpcRequest::Settings { update }).await?;
            }
        }
        Commands::CloseFtp => {
            client::send_request(IpcRequest::CloseFtp).await?;
        }
        Commands::Status => {
            if let IpcResponse::Status {
                http_pid,
                ftp_pid,
                shares,
            } = client::send_request(IpcRequest::Status).await?
            {
                let show = |pid: Option<u32>| pid.map_or("未运行".to_string(), |p| format!("运行中 (pid {p})"));
                println!("HTTP 服务: {}", show(http_pid));
                println!("FTP 服务: {}", show(ftp_pid));
                println!("共享数: {}", shares);
            }
        }
        Commands::Stop => {
            println!("⏹️  停止守护进程");
            client::send_request(IpcRequest::Stop).await?;
        }
        Commands::Download {
            url,
            password,
            output,
        } => {
            let settings = match &cli.config {
                Some(path) => ShareSettings::load_from(path),
                None => ShareSettings::load(),
            };
            let dir = output.unwrap_or(settings.download_dir);
            download::run(&url, password, dir).await?;
        }
    }

    Ok(())
}
