//! HTTP 服务集成测试
//!
//! 在临时端口上运行进程内的 HTTP 服务，用 reqwest 验证浏览/下载接口。

use std::fs;
use std::path::Path;

use lanshare_core::config::LogSettings;
use lanshare_core::model::{ClientEntry, Envelope, FtpData, ServiceEndpoint, ShareType};
use lanshare_core::registry::FuseSharingModel;
use lanshare_core::service::http::{CLIENT_HEADER, HttpService, PASSWORD_HEADER};
use lanshare_core::service::worker::SettingsApplier;
use lanshare_core::service::{Command, Notification};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

struct Harness {
    base: String,
    endpoint: ServiceEndpoint,
    service: Option<HttpService>,
    notifications: mpsc::UnboundedReceiver<Notification>,
    listener: Option<TcpListener>,
    _commands: Option<mpsc::UnboundedSender<Command>>,
}

impl Harness {
    async fn new() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let endpoint = ServiceEndpoint::new("127.0.0.1", port);
        let (tx, notifications) = mpsc::unbounded_channel();
        let service = HttpService::new(
            endpoint.clone(),
            SettingsApplier::new(LogSettings::default(), None),
            tx,
        );
        Self {
            base: format!("http://127.0.0.1:{port}"),
            endpoint,
            service: Some(service),
            notifications,
            listener: Some(listener),
            _commands: None,
        }
    }

    async fn add(&mut self, registry: &FuseSharingModel, uuid: &str) {
        let entity = registry.get(uuid).unwrap().clone();
        self.service
            .as_mut()
            .unwrap()
            .apply(Command::Add {
                entity: Box::new(entity),
            })
            .await;
    }

    fn start(&mut self) {
        let service = self.service.take().unwrap();
        let listener = self.listener.take().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        self._commands = Some(tx);
        tokio::spawn(service.run(listener, rx));
    }
}

fn sample_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"hello lanshare").unwrap();
    fs::create_dir(dir.path().join("d")).unwrap();
    fs::write(dir.path().join("d").join("x.txt"), b"x content").unwrap();
    dir
}

fn share(registry: &mut FuseSharingModel, path: &Path, kind: ShareType, pwd: Option<&str>) -> String {
    registry.share(path, kind, pwd).unwrap().uuid().to_string()
}

async fn envelope<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Envelope<T> {
    assert_eq!(response.status(), 200);
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_browse_shared_file() {
    let dir = sample_dir();
    let mut registry = FuseSharingModel::new();
    let uuid = share(&mut registry, &dir.path().join("a.txt"), ShareType::Http, None);

    let mut harness = Harness::new().await;
    harness.add(&registry, &uuid).await;
    harness.start();

    let response = reqwest::get(format!("{}/file_list/{uuid}", harness.base))
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["errno"], 200);
    assert_eq!(body["data"]["fileName"], "a.txt");
    assert_eq!(body["data"]["isDir"], false);
    assert_eq!(
        body["data"]["downloadUrl"],
        harness.endpoint.download_url(&uuid)
    );

    assert_eq!(
        harness.notifications.recv().await,
        Some(Notification::Browsed { uuid: uuid.clone() })
    );

    let missing = reqwest::get(format!("{}/file_list/hnope", harness.base))
        .await
        .unwrap();
    let missing: Envelope<serde_json::Value> = envelope(missing).await;
    assert_eq!(missing.errno, 404);
}

#[tokio::test]
async fn test_download_file_and_range() {
    let dir = sample_dir();
    let mut registry = FuseSharingModel::new();
    let uuid = share(&mut registry, &dir.path().join("a.txt"), ShareType::Http, None);

    let mut harness = Harness::new().await;
    harness.add(&registry, &uuid).await;
    harness.start();

    let client = reqwest::Client::new();
    let url = harness.endpoint.download_url(&uuid);

    let full = client.get(&url).send().await.unwrap();
    assert_eq!(full.status(), 200);
    assert_eq!(full.bytes().await.unwrap().as_ref(), b"hello lanshare");
    assert_eq!(
        harness.notifications.recv().await,
        Some(Notification::Downloaded { uuid: uuid.clone() })
    );

    let partial = client
        .get(&url)
        .header("Range", "bytes=6-")
        .send()
        .await
        .unwrap();
    assert_eq!(partial.status(), 206);
    assert_eq!(
        partial.headers()["content-range"].to_str().unwrap(),
        "bytes 6-13/14"
    );
    assert_eq!(partial.bytes().await.unwrap().as_ref(), b"lanshare");

    let beyond = client
        .get(&url)
        .header("Range", "bytes=14-")
        .send()
        .await
        .unwrap();
    assert_eq!(beyond.status(), 416);

    // 续传请求不计入下载次数
    assert!(harness.notifications.try_recv().is_err());
}

#[tokio::test]
async fn test_directory_needs_confirm() {
    let dir = sample_dir();
    let mut registry = FuseSharingModel::new();
    let uuid = share(&mut registry, &dir.path().join("d"), ShareType::Http, None);

    let mut harness = Harness::new().await;
    harness.add(&registry, &uuid).await;
    harness.start();

    let url = harness.endpoint.download_url(&uuid);
    let refused: Envelope<serde_json::Value> =
        envelope(reqwest::get(&url).await.unwrap()).await;
    assert_eq!(refused.errno, 400);

    let listing: Envelope<ClientEntry> =
        envelope(reqwest::get(format!("{url}?confirm=true")).await.unwrap()).await;
    let tree = listing.data.unwrap();
    assert!(tree.is_dir);
    assert_eq!(tree.children.len(), 1);
    assert_eq!(tree.children[0].file_name, "x.txt");

    // 子节点可以单独下载
    let child = reqwest::get(&tree.children[0].download_url).await.unwrap();
    assert_eq!(child.bytes().await.unwrap().as_ref(), b"x content");
}

#[tokio::test]
async fn test_password_protected_share() {
    let dir = sample_dir();
    let mut registry = FuseSharingModel::new();
    let uuid = share(
        &mut registry,
        &dir.path().join("a.txt"),
        ShareType::Http,
        Some("letmein"),
    );

    let mut harness = Harness::new().await;
    harness.add(&registry, &uuid).await;
    harness.start();

    let client = reqwest::Client::new();
    let url = harness.endpoint.download_url(&uuid);

    let denied: Envelope<serde_json::Value> =
        envelope(client.get(&url).send().await.unwrap()).await;
    assert_eq!(denied.errno, 400);

    let wrong: Envelope<serde_json::Value> = envelope(
        client
            .get(&url)
            .header(PASSWORD_HEADER, "letme")
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(wrong.errno, 400);

    let allowed = client
        .get(&url)
        .header(PASSWORD_HEADER, "letmein")
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.bytes().await.unwrap().as_ref(), b"hello lanshare");

    let by_query = client
        .get(format!("{url}?password=letmein"))
        .send()
        .await
        .unwrap();
    assert_eq!(by_query.bytes().await.unwrap().as_ref(), b"hello lanshare");
}

#[tokio::test]
async fn test_free_secret_toggle() {
    let dir = sample_dir();
    let mut registry = FuseSharingModel::new();
    let uuid = share(
        &mut registry,
        &dir.path().join("a.txt"),
        ShareType::Http,
        Some("letmein"),
    );

    let mut harness = Harness::new().await;
    harness.add(&registry, &uuid).await;
    harness
        .service
        .as_mut()
        .unwrap()
        .apply(Command::FreeSecret {
            uuid: uuid.clone(),
            value: true,
        })
        .await;
    harness.start();

    let open = reqwest::get(harness.endpoint.download_url(&uuid))
        .await
        .unwrap();
    assert_eq!(open.bytes().await.unwrap().as_ref(), b"hello lanshare");
}

#[tokio::test]
async fn test_ftp_share_params() {
    let dir = sample_dir();
    let mut registry = FuseSharingModel::new();
    let uuid = share(&mut registry, &dir.path().join("d"), ShareType::Ftp, None);
    let expected = registry.get(&uuid).unwrap().ftp().unwrap().clone();

    let mut harness = Harness::new().await;
    harness.add(&registry, &uuid).await;
    harness.start();

    let client = reqwest::Client::new();
    let url = harness.endpoint.download_url(&uuid);

    // 浏览器直接访问被拒绝
    let browser: Envelope<serde_json::Value> =
        envelope(client.get(&url).send().await.unwrap()).await;
    assert_eq!(browser.errno, 400);

    let unconfirmed: Envelope<serde_json::Value> = envelope(
        client
            .get(&url)
            .header(CLIENT_HEADER, "test")
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(unconfirmed.errno, 400);

    let params: Envelope<FtpData> = envelope(
        client
            .get(format!("{url}?confirm=true"))
            .header(CLIENT_HEADER, "test")
            .send()
            .await
            .unwrap(),
    )
    .await;
    let params = params.data.unwrap();
    assert_eq!(params.port, expected.port);
    assert_eq!(params.passwd, expected.password);
    assert_eq!(params.user, "a");
    assert_eq!(params.cwd, "/");
    assert_eq!(params.filename, "d");
}

#[tokio::test]
async fn test_removed_share_is_gone() {
    let dir = sample_dir();
    let mut registry = FuseSharingModel::new();
    let uuid = share(&mut registry, &dir.path().join("a.txt"), ShareType::Http, None);

    let mut harness = Harness::new().await;
    harness.add(&registry, &uuid).await;
    let service = harness.service.as_mut().unwrap();
    service.apply(Command::Remove { uuid: uuid.clone() }).await;
    // 未知 uuid 被忽略
    service
        .apply(Command::Remove {
            uuid: "hunknown".into(),
        })
        .await;
    harness.start();

    let gone: Envelope<serde_json::Value> = envelope(
        reqwest::get(format!("{}/file_list/{uuid}", harness.base))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(gone.errno, 404);
}

#[tokio::test]
async fn test_mobile_upload_and_merge() {
    let dir = sample_dir();
    let mut registry = FuseSharingModel::new();
    let uuid = share(&mut registry, &dir.path().join("d"), ShareType::Http, None);

    let mut harness = Harness::new().await;
    harness.add(&registry, &uuid).await;
    harness.start();

    let client = reqwest::Client::new();
    for (id, chunk) in [(0, "first "), (1, "second")] {
        let form = reqwest::multipart::Form::new()
            .text("file_name", "up.txt")
            .text("chunk_id", id.to_string())
            .part("file", reqwest::multipart::Part::bytes(chunk.as_bytes().to_vec()));
        let reply: Envelope<serde_json::Value> = envelope(
            client
                .post(format!("{}/mobile/upload/{uuid}", harness.base))
                .multipart(form)
                .send()
                .await
                .unwrap(),
        )
        .await;
        assert!(reply.is_ok(), "{}", reply.errmsg);
    }

    let merged: Envelope<serde_json::Value> = envelope(
        client
            .post(format!("{}/mobile/upload/merge/{uuid}", harness.base))
            .json(&serde_json::json!({"file_name": "up.txt", "chunk_count": 2}))
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert!(merged.is_ok(), "{}", merged.errmsg);

    let target = dir.path().join("d").join("up.txt");
    assert_eq!(fs::read_to_string(&target).unwrap(), "first second");
    assert!(!dir.path().join("d").join(".up.txt.0.part").exists());
}
