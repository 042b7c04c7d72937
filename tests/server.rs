//! HTTP surface tests against a server spawned in-process.

use std::sync::Arc;

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use tempfile::TempDir;

use syllabus_insights::config::Config;
use syllabus_insights::generator::PlaceholderGenerator;
use syllabus_insights::server::run_server_with_generator;

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

struct TestServer {
    base: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
    _tmp: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let tmp = TempDir::new().unwrap();
        let port = find_free_port();
        let mut config = Config::minimal();
        config.storage.root = tmp.path().join("data");
        config.server.bind = format!("127.0.0.1:{}", port);

        let handle = tokio::spawn(async move {
            run_server_with_generator(&config, Arc::new(PlaceholderGenerator))
                .await
                .unwrap();
        });
        wait_for_server(port).await;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        Self {
            base: format!("http://127.0.0.1:{}", port),
            client,
            handle,
            _tmp: tmp,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn upload(&self, filename: &str, body: &str, course_code: &str) -> reqwest::Response {
        let form = Form::new()
            .part(
                "file",
                Part::bytes(body.as_bytes().to_vec()).file_name(filename.to_string()),
            )
            .text("course_code", course_code.to_string())
            .text("quarter", "Fall")
            .text("year", "2024");
        self.client
            .post(self.url("/upload"))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn health_reports_version() {
    let server = TestServer::start().await;
    let body: serde_json::Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn upload_redirects_to_detail_page() {
    let server = TestServer::start().await;

    let resp = server.upload("cs101.md", "# CS 101\n\nHomework 50%", "CS101").await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(resp.headers()["location"], "/syllabus/cs101-fall-2024");

    let detail = server
        .client
        .get(server.url("/syllabus/cs101-fall-2024"))
        .send()
        .await
        .unwrap();
    assert_eq!(detail.status(), StatusCode::OK);
    let html = detail.text().await.unwrap();
    assert!(html.contains("/insight/cs101-fall-2024/workload"));

    let index = server.client.get(server.url("/")).send().await.unwrap();
    assert!(index.text().await.unwrap().contains("cs101-fall-2024"));

    let file = server
        .client
        .get(server.url("/file/cs101-fall-2024"))
        .send()
        .await
        .unwrap();
    assert_eq!(file.headers()["content-type"], "text/markdown");
    assert_eq!(file.text().await.unwrap(), "# CS 101\n\nHomework 50%");
}

#[tokio::test]
async fn duplicate_upload_conflicts() {
    let server = TestServer::start().await;
    server.upload("a.txt", "first", "CS101").await;

    let resp = server.upload("b.txt", "second", "CS101").await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "already_exists");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("cs101-fall-2024-2"));
}

#[tokio::test]
async fn upload_without_file_or_with_bad_extension_is_rejected() {
    let server = TestServer::start().await;

    let form = Form::new().text("title", "No file");
    let resp = server
        .client
        .post(server.url("/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = server.upload("slides.key", "binary", "CS101").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unsupported_file");
}

#[tokio::test]
async fn insight_panel_is_generated_then_cached() {
    let server = TestServer::start().await;
    server.upload("cs101.txt", "Weekly labs", "CS101").await;

    let url = server.url("/insight/cs101-fall-2024/summary");
    let first = server.client.get(&url).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let html = first.text().await.unwrap();
    assert!(html.contains("Source: generated"));
    assert!(html.contains("DEMO PLACEHOLDER"));

    let second = server.client.get(&url).send().await.unwrap().text().await.unwrap();
    assert!(second.contains("Source: cache"));

    let alias = server
        .client
        .get(server.url("/insight/cs101-fall-2024/tldr"))
        .send()
        .await
        .unwrap();
    assert!(alias.text().await.unwrap().contains("Source: cache"));
}

#[tokio::test]
async fn insight_errors_map_to_statuses() {
    let server = TestServer::start().await;
    server.upload("cs101.txt", "Weekly labs", "CS101").await;

    let resp = server
        .client
        .get(server.url("/insight/cs101-fall-2024/essay"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unknown_insight_kind");

    let resp = server
        .client
        .get(server.url("/insight/does-not-exist/summary"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = server
        .client
        .get(server.url("/syllabus/does-not-exist"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn clear_cache_and_delete() {
    let server = TestServer::start().await;
    server.upload("cs101.txt", "Weekly labs", "CS101").await;
    let insight = server.url("/insight/cs101-fall-2024/grading");
    server.client.get(&insight).send().await.unwrap();

    let resp = server
        .client
        .post(server.url("/cache/clear/cs101-fall-2024"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let html = server.client.get(&insight).send().await.unwrap().text().await.unwrap();
    assert!(html.contains("Source: generated"));

    let resp = server
        .client
        .delete(server.url("/syllabus/cs101-fall-2024"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = server.client.get(&insight).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
