//! Upload Server Integration Tests
//!
//! End-to-end tests that send real multipart requests to a running server
//! backed by the in-memory storage provider.

use media_uploadr::config::Config;
use media_uploadr::server::UploadServer;
use media_uploadr::storage::MemoryBackend;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

const CONFIG_YAML: &str = r#"
server:
  address: "127.0.0.1:0"
storage:
  provider: memory
  bucket: media
  public_url: "https://media.example.com"
upload:
  default_folder: portfolio
  max_file_size: 1024
  max_files: 4
metrics:
  enabled: false
"#;

struct TestServer {
    addr: SocketAddr,
    storage: Arc<MemoryBackend>,
    client: reqwest::Client,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn upload(&self, form: Form) -> (StatusCode, Value) {
        let response = self
            .client
            .post(self.url("/upload"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        let status = response.status();
        let body = response.json::<Value>().await.unwrap();
        (status, body)
    }
}

async fn start_server(yaml: &str) -> TestServer {
    let config = Config::from_yaml_str(yaml).unwrap();
    let storage = Arc::new(MemoryBackend::from_config(&config.storage));
    let server = UploadServer::bind(&config, storage.clone()).await.unwrap();
    let addr = server.local_addr();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    TestServer {
        addr,
        storage,
        client: reqwest::Client::new(),
    }
}

/// Form that sends filenames as raw UTF-8, the way browsers do
fn form() -> Form {
    Form::new().percent_encode_noop()
}

fn image(name: &str, data: &'static [u8]) -> Part {
    Part::bytes(data)
        .file_name(name.to_string())
        .mime_str("image/jpeg")
        .unwrap()
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let server = start_server(CONFIG_YAML).await;

    let response = server.client.get(server.url("/health")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let server = start_server(CONFIG_YAML).await;

    let response = server.client.get(server.url("/nope")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["statusCode"], 404);
}

#[tokio::test]
async fn test_get_on_upload_path_is_not_allowed() {
    let server = start_server(CONFIG_YAML).await;

    let response = server.client.get(server.url("/upload")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()["allow"], "POST");
}

// ============================================================================
// Upload shapes
// ============================================================================

#[tokio::test]
async fn test_single_file_upload() {
    let server = start_server(CONFIG_YAML).await;

    let (status, body) = server
        .upload(form().part("file", image("portrait.jpg", b"jpeg")))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    let public_id = body["publicId"].as_str().unwrap();
    assert!(public_id.starts_with("portfolio/"));
    assert!(public_id.ends_with(".jpg"));
    assert_eq!(body["contentType"], "image/jpeg");
    assert_eq!(body["size"], 4);
    assert_eq!(
        body["url"].as_str().unwrap(),
        format!("https://media.example.com/{}", public_id)
    );

    let stored = server.storage.get(public_id).unwrap();
    assert_eq!(&stored.data[..], b"jpeg");
}

#[tokio::test]
async fn test_preserved_arabic_filename_round_trips() {
    let server = start_server(CONFIG_YAML).await;
    let name = "صورة الملف الشخصي.jpg";

    let (status, body) = server
        .upload(
            form()
                .text("preserveOriginalName", "true")
                .text("folder", "about")
                .part("file", image(name, b"jpeg")),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["filename"], name);
    assert_eq!(body["publicId"], format!("about/{}", name));
}

#[tokio::test]
async fn test_homogeneous_upload_returns_array_in_order() {
    let server = start_server(CONFIG_YAML).await;

    let (status, body) = server
        .upload(
            form()
                .text("preserveOriginalName", "true")
                .part("files[]", image("one.jpg", b"1"))
                .part("files[]", image("two.jpg", b"22"))
                .part("files[]", image("three.jpg", b"333")),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    let names: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["filename"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["one.jpg", "two.jpg", "three.jpg"]);
    assert_eq!(server.storage.len(), 3);
}

#[tokio::test]
async fn test_bracketed_and_bare_file_parts_keep_arrival_order() {
    let server = start_server(CONFIG_YAML).await;

    let (status, body) = server
        .upload(
            form()
                .text("preserveOriginalName", "true")
                .part("files[]", image("A.jpg", b"a"))
                .part("files", image("B.jpg", b"b"))
                .part("files[]", image("C.jpg", b"c")),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    let names: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["filename"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["A.jpg", "B.jpg", "C.jpg"]);
}

#[tokio::test]
async fn test_mixed_upload_returns_cover_and_images() {
    let server = start_server(CONFIG_YAML).await;

    let (status, body) = server
        .upload(
            form()
                .text("preserveOriginalName", "true")
                .part("coverImage", image("cover.jpg", b"c"))
                .part("images[]", image("a.jpg", b"a"))
                .part("images[]", image("b.jpg", b"b")),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["coverImage"]["filename"], "cover.jpg");
    assert_eq!(body["images"][0]["filename"], "a.jpg");
    assert_eq!(body["images"][1]["filename"], "b.jpg");
    assert!(body.get("errors").is_none());
}

#[tokio::test]
async fn test_same_name_within_request_gets_distinct_keys() {
    let server = start_server(CONFIG_YAML).await;

    let (status, body) = server
        .upload(
            form()
                .text("preserveOriginalName", "true")
                .part("files[]", image("dup.jpg", b"1"))
                .part("files[]", image("dup.jpg", b"2")),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    let first = body[0]["publicId"].as_str().unwrap();
    let second = body[1]["publicId"].as_str().unwrap();
    assert_ne!(first, second);
    assert_eq!(server.storage.len(), 2);
}

#[tokio::test]
async fn test_prevent_overwrite_false_replaces_object() {
    let server = start_server(CONFIG_YAML).await;

    for data in [&b"old"[..], &b"new"[..]] {
        let (status, _) = server
            .upload(
                form()
                    .text("preserveOriginalName", "true")
                    .text("preventOverwrite", "false")
                    .part("file", Part::bytes(data).file_name("cv.pdf")),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    assert_eq!(server.storage.keys(), vec!["portfolio/cv.pdf".to_string()]);
    assert_eq!(&server.storage.get("portfolio/cv.pdf").unwrap().data[..], b"new");
}

// ============================================================================
// Rejections
// ============================================================================

#[tokio::test]
async fn test_unknown_field_rejected_before_storage() {
    let server = start_server(CONFIG_YAML).await;

    let (status, body) = server
        .upload(form().part("randomField", image("a.jpg", b"a")))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["statusCode"], 400);
    assert_eq!(body["error"], "Bad Request");
    assert!(body["message"].as_str().unwrap().contains("randomField"));
    assert!(server.storage.is_empty());
}

#[tokio::test]
async fn test_form_without_files_is_rejected() {
    let server = start_server(CONFIG_YAML).await;

    let (status, body) = server.upload(form().text("folder", "albums")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No files were uploaded");
}

#[tokio::test]
async fn test_invalid_flag_value_is_rejected() {
    let server = start_server(CONFIG_YAML).await;

    let (status, _) = server
        .upload(
            form()
                .text("preventOverwrite", "maybe")
                .part("file", image("a.jpg", b"a")),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(server.storage.is_empty());
}

#[tokio::test]
async fn test_overlong_folder_is_rejected() {
    let server = start_server(CONFIG_YAML).await;

    let (status, body) = server
        .upload(
            form()
                .text("folder", "x".repeat(2000))
                .part("file", image("a.jpg", b"a")),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("folder"));
    assert!(server.storage.is_empty());
}

#[tokio::test]
async fn test_non_multipart_body_is_rejected() {
    let server = start_server(CONFIG_YAML).await;

    let response = server
        .client
        .post(server.url("/upload"))
        .header("content-type", "application/json")
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_file_returns_413() {
    let server = start_server(CONFIG_YAML).await;

    let (status, body) = server
        .upload(form().part("file", Part::bytes(vec![0u8; 2048]).file_name("big.bin")))
        .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["statusCode"], 413);
    assert!(server.storage.is_empty());
}

#[tokio::test]
async fn test_too_many_files_returns_413() {
    let server = start_server(CONFIG_YAML).await;

    let mut form = form();
    for i in 0..5 {
        form = form.part("files[]", Part::bytes(&b"x"[..]).file_name(format!("{}.jpg", i)));
    }
    let (status, _) = server.upload(form).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(server.storage.is_empty());
}

#[tokio::test]
async fn test_custom_upload_path() {
    let yaml = CONFIG_YAML.replace(
        "address: \"127.0.0.1:0\"",
        "address: \"127.0.0.1:0\"\n  upload_path: \"/api/media\"",
    );
    let server = start_server(&yaml).await;

    let response = server
        .client
        .post(server.url("/api/media"))
        .multipart(form().part("file", image("a.jpg", b"a")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let old = server
        .client
        .post(server.url("/upload"))
        .multipart(form().part("file", image("a.jpg", b"a")))
        .send()
        .await
        .unwrap();
    assert_eq!(old.status(), StatusCode::NOT_FOUND);
}
