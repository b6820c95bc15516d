use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use preview_gateway::config::PipelineConfig;
use preview_gateway::services::converter::Converter;
use preview_gateway::services::ephemeral::EphemeralStore;
use preview_gateway::services::pipeline::PipelineService;
use preview_gateway::services::scanner::{ScanResult, VirusScanner};
use preview_gateway::services::sink::UploadSink;
use preview_gateway::{AppState, create_app};
use serde_json::Value;
use tower::ServiceExt;

/// Scanner that inspects file content: anything containing the EICAR
/// marker is reported infected, everything else clean.
struct ContentScanner;

#[async_trait::async_trait]
impl VirusScanner for ContentScanner {
    async fn scan(&self, path: &Path) -> Result<ScanResult> {
        let data = tokio::fs::read(path).await?;
        let text = String::from_utf8_lossy(&data);
        if text.contains("EICAR-STANDARD-ANTIVIRUS-TEST-FILE") {
            Ok(ScanResult::Infected {
                signature: "Eicar-Signature".to_string(),
            })
        } else {
            Ok(ScanResult::Clean)
        }
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Scanner whose engine is permanently broken.
struct BrokenScanner;

#[async_trait::async_trait]
impl VirusScanner for BrokenScanner {
    async fn scan(&self, _path: &Path) -> Result<ScanResult> {
        Ok(ScanResult::Error {
            reason: "engine unavailable".to_string(),
        })
    }

    async fn health_check(&self) -> bool {
        false
    }
}

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::development();
    config.spool_dir = tempfile::tempdir().unwrap().keep();
    config.local_store_dir = tempfile::tempdir().unwrap().keep();
    // Deterministic document degradation: no office renderer in tests.
    config.soffice_bin = "/nonexistent/soffice".to_string();
    config
}

fn build_app(scanner: Arc<dyn VirusScanner>) -> (Router, AppState) {
    build_app_with(scanner, test_config())
}

fn build_app_with(scanner: Arc<dyn VirusScanner>, config: PipelineConfig) -> (Router, AppState) {
    let local_store = Arc::new(
        EphemeralStore::new(
            config.local_store_dir.clone(),
            Duration::from_secs(config.local_store_ttl_secs),
        )
        .unwrap(),
    );
    let pipeline = Arc::new(PipelineService::new(
        scanner.clone(),
        Converter::new(&config),
        UploadSink::new(local_store.clone()),
        &config,
    ));
    let state = AppState {
        pipeline,
        local_store,
        scanner,
        config,
    };
    (create_app(state.clone()), state)
}

const BOUNDARY: &str = "---------------------------123456789012345678901234567";

fn multipart_upload(
    filename: &str,
    content_type: &str,
    content: &[u8],
    original_url: &str,
    preview_url: &str,
) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(
        format!(
            "\r\n--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"originalUrl\"\r\n\r\n\
             {original_url}\r\n\
             --{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"previewUrl\"\r\n\r\n\
             {preview_url}\r\n\
             --{BOUNDARY}--\r\n"
        )
        .as_bytes(),
    );
    (
        format!("multipart/form-data; boundary={}", BOUNDARY),
        body,
    )
}

async fn post_convert(
    app: &Router,
    filename: &str,
    content_type: &str,
    content: &[u8],
    original_url: &str,
    preview_url: &str,
) -> (StatusCode, Value) {
    let (ct, body) = multipart_upload(filename, content_type, content, original_url, preview_url);
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/convert")
                .header("Content-Type", ct)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

async fn get_local(app: &Router, kind: &str, key: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/local/{}/{}", kind, key))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

fn eicar() -> Vec<u8> {
    // Reconstructed at runtime to avoid triggering antivirus on the
    // host machine.
    let part1 = "X5O!P%@AP[4\\PZ";
    let part2 = "X54(P^)7CC)7}$EICAR-STANDA";
    let part3 = "RD-ANTIVIRUS-TEST-FILE!$H+H*";
    format!("{}{}{}", part1, part2, part3).into_bytes()
}

#[tokio::test]
async fn test_scenario_a_clean_text_document() {
    let (app, state) = build_app(Arc::new(ContentScanner));

    let (status, json) = post_convert(
        &app,
        "test.txt",
        "text/plain",
        b"perfectly clean content",
        "local://original/test-a",
        "local://preview/test-a.pdf",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
    assert_eq!(json["scanResult"], "clean");
    assert_eq!(json["fileCategory"], "document");
    assert_eq!(json["originalUploaded"], true);
    assert_eq!(json["previewGenerated"], true);

    let (status, body) = get_local(&app, "original", "test-a").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"perfectly clean content");

    let (status, body) = get_local(&app, "preview", "test-a.pdf").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with(b"%PDF"));

    // Every spooled temp file was cleaned up on the success path.
    let mut entries = tokio::fs::read_dir(&state.config.spool_dir).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn test_scenario_b_blocked_extension() {
    let (app, _state) = build_app(Arc::new(ContentScanner));

    let (status, json) = post_convert(
        &app,
        "blocked.exe",
        "application/octet-stream",
        b"MZ fake executable",
        "local://original/test-b",
        "local://preview/test-b.pdf",
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "rejected");
    assert_eq!(json["fileCategory"], "blocked");
    assert_eq!(json["scanResult"], "not_scanned");
    assert_eq!(json["originalUploaded"], false);

    let (status, _) = get_local(&app, "original", "test-b").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get_local(&app, "preview", "test-b.pdf").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_scenario_c_infected_file_never_reaches_a_sink() {
    let (app, state) = build_app(Arc::new(ContentScanner));

    let (status, json) = post_convert(
        &app,
        "eicar.txt",
        "text/plain",
        &eicar(),
        "local://original/test-c",
        "local://preview/test-c.pdf",
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["status"], "rejected");
    assert_eq!(json["scanResult"], "infected");
    assert_eq!(json["originalUploaded"], false);
    assert!(
        json["details"]
            .as_str()
            .unwrap()
            .contains("Eicar-Signature")
    );

    let (status, _) = get_local(&app, "original", "test-c").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get_local(&app, "preview", "test-c.pdf").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The rejected upload left no temp files behind either.
    let mut entries = tokio::fs::read_dir(&state.config.spool_dir).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn test_scenario_d_archive_gets_placeholder_preview() {
    let (app, _state) = build_app(Arc::new(ContentScanner));

    let (status, json) = post_convert(
        &app,
        "bundle.zip",
        "application/zip",
        b"PK\x03\x04not really a zip",
        "local://original/test-d",
        "local://preview/test-d.pdf",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
    assert_eq!(json["fileCategory"], "archive");
    assert_eq!(json["previewGenerated"], true);
    // The by-policy placeholder is not a degraded preview.
    assert!(json.get("details").is_none());

    let (status, body) = get_local(&app, "preview", "test-d.pdf").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with(b"%PDF"));
    assert!(String::from_utf8_lossy(&body).contains("No preview available"));

    let (status, _) = get_local(&app, "original", "test-d").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_document_renderer_failure_degrades_but_succeeds() {
    let (app, _state) = build_app(Arc::new(ContentScanner));

    let (status, json) = post_convert(
        &app,
        "report.docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        b"not really a docx",
        "local://original/test-docx",
        "local://preview/test-docx.pdf",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
    assert_eq!(json["previewGenerated"], true);
    assert!(
        json["details"]
            .as_str()
            .unwrap()
            .contains("placeholder preview")
    );
}

#[tokio::test]
async fn test_scan_error_is_fatal_not_clean() {
    let (app, _state) = build_app(Arc::new(BrokenScanner));

    let (status, json) = post_convert(
        &app,
        "anything.txt",
        "text/plain",
        b"content",
        "local://original/test-err",
        "local://preview/test-err.pdf",
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["status"], "error");
    assert_eq!(json["scanResult"], "not_scanned");
    assert_eq!(json["originalUploaded"], false);

    // A failed scan must never authorize a write to any sink.
    let (status, _) = get_local(&app, "original", "test-err").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_destinations_is_bad_request() {
    let (app, state) = build_app(Arc::new(ContentScanner));

    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             hello\r\n\
             --{BOUNDARY}--\r\n"
        )
        .as_bytes(),
    );

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/convert")
                .header(
                    "Content-Type",
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // No temp file outlives the rejected request.
    let mut entries = tokio::fs::read_dir(&state.config.spool_dir).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn test_malformed_destination_is_bad_request() {
    let (app, _state) = build_app(Arc::new(ContentScanner));

    let (status, _json) = post_convert_raw_status(
        &app,
        "a.txt",
        b"hello",
        "not a url at all",
        "local://preview/x.pdf",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

async fn post_convert_raw_status(
    app: &Router,
    filename: &str,
    content: &[u8],
    original_url: &str,
    preview_url: &str,
) -> (StatusCode, Vec<u8>) {
    let (ct, body) =
        multipart_upload(filename, "text/plain", content, original_url, preview_url);
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/convert")
                .header("Content-Type", ct)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

#[tokio::test]
async fn test_duplicate_file_field_is_rejected_without_leaking_spool() {
    let (app, state) = build_app(Arc::new(ContentScanner));

    let mut body = Vec::new();
    for filename in ["one.txt", "two.txt"] {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\n\
                 Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
                 Content-Type: text/plain\r\n\r\n\
                 content of {filename}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"originalUrl\"\r\n\r\n\
             local://original/dup\r\n\
             --{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"previewUrl\"\r\n\r\n\
             local://preview/dup.pdf\r\n\
             --{BOUNDARY}--\r\n"
        )
        .as_bytes(),
    );

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/convert")
                .header(
                    "Content-Type",
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // The first spooled file must not outlive the rejected request.
    let mut entries = tokio::fs::read_dir(&state.config.spool_dir).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());

    let (status, _) = get_local(&app, "original", "dup").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oversize_upload_is_413_and_spool_is_removed() {
    let mut config = test_config();
    config.max_file_size = 64;
    let (app, state) = build_app_with(Arc::new(ContentScanner), config);

    let big = vec![b'x'; 1024];
    let (status, _body) = post_convert_raw_status(
        &app,
        "big.txt",
        &big,
        "local://original/big",
        "local://preview/big.pdf",
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    // Refused at the transport boundary: no run, no spool, no sink.
    let mut entries = tokio::fs::read_dir(&state.config.spool_dir).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());

    let (status, _) = get_local(&app, "original", "big").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_image_upload_yields_real_pdf_preview() {
    let (app, _state) = build_app(Arc::new(ContentScanner));

    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([0, 128, 255]));
    let mut png = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(
            &mut std::io::Cursor::new(&mut png),
            image::ImageFormat::Png,
        )
        .unwrap();

    let (status, json) = post_convert(
        &app,
        "dot.png",
        "image/png",
        &png,
        "local://original/test-img",
        "local://preview/test-img.pdf",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["fileCategory"], "image");
    // A real render, not a degraded placeholder.
    assert!(json.get("details").is_none());

    let (status, body) = get_local(&app, "preview", "test-img.pdf").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with(b"%PDF"));
}
