//! End-to-end OCR extraction against a mock OCR server.
//!
//! Page images are tiny fake PNGs: the PNG signature followed by the text the
//! mock server should "recognise". The server decodes `image_base64`, strips
//! the signature and answers with the remainder as `line_texts`; a page whose
//! text is `fail` always gets a 500.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ocrbatch::pipeline::input::resolve_documents;
use ocrbatch::{
    extract_document, extract_to_file, BatchConfig, BatchError, BatchInvoker, Language,
    OcrClient, OcrConfig,
};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

// ── Test helpers ─────────────────────────────────────────────────────────────

fn write_page(dir: &Path, name: &str, text: &str) {
    std::fs::create_dir_all(dir).unwrap();
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend_from_slice(text.as_bytes());
    std::fs::write(dir.join(name), bytes).unwrap();
}

fn fake_ocr(req: &Request) -> ResponseTemplate {
    let image = url::form_urlencoded::parse(&req.body)
        .find(|(k, _)| k == "image_base64")
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default();
    let bytes = STANDARD.decode(image).unwrap_or_default();
    let text = String::from_utf8_lossy(bytes.get(PNG_SIGNATURE.len()..).unwrap_or_default())
        .into_owned();

    if text == "fail" {
        return ResponseTemplate::new(500).set_body_string("internal error");
    }
    let lines: Vec<&str> = text.split('\n').collect();
    ResponseTemplate::new(200).set_body_json(json!({
        "code": 10000,
        "data": {"line_texts": lines}
    }))
}

async fn ocr_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(fake_ocr)
        .mount(&server)
        .await;
    server
}

fn client(server: &MockServer) -> OcrClient {
    let mut config = OcrConfig::new("AK", "SK");
    config.host = server.uri();
    OcrClient::new(config).unwrap()
}

fn invoker() -> BatchInvoker {
    let config = BatchConfig::builder()
        .max_workers(2)
        .max_attempts(2)
        .backoff(Duration::from_millis(5))
        .build()
        .unwrap();
    BatchInvoker::new(config)
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

// ── Input discovery ──────────────────────────────────────────────────────────

#[test]
fn documents_sorted_and_pages_numeric() {
    let root = tempfile::tempdir().unwrap();
    let beta = root.path().join("Beta");
    let alpha = root.path().join("alpha");
    write_page(&beta, "page_1.png", "b");
    write_page(&alpha, "page_10.png", "ten");
    write_page(&alpha, "page_2.png", "two");
    write_page(&alpha, "page_1.png", "one");
    std::fs::write(alpha.join("notes.txt"), "not a page").unwrap();

    let docs = resolve_documents(root.path()).unwrap();
    let names: Vec<&str> = docs.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "Beta"]);

    let pages: Vec<usize> = docs[0].pages.iter().map(|p| p.page_num).collect();
    assert_eq!(pages, vec![1, 2, 10]);
}

#[test]
fn non_image_page_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let doc = root.path().join("doc");
    std::fs::create_dir_all(&doc).unwrap();
    std::fs::write(doc.join("page_1.png"), "plain text").unwrap();

    let err = resolve_documents(root.path()).unwrap_err();
    assert!(matches!(err, BatchError::NotAnImage { .. }), "got: {err}");
}

#[test]
fn empty_root_has_no_documents() {
    let root = tempfile::tempdir().unwrap();
    let err = resolve_documents(root.path()).unwrap_err();
    assert!(matches!(err, BatchError::NoDocuments { .. }));
}

// ── Extraction ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn extracts_pages_languages_and_combined_text() {
    let server = ocr_server().await;
    let root = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let alpha = root.path().join("alpha");
    write_page(&alpha, "page_1.png", "alpha one");
    write_page(&alpha, "page_2.png", "alpha two  \r\n\r\n\r\n\r\nend");
    write_page(&alpha, "page_10.png", "alpha ten");
    let beta = root.path().join("Beta");
    write_page(&beta, "page_1.png", "fail");
    write_page(&beta, "page_2.png", "中文正文内容");

    let combined_path = out.path().join("combined.txt");
    let output = extract_to_file(
        root.path(),
        out.path(),
        &combined_path,
        &client(&server),
        &invoker(),
    )
    .await
    .unwrap();

    // Per-page files, numbered by position.
    let a = out.path().join("alpha");
    assert_eq!(read(&a.join("page_1.txt")), "alpha one");
    assert_eq!(read(&a.join("page_2.txt")), "alpha two\n\nend");
    assert_eq!(read(&a.join("page_3.txt")), "alpha ten");
    assert_eq!(read(&a.join("lang.txt")), "en");

    let b = out.path().join("Beta");
    assert_eq!(read(&b.join("page_1.txt")), "");
    assert_eq!(read(&b.join("page_2.txt")), "中文正文内容");
    assert_eq!(read(&b.join("lang.txt")), "zh-cn");

    // Failure bookkeeping.
    assert_eq!(output.total_pages(), 5);
    assert_eq!(output.failed_pages(), 1);
    let beta_out = &output.documents[1];
    assert_eq!(beta_out.language, Language::ZhCn);
    assert_eq!(beta_out.failures.len(), 1);
    assert_eq!(beta_out.failures[0].page, 1);
    assert_eq!(beta_out.stats.total_attempts, 3);

    // Combined document.
    let expected = format!(
        "{:^80}\nalpha one\nalpha two\n\nend\nalpha ten\n\n{:^80}\n中文正文内容",
        "alpha", "Beta"
    );
    assert_eq!(output.combined, expected);
    assert_eq!(read(&combined_path), expected);
    assert!(!out.path().join("combined.txt.tmp").exists());
}

#[tokio::test]
async fn single_document_with_every_page_failing_is_an_error() {
    let server = ocr_server().await;
    let root = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let doc_dir = root.path().join("broken");
    write_page(&doc_dir, "page_1.png", "fail");
    write_page(&doc_dir, "page_2.png", "fail");

    let docs = resolve_documents(root.path()).unwrap();
    let folder = out.path().join("broken");
    let err = extract_document(&docs[0], &folder, &client(&server), &invoker())
        .await
        .unwrap_err();

    match err {
        BatchError::AllRequestsFailed {
            total, attempts, ..
        } => assert_eq!((total, attempts), (2, 2)),
        other => panic!("expected AllRequestsFailed, got {other:?}"),
    }
    // Page files are still written, empty.
    assert_eq!(read(&folder.join("page_1.txt")), "");
    assert_eq!(read(&folder.join("lang.txt")), "en");
}

#[tokio::test]
async fn batch_fails_only_when_nothing_was_recognised() {
    let server = ocr_server().await;
    let root = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_page(&root.path().join("a"), "page_1.png", "fail");
    write_page(&root.path().join("b"), "page_1.png", "fail");

    let err = extract_to_file(
        root.path(),
        out.path(),
        &out.path().join("combined.txt"),
        &client(&server),
        &invoker(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, BatchError::AllRequestsFailed { total: 2, .. }), "got: {err}");
    assert!(!out.path().join("combined.txt").exists());
}
