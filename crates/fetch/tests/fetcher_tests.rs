//! `HttpFetcher` against a mock server and the local file system.

use std::io::Write;

use fetch::{FetchConfig, HttpFetcher};
use pipeline::{ContentFetcher, FetchError};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(&FetchConfig {
        user_agent: "studyflow-test".into(),
        ..FetchConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn html_pages_are_stripped_to_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/post"))
        .and(header("user-agent", "studyflow-test"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(
                "<html><body><h1>Attention</h1><p>Is all you need.</p></body></html>",
                "text/html; charset=utf-8",
            ),
        )
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/post", server.uri());
    let document = fetcher().fetch(&url).await.unwrap();

    assert_eq!(document.url, url);
    assert_eq!(document.content_type.as_deref(), Some("text/html; charset=utf-8"));
    assert_eq!(document.text, "Attention\nIs all you need.");
}

#[tokio::test]
async fn error_status_is_reported_with_the_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = format!("{}/missing.pdf", server.uri());
    let err = fetcher().fetch(&url).await.unwrap_err();

    match err {
        FetchError::Status { url: failed, status } => {
            assert_eq!(failed, url);
            assert_eq!(status, 404);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn server_errors_are_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = fetcher().fetch(&format!("{}/x", server.uri())).await.unwrap_err();

    assert!(err.retry_policy().is_retryable());
}

#[tokio::test]
async fn images_are_unsupported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(vec![0x89, b'P', b'N', b'G'], "image/png"),
        )
        .mount(&server)
        .await;

    let err = fetcher().fetch(&format!("{}/fig.png", server.uri())).await.unwrap_err();

    assert!(matches!(err, FetchError::UnsupportedContent { .. }));
    assert!(!err.retry_policy().is_retryable());
}

#[tokio::test]
async fn local_files_are_read_by_path_and_file_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"Local notes").unwrap();

    let by_path = fetcher().fetch(path.to_str().unwrap()).await.unwrap();
    let by_url = fetcher()
        .fetch(&format!("file://{}", path.display()))
        .await
        .unwrap();

    assert_eq!(by_path.text, "Local notes");
    assert_eq!(by_path.content_type.as_deref(), Some("text/plain"));
    assert_eq!(by_url.bytes, b"Local notes");
}

#[tokio::test]
async fn missing_local_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.pdf");

    let err = fetcher().fetch(missing.to_str().unwrap()).await.unwrap_err();

    assert!(matches!(err, FetchError::Io { .. }));
}
