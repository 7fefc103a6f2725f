//! End-to-end transfers through the reqwest client against a mock HTTP server.

use std::sync::Arc;

use tempfile::TempDir;
use transfer_core::{CompletionState, HttpClient, TransferOrchestrator};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;
use support::{fast_config, payload};

type TestResult = Result<(), Box<dyn std::error::Error>>;

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return Ok(());
        };
        mock_server
    }};
}

#[tokio::test]
async fn test_http_transfer_to_explicit_file() -> TestResult {
    let mock_server = require_mock_server!();
    let body = payload(4096);
    Mock::given(method("GET"))
        .and(path("/files/archive.tar"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new()?;
    let config = fast_config();
    let orchestrator = TransferOrchestrator::new(Arc::new(HttpClient::new(&config)?), config);
    let source = Url::parse(&format!("{}/files/archive.tar", mock_server.uri()))?;
    let dest = temp_dir.path().join("out.tar");

    let handle = orchestrator.start(source, &dest, false).await?;
    let result = handle.wait().await.ok_or("no completion")?;

    assert_eq!(result.state, CompletionState::Succeeded);
    assert_eq!(result.bytes_total, 4096);
    assert_eq!(std::fs::read(&dest)?, body);
    Ok(())
}

#[tokio::test]
async fn test_http_transfer_preserves_url_filename() -> TestResult {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/files/My%20Report.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload(512)))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new()?;
    let config = fast_config();
    let orchestrator = TransferOrchestrator::new(Arc::new(HttpClient::new(&config)?), config);
    let source = Url::parse(&format!("{}/files/My%20Report.pdf", mock_server.uri()))?;

    let handle = orchestrator.start_into_dir(source, temp_dir.path()).await?;
    let result = handle.wait().await.ok_or("no completion")?;

    assert_eq!(result.state, CompletionState::Succeeded);
    assert_eq!(result.file_path, Some(temp_dir.path().join("My Report.pdf")));
    Ok(())
}

#[tokio::test]
async fn test_http_not_found_fails_after_max_attempts() -> TestResult {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new()?;
    let config = fast_config().with_max_attempts(2);
    let orchestrator = TransferOrchestrator::new(Arc::new(HttpClient::new(&config)?), config);
    let source = Url::parse(&format!("{}/missing.bin", mock_server.uri()))?;

    let handle = orchestrator
        .start(source, temp_dir.path().join("missing.bin"), false)
        .await?;
    let result = handle.wait().await.ok_or("no completion")?;

    assert_eq!(result.state, CompletionState::Failed);
    mock_server.verify().await;
    Ok(())
}
