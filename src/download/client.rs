//! HTTP capability used by the orchestrator.
//!
//! [`HttpTransport`] is the injected seam: a metadata probe and a range-aware
//! GET that hands back a readable body. [`HttpClient`] is the reqwest-backed
//! implementation.

use std::fmt::Debug;
use std::io;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::header::{
    CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, HeaderName, RANGE,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::{debug, instrument};
use url::Url;

use super::config::TransferConfig;
use super::error::DownloadError;
use super::filename::parse_content_disposition;

/// Readable response body.
pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

/// Response headers relevant to resume and filename decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    /// `Content-Length` of this response, if reported.
    pub content_length: Option<u64>,
    /// Raw `Content-Disposition` header, if present.
    pub content_disposition: Option<String>,
    /// Total resource size from `Content-Range` (206 responses only).
    pub range_total: Option<u64>,
}

impl ResponseMeta {
    /// Builds metadata from a header map.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .map(ToString::to_string)
        };
        Self {
            content_length: text(CONTENT_LENGTH).and_then(|v| v.parse::<u64>().ok()),
            content_disposition: text(CONTENT_DISPOSITION),
            range_total: text(CONTENT_RANGE).as_deref().and_then(parse_content_range_total),
        }
    }

    /// Filename advertised by `Content-Disposition`, unsanitized.
    #[must_use]
    pub fn disposition_filename(&self) -> Option<String> {
        self.content_disposition
            .as_deref()
            .and_then(parse_content_disposition)
    }
}

/// An open GET response.
pub struct OpenedStream {
    /// Headers of the GET response.
    pub meta: ResponseMeta,
    /// Byte offset the body starts at: the requested offset for 206, 0 otherwise.
    pub start_offset: u64,
    /// The response body.
    pub body: BodyReader,
}

impl OpenedStream {
    /// Total resource size implied by this response, if determinable.
    #[must_use]
    pub fn total_length(&self) -> Option<u64> {
        self.meta.range_total.or_else(|| {
            self.meta
                .content_length
                .map(|remaining| self.start_offset.saturating_add(remaining))
        })
    }
}

impl Debug for OpenedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedStream")
            .field("meta", &self.meta)
            .field("start_offset", &self.start_offset)
            .finish_non_exhaustive()
    }
}

/// HTTP capability: metadata probe plus range-aware GET.
#[async_trait]
pub trait HttpTransport: Send + Sync + Debug {
    /// Issues a metadata-only request for `url`.
    async fn probe(&self, url: &Url) -> Result<ResponseMeta, DownloadError>;

    /// Opens `url` for reading, requesting `bytes=offset-` when `offset > 0`.
    async fn open(&self, url: &Url, offset: u64) -> Result<OpenedStream, DownloadError>;
}

/// reqwest-backed [`HttpTransport`].
///
/// The underlying client is created once and shared; each `open` yields an
/// independent response that is dropped at the end of its attempt.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client with the connect and read timeouts from `config`.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend or system configuration
    /// cannot be initialized.
    pub fn new(config: &TransferConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an existing reqwest client.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        url: &Url,
    ) -> Result<reqwest::Response, DownloadError> {
        let response = request
            .send()
            .await
            .map_err(|e| map_request_error(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url.as_str(), status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl HttpTransport for HttpClient {
    #[instrument(skip(self), fields(url = %url))]
    async fn probe(&self, url: &Url) -> Result<ResponseMeta, DownloadError> {
        let response = self.send(self.client.head(url.clone()), url).await?;
        let meta = ResponseMeta::from_headers(response.headers());
        debug!(content_length = ?meta.content_length, "probe complete");
        Ok(meta)
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn open(&self, url: &Url, offset: u64) -> Result<OpenedStream, DownloadError> {
        let mut request = self.client.get(url.clone());
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = self.send(request, url).await?;

        let start_offset = if response.status() == StatusCode::PARTIAL_CONTENT {
            offset
        } else {
            if offset > 0 {
                debug!(offset, "server ignored range request; body restarts at 0");
            }
            0
        };
        let meta = ResponseMeta::from_headers(response.headers());
        let stream = Box::pin(response.bytes_stream().map_err(io::Error::other));

        Ok(OpenedStream {
            meta,
            start_offset,
            body: Box::new(StreamReader::new(stream)),
        })
    }
}

fn map_request_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else if is_name_resolution_error(&error) {
        DownloadError::name_resolution(url)
    } else {
        DownloadError::network(url, error)
    }
}

/// Walks the error source chain looking for a resolver failure.
///
/// Resolver errors are not exposed as a typed kind by reqwest, so the
/// messages of the chain are inspected.
pub(crate) fn is_name_resolution_error(error: &(dyn std::error::Error + 'static)) -> bool {
    const MARKERS: &[&str] = &[
        "dns error",
        "failed to lookup address",
        "name or service not known",
        "no such host",
        "nodename nor servname",
        "temporary failure in name resolution",
    ];

    let mut current = Some(error);
    while let Some(err) = current {
        let message = err.to_string().to_lowercase();
        if MARKERS.iter().any(|marker| message.contains(marker)) {
            return true;
        }
        current = err.source();
    }
    false
}

/// Parses the total out of `Content-Range: bytes a-b/total`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse::<u64>().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use reqwest::header::HeaderValue;
    use tokio::io::AsyncReadExt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, ResponseTemplate};

    use super::*;
    use crate::test_support::socket_guard::start_mock_server_or_skip;

    #[derive(Debug)]
    struct Wrapped(io::Error);

    impl std::fmt::Display for Wrapped {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("error sending request")
        }
    }

    impl std::error::Error for Wrapped {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    fn test_client() -> HttpClient {
        let config = TransferConfig::default().with_read_timeout(Duration::from_secs(5));
        HttpClient::new(&config).unwrap()
    }

    async fn read_all(mut body: BodyReader) -> Vec<u8> {
        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();
        out
    }

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 100-199/200"), Some(200));
        assert_eq!(parse_content_range_total("bytes 0-0/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn test_response_meta_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1234"));
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static(r#"attachment; filename="disk.img""#),
        );
        let meta = ResponseMeta::from_headers(&headers);
        assert_eq!(meta.content_length, Some(1234));
        assert_eq!(meta.disposition_filename(), Some("disk.img".to_string()));
        assert_eq!(meta.range_total, None);
    }

    #[test]
    fn test_response_meta_ignores_unparseable_length() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert_eq!(ResponseMeta::from_headers(&headers).content_length, None);
    }

    #[test]
    fn test_is_name_resolution_error_walks_source_chain() {
        let inner = io::Error::other("dns error: failed to lookup address information");
        let wrapped = Wrapped(inner);
        assert!(is_name_resolution_error(&wrapped));

        let refused = Wrapped(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(!is_name_resolution_error(&refused));
    }

    #[test]
    fn test_opened_stream_total_length_prefers_content_range() {
        let stream = OpenedStream {
            meta: ResponseMeta {
                content_length: Some(50),
                content_disposition: None,
                range_total: Some(150),
            },
            start_offset: 100,
            body: Box::new(tokio::io::empty()),
        };
        assert_eq!(stream.total_length(), Some(150));

        let stream = OpenedStream {
            meta: ResponseMeta {
                content_length: Some(50),
                ..ResponseMeta::default()
            },
            start_offset: 100,
            body: Box::new(tokio::io::empty()),
        };
        assert_eq!(stream.total_length(), Some(150));
    }

    #[tokio::test]
    async fn test_open_without_offset_reads_full_body() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".to_vec()))
            .mount(&mock_server)
            .await;

        let url = Url::parse(&format!("{}/file.bin", mock_server.uri())).unwrap();
        let opened = test_client().open(&url, 0).await.unwrap();
        assert_eq!(opened.start_offset, 0);
        assert_eq!(opened.total_length(), Some(10));
        assert_eq!(read_all(opened.body).await, b"0123456789");
    }

    #[tokio::test]
    async fn test_open_with_offset_sends_range_and_honors_206() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .and(header("Range", "bytes=4-"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 4-9/10")
                    .set_body_bytes(b"456789".to_vec()),
            )
            .mount(&mock_server)
            .await;

        let url = Url::parse(&format!("{}/file.bin", mock_server.uri())).unwrap();
        let opened = test_client().open(&url, 4).await.unwrap();
        assert_eq!(opened.start_offset, 4);
        assert_eq!(opened.total_length(), Some(10));
        assert_eq!(read_all(opened.body).await, b"456789");
    }

    #[tokio::test]
    async fn test_open_with_offset_detects_ignored_range() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".to_vec()))
            .mount(&mock_server)
            .await;

        let url = Url::parse(&format!("{}/file.bin", mock_server.uri())).unwrap();
        let opened = test_client().open(&url, 4).await.unwrap();
        assert_eq!(opened.start_offset, 0);
        assert_eq!(read_all(opened.body).await, b"0123456789");
    }

    #[tokio::test]
    async fn test_open_maps_error_status() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/missing.bin"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let url = Url::parse(&format!("{}/missing.bin", mock_server.uri())).unwrap();
        match test_client().open(&url, 0).await {
            Err(DownloadError::HttpStatus { status, .. }) => assert_eq!(status, 404),
            other => panic!("Expected HttpStatus(404), got: {other:?}"),
        }
    }
}
