//! HTTP Download Gateway Module
//!
//! Fetches chunk windows from an HTTP object endpoint with ranged GET
//! requests (`GET {endpoint}/{object id}` + `Range: bytes=a-b`), using a
//! pooled hyper client, per-attempt timeouts and exponential backoff.

use crate::chunk_types::{encode_name, RemoteObject};
use crate::config::DownloadConfig;
use crate::download::{DownloadGateway, DownloadRequest};
use crate::{ChunkCacheError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{IF_MATCH, RANGE};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::{debug, warn};

/// Request retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based), capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay_ms as u64);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

/// Failure of a single attempt
struct AttemptError {
    error: ChunkCacheError,
    retryable: bool,
}

impl AttemptError {
    fn retryable(error: ChunkCacheError) -> Self {
        Self {
            error,
            retryable: true,
        }
    }

    fn fatal(error: ChunkCacheError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

/// [`DownloadGateway`] backed by an HTTP server that supports range requests
pub struct HttpDownloadGateway {
    client: Client<HttpConnector, Full<Bytes>>,
    endpoint: String,
    request_timeout: Duration,
    retry_config: RetryConfig,
}

impl HttpDownloadGateway {
    /// Create a gateway for the endpoint in `config`. Only `http://` endpoints are supported.
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        let uri: Uri = endpoint.parse().map_err(|e| {
            ChunkCacheError::ConfigError(format!(
                "Invalid download endpoint {:?}: {}",
                config.endpoint, e
            ))
        })?;
        if uri.scheme_str() != Some("http") || uri.host().is_none() {
            return Err(ChunkCacheError::ConfigError(format!(
                "Download endpoint must be an http:// URL with a host, got {:?}",
                config.endpoint
            )));
        }

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .build(HttpConnector::new());

        debug!(
            "Created HTTP download gateway: endpoint={}, request_timeout={:?}, max_retries={}",
            endpoint, config.request_timeout, config.max_retries
        );

        Ok(Self {
            client,
            endpoint,
            request_timeout: config.request_timeout,
            retry_config: config.retry_config(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// URI of an object: the endpoint followed by the percent-encoded object id
    pub fn object_uri(&self, object: &RemoteObject) -> Result<Uri> {
        let uri = format!("{}/{}", self.endpoint, encode_path_segment(&object.id));
        uri.parse().map_err(|e| {
            ChunkCacheError::DownloadError(format!("Invalid object URI {}: {}", uri, e))
        })
    }

    async fn try_fetch(&self, request: &DownloadRequest) -> std::result::Result<Bytes, AttemptError> {
        let uri = self.object_uri(&request.object).map_err(AttemptError::fatal)?;

        let mut builder = Request::builder()
            .method(Method::GET)
            .uri(uri.clone())
            .header(
                RANGE,
                format!(
                    "bytes={}-{}",
                    request.window_start,
                    request.window_end_inclusive()
                ),
            );
        if let Some(version) = &request.object.version {
            builder = builder.header(IF_MATCH, version.as_str());
        }
        let http_request = builder.body(Full::new(Bytes::new())).map_err(|e| {
            AttemptError::fatal(ChunkCacheError::DownloadError(format!(
                "Failed to build request for {}: {}",
                uri, e
            )))
        })?;

        let response = self.client.request(http_request).await.map_err(|e| {
            AttemptError::retryable(ChunkCacheError::HttpError(format!(
                "Failed to send request to {}: {}",
                uri, e
            )))
        })?;

        let status = response.status();
        match status {
            StatusCode::PARTIAL_CONTENT | StatusCode::OK => {}
            StatusCode::RANGE_NOT_SATISFIABLE => {
                // Window starts at or past the end of the object
                debug!(
                    "Range not satisfiable, window is past object end: object={}, window_start={}",
                    request.object.id, request.window_start
                );
                return Ok(Bytes::new());
            }
            StatusCode::PRECONDITION_FAILED => {
                return Err(AttemptError::fatal(ChunkCacheError::DownloadError(format!(
                    "Object {} no longer matches version {:?}",
                    request.object.id, request.object.version
                ))));
            }
            _ => {
                let error = ChunkCacheError::DownloadError(format!(
                    "Unexpected status {} for object {}",
                    status, request.object.id
                ));
                return Err(if is_retryable_status(status) {
                    AttemptError::retryable(error)
                } else {
                    AttemptError::fatal(error)
                });
            }
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| {
                AttemptError::retryable(ChunkCacheError::HttpError(format!(
                    "Failed to read response body from {}: {}",
                    uri, e
                )))
            })?
            .to_bytes();

        let chunk_size = request.chunk_size as usize;
        let window = if status == StatusCode::OK {
            // Server ignored the range and sent the whole object
            let start = (request.window_start as usize).min(body.len());
            let end = start.saturating_add(chunk_size).min(body.len());
            body.slice(start..end)
        } else if body.len() > chunk_size {
            body.slice(..chunk_size)
        } else {
            body
        };

        Ok(window)
    }
}

#[async_trait]
impl DownloadGateway for HttpDownloadGateway {
    async fn fetch_chunk(&self, request: &DownloadRequest) -> Result<Bytes> {
        let max_retries = self.retry_config.max_retries;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            let outcome = match tokio::time::timeout(self.request_timeout, self.try_fetch(request))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(AttemptError::retryable(ChunkCacheError::TimeoutError(
                    format!(
                        "Request for object {} window {} timed out after {:?}",
                        request.object.id, request.window_start, self.request_timeout
                    ),
                ))),
            };

            match outcome {
                Ok(bytes) => {
                    debug!(
                        "Fetched chunk: object={}, window_start={}, bytes={}, attempt={}",
                        request.object.id,
                        request.window_start,
                        bytes.len(),
                        attempt + 1
                    );
                    return Ok(bytes);
                }
                Err(AttemptError { error, retryable }) => {
                    if retryable && attempt < max_retries {
                        let delay = self.retry_config.delay_for_attempt(attempt);
                        warn!(
                            "Chunk fetch attempt {} failed, retrying in {:?}: {}",
                            attempt + 1,
                            delay,
                            error
                        );
                        last_error = Some(error);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ChunkCacheError::DownloadError("All retry attempts failed".to_string())
        }))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Percent-encode everything outside the RFC 3986 unreserved set
fn encode_path_segment(segment: &str) -> String {
    encode_name(segment)
}
