//! Anti-detection HTTP transport
//!
//! A proxy-rotating client whose TLS handshake and request headers are
//! shaped to resemble real browsers. One `reqwest::Client` is built per
//! proxy endpoint at startup, each pinned to a randomly chosen browser
//! identity; per request the rotator picks a client by key, matching
//! headers are injected, and the response is decompressed. Transport
//! faults, 5xx and 429 are retried with exponential backoff.

pub mod fingerprint;
pub mod rotator;

use std::io::Read;
use std::time::Duration;

use reqwest::header::{HeaderMap, CONTENT_ENCODING};
use reqwest::Method;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use fingerprint::{Browser, HeaderShaper};
use rotator::{ProxyRotator, RotatorError};

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request cancelled")]
    Cancelled,
    #[error("proxy pool: {0}")]
    Rotator(#[from] RotatorError),
    #[error("tls configuration: {0}")]
    Tls(#[from] rustls::Error),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server error: status {status}")]
    Status { status: u16 },
    #[error("failed to decompress response body: {0}")]
    Decompress(#[source] std::io::Error),
    #[error("all {attempts} attempts failed")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<TransportError>,
    },
}

impl TransportError {
    /// True when the failure is (or wraps) a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            TransportError::Cancelled => true,
            TransportError::Exhausted { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// The HTTP status behind this failure, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status } => Some(*status),
            TransportError::Exhausted { source, .. } => source.status(),
            _ => None,
        }
    }

    /// True when the upstream explicitly rate-limited us.
    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }
}

struct ProxyClient {
    client: reqwest::Client,
    browser: Browser,
}

/// Proxy-rotating, fingerprint-shaping, retrying HTTP client.
pub struct RetryableTransport {
    rotator: ProxyRotator,
    clients: Vec<ProxyClient>,
    shaper: HeaderShaper,
    max_retries: u32,
}

impl RetryableTransport {
    /// Build the transport from configuration. One client per proxy,
    /// each with a browser identity chosen here and kept for the life
    /// of the process.
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let rotator = ProxyRotator::from_urls(&config.proxy_urls)?;

        let mut clients = Vec::with_capacity(rotator.len());
        for endpoint in rotator.endpoints() {
            let browser = Browser::random();
            let tls = fingerprint::tls_config(browser)?;

            let client = reqwest::Client::builder()
                .proxy(reqwest::Proxy::all(endpoint.url().as_str())?)
                .use_preconfigured_tls(tls)
                .http1_only()
                .timeout(config.request_timeout)
                .connect_timeout(Duration::from_secs(10))
                .pool_max_idle_per_host(10)
                .pool_idle_timeout(Duration::from_secs(90))
                .redirect(reqwest::redirect::Policy::limited(10))
                .build()?;

            info!(proxy = %endpoint, ?browser, "registered upstream proxy");
            clients.push(ProxyClient { client, browser });
        }

        Ok(RetryableTransport {
            rotator,
            clients,
            shaper: HeaderShaper::new(config.user_agent.clone(), config.random_user_agents),
            max_retries: config.max_retries.max(1),
        })
    }

    /// GET a URL and return the decompressed body.
    pub async fn get(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, TransportError> {
        self.execute(Method::GET, url, HeaderMap::new(), None, token)
            .await
    }

    /// GET with caller-supplied headers (which win over the shaper's).
    pub async fn get_with_headers(
        &self,
        url: &Url,
        headers: HeaderMap,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, TransportError> {
        self.execute(Method::GET, url, headers, None, token).await
    }

    /// Execute a request with retries. The body is buffered up front so
    /// every attempt replays identical bytes.
    pub async fn execute(
        &self,
        method: Method,
        url: &Url,
        base_headers: HeaderMap,
        body: Option<Vec<u8>>,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, TransportError> {
        let mut last_err = TransportError::Cancelled;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_secs(1u64 << attempt);
                debug!(attempt, ?backoff, %url, "retrying after backoff");
                cancellable_sleep(backoff, token).await?;
            }

            let key: u32 = rand::random();
            let proxy_client = &self.clients[self.rotator.index_for_id(key)];

            let mut headers = base_headers.clone();
            self.shaper.apply(&mut headers, proxy_client.browser);

            let mut request = proxy_client
                .client
                .request(method.clone(), url.clone())
                .headers(headers);
            if let Some(bytes) = &body {
                request = request.body(bytes.clone());
            }

            let outcome = tokio::select! {
                _ = token.cancelled() => Err(TransportError::Cancelled),
                res = send_once(request) => res,
            };

            match outcome {
                Ok((status, _)) if status == 429 || status >= 500 => {
                    warn!(status, attempt, %url, "upstream error status");
                    last_err = TransportError::Status { status };
                }
                Ok((_, bytes)) => return Ok(bytes),
                Err(TransportError::Cancelled) => return Err(TransportError::Cancelled),
                Err(err) => {
                    warn!(error = %err, attempt, %url, "request attempt failed");
                    last_err = err;
                }
            }
        }

        Err(TransportError::Exhausted {
            attempts: self.max_retries,
            source: Box::new(last_err),
        })
    }
}

/// One attempt: send, read, decompress.
async fn send_once(request: reqwest::RequestBuilder) -> Result<(u16, Vec<u8>), TransportError> {
    let response = request.send().await?;
    let status = response.status().as_u16();

    let gzipped = response
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);

    let raw = response.bytes().await?.to_vec();
    let body = decode_body(raw, gzipped)?;
    Ok((status, body))
}

/// Decompress a response body. When the declared encoding is gzip the
/// body is inflated once; a body that still opens with the gzip magic
/// afterwards has been compressed twice upstream and gets a second,
/// best-effort pass.
fn decode_body(raw: Vec<u8>, gzipped: bool) -> Result<Vec<u8>, TransportError> {
    let mut body = if gzipped {
        gunzip(&raw).map_err(TransportError::Decompress)?
    } else {
        raw
    };

    if body.starts_with(&[0x1f, 0x8b]) {
        if let Ok(inner) = gunzip(&body) {
            debug!("decoded doubly-gzipped response body");
            body = inner;
        }
    }

    Ok(body)
}

fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Sleep unless the request is cancelled first.
pub(crate) async fn cancellable_sleep(
    duration: Duration,
    token: &CancellationToken,
) -> Result<(), TransportError> {
    tokio::select! {
        _ = token.cancelled() => Err(TransportError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_decode_plain_body_passthrough() {
        let body = b"{\"ok\":true}".to_vec();
        assert_eq!(decode_body(body.clone(), false).unwrap(), body);
    }

    #[test]
    fn test_decode_gzip_body() {
        let plain = b"hello listing".to_vec();
        let decoded = decode_body(gzip(&plain), true).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn test_decode_double_gzip_body() {
        let plain = b"{\"kind\":\"Listing\"}".to_vec();
        let twice = gzip(&gzip(&plain));
        let decoded = decode_body(twice, true).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn test_decode_undeclared_gzip_body() {
        // No Content-Encoding header, but the bytes are gzip anyway.
        let plain = b"sneaky".to_vec();
        let decoded = decode_body(gzip(&plain), false).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn test_decode_corrupt_gzip_fails() {
        let result = decode_body(vec![0x1f, 0x8b, 0x00, 0x01], true);
        assert!(matches!(result, Err(TransportError::Decompress(_))));
    }

    #[test]
    fn test_error_introspection() {
        let err = TransportError::Exhausted {
            attempts: 3,
            source: Box::new(TransportError::Status { status: 429 }),
        };
        assert!(err.is_rate_limited());
        assert_eq!(err.status(), Some(429));
        assert!(!err.is_cancelled());

        let err = TransportError::Exhausted {
            attempts: 3,
            source: Box::new(TransportError::Cancelled),
        };
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancellable_sleep_aborts() {
        let token = CancellationToken::new();
        token.cancel();
        let result = cancellable_sleep(Duration::from_secs(30), &token).await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }
}
