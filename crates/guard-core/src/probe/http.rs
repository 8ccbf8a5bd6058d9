use std::error::Error as _;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{CheckResult, KeywordStatus, ProbeError, Prober, TlsStatus};
use crate::monitor::state::Site;

/// HTTP-based prober with connection pooling and a hard per-probe deadline.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: Client,
    default_timeout: Duration,
    body_scan_limit: usize,
}

impl HttpProber {
    pub fn new(default_timeout: Duration, body_scan_limit: usize) -> Self {
        let client = Self::build_client(default_timeout);
        Self {
            client,
            default_timeout,
            body_scan_limit,
        }
    }

    pub fn with_client(client: Client, default_timeout: Duration, body_scan_limit: usize) -> Self {
        Self {
            client,
            default_timeout,
            body_scan_limit,
        }
    }

    pub fn from_config(config: &crate::config::GuardConfig) -> Self {
        Self::new(config.request_timeout, config.body_scan_limit)
    }

    pub fn build_client(timeout: Duration) -> Client {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(20)
            .gzip(true)
            .user_agent(concat!("uptimeguard/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to build HTTP client")
    }

    async fn execute(&self, site: &Site, timeout: Duration) -> Result<CheckResult, ProbeError> {
        let started = Instant::now();
        let secure = site.is_https();

        let response = self
            .client
            .get(&site.url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let tls = if secure {
            TlsStatus::Valid
        } else {
            TlsStatus::NotApplicable
        };

        let mut reason = None;
        let keyword = match &site.keyword {
            None => KeywordStatus::NotConfigured,
            Some(kw) => match read_prefix(response, self.body_scan_limit).await {
                Ok(prefix) => {
                    if prefix.to_lowercase().contains(&kw.to_lowercase()) {
                        KeywordStatus::Match
                    } else {
                        reason = Some(format!("keyword '{}' not found in response body", kw));
                        KeywordStatus::Miss
                    }
                }
                Err(e) => {
                    reason = Some(format!("body read failed: {}", e));
                    KeywordStatus::Miss
                }
            },
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(url = %site.url, status, latency_ms, "Probe completed");

        Ok(CheckResult::evaluate(
            Some(status),
            tls,
            keyword,
            latency_ms,
            reason,
        ))
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), 64 * 1024)
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, site: &Site) -> CheckResult {
        let timeout = site
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        let started = Instant::now();

        match self.execute(site, timeout).await {
            Ok(result) => result,
            Err(e) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                debug!(url = %site.url, error = %e, latency_ms, "Probe failed");
                CheckResult::failed(e, site.is_https(), latency_ms)
            }
        }
    }
}

/// Read at most `limit` bytes of the response body.
async fn read_prefix(mut response: reqwest::Response, limit: usize) -> Result<String, reqwest::Error> {
    let mut buf: Vec<u8> = Vec::with_capacity(limit.min(8192));
    while let Some(chunk) = response.chunk().await? {
        let remaining = limit - buf.len();
        if chunk.len() >= remaining {
            buf.extend_from_slice(&chunk[..remaining]);
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn classify(error: reqwest::Error) -> ProbeError {
    if error.is_timeout() {
        return ProbeError::Timeout;
    }
    if is_tls_error(&error) {
        return ProbeError::Tls(root_cause(&error));
    }
    if error.is_connect() {
        return ProbeError::Connect(root_cause(&error));
    }
    ProbeError::Other(root_cause(&error))
}

/// reqwest surfaces certificate problems as connect errors; the TLS layer
/// only shows up in the source chain.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let mut source = error.source();
    while let Some(e) = source {
        let text = e.to_string().to_lowercase();
        if text.contains("certificate") || text.contains("tls") || text.contains("ssl") {
            return true;
        }
        source = e.source();
    }
    false
}

fn root_cause(error: &reqwest::Error) -> String {
    let mut current: &dyn std::error::Error = error;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}
