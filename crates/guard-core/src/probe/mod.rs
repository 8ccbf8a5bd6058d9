mod http;

pub use http::HttpProber;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitor::state::Site;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request timed out")]
    Timeout,
    #[error("TLS handshake failed: {0}")]
    Tls(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Other(String),
}

/// TLS certificate verdict for a probe. Only meaningful for https targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsStatus {
    Valid,
    Invalid,
    NotApplicable,
}

impl fmt::Display for TlsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "up"),
            Self::Invalid => write!(f, "down"),
            Self::NotApplicable => write!(f, "-"),
        }
    }
}

/// Keyword-scan verdict. Only meaningful when the site configures a keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordStatus {
    Match,
    Miss,
    NotConfigured,
}

impl fmt::Display for KeywordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match => write!(f, "match"),
            Self::Miss => write!(f, "miss"),
            Self::NotConfigured => write!(f, "-"),
        }
    }
}

/// Outcome of a single probe. Produced fresh each cycle, never persisted
/// beyond the in-memory tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// HTTP status code; absent when the request never produced a response.
    pub http_status: Option<u16>,
    pub tls: TlsStatus,
    pub keyword: KeywordStatus,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CheckResult {
    /// Reduce the raw signals to the up/down verdict: successful or redirect
    /// status, keyword found (when configured), TLS valid (when https).
    pub fn evaluate(
        http_status: Option<u16>,
        tls: TlsStatus,
        keyword: KeywordStatus,
        latency_ms: u64,
        reason: Option<String>,
    ) -> Self {
        let status_ok = http_status.is_some_and(|code| (200..400).contains(&code));
        let keyword_ok = keyword != KeywordStatus::Miss;
        let tls_ok = tls != TlsStatus::Invalid;

        Self {
            http_status,
            tls,
            keyword,
            latency_ms,
            timestamp: Utc::now(),
            up: status_ok && keyword_ok && tls_ok,
            reason,
        }
    }

    /// A probe that never reached an HTTP response.
    pub fn failed(error: ProbeError, secure: bool, latency_ms: u64) -> Self {
        // A failed https probe only proves something about the certificate
        // when the failure was the handshake itself.
        let tls = match &error {
            ProbeError::Tls(_) if secure => TlsStatus::Invalid,
            _ => TlsStatus::NotApplicable,
        };

        Self {
            http_status: None,
            tls,
            keyword: KeywordStatus::NotConfigured,
            latency_ms,
            timestamp: Utc::now(),
            up: false,
            reason: Some(error.to_string()),
        }
    }
}

/// Trait for executing a single liveness probe against a site.
///
/// Implementations never fail loudly: DNS errors, refused connections,
/// timeouts, and TLS failures are all reduced to an `up = false` result with
/// a reason attached. The trait is object-safe and Send + Sync for use
/// across async tasks.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, site: &Site) -> CheckResult;
}
