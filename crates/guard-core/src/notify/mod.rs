//! Alerting pipeline.
//!
//! The decision engine authorizes sends; delivery is decoupled from the
//! probing path through an mpsc channel. The [`AlertDispatcher`] reads from
//! that channel and hands each alert to every configured [`Notifier`].
//! Delivery failures are logged and never fed back into the decision state.

pub mod decision;
pub mod store;
pub mod telegram;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::monitor::state::SiteRuntimeState;
use decision::Decision;

/// What an authorized decision asks the channel to communicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    Failure,
    FailureUpdate,
    Recovery,
}

impl AlertKind {
    /// Maps an authorizing decision; `Suppress` has no alert.
    pub fn from_decision(decision: Decision) -> Option<Self> {
        match decision {
            Decision::Suppress => None,
            Decision::SendFailure => Some(Self::Failure),
            Decision::SendFailureUpdate => Some(Self::FailureUpdate),
            Decision::SendRecovery => Some(Self::Recovery),
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failure => write!(f, "failure"),
            Self::FailureUpdate => write!(f, "failure-update"),
            Self::Recovery => write!(f, "recovery"),
        }
    }
}

/// One authorized notification, as handed to the channel.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: AlertKind,
    pub site_name: String,
    pub site_url: String,
    pub consecutive_failures: u32,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Alert {
    pub fn from_state(kind: AlertKind, state: &SiteRuntimeState) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            site_name: state.name.clone(),
            site_url: state.url.clone(),
            consecutive_failures: state.consecutive_failures,
            latency_ms: state.last_result.latency_ms,
            reason: state.last_result.reason.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery request failed: {0}")]
    Network(String),
    #[error("delivery rejected: {0}")]
    Rejected(String),
    #[error("notifier is not configured")]
    NotConfigured,
}

/// A single external alerting channel.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}

pub fn alert_channel() -> (mpsc::UnboundedSender<Alert>, mpsc::UnboundedReceiver<Alert>) {
    mpsc::unbounded_channel()
}

/// Asynchronous alert dispatcher.
///
/// Spawned as a background tokio task; reads authorized alerts from the
/// channel and fans each one out to all notifiers. Returns when all senders
/// are dropped.
pub struct AlertDispatcher {
    rx: mpsc::UnboundedReceiver<Alert>,
    notifiers: Vec<Box<dyn Notifier>>,
}

impl AlertDispatcher {
    pub fn new(rx: mpsc::UnboundedReceiver<Alert>, notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { rx, notifiers }
    }

    pub async fn run(mut self) {
        debug!(notifier_count = self.notifiers.len(), "Alert dispatcher started");

        while let Some(alert) = self.rx.recv().await {
            for notifier in &self.notifiers {
                match notifier.notify(&alert).await {
                    Ok(()) => {
                        debug!(kind = %alert.kind, url = %alert.site_url, "Alert delivered")
                    }
                    Err(e) => {
                        warn!(kind = %alert.kind, url = %alert.site_url, error = %e, "Alert delivery failed")
                    }
                }
            }
        }

        debug!("Alert dispatcher shutting down");
    }
}
