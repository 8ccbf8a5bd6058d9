use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::probe::CheckResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Idle,
    Active,
    Stopping,
    Stopped,
}

impl MonitorState {
    pub fn can_transition_to(self, target: MonitorState) -> bool {
        matches!(
            (self, target),
            (MonitorState::Idle, MonitorState::Active)
                | (MonitorState::Active, MonitorState::Stopping)
                | (MonitorState::Stopping, MonitorState::Stopped)
                | (MonitorState::Stopped, MonitorState::Active)
        )
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Externally-visible liveness classification for a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    Up,
    Down,
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// A monitored site as supplied by the registry. The URL is the primary key;
/// the core treats the whole record as read-only input per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Site {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            keyword: None,
            timeout_ms: None,
        }
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub fn is_https(&self) -> bool {
        self.url.starts_with("https://")
    }
}

/// Per-site runtime state, mutated only by the tracker after each probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteRuntimeState {
    pub name: String,
    pub url: String,
    pub status: SiteStatus,
    pub consecutive_failures: u32,
    pub last_result: CheckResult,
    pub last_checked: DateTime<Utc>,
}

/// Holds the last result and consecutive-failure counter for every site.
///
/// Backed by a concurrent map so probes for different sites may record in
/// parallel; the scheduler guarantees at most one in-flight probe per site.
/// Reads hand out clones, so the UI never observes a half-applied update.
#[derive(Debug, Default)]
pub struct SiteTracker {
    sites: DashMap<String, SiteRuntimeState>,
}

impl SiteTracker {
    pub fn new() -> Self {
        Self {
            sites: DashMap::new(),
        }
    }

    /// Fold a fresh probe result into the site's runtime state and return
    /// the updated state. The failure counter resets to 0 on any up result
    /// and increments by exactly 1 on each consecutive down.
    pub fn record(&self, site: &Site, result: CheckResult) -> SiteRuntimeState {
        let status = if result.up {
            SiteStatus::Up
        } else {
            SiteStatus::Down
        };

        let mut entry = self
            .sites
            .entry(site.url.clone())
            .or_insert_with(|| SiteRuntimeState {
                name: site.name.clone(),
                url: site.url.clone(),
                status: SiteStatus::Up,
                consecutive_failures: 0,
                last_result: result.clone(),
                last_checked: result.timestamp,
            });

        let state = entry.value_mut();
        state.name = site.name.clone();
        state.status = status;
        state.consecutive_failures = match status {
            SiteStatus::Up => 0,
            SiteStatus::Down => state.consecutive_failures + 1,
        };
        state.last_checked = result.timestamp;
        state.last_result = result;

        state.clone()
    }

    /// Copy-on-read snapshot of a single site.
    pub fn get(&self, url: &str) -> Option<SiteRuntimeState> {
        self.sites.get(url).map(|s| s.value().clone())
    }

    /// Copy-on-read snapshot of every tracked site.
    pub fn snapshot(&self) -> Vec<SiteRuntimeState> {
        let mut all: Vec<SiteRuntimeState> = self.sites.iter().map(|s| s.value().clone()).collect();
        all.sort_by(|a, b| a.url.cmp(&b.url));
        all
    }

    /// Drop state for sites no longer present in the registry.
    pub fn prune(&self, live_urls: &[&str]) {
        self.sites.retain(|url, _| live_urls.contains(&url.as_str()));
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{KeywordStatus, TlsStatus};

    fn result(up: bool) -> CheckResult {
        CheckResult::evaluate(
            Some(if up { 200 } else { 500 }),
            TlsStatus::NotApplicable,
            KeywordStatus::NotConfigured,
            10,
            None,
        )
    }

    fn site() -> Site {
        Site::new("Example", "https://example.com")
    }

    #[test]
    fn valid_state_transitions() {
        assert!(MonitorState::Idle.can_transition_to(MonitorState::Active));
        assert!(MonitorState::Active.can_transition_to(MonitorState::Stopping));
        assert!(MonitorState::Stopping.can_transition_to(MonitorState::Stopped));
        assert!(MonitorState::Stopped.can_transition_to(MonitorState::Active));
    }

    #[test]
    fn invalid_state_transitions() {
        assert!(!MonitorState::Idle.can_transition_to(MonitorState::Stopped));
        assert!(!MonitorState::Active.can_transition_to(MonitorState::Idle));
        assert!(!MonitorState::Stopping.can_transition_to(MonitorState::Active));
    }

    #[test]
    fn failures_increment_on_consecutive_downs() {
        let tracker = SiteTracker::new();
        let site = site();

        let s1 = tracker.record(&site, result(false));
        assert_eq!(s1.consecutive_failures, 1);
        assert_eq!(s1.status, SiteStatus::Down);

        let s2 = tracker.record(&site, result(false));
        assert_eq!(s2.consecutive_failures, 2);

        let s3 = tracker.record(&site, result(false));
        assert_eq!(s3.consecutive_failures, 3);
    }

    #[test]
    fn failures_reset_on_any_up() {
        let tracker = SiteTracker::new();
        let site = site();

        tracker.record(&site, result(false));
        tracker.record(&site, result(false));
        let up = tracker.record(&site, result(true));
        assert_eq!(up.consecutive_failures, 0);
        assert_eq!(up.status, SiteStatus::Up);

        let down_again = tracker.record(&site, result(false));
        assert_eq!(down_again.consecutive_failures, 1);
    }

    #[test]
    fn first_probe_creates_state() {
        let tracker = SiteTracker::new();
        assert!(tracker.is_empty());

        tracker.record(&site(), result(true));
        assert_eq!(tracker.len(), 1);

        let state = tracker.get("https://example.com").unwrap();
        assert_eq!(state.name, "Example");
        assert_eq!(state.status, SiteStatus::Up);
    }

    #[test]
    fn prune_drops_removed_sites() {
        let tracker = SiteTracker::new();
        tracker.record(&Site::new("A", "https://a.com"), result(true));
        tracker.record(&Site::new("B", "https://b.com"), result(true));

        tracker.prune(&["https://a.com"]);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.get("https://b.com").is_none());
    }

    #[test]
    fn snapshot_is_sorted_by_url() {
        let tracker = SiteTracker::new();
        tracker.record(&Site::new("B", "https://b.com"), result(true));
        tracker.record(&Site::new("A", "https://a.com"), result(true));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot[0].url, "https://a.com");
        assert_eq!(snapshot[1].url, "https://b.com");
    }
}
