use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::store::{StateBackend, StateMap};
use crate::monitor::state::SiteStatus;

/// Durable memory of what was last communicated for a site.
///
/// When `status` is down, `consecutive_failures` carries the exact count at
/// which the last alert fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub status: SiteStatus,
    pub timestamp: DateTime<Utc>,
    pub consecutive_failures: u32,
}

/// Outcome of one decision-engine cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Suppress,
    SendFailure,
    SendFailureUpdate,
    SendRecovery,
}

impl Decision {
    pub fn authorizes_send(self) -> bool {
        self != Decision::Suppress
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suppress => write!(f, "suppress"),
            Self::SendFailure => write!(f, "send-failure"),
            Self::SendFailureUpdate => write!(f, "send-failure-update"),
            Self::SendRecovery => write!(f, "send-recovery"),
        }
    }
}

/// The deduplication table. Evaluated in precedence order; first match wins.
///
/// - up with no prior down on record: nothing to say.
/// - up after a notified down: exactly one recovery.
/// - down below the threshold: never authorized, regardless of history.
/// - down at or past the threshold: first report, then an update on every
///   strictly increasing count. An identical or regressed count is treated
///   as already-reported noise and never regresses the record.
pub fn decide(
    status: SiteStatus,
    consecutive_failures: u32,
    threshold: u32,
    record: Option<&NotificationRecord>,
) -> Decision {
    match status {
        SiteStatus::Up => match record {
            Some(r) if r.status == SiteStatus::Down => Decision::SendRecovery,
            _ => Decision::Suppress,
        },
        SiteStatus::Down => {
            if consecutive_failures < threshold {
                return Decision::Suppress;
            }
            match record {
                None => Decision::SendFailure,
                Some(r) if r.status == SiteStatus::Up => Decision::SendFailure,
                Some(r) if consecutive_failures == r.consecutive_failures => Decision::Suppress,
                Some(r) if consecutive_failures > r.consecutive_failures => {
                    Decision::SendFailureUpdate
                }
                Some(_) => Decision::Suppress,
            }
        }
    }
}

/// Applies the decision table against the persisted notification records.
///
/// `apply` runs load, decide, and write-back as one critical section so that
/// concurrent probe completions and administrative clears can never interleave
/// a lost update. Write-back happens only for authorized sends.
pub struct DecisionEngine {
    store: Mutex<Box<dyn StateBackend>>,
    threshold: AtomicU32,
}

impl DecisionEngine {
    pub fn new(backend: Box<dyn StateBackend>, failure_threshold: u32) -> Self {
        Self {
            store: Mutex::new(backend),
            threshold: AtomicU32::new(failure_threshold.max(1)),
        }
    }

    pub fn failure_threshold(&self) -> u32 {
        self.threshold.load(Ordering::Relaxed)
    }

    /// Process-wide, hot-reloadable. Values below 1 are rejected.
    pub fn set_failure_threshold(&self, threshold: u32) -> Result<(), InvalidThreshold> {
        if threshold < 1 {
            return Err(InvalidThreshold(threshold));
        }
        self.threshold.store(threshold, Ordering::Relaxed);
        Ok(())
    }

    /// Run one decision cycle for a site and persist the outcome when it
    /// authorizes a send.
    pub async fn apply(
        &self,
        site_url: &str,
        status: SiteStatus,
        consecutive_failures: u32,
    ) -> Decision {
        let store = self.store.lock().await;
        let mut records = store.load();

        let decision = decide(
            status,
            consecutive_failures,
            self.failure_threshold(),
            records.get(site_url),
        );

        if decision.authorizes_send() {
            records.insert(
                site_url.to_string(),
                NotificationRecord {
                    status,
                    timestamp: Utc::now(),
                    consecutive_failures,
                },
            );
            // A failed save must not roll the decision back; at worst the
            // next cycle repeats a single alert.
            if let Err(e) = store.save(&records) {
                warn!(url = site_url, error = %e, "Failed to persist notification record");
            }
        }

        debug!(url = site_url, %status, consecutive_failures, decision = %decision, "Decision");
        decision
    }

    /// Administrative: forget the notification history of one site.
    pub async fn clear_site(&self, site_url: &str) -> bool {
        let store = self.store.lock().await;
        let mut records = store.load();
        let removed = records.remove(site_url).is_some();
        if removed {
            if let Err(e) = store.save(&records) {
                warn!(url = site_url, error = %e, "Failed to persist notification record");
            }
        }
        removed
    }

    /// Administrative: forget all notification history.
    pub async fn clear_all(&self) -> usize {
        let store = self.store.lock().await;
        let records = store.load();
        let count = records.len();
        if count > 0 {
            if let Err(e) = store.save(&StateMap::new()) {
                warn!(error = %e, "Failed to persist notification records");
            }
        }
        count
    }

    /// Administrative: drop records older than the retention window.
    pub async fn cleanup_expired(&self, max_age: chrono::Duration) -> usize {
        let store = self.store.lock().await;
        let mut records = store.load();
        let cutoff = Utc::now() - max_age;
        let before = records.len();
        records.retain(|_, r| r.timestamp >= cutoff);
        let removed = before - records.len();
        if removed > 0 {
            if let Err(e) = store.save(&records) {
                warn!(error = %e, "Failed to persist notification records");
            }
        }
        removed
    }

    /// Copy of every persisted record, for inspection.
    pub async fn records(&self) -> StateMap {
        self.store.lock().await.load()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failure threshold must be >= 1, got {0}")]
pub struct InvalidThreshold(pub u32);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::store::MemoryBackend;

    fn down_record(count: u32) -> NotificationRecord {
        NotificationRecord {
            status: SiteStatus::Down,
            timestamp: Utc::now(),
            consecutive_failures: count,
        }
    }

    fn up_record() -> NotificationRecord {
        NotificationRecord {
            status: SiteStatus::Up,
            timestamp: Utc::now(),
            consecutive_failures: 0,
        }
    }

    fn engine(threshold: u32) -> DecisionEngine {
        DecisionEngine::new(Box::new(MemoryBackend::new()), threshold)
    }

    #[test]
    fn up_with_no_history_suppresses() {
        assert_eq!(decide(SiteStatus::Up, 0, 3, None), Decision::Suppress);
    }

    #[test]
    fn up_after_up_suppresses() {
        assert_eq!(
            decide(SiteStatus::Up, 0, 3, Some(&up_record())),
            Decision::Suppress
        );
    }

    #[test]
    fn up_after_any_down_recovers() {
        assert_eq!(
            decide(SiteStatus::Up, 0, 3, Some(&down_record(3))),
            Decision::SendRecovery
        );
        assert_eq!(
            decide(SiteStatus::Up, 0, 3, Some(&down_record(17))),
            Decision::SendRecovery
        );
    }

    #[test]
    fn down_below_threshold_never_authorizes() {
        for count in 0..3 {
            assert_eq!(decide(SiteStatus::Down, count, 3, None), Decision::Suppress);
            assert_eq!(
                decide(SiteStatus::Down, count, 3, Some(&up_record())),
                Decision::Suppress
            );
            assert_eq!(
                decide(SiteStatus::Down, count, 3, Some(&down_record(1))),
                Decision::Suppress
            );
        }
    }

    #[test]
    fn down_at_threshold_with_no_history_fires() {
        assert_eq!(decide(SiteStatus::Down, 3, 3, None), Decision::SendFailure);
    }

    #[test]
    fn down_after_up_record_fires() {
        assert_eq!(
            decide(SiteStatus::Down, 5, 3, Some(&up_record())),
            Decision::SendFailure
        );
    }

    #[test]
    fn identical_streak_is_suppressed() {
        assert_eq!(
            decide(SiteStatus::Down, 5, 3, Some(&down_record(5))),
            Decision::Suppress
        );
    }

    #[test]
    fn increased_count_escalates() {
        assert_eq!(
            decide(SiteStatus::Down, 6, 3, Some(&down_record(5))),
            Decision::SendFailureUpdate
        );
    }

    #[test]
    fn regressed_count_is_suppressed() {
        assert_eq!(
            decide(SiteStatus::Down, 4, 3, Some(&down_record(5))),
            Decision::Suppress
        );
    }

    #[tokio::test]
    async fn apply_writes_back_only_on_send() {
        let engine = engine(3);

        assert_eq!(
            engine.apply("https://a.com", SiteStatus::Down, 1).await,
            Decision::Suppress
        );
        assert!(engine.records().await.is_empty());

        assert_eq!(
            engine.apply("https://a.com", SiteStatus::Down, 3).await,
            Decision::SendFailure
        );
        let records = engine.records().await;
        assert_eq!(records["https://a.com"].consecutive_failures, 3);
        assert_eq!(records["https://a.com"].status, SiteStatus::Down);
    }

    #[tokio::test]
    async fn repeated_down_at_same_count_is_idempotent() {
        let engine = engine(3);

        assert_eq!(
            engine.apply("https://a.com", SiteStatus::Down, 3).await,
            Decision::SendFailure
        );
        for _ in 0..5 {
            assert_eq!(
                engine.apply("https://a.com", SiteStatus::Down, 3).await,
                Decision::Suppress
            );
        }
    }

    #[tokio::test]
    async fn strictly_increasing_counts_always_escalate() {
        let engine = engine(3);

        assert_eq!(
            engine.apply("https://a.com", SiteStatus::Down, 3).await,
            Decision::SendFailure
        );
        for count in [4, 5, 9, 20] {
            assert_eq!(
                engine.apply("https://a.com", SiteStatus::Down, count).await,
                Decision::SendFailureUpdate,
                "count {} must escalate",
                count
            );
        }
    }

    #[tokio::test]
    async fn recovery_fires_exactly_once() {
        let engine = engine(3);

        engine.apply("https://a.com", SiteStatus::Down, 3).await;
        assert_eq!(
            engine.apply("https://a.com", SiteStatus::Up, 0).await,
            Decision::SendRecovery
        );
        assert_eq!(
            engine.records().await["https://a.com"].status,
            SiteStatus::Up
        );
        assert_eq!(
            engine.apply("https://a.com", SiteStatus::Up, 0).await,
            Decision::Suppress
        );
    }

    #[tokio::test]
    async fn outage_scenario_with_threshold_three() {
        let engine = engine(3);
        let inputs = [
            (SiteStatus::Down, 1),
            (SiteStatus::Down, 2),
            (SiteStatus::Down, 3),
            (SiteStatus::Down, 4),
            (SiteStatus::Up, 0),
            (SiteStatus::Up, 0),
        ];
        let expected = [
            Decision::Suppress,
            Decision::Suppress,
            Decision::SendFailure,
            Decision::SendFailureUpdate,
            Decision::SendRecovery,
            Decision::Suppress,
        ];

        for ((status, count), want) in inputs.iter().zip(expected.iter()) {
            let got = engine.apply("https://a.com", *status, *count).await;
            assert_eq!(got, *want, "status={} count={}", status, count);
        }
    }

    #[tokio::test]
    async fn clear_site_resets_history() {
        let engine = engine(3);

        engine.apply("https://a.com", SiteStatus::Down, 3).await;
        engine.apply("https://a.com", SiteStatus::Down, 5).await;
        assert!(engine.clear_site("https://a.com").await);

        // History treated as absent: a later down past the threshold fires
        // a fresh failure, not an update.
        assert_eq!(
            engine.apply("https://a.com", SiteStatus::Down, 5).await,
            Decision::SendFailure
        );
    }

    #[tokio::test]
    async fn clear_all_empties_the_store() {
        let engine = engine(3);

        engine.apply("https://a.com", SiteStatus::Down, 3).await;
        engine.apply("https://b.com", SiteStatus::Down, 4).await;
        assert_eq!(engine.clear_all().await, 2);
        assert!(engine.records().await.is_empty());
    }

    #[tokio::test]
    async fn threshold_is_hot_reloadable() {
        let engine = engine(5);

        assert_eq!(
            engine.apply("https://a.com", SiteStatus::Down, 3).await,
            Decision::Suppress
        );

        engine.set_failure_threshold(2).unwrap();
        assert_eq!(
            engine.apply("https://a.com", SiteStatus::Down, 3).await,
            Decision::SendFailure
        );
    }

    #[tokio::test]
    async fn zero_threshold_is_rejected() {
        let engine = engine(3);
        assert!(engine.set_failure_threshold(0).is_err());
        assert_eq!(engine.failure_threshold(), 3);
    }

    #[tokio::test]
    async fn cleanup_expired_drops_stale_records() {
        let engine = engine(3);
        engine.apply("https://a.com", SiteStatus::Down, 3).await;

        assert_eq!(engine.cleanup_expired(chrono::Duration::hours(1)).await, 0);
        assert_eq!(
            engine.cleanup_expired(chrono::Duration::seconds(-1)).await,
            1
        );
        assert!(engine.records().await.is_empty());
    }
}
