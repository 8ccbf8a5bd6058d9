use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::GuardConfig;
use crate::monitor::state::{MonitorState, Site, SiteRuntimeState, SiteTracker};
use crate::notify::decision::{DecisionEngine, InvalidThreshold};
use crate::notify::store::StateMap;
use crate::notify::{Alert, AlertKind};
use crate::probe::Prober;
use crate::registry::SiteRegistry;

/// The scheduling loop plus the per-probe pipeline.
///
/// Each tick reads the registry live, skips sites that still have a probe in
/// flight, and fans the rest out under a bounded semaphore. A site's slot in
/// the in-flight set is released only after the full cycle (probe, tracker
/// update, decision, store write-back), so probes for one site are strictly
/// sequential.
pub struct Monitor {
    id: Uuid,
    config: GuardConfig,
    registry: Arc<dyn SiteRegistry>,
    prober: Arc<dyn Prober>,
    tracker: Arc<SiteTracker>,
    decisions: Arc<DecisionEngine>,
    state: Arc<RwLock<MonitorState>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    permits: Arc<Semaphore>,
    alert_tx: Option<UnboundedSender<Alert>>,
    created_at: DateTime<Utc>,
    last_checked: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl Monitor {
    pub fn new(
        registry: Arc<dyn SiteRegistry>,
        config: GuardConfig,
        prober: Arc<dyn Prober>,
        decisions: Arc<DecisionEngine>,
        alert_tx: Option<UnboundedSender<Alert>>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_probes));
        Self {
            id: Uuid::new_v4(),
            config,
            registry,
            prober,
            tracker: Arc::new(SiteTracker::new()),
            decisions,
            state: Arc::new(RwLock::new(MonitorState::Idle)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            permits,
            alert_tx,
            created_at: Utc::now(),
            last_checked: Arc::new(RwLock::new(None)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub async fn state(&self) -> MonitorState {
        *self.state.read().await
    }

    pub async fn last_checked(&self) -> Option<DateTime<Utc>> {
        *self.last_checked.read().await
    }

    /// Copy-on-read snapshot of every tracked site.
    pub fn status(&self) -> Vec<SiteRuntimeState> {
        self.tracker.snapshot()
    }

    pub fn site_status(&self, url: &str) -> Option<SiteRuntimeState> {
        self.tracker.get(url)
    }

    pub fn failure_threshold(&self) -> u32 {
        self.decisions.failure_threshold()
    }

    pub fn set_failure_threshold(&self, threshold: u32) -> Result<(), InvalidThreshold> {
        self.decisions.set_failure_threshold(threshold)
    }

    /// Administrative: forget one site's notification history.
    pub async fn clear_site(&self, url: &str) -> bool {
        self.decisions.clear_site(url).await
    }

    /// Administrative: forget all notification history.
    pub async fn clear_all(&self) -> usize {
        self.decisions.clear_all().await
    }

    pub async fn notification_records(&self) -> StateMap {
        self.decisions.records().await
    }

    /// Start the background scheduling loop. Idempotent while active.
    pub async fn start(&self) -> Result<(), String> {
        {
            let mut state = self.state.write().await;
            if *state == MonitorState::Active {
                return Ok(());
            }
            *state = MonitorState::Active;
        }

        info!(monitor_id = %self.id, interval_secs = self.config.poll_interval.as_secs(), "Starting monitor");

        let state = Arc::clone(&self.state);
        let registry = Arc::clone(&self.registry);
        let prober = Arc::clone(&self.prober);
        let tracker = Arc::clone(&self.tracker);
        let decisions = Arc::clone(&self.decisions);
        let in_flight = Arc::clone(&self.in_flight);
        let permits = Arc::clone(&self.permits);
        let alert_tx = self.alert_tx.clone();
        let last_checked = Arc::clone(&self.last_checked);
        let poll_interval = self.config.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            // Ticks come from the wall clock; an overrunning cycle must not
            // make the next one fire early to compensate.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                {
                    let current = *state.read().await;
                    if current != MonitorState::Active {
                        let mut s = state.write().await;
                        *s = MonitorState::Stopped;
                        info!("Monitor stopped");
                        break;
                    }
                }

                *last_checked.write().await = Some(Utc::now());

                let sites = registry.sites();
                let live: Vec<&str> = sites.iter().map(|s| s.url.as_str()).collect();
                tracker.prune(&live);

                for site in sites {
                    let claimed = in_flight.lock().await.insert(site.url.clone());
                    if !claimed {
                        debug!(url = %site.url, "Previous probe still in flight, skipping tick");
                        continue;
                    }

                    tokio::spawn(probe_cycle(
                        site,
                        Arc::clone(&prober),
                        Arc::clone(&tracker),
                        Arc::clone(&decisions),
                        alert_tx.clone(),
                        Arc::clone(&permits),
                        Arc::clone(&in_flight),
                    ));
                }
            }
        });

        Ok(())
    }

    /// Request a stop. In-flight probes finish naturally up to their own
    /// timeout; the loop observes the state change on its next tick.
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if *state == MonitorState::Active {
            *state = MonitorState::Stopping;
            info!(monitor_id = %self.id, "Stopping monitor");
        }
    }

    /// Run a single full cycle for every registered site and wait for all
    /// decisions to complete. Used by tests and the console watch mode.
    pub async fn poll_once(&self) {
        *self.last_checked.write().await = Some(Utc::now());

        let sites = self.registry.sites();
        let live: Vec<&str> = sites.iter().map(|s| s.url.as_str()).collect();
        self.tracker.prune(&live);

        let mut claimed = Vec::new();
        {
            let mut in_flight = self.in_flight.lock().await;
            for site in sites {
                if in_flight.insert(site.url.clone()) {
                    claimed.push(site);
                }
            }
        }

        let cycles = claimed.into_iter().map(|site| {
            probe_cycle(
                site,
                Arc::clone(&self.prober),
                Arc::clone(&self.tracker),
                Arc::clone(&self.decisions),
                self.alert_tx.clone(),
                Arc::clone(&self.permits),
                Arc::clone(&self.in_flight),
            )
        });

        stream::iter(cycles)
            .buffer_unordered(self.config.max_concurrent_probes)
            .collect::<Vec<_>>()
            .await;
    }
}

async fn probe_cycle(
    site: Site,
    prober: Arc<dyn Prober>,
    tracker: Arc<SiteTracker>,
    decisions: Arc<DecisionEngine>,
    alert_tx: Option<UnboundedSender<Alert>>,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
) {
    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            in_flight.lock().await.remove(&site.url);
            return;
        }
    };

    let result = prober.probe(&site).await;
    let state = tracker.record(&site, result);

    info!(target: "probe", "{}", format_log_line(&state));

    let decision = decisions
        .apply(&site.url, state.status, state.consecutive_failures)
        .await;

    if let Some(kind) = AlertKind::from_decision(decision) {
        info!(url = %site.url, kind = %kind, failures = state.consecutive_failures, "Notification authorized");
        if let Some(tx) = &alert_tx {
            // Fire-and-forget; delivery failures are the dispatcher's to log
            // and never roll the record back.
            let _ = tx.send(Alert::from_state(kind, &state));
        }
    }

    in_flight.lock().await.remove(&site.url);
}

/// One line per probe, in the format the external log viewer consumes.
pub fn format_log_line(state: &SiteRuntimeState) -> String {
    let result = &state.last_result;
    let http = result
        .http_status
        .map(|code| code.to_string())
        .unwrap_or_else(|| "-".to_string());

    let mut line = format!(
        "name={} url={} status={} http={} ssl={} keyword={} latency_ms={}",
        state.name, state.url, state.status, http, result.tls, result.keyword, result.latency_ms,
    );
    if let Some(reason) = &result.reason {
        line.push_str(&format!(" error={}", reason));
    }
    line
}
