#![forbid(unsafe_code)]

pub mod config;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod registry;

pub use config::GuardConfig;
pub use monitor::{
    format_log_line, Monitor, MonitorState, Site, SiteRuntimeState, SiteStatus, SiteTracker,
};
pub use notify::decision::{decide, Decision, DecisionEngine, NotificationRecord};
pub use notify::store::{FileBackend, MemoryBackend, StateBackend, StateMap, StoreError};
pub use notify::telegram::{TelegramConfig, TelegramNotifier};
pub use notify::{alert_channel, Alert, AlertDispatcher, AlertKind, Notifier, NotifyError};
pub use probe::{CheckResult, HttpProber, KeywordStatus, ProbeError, Prober, TlsStatus};
pub use registry::{FileRegistry, SiteRegistry, StaticRegistry};
