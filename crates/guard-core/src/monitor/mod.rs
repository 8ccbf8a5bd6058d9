pub mod engine;
pub mod state;

pub use engine::{format_log_line, Monitor};
pub use state::{MonitorState, Site, SiteRuntimeState, SiteStatus, SiteTracker};
