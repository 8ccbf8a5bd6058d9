use std::path::PathBuf;

use tracing::warn;

use crate::monitor::state::Site;

/// Source of the monitored site list. Re-read on every scheduling tick so
/// externally added or removed sites take effect without a restart.
pub trait SiteRegistry: Send + Sync {
    fn sites(&self) -> Vec<Site>;
}

/// Reads a JSON array of sites from disk (the `sites.json` the external
/// editor maintains). Malformed entries are skipped one by one; a missing or
/// unparsable file yields an empty list, never an error.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SiteRegistry for FileRegistry {
    fn sites(&self) -> Vec<Site> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable site list");
                return Vec::new();
            }
        };

        let entries: Vec<serde_json::Value> = match serde_json::from_slice(&bytes) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unparsable site list");
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .enumerate()
            .filter_map(|(i, entry)| match serde_json::from_value::<Site>(entry) {
                Ok(site) => validate(site).or_else(|| {
                    warn!(path = %self.path.display(), index = i, "Skipping site with invalid URL");
                    None
                }),
                Err(e) => {
                    warn!(path = %self.path.display(), index = i, error = %e, "Skipping malformed site entry");
                    None
                }
            })
            .collect()
    }
}

/// Fixed site list, for single-site watch sessions and tests.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    sites: Vec<Site>,
}

impl StaticRegistry {
    pub fn new(sites: Vec<Site>) -> Self {
        Self { sites }
    }
}

impl SiteRegistry for StaticRegistry {
    fn sites(&self) -> Vec<Site> {
        self.sites.clone()
    }
}

fn validate(site: Site) -> Option<Site> {
    let parsed = url::Url::parse(&site.url).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    if site.name.trim().is_empty() {
        return None;
    }
    Some(site)
}
