//! Immutable run configuration handed to the engine at start.

use crate::collection::CollectionRef;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default remote-debugging endpoint.
pub const DEFAULT_CDP_URL: &str = "http://127.0.0.1:9222";

/// Shortest download timeout the engine accepts.
pub const MIN_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Every bounded wait in the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    #[serde(with = "duration_ms")]
    pub navigation_timeout: Duration,
    /// Wait for a download control to become clickable, per step.
    #[serde(with = "duration_ms")]
    pub click_timeout: Duration,
    /// Outer timeout for a triggered download to land and settle.
    #[serde(with = "duration_ms")]
    pub download_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub direct_request_timeout: Duration,
    /// Bounded wait for the collection list to materialize.
    #[serde(with = "duration_ms")]
    pub queue_settle_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// How long a file size must hold still before it counts as written.
    #[serde(with = "duration_ms")]
    pub stability_window: Duration,
    #[serde(with = "duration_ms")]
    pub delay_between_entries: Duration,
    pub launch_attempts: u32,
    #[serde(with = "duration_ms")]
    pub launch_initial_backoff: Duration,
    #[serde(with = "duration_ms")]
    pub launch_max_backoff: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(60),
            click_timeout: Duration::from_secs(12),
            download_timeout: Duration::from_secs(45),
            direct_request_timeout: Duration::from_secs(180),
            queue_settle_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            stability_window: Duration::from_secs(2),
            delay_between_entries: Duration::from_millis(1500),
            launch_attempts: 8,
            launch_initial_backoff: Duration::from_millis(250),
            launch_max_backoff: Duration::from_secs(4),
        }
    }
}

impl Timing {
    /// Clamp user-supplied values to the ranges the engine supports.
    pub fn clamped(mut self) -> Self {
        self.click_timeout = self.click_timeout.max(Duration::from_secs(1));
        self.download_timeout = self.download_timeout.max(MIN_DOWNLOAD_TIMEOUT);
        self.poll_interval = self.poll_interval.max(Duration::from_millis(10));
        self.launch_attempts = self.launch_attempts.max(1);
        self
    }
}

/// Everything one run needs. Built once by the caller, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub collection: CollectionRef,
    pub downloads_dir: PathBuf,
    pub install_dir: PathBuf,
    pub log_dir: PathBuf,
    pub cdp_url: String,
    pub dry_run: bool,
    /// Process at most this many entries; 0 means all.
    pub max_mods: usize,
    pub skip_install: bool,
    /// Try the direct session-authenticated request before the click flow.
    pub direct_strategy: bool,
    /// Retry a direct request once with certificate checks disabled after a
    /// TLS verification failure.
    pub insecure_tls_fallback: bool,
    pub timing: Timing,
}

impl RunConfig {
    pub fn new(collection: CollectionRef, downloads_dir: PathBuf, install_dir: PathBuf) -> Self {
        Self {
            collection,
            downloads_dir,
            install_dir,
            log_dir: PathBuf::from("logs"),
            cdp_url: DEFAULT_CDP_URL.to_string(),
            dry_run: false,
            max_mods: 0,
            skip_install: false,
            direct_strategy: true,
            insecure_tls_fallback: false,
            timing: Timing::default(),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
