//! UI click-flow: open the entry's files tab and press the download controls
//! like a user would, letting the browser save the archive.

use super::script::{build_click_script, build_text_present_script};
use super::{AcquisitionContext, AcquisitionStrategy, Attempt};
use crate::config::Timing;
use crate::error::{AcquisitionError, SessionError};
use crate::reconcile::Baseline;
use crate::session::BrowserSession;
use crate::types::QueueEntry;
use async_trait::async_trait;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info};

pub const COOKIE_LABELS: &[&str] = &["accept all", "accept", "i agree"];
pub const SLOW_LABELS: &[&str] = &["slow download", "free download"];
pub const MANUAL_LABELS: &[&str] = &["manual download", "manual"];
pub const MANUAL_RETRY_LABELS: &[&str] = &["click here to download manually", "download manually"];
pub const DOWNLOAD_STARTED_TEXT: &str = "your download has started";

const COOKIE_BANNER_WAIT: Duration = Duration::from_secs(2);
const NAVIGATION_TRIES: usize = 2;
const NAVIGATION_RETRY_PAUSE: Duration = Duration::from_millis(1200);
/// Polls spent looking for the "download has started" interstitial.
const STARTED_PAGE_POLLS: u32 = 4;

#[derive(Debug, Default)]
pub struct ClickFlowStrategy;

impl ClickFlowStrategy {
    pub fn new() -> Self {
        Self
    }

    async fn open_files_tab(
        &self,
        session: &dyn BrowserSession,
        entry: &QueueEntry,
        timing: &Timing,
    ) -> Result<(), SessionError> {
        let url = entry.files_url();
        let mut last_err = None;
        for attempt in 0..NAVIGATION_TRIES {
            match session.navigate(&url, timing.navigation_timeout).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!("{}: navigation attempt {} failed: {e}", entry.identifier, attempt + 1);
                    last_err = Some(e);
                    if attempt + 1 < NAVIGATION_TRIES {
                        tokio::time::sleep(NAVIGATION_RETRY_PAUSE).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| SessionError::Page(format!("could not open {url}"))))
    }
}

/// Keep clicking the first matching control until one is found or `timeout`
/// passes. Returns the label that matched.
pub async fn click_first(
    session: &dyn BrowserSession,
    labels: &[&str],
    timeout: Duration,
    poll: Duration,
) -> Result<Option<String>, SessionError> {
    let script = build_click_script(labels);
    let deadline = Instant::now() + timeout;
    loop {
        let value = session.evaluate(&script).await?;
        if value.get("clicked").and_then(|v| v.as_bool()).unwrap_or(false) {
            let label = value
                .get("label")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            return Ok(Some(label));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(poll).await;
    }
}

async fn text_present(session: &dyn BrowserSession, needle: &str) -> bool {
    session
        .evaluate(&build_text_present_script(needle))
        .await
        .ok()
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

#[async_trait]
impl AcquisitionStrategy for ClickFlowStrategy {
    fn name(&self) -> &'static str {
        "click_flow"
    }

    fn budget(&self, timing: &Timing) -> Duration {
        timing.navigation_timeout * NAVIGATION_TRIES as u32
            + NAVIGATION_RETRY_PAUSE
            + COOKIE_BANNER_WAIT
            + timing.click_timeout * 3
            + timing.poll_interval * STARTED_PAGE_POLLS
            + timing.download_timeout
            + timing.stability_window
            + Duration::from_secs(5)
    }

    async fn attempt(
        &self,
        session: &dyn BrowserSession,
        entry: &QueueEntry,
        ctx: &AcquisitionContext,
    ) -> Result<Attempt, AcquisitionError> {
        let timing = &ctx.timing;
        self.open_files_tab(session, entry, timing).await?;

        let cookie_banner =
            click_first(session, COOKIE_LABELS, COOKIE_BANNER_WAIT, timing.poll_interval).await?;
        if let Some(label) = cookie_banner {
            debug!("{}: dismissed cookie banner ({label})", entry.identifier);
        }

        let baseline = Baseline::snapshot(&ctx.downloads_dir)?;
        let started_at = SystemTime::now();

        let slow =
            click_first(session, SLOW_LABELS, timing.click_timeout, timing.poll_interval).await?;
        let clicked = match slow {
            Some(label) => label,
            None => {
                debug!("{}: no slow download control; trying manual then slow", entry.identifier);
                click_first(session, MANUAL_LABELS, timing.click_timeout, timing.poll_interval)
                    .await?
                    .ok_or_else(|| {
                        AcquisitionError::ElementNotFound("manual download control".to_string())
                    })?;
                click_first(session, SLOW_LABELS, timing.click_timeout, timing.poll_interval)
                    .await?
                    .ok_or_else(|| {
                        AcquisitionError::ElementNotFound("slow download confirmation".to_string())
                    })?
            }
        };
        info!("{}: clicked \"{clicked}\"", entry.identifier);

        for _ in 0..STARTED_PAGE_POLLS {
            if text_present(session, DOWNLOAD_STARTED_TEXT).await {
                debug!("{}: download-started page shown; using the manual link", entry.identifier);
                click_first(
                    session,
                    MANUAL_RETRY_LABELS,
                    timing.click_timeout,
                    timing.poll_interval,
                )
                .await?;
                break;
            }
            tokio::time::sleep(timing.poll_interval).await;
        }

        Ok(Attempt::Triggered {
            started_at,
            baseline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::ModLink;
    use crate::session::{SessionCookie, SessionInfo};
    use std::path::Path;
    use std::sync::Mutex;

    /// Page with a fixed set of clickable labels. Records clicks and
    /// navigations.
    struct FakePage {
        controls: Vec<&'static str>,
        started_page: bool,
        fail_navigations: Mutex<usize>,
        clicks: Mutex<Vec<String>>,
        navigations: Mutex<Vec<String>>,
    }

    impl FakePage {
        fn new(controls: Vec<&'static str>) -> Self {
            Self {
                controls,
                started_page: false,
                fail_navigations: Mutex::new(0),
                clicks: Mutex::new(Vec::new()),
                navigations: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BrowserSession for FakePage {
        fn info(&self) -> SessionInfo {
            SessionInfo {
                endpoint: "fake".to_string(),
                browser: None,
                launched: false,
            }
        }

        async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), SessionError> {
            self.navigations.lock().unwrap().push(url.to_string());
            let mut failures = self.fail_navigations.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SessionError::NavigationTimeout {
                    url: url.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Ok(())
        }

        async fn evaluate(&self, script: &str) -> Result<serde_json::Value, SessionError> {
            if script.contains("document.body.innerText") {
                return Ok(serde_json::Value::Bool(self.started_page));
            }
            // Click scripts list their labels in priority order.
            let mut wanted: Vec<(usize, &str)> = self
                .controls
                .iter()
                .filter_map(|c| script.find(&format!("'{c}'")).map(|pos| (pos, *c)))
                .collect();
            wanted.sort();
            match wanted.first() {
                Some((_, label)) => {
                    self.clicks.lock().unwrap().push(label.to_string());
                    Ok(serde_json::json!({"clicked": true, "label": label, "text": label}))
                }
                None => Ok(serde_json::json!({"clicked": false, "label": null, "text": null})),
            }
        }

        async fn content(&self) -> Result<String, SessionError> {
            Ok(String::new())
        }
        async fn current_url(&self) -> Result<String, SessionError> {
            Ok(String::new())
        }
        async fn screenshot(&self) -> Result<Vec<u8>, SessionError> {
            Ok(Vec::new())
        }
        async fn cookies(&self, _url: &str) -> Result<Vec<SessionCookie>, SessionError> {
            Ok(Vec::new())
        }
        async fn set_download_dir(&self, _dir: &Path) -> Result<(), SessionError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn entry() -> QueueEntry {
        let link = ModLink {
            domain: "skyrimspecialedition".to_string(),
            mod_id: 12604,
            file_id: Some(35407),
        };
        QueueEntry::from_link(&link, "SkyUI", 1)
    }

    fn ctx(dir: &Path) -> AcquisitionContext {
        AcquisitionContext {
            downloads_dir: dir.to_path_buf(),
            origin: "https://www.nexusmods.com".to_string(),
            game_id: None,
            cookie_header: None,
            timing: Timing {
                click_timeout: Duration::from_millis(50),
                poll_interval: Duration::from_millis(10),
                ..Timing::default()
            },
        }
    }

    #[tokio::test]
    async fn test_slow_download_clicked_directly() {
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage::new(vec!["accept all", "slow download"]);
        let attempt = ClickFlowStrategy::new()
            .attempt(&page, &entry(), &ctx(dir.path()))
            .await
            .unwrap();

        assert!(matches!(attempt, Attempt::Triggered { .. }));
        assert_eq!(*page.clicks.lock().unwrap(), vec!["accept all", "slow download"]);
        assert_eq!(
            *page.navigations.lock().unwrap(),
            vec!["https://www.nexusmods.com/skyrimspecialedition/mods/12604?tab=files&file_id=35407"]
        );
    }

    #[tokio::test]
    async fn test_manual_then_slow_path() {
        let dir = tempfile::tempdir().unwrap();
        // The fake's controls never change, so the confirmation step after
        // "manual download" finds nothing.
        let page = FakePage::new(vec!["manual download"]);
        let err = ClickFlowStrategy::new()
            .attempt(&page, &entry(), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(
            matches!(err, AcquisitionError::ElementNotFound(ref m) if m.contains("confirmation"))
        );
        assert_eq!(*page.clicks.lock().unwrap(), vec!["manual download"]);
    }

    #[tokio::test]
    async fn test_missing_controls_is_element_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage::new(vec![]);
        let err = ClickFlowStrategy::new()
            .attempt(&page, &entry(), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::ElementNotFound(ref m) if m.contains("manual")));
    }

    #[tokio::test]
    async fn test_navigation_retried_once() {
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage::new(vec!["slow download"]);
        *page.fail_navigations.lock().unwrap() = 1;
        ClickFlowStrategy::new()
            .attempt(&page, &entry(), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(page.navigations.lock().unwrap().len(), 2);

        let page = FakePage::new(vec!["slow download"]);
        *page.fail_navigations.lock().unwrap() = 2;
        let err = ClickFlowStrategy::new()
            .attempt(&page, &entry(), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_download_started_page_uses_manual_link() {
        let dir = tempfile::tempdir().unwrap();
        let mut page = FakePage::new(vec!["slow download", "click here to download manually"]);
        page.started_page = true;
        ClickFlowStrategy::new()
            .attempt(&page, &entry(), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(
            *page.clicks.lock().unwrap(),
            vec!["slow download", "click here to download manually"]
        );
    }
}
