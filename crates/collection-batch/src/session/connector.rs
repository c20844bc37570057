//! Session connector: attach to a remote-debugging endpoint, or launch a
//! browser with debugging enabled and wait for it to come up.

use super::chromium::ChromiumSession;
use super::{BrowserSession, SessionInfo, SessionSource};
use crate::config::{RunConfig, DEFAULT_CDP_URL};
use crate::error::SessionError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Response of the endpoint's `/json/version` query.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointVersion {
    #[serde(rename = "Browser", default)]
    pub browser: Option<String>,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub ws_url: String,
}

/// How to find or start the browser.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub cdp_url: String,
    /// Executable to launch; discovered with [`find_browser`] when unset.
    pub browser_executable: Option<PathBuf>,
    /// Launch a browser when the endpoint is down.
    pub launch: bool,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub probe_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            cdp_url: DEFAULT_CDP_URL.to_string(),
            browser_executable: None,
            launch: true,
            max_attempts: 8,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
            probe_timeout: Duration::from_secs(4),
        }
    }
}

impl ConnectOptions {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            cdp_url: config.cdp_url.clone(),
            max_attempts: config.timing.launch_attempts,
            initial_backoff: config.timing.launch_initial_backoff,
            max_backoff: config.timing.launch_max_backoff,
            ..Self::default()
        }
    }

    /// Port the launched browser should listen on.
    pub fn port(&self) -> u16 {
        url::Url::parse(&self.cdp_url)
            .ok()
            .and_then(|u| u.port())
            .unwrap_or(9222)
    }
}

/// Query the endpoint's version document. Succeeds only when the endpoint
/// answers 200 with a websocket URL.
pub async fn probe_endpoint(
    client: &reqwest::Client,
    cdp_url: &str,
    timeout: Duration,
) -> Result<EndpointVersion, SessionError> {
    let probe = format!("{}/json/version", cdp_url.trim_end_matches('/'));
    let resp = client
        .get(&probe)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            SessionError::Unavailable(format!("CDP endpoint is not reachable: {probe} ({e})"))
        })?;

    if !resp.status().is_success() {
        return Err(SessionError::Unavailable(format!(
            "CDP endpoint returned HTTP {}: {probe}",
            resp.status().as_u16()
        )));
    }

    resp.json::<EndpointVersion>()
        .await
        .map_err(|e| {
            SessionError::Unavailable(format!("unexpected version payload from {probe}: {e}"))
        })
}

/// Delays between probes after a launch: doubling from `initial`, capped at `max`.
pub fn backoff_schedule(initial: Duration, max: Duration, attempts: u32) -> Vec<Duration> {
    let mut delays = Vec::with_capacity(attempts as usize);
    let mut next = initial;
    for _ in 0..attempts {
        delays.push(next.min(max));
        next = next.saturating_mul(2);
    }
    delays
}

/// Candidate browser executables, most preferred first.
pub fn browser_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. COLLECTION_BATCH_BROWSER env
    if let Ok(p) = std::env::var("COLLECTION_BATCH_BROWSER") {
        paths.push(PathBuf::from(p));
    }

    // 2. Windows install locations (Brave first, it is what most users run logged in)
    if cfg!(target_os = "windows") {
        paths.extend([
            PathBuf::from(r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe"),
            PathBuf::from(r"C:\Program Files (x86)\BraveSoftware\Brave-Browser\Application\brave.exe"),
            PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        ]);
        if let Some(local) = dirs::data_local_dir() {
            paths.push(local.join(r"BraveSoftware\Brave-Browser\Application\brave.exe"));
            paths.push(local.join(r"Google\Chrome\Application\chrome.exe"));
        }
    }

    // 3. System PATH
    for name in ["brave-browser", "brave", "google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            paths.push(path);
        }
    }

    // 4. Common macOS locations
    if cfg!(target_os = "macos") {
        paths.push(PathBuf::from(
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ));
        paths.push(PathBuf::from(
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        ));
    }

    let mut seen = std::collections::HashSet::new();
    paths.retain(|p| seen.insert(p.to_string_lossy().to_lowercase()));
    paths
}

/// First candidate that exists on disk.
pub fn find_browser() -> Option<PathBuf> {
    browser_candidates().into_iter().find(|p| p.exists())
}

/// Spawn the browser with remote debugging enabled. The process is left
/// running after this call; nothing here owns it.
pub fn launch_browser(executable: &PathBuf, port: u16) -> Result<(), SessionError> {
    Command::new(executable)
        .arg(format!("--remote-debugging-port={port}"))
        .arg("--profile-directory=Default")
        .arg("--new-window")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            SessionError::Unavailable(format!("failed to launch {}: {e}", executable.display()))
        })?;
    Ok(())
}

/// Produces [`ChromiumSession`]s.
pub struct ChromiumConnector {
    options: ConnectOptions,
    client: reqwest::Client,
}

impl ChromiumConnector {
    pub fn new(options: ConnectOptions) -> Self {
        Self {
            options,
            client: reqwest::Client::new(),
        }
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Probe, launch if needed, and re-probe with backoff. Returns the live
    /// endpoint and whether this call launched the browser.
    pub async fn ensure_endpoint(&self) -> Result<(EndpointVersion, bool), SessionError> {
        let opts = &self.options;
        match probe_endpoint(&self.client, &opts.cdp_url, opts.probe_timeout).await {
            Ok(version) => {
                info!("attached to existing browser endpoint {}", opts.cdp_url);
                return Ok((version, false));
            }
            Err(e) => {
                if !opts.launch {
                    return Err(e);
                }
                warn!("{e}; attempting to launch a browser");
            }
        }

        let executable = opts
            .browser_executable
            .clone()
            .or_else(find_browser)
            .ok_or_else(|| {
                SessionError::Unavailable(format!(
                    "no Brave/Chrome executable found to launch. Start one with \
                     --remote-debugging-port={} and run again",
                    opts.port()
                ))
            })?;

        launch_browser(&executable, opts.port())?;
        info!("launched {} with remote debugging on port {}", executable.display(), opts.port());

        let probe_timeout = opts.probe_timeout.min(Duration::from_millis(1500));
        let schedule = backoff_schedule(opts.initial_backoff, opts.max_backoff, opts.max_attempts);
        for (attempt, delay) in schedule.into_iter().enumerate() {
            tokio::time::sleep(delay).await;
            match probe_endpoint(&self.client, &opts.cdp_url, probe_timeout).await {
                Ok(version) => return Ok((version, true)),
                Err(e) => debug!("probe {} of {} failed: {e}", attempt + 1, opts.max_attempts),
            }
        }

        Err(SessionError::Unavailable(format!(
            "browser launched from {} but {} never answered after {} attempts",
            executable.display(),
            opts.cdp_url,
            opts.max_attempts
        )))
    }

    /// Obtain a controllable session.
    pub async fn acquire_session(&self) -> Result<ChromiumSession, SessionError> {
        let (version, launched) = self.ensure_endpoint().await?;
        let info = SessionInfo {
            endpoint: self.options.cdp_url.clone(),
            browser: version.browser.clone(),
            launched,
        };
        ChromiumSession::attach(&version.ws_url, info).await
    }
}

#[async_trait]
impl SessionSource for ChromiumConnector {
    async fn acquire(&self) -> Result<Arc<dyn BrowserSession>, SessionError> {
        let session = self.acquire_session().await?;
        Ok(Arc::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_backoff_schedule_doubles_and_caps() {
        let delays = backoff_schedule(Duration::from_millis(250), Duration::from_secs(1), 5);
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(1),
                Duration::from_secs(1),
            ]
        );
        assert!(backoff_schedule(Duration::from_millis(1), Duration::from_secs(1), 0).is_empty());
    }

    #[test]
    fn test_port_from_cdp_url() {
        let mut opts = ConnectOptions::default();
        assert_eq!(opts.port(), 9222);
        opts.cdp_url = "http://localhost:9333".to_string();
        assert_eq!(opts.port(), 9333);
        opts.cdp_url = "not a url".to_string();
        assert_eq!(opts.port(), 9222);
    }

    #[tokio::test]
    async fn test_probe_endpoint_live() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Browser": "Chrome/124.0.6367.60",
                "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/abc"
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let version = probe_endpoint(&client, &format!("{}/", server.uri()), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(version.ws_url, "ws://127.0.0.1:9222/devtools/browser/abc");
        assert_eq!(version.browser.as_deref(), Some("Chrome/124.0.6367.60"));
    }

    #[tokio::test]
    async fn test_probe_endpoint_non_200_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/version"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = probe_endpoint(&client, &server.uri(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Unavailable(ref m) if m.contains("503")));
    }

    #[tokio::test]
    async fn test_unreachable_without_launch_fails_fast() {
        let connector = ChromiumConnector::new(ConnectOptions {
            cdp_url: "http://127.0.0.1:9".to_string(),
            launch: false,
            probe_timeout: Duration::from_millis(300),
            ..ConnectOptions::default()
        });
        let err = connector.ensure_endpoint().await.unwrap_err();
        assert!(matches!(err, SessionError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_launch_of_missing_executable_is_unavailable() {
        let connector = ChromiumConnector::new(ConnectOptions {
            cdp_url: "http://127.0.0.1:9".to_string(),
            browser_executable: Some(PathBuf::from("/nonexistent/browser-binary")),
            probe_timeout: Duration::from_millis(300),
            ..ConnectOptions::default()
        });
        let err = connector.ensure_endpoint().await.unwrap_err();
        assert!(matches!(err, SessionError::Unavailable(ref m) if m.contains("failed to launch")));
    }
}
