//! Environment readiness check.

use collection_batch::install::find_seven_zip;
use collection_batch::session::connector::{find_browser, probe_endpoint};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    /// Works, but something is degraded.
    Warn,
    Fail,
}

#[derive(Debug, Clone)]
pub struct Check {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

impl Check {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

/// Probe everything a run depends on.
pub async fn diagnose(cdp_url: &str, downloads_dir: &Path) -> Vec<Check> {
    let mut checks = Vec::new();

    let endpoint = probe_endpoint(&reqwest::Client::new(), cdp_url, Duration::from_secs(3)).await;
    let endpoint_up = endpoint.is_ok();
    checks.push(match endpoint {
        Ok(version) => Check::new(
            "endpoint",
            CheckStatus::Ok,
            format!(
                "{cdp_url} answers ({})",
                version.browser.as_deref().unwrap_or("unknown browser")
            ),
        ),
        Err(e) => Check::new("endpoint", CheckStatus::Warn, e.to_string()),
    });

    checks.push(match find_browser() {
        Some(path) => Check::new("browser", CheckStatus::Ok, format!("found {}", path.display())),
        // Only fatal when there is nothing to attach to either.
        None if endpoint_up => Check::new(
            "browser",
            CheckStatus::Warn,
            "no executable found to launch",
        ),
        None => Check::new(
            "browser",
            CheckStatus::Fail,
            "no endpoint and no Brave/Chrome/Chromium executable found; set COLLECTION_BATCH_BROWSER",
        ),
    });

    checks.push(if downloads_dir.is_dir() {
        Check::new("downloads", CheckStatus::Ok, format!("{} exists", downloads_dir.display()))
    } else {
        Check::new(
            "downloads",
            CheckStatus::Fail,
            format!("{} does not exist", downloads_dir.display()),
        )
    });

    checks.push(match find_seven_zip() {
        Some(path) => Check::new("7-zip", CheckStatus::Ok, format!("found {}", path.display())),
        None => Check::new(
            "7-zip",
            CheckStatus::Warn,
            "not found; only .zip archives can be installed",
        ),
    });

    checks
}

pub fn is_ready(checks: &[Check]) -> bool {
    checks.iter().all(|c| c.status != CheckStatus::Fail)
}

pub fn render(checks: &[Check]) -> String {
    let mut out = String::from("collection-batch doctor\n=======================\n\n");
    for check in checks {
        let tag = match check.status {
            CheckStatus::Ok => "[OK]",
            CheckStatus::Warn => "[??]",
            CheckStatus::Fail => "[!!]",
        };
        out.push_str(&format!("{tag} {:<10} {}\n", check.name, check.detail));
    }
    out.push('\n');
    out.push_str(if is_ready(checks) {
        "Status: READY\n"
    } else {
        "Status: NOT READY\n"
    });
    out
}

/// Print the report. Returns whether the environment is ready.
pub async fn run(cdp_url: &str, downloads_dir: &Path) -> bool {
    let checks = diagnose(cdp_url, downloads_dir).await;
    print!("{}", render(&checks));
    is_ready(&checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_reachable_endpoint_and_existing_folder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Browser": "Brave/1.70",
                "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/abc"
            })))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();

        let checks = diagnose(&server.uri(), dir.path()).await;
        let endpoint = checks.iter().find(|c| c.name == "endpoint").unwrap();
        assert_eq!(endpoint.status, CheckStatus::Ok);
        assert!(endpoint.detail.contains("Brave/1.70"));
        // Browser lookup can fail on CI, but never fatally while an endpoint is up.
        assert!(is_ready(&checks));
    }

    #[tokio::test]
    async fn test_missing_downloads_folder_is_not_ready() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let checks = diagnose(&server.uri(), &dir.path().join("missing")).await;
        assert!(!is_ready(&checks));
        assert!(render(&checks).contains("Status: NOT READY"));
    }
}
