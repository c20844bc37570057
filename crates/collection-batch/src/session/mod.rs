//! Browser session abstraction.
//!
//! Defines the `BrowserSession` and `SessionSource` traits that abstract over
//! the remote browser (currently Chromium-family browsers via chromiumoxide).
//! Only a `SessionSource` produces sessions; every component that needs the
//! browser receives the handle explicitly.

pub mod chromium;
pub mod connector;
pub mod profile;

use crate::error::SessionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// A cookie visible to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

/// Describes how the session was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Remote-debugging endpoint the session is attached to.
    pub endpoint: String,
    /// Browser product string reported by the endpoint.
    pub browser: Option<String>,
    /// Whether this run launched the browser process.
    pub launched: bool,
}

/// A network response recorded while a capture was active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub url: String,
    pub status: i64,
    /// Value of the `x-graphql-operationname` request header, if sent.
    pub operation: Option<String>,
    pub post_data: Option<String>,
    /// Parsed JSON body; `None` when unavailable or not JSON.
    pub body: Option<serde_json::Value>,
}

/// A controllable page in a real browser.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    fn info(&self) -> SessionInfo;
    /// Navigate to a URL with a timeout.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), SessionError>;
    /// Evaluate a JavaScript expression and return its JSON value.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, SessionError>;
    /// Full rendered markup.
    async fn content(&self) -> Result<String, SessionError>;
    async fn current_url(&self) -> Result<String, SessionError>;
    /// Full-page PNG screenshot.
    async fn screenshot(&self) -> Result<Vec<u8>, SessionError>;
    /// Cookies the browser would send to `url`.
    async fn cookies(&self, url: &str) -> Result<Vec<SessionCookie>, SessionError>;
    /// Ask the browser to save downloads into `dir` without prompting.
    async fn set_download_dir(&self, dir: &Path) -> Result<(), SessionError>;
    /// Start recording responses to requests whose URL contains
    /// `url_marker`. Sessions without network access record nothing.
    async fn start_capture(&self, _url_marker: &str) -> Result<(), SessionError> {
        Ok(())
    }
    /// Stop recording and hand over what was captured.
    async fn finish_capture(&self) -> Vec<CapturedResponse> {
        Vec::new()
    }
    /// Close the page. Never closes an attached browser.
    async fn close(&self) -> Result<(), SessionError>;
}

/// Produces the run's browser session.
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn acquire(&self) -> Result<Arc<dyn BrowserSession>, SessionError>;
}

/// Join cookies into a `Cookie` request header value.
pub fn cookie_header(cookies: &[SessionCookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_header() {
        let cookies = vec![
            SessionCookie {
                name: "nexusmods_session".to_string(),
                value: "abc".to_string(),
                domain: ".nexusmods.com".to_string(),
            },
            SessionCookie {
                name: "theme".to_string(),
                value: "dark".to_string(),
                domain: ".nexusmods.com".to_string(),
            },
        ];
        assert_eq!(cookie_header(&cookies), "nexusmods_session=abc; theme=dark");
        assert_eq!(cookie_header(&[]), "");
    }
}
