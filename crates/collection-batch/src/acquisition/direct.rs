//! Direct session-authenticated download.
//!
//! Asks the site's download manager endpoint for a signed file URL with the
//! browser's cookies, then streams the file into the downloads folder. TLS
//! and permission failures are expected here; the chain moves on to the
//! click flow when they happen.

use super::http_client::HttpClient;
use super::{AcquisitionContext, AcquisitionStrategy, Attempt};
use crate::config::Timing;
use crate::error::AcquisitionError;
use crate::session::BrowserSession;
use crate::types::QueueEntry;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Path of the endpoint that mints download URLs.
pub const GENERATE_DOWNLOAD_URL_PATH: &str = "/Core/Libs/Common/Managers/Downloads?GenerateDownloadUrl";

const URL_KEYS: [&str; 3] = ["url", "URI", "uri"];

pub struct DirectRequestStrategy {
    client: HttpClient,
}

impl DirectRequestStrategy {
    pub fn new(timing: &Timing, allow_insecure: bool) -> Self {
        Self {
            client: HttpClient::new(timing.direct_request_timeout, allow_insecure),
        }
    }

    /// Ask the site for the entry's signed download URL.
    pub async fn resolve_download_url(
        &self,
        entry: &QueueEntry,
        ctx: &AcquisitionContext,
    ) -> Result<String, AcquisitionError> {
        let cookie = ctx
            .cookie_header
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AcquisitionError::NotApplicable("no session cookies".to_string()))?;
        let game_id = ctx
            .game_id
            .ok_or_else(|| AcquisitionError::NotApplicable("game id unknown".to_string()))?;
        let file_id = entry
            .file_id
            .ok_or_else(|| {
                AcquisitionError::NotApplicable("entry has no pinned file id".to_string())
            })?;

        let origin = ctx.origin.trim_end_matches('/');
        let endpoint = format!("{origin}{GENERATE_DOWNLOAD_URL_PATH}");
        let resp = self
            .client
            .post_form(
                &endpoint,
                &[("fid", file_id.to_string()), ("game_id", game_id.to_string())],
                &[
                    ("cookie", cookie.to_string()),
                    ("x-requested-with", "XMLHttpRequest".to_string()),
                    ("origin", origin.to_string()),
                    ("referer", entry.detail_url.clone()),
                    ("accept", "application/json, text/javascript, */*; q=0.01".to_string()),
                ],
            )
            .await?;

        match resp.status {
            200..=299 => {}
            401 | 403 => {
                return Err(AcquisitionError::Permission(format!(
                    "download URL request: HTTP {}",
                    resp.status
                )))
            }
            status => {
                return Err(AcquisitionError::UnexpectedResponse(format!(
                    "download URL request: HTTP {status}"
                )))
            }
        }

        let raw = extract_download_url(&resp.body).ok_or_else(|| {
            let preview: String = resp.body.chars().take(200).collect();
            AcquisitionError::UnexpectedResponse(format!("no download URL in payload: {preview}"))
        })?;
        absolutize(origin, &raw)
    }
}

#[async_trait]
impl AcquisitionStrategy for DirectRequestStrategy {
    fn name(&self) -> &'static str {
        "direct_request"
    }

    fn budget(&self, timing: &Timing) -> Duration {
        timing.direct_request_timeout + timing.stability_window * 3 + Duration::from_secs(5)
    }

    async fn attempt(
        &self,
        _session: &dyn BrowserSession,
        entry: &QueueEntry,
        ctx: &AcquisitionContext,
    ) -> Result<Attempt, AcquisitionError> {
        let url = self.resolve_download_url(entry, ctx).await?;
        debug!("{}: direct URL resolved", entry.identifier);

        let fallback = format!(
            "{}-{}-{}.zip",
            entry.domain,
            entry.mod_id,
            entry.file_id.unwrap_or_default()
        );
        let saved = self
            .client
            .download_to(
                &url,
                &[("referer", entry.detail_url.clone())],
                &ctx.downloads_dir,
                &fallback,
            )
            .await?;

        if saved.bytes == 0 {
            let _ = tokio::fs::remove_file(&saved.path).await;
            return Err(AcquisitionError::Corrupt("empty response body".to_string()));
        }
        if saved
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("text/html"))
        {
            let _ = tokio::fs::remove_file(&saved.path).await;
            return Err(AcquisitionError::UnexpectedResponse(
                "file URL returned an HTML page (login wall?)".to_string(),
            ));
        }
        Ok(Attempt::Saved(saved.path))
    }
}

/// Find the first `url`/`URI`/`uri` string in an object payload, or in any
/// object of an array payload.
pub fn extract_download_url(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let from_object = |obj: &serde_json::Value| {
        URL_KEYS.iter().find_map(|key| {
            obj.get(*key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        })
    };
    match &value {
        serde_json::Value::Object(_) => from_object(&value),
        serde_json::Value::Array(items) => {
            items.iter().filter(|i| i.is_object()).find_map(from_object)
        }
        _ => None,
    }
}

/// Resolve a possibly relative URL against the site origin. Spaces and other
/// unsafe characters are percent-encoded by the parser.
pub fn absolutize(origin: &str, raw: &str) -> Result<String, AcquisitionError> {
    let base = url::Url::parse(&format!("{}/", origin.trim_end_matches('/')))
        .map_err(|e| AcquisitionError::UnexpectedResponse(format!("bad origin {origin}: {e}")))?;
    base.join(raw.trim())
        .map(|u| u.to_string())
        .map_err(|e| AcquisitionError::UnexpectedResponse(format!("bad download URL {raw}: {e}")))
}
