//! Chromium-family session using chromiumoxide.

use super::{BrowserSession, CapturedResponse, SessionCookie, SessionInfo};
use crate::error::SessionError;
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    GetCookiesParams, GetResponseBodyParams, RequestId,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const OPERATION_HEADER: &str = "x-graphql-operationname";

/// Responses collected by a running capture, keyed by request until the
/// body has loaded.
#[derive(Default)]
struct CaptureState {
    pending: HashMap<RequestId, CapturedResponse>,
    done: Vec<CapturedResponse>,
}

/// A page opened in an attached (or freshly launched) browser.
pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    info: SessionInfo,
    capture: Arc<Mutex<CaptureState>>,
    capture_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChromiumSession {
    /// Attach to a browser through its DevTools websocket and open a new tab
    /// in the default (logged-in) context.
    pub async fn attach(ws_url: &str, info: SessionInfo) -> Result<Self, SessionError> {
        let (browser, mut handler) = Browser::connect(ws_url)
            .await
            .map_err(|e| SessionError::Unavailable(format!("failed to attach to {ws_url}: {e}")))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| SessionError::Page(format!("failed to open tab: {e}")))?;

        Ok(Self {
            browser,
            page,
            info,
            capture: Arc::new(Mutex::new(CaptureState::default())),
            capture_task: Mutex::new(None),
        })
    }
}

fn header_value(headers: &serde_json::Value, name: &str) -> Option<String> {
    headers
        .as_object()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, value)| value.as_str().map(String::from))
}

/// Follow request, response and loading events for matching URLs and pull
/// each body once it has finished loading.
async fn capture_loop(page: Page, url_marker: String, state: Arc<Mutex<CaptureState>>) {
    let listeners = async {
        Ok::<_, chromiumoxide::error::CdpError>((
            page.event_listener::<EventRequestWillBeSent>().await?,
            page.event_listener::<EventResponseReceived>().await?,
            page.event_listener::<EventLoadingFinished>().await?,
        ))
    };
    let (mut requests, mut responses, mut finished) = match listeners.await {
        Ok(streams) => streams,
        Err(e) => {
            warn!("network capture unavailable: {e}");
            return;
        }
    };

    loop {
        tokio::select! {
            Some(event) = requests.next() => {
                if !event.request.url.contains(&url_marker) {
                    continue;
                }
                let headers = serde_json::to_value(&event.request.headers).unwrap_or_default();
                #[allow(deprecated)]
                let post_data = event.request.post_data.clone();
                state.lock().await.pending.insert(
                    event.request_id.clone(),
                    CapturedResponse {
                        url: event.request.url.clone(),
                        status: 0,
                        operation: header_value(&headers, OPERATION_HEADER),
                        post_data,
                        body: None,
                    },
                );
            }
            Some(event) = responses.next() => {
                if let Some(entry) = state.lock().await.pending.get_mut(&event.request_id) {
                    entry.status = event.response.status;
                }
            }
            Some(event) = finished.next() => {
                let Some(mut entry) = state.lock().await.pending.remove(&event.request_id) else {
                    continue;
                };
                if entry.status == 200 {
                    match page.execute(GetResponseBodyParams::new(event.request_id.clone())).await {
                        Ok(body) if !body.result.base64_encoded => {
                            entry.body = serde_json::from_str(&body.result.body).ok();
                        }
                        Ok(_) => {}
                        Err(e) => debug!("could not read body of {}: {e}", entry.url),
                    }
                }
                state.lock().await.done.push(entry);
            }
            else => break,
        }
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    fn info(&self) -> SessionInfo {
        self.info.clone()
    }

    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        let result = tokio::time::timeout(timeout, self.page.goto(url)).await;

        match result {
            Ok(Ok(_)) => {
                let _ = self.page.wait_for_navigation().await;
                Ok(())
            }
            Ok(Err(e)) => Err(SessionError::Page(format!("navigation to {url} failed: {e}"))),
            Err(_) => Err(SessionError::NavigationTimeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, SessionError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| SessionError::Page(format!("JS execution failed: {e}")))?;

        result
            .into_value()
            .map_err(|e| SessionError::Page(format!("failed to convert JS result: {e:?}")))
    }

    async fn content(&self) -> Result<String, SessionError> {
        self.page
            .content()
            .await
            .map_err(|e| SessionError::Page(format!("failed to get HTML: {e}")))
    }

    async fn current_url(&self) -> Result<String, SessionError> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| SessionError::Page(format!("failed to get URL: {e}")))?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, SessionError> {
        self.page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(|e| SessionError::Page(format!("screenshot failed: {e}")))
    }

    async fn cookies(&self, url: &str) -> Result<Vec<SessionCookie>, SessionError> {
        let response = self
            .page
            .execute(GetCookiesParams::builder().urls(vec![url.to_string()]).build())
            .await
            .map_err(|e| SessionError::Page(format!("failed to read cookies: {e}")))?;

        Ok(response
            .result
            .cookies
            .iter()
            .map(|c| SessionCookie {
                name: c.name.clone(),
                value: c.value.clone(),
                domain: c.domain.clone(),
            })
            .collect())
    }

    async fn set_download_dir(&self, dir: &Path) -> Result<(), SessionError> {
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(dir.display().to_string())
            .build()
            .map_err(|e| SessionError::Page(format!("invalid download behavior: {e}")))?;

        self.browser
            .execute(params)
            .await
            .map_err(|e| SessionError::Page(format!("failed to set download folder: {e}")))?;
        debug!("browser downloads steered to {}", dir.display());
        Ok(())
    }

    async fn start_capture(&self, url_marker: &str) -> Result<(), SessionError> {
        self.page
            .execute(EnableParams::default())
            .await
            .map_err(|e| SessionError::Page(format!("failed to enable network events: {e}")))?;

        *self.capture.lock().await = CaptureState::default();
        let task = tokio::spawn(capture_loop(
            self.page.clone(),
            url_marker.to_string(),
            Arc::clone(&self.capture),
        ));
        if let Some(previous) = self.capture_task.lock().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn finish_capture(&self) -> Vec<CapturedResponse> {
        if let Some(task) = self.capture_task.lock().await.take() {
            task.abort();
        }
        let mut state = self.capture.lock().await;
        let mut captured = std::mem::take(&mut state.done);
        // Requests still in flight are reported without a body.
        captured.extend(state.pending.drain().map(|(_, entry)| entry));
        captured
    }

    async fn close(&self) -> Result<(), SessionError> {
        if let Some(task) = self.capture_task.lock().await.take() {
            task.abort();
        }
        let _ = self.page.clone().close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::connector::{ConnectOptions, ChromiumConnector};
    use crate::session::SessionSource;

    #[tokio::test]
    #[ignore] // Requires a browser listening on 127.0.0.1:9222
    async fn test_attach_navigate_and_evaluate() {
        let connector = ChromiumConnector::new(ConnectOptions::default());
        let session = connector.acquire().await.expect("no session");

        session
            .navigate(
                "data:text/html,<h1>Hello</h1><a href='https://www.nexusmods.com/skyrim/mods/1'>One</a>",
                Duration::from_secs(10),
            )
            .await
            .expect("navigation failed");

        let heading = session
            .evaluate("document.querySelector('h1').textContent")
            .await
            .expect("JS execution failed");
        assert_eq!(heading.as_str().unwrap(), "Hello");

        let html = session.content().await.expect("content failed");
        assert!(html.contains("<h1>Hello</h1>"));

        session.close().await.expect("close failed");
    }
}
