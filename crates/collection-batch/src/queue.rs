//! Queue extractor: turn a collection's mods page into an ordered,
//! de-duplicated list of [`QueueEntry`]s.
//!
//! The page fetches its mod list through a `CollectionRevisionMods` GraphQL
//! query. That response is recorded while the page loads and is the primary
//! source, since it pins a file id for every mod. The rendered anchor list is
//! polled until it is non-empty and stops changing (or the settle timeout
//! passes); it supplies display names and is the fallback when no payload
//! parses. A page that yields nothing is a diagnosable failure: markup, a
//! screenshot, and page metadata are written next to the run logs before
//! returning.

use crate::acquisition::script::{
    COLLECTION_LINKS_SCRIPT, SCROLL_TO_BOTTOM_SCRIPT, SCROLL_TO_TOP_SCRIPT, TITLE_SCRIPT,
};
use crate::collection::{normalize_mod_link, CollectionRef};
use crate::config::Timing;
use crate::error::{ExtractionError, SessionError};
use crate::session::{BrowserSession, CapturedResponse};
use crate::types::QueueEntry;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{debug, info, warn};

fn game_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/images/games/v2/(\d+)/").expect("game id pattern is valid"))
}

/// An anchor as read from the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLink {
    pub href: String,
    #[serde(default)]
    pub text: String,
}

/// GraphQL operation that returns a collection revision's files.
pub const COLLECTION_OPERATION: &str = "CollectionRevisionMods";

/// Which source produced the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// The collection's GraphQL payload.
    NetworkGraphql,
    /// Rendered mod anchors.
    #[default]
    DomAnchors,
}

impl ExtractionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetworkGraphql => "network_graphql",
            Self::DomAnchors => "dom_anchors",
        }
    }
}

/// Where zero-queue diagnostics go.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsTarget<'a> {
    pub dir: &'a Path,
    /// File name prefix, e.g. `collection-batch-20260101-120000`.
    pub stem: &'a str,
}

/// How the extraction went, for the run report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionDetails {
    pub page_url: String,
    #[serde(default)]
    pub strategy: ExtractionStrategy,
    /// Captured responses that looked like the collection query.
    #[serde(default)]
    pub payload_candidates_seen: usize,
    /// Of those, how many carried a JSON body.
    #[serde(default)]
    pub payloads_parsed: usize,
    pub polls: u32,
    /// The anchor list stopped changing before the settle timeout.
    pub settled: bool,
    pub anchors_seen: usize,
    pub links_normalized: usize,
    pub duplicates_dropped: usize,
    /// Mod links for a different game than the collection's.
    pub foreign_dropped: usize,
    pub game_id: Option<u64>,
    /// Zero-queue artifacts (kind -> path) and capture errors (kind_error -> message).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct QueueExtraction {
    pub entries: Vec<QueueEntry>,
    pub details: ExtractionDetails,
}

/// Counts from [`entries_from_links`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub normalized: usize,
    pub duplicates: usize,
    pub foreign: usize,
}

/// Build queue entries from anchors in page order. Repeated identifiers keep
/// their first position; a repeat may still supply a missing file id or
/// display name.
pub fn entries_from_links(links: &[RawLink], domain: &str) -> (Vec<QueueEntry>, LinkStats) {
    let mut entries: Vec<QueueEntry> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut stats = LinkStats::default();

    for raw in links {
        let Some(link) = normalize_mod_link(&raw.href) else {
            continue;
        };
        stats.normalized += 1;
        if link.domain != domain {
            stats.foreign += 1;
            continue;
        }

        let identifier = link.identifier();
        match index.get(&identifier) {
            Some(&i) => {
                stats.duplicates += 1;
                let existing = &entries[i];
                let needs_file = existing.file_id.is_none() && link.file_id.is_some();
                let needs_name =
                    existing.display_name == existing.identifier && !raw.text.trim().is_empty();
                if needs_file || needs_name {
                    let mut merged = existing.link();
                    if needs_file {
                        merged.file_id = link.file_id;
                    }
                    let name = if needs_name {
                        raw.text.clone()
                    } else {
                        existing.display_name.clone()
                    };
                    let position = existing.position;
                    entries[i] = QueueEntry::from_link(&merged, &name, position);
                }
            }
            None => {
                let position = entries.len() + 1;
                index.insert(identifier, entries.len());
                entries.push(QueueEntry::from_link(&link, &raw.text, position));
            }
        }
    }
    (entries, stats)
}

/// Whether a captured request was the collection query: named by the
/// operation header, or by its body.
pub fn is_collection_query(response: &CapturedResponse) -> bool {
    let post = response.post_data.as_deref().unwrap_or_default();
    response
        .operation
        .as_deref()
        .is_some_and(|op| op.contains(COLLECTION_OPERATION))
        || post.contains(COLLECTION_OPERATION)
        || (response.url.to_ascii_lowercase().contains("graphql")
            && post.to_ascii_lowercase().contains("collectionrevision"))
}

fn id_value(value: Option<&serde_json::Value>) -> Option<u64> {
    match value? {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Mod links from a `collectionRevision.modFiles` payload, in payload order.
/// Each file may carry its ids flat (`modId`, `fileId`) or nested under
/// `file` and `file.mod`.
pub fn links_from_collection_payload(payload: &serde_json::Value, domain: &str) -> Vec<RawLink> {
    let Some(mod_files) = payload
        .pointer("/data/collectionRevision/modFiles")
        .and_then(|v| v.as_array())
    else {
        return Vec::new();
    };

    let mut links = Vec::new();
    for item in mod_files {
        let file = item.get("file").filter(|f| f.is_object());
        let mod_obj = file.and_then(|f| f.get("mod")).filter(|m| m.is_object());

        let mod_id = id_value(item.get("modId"))
            .or_else(|| id_value(mod_obj.and_then(|m| m.get("modId"))))
            .or_else(|| id_value(mod_obj.and_then(|m| m.get("id"))));
        let Some(mod_id) = mod_id else {
            continue;
        };
        let file_id = id_value(item.get("fileId"))
            .or_else(|| id_value(file.and_then(|f| f.get("fileId"))))
            .or_else(|| id_value(file.and_then(|f| f.get("id"))))
            .filter(|id| *id > 0);

        let href = match file_id {
            Some(file_id) => format!(
                "https://www.nexusmods.com/{domain}/mods/{mod_id}?tab=files&file_id={file_id}"
            ),
            None => format!("https://www.nexusmods.com/{domain}/mods/{mod_id}"),
        };
        let text = mod_obj
            .and_then(|m| m.get("name"))
            .or_else(|| file.and_then(|f| f.get("name")))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        links.push(RawLink { href, text });
    }
    links
}

/// Queue from the captured collection payloads, with display names filled
/// from rendered anchors where the payload had none.
fn entries_from_payloads(
    captured: &[CapturedResponse],
    anchors: &[RawLink],
    domain: &str,
    details: &mut ExtractionDetails,
) -> Vec<QueueEntry> {
    let mut links = Vec::new();
    for response in captured.iter().filter(|r| is_collection_query(r)) {
        details.payload_candidates_seen += 1;
        if response.status != 200 {
            debug!("collection query {} answered {}", response.url, response.status);
            continue;
        }
        if let Some(body) = &response.body {
            details.payloads_parsed += 1;
            links.extend(links_from_collection_payload(body, domain));
        }
    }

    let (mut entries, _) = entries_from_links(&links, domain);
    let (from_anchors, _) = entries_from_links(anchors, domain);
    let names: HashMap<&str, &str> = from_anchors
        .iter()
        .filter(|e| e.display_name != e.identifier)
        .map(|e| (e.identifier.as_str(), e.display_name.as_str()))
        .collect();
    for entry in entries.iter_mut() {
        if entry.display_name == entry.identifier {
            if let Some(name) = names.get(entry.identifier.as_str()) {
                *entry = QueueEntry::from_link(&entry.link(), name, entry.position);
            }
        }
    }
    entries
}

/// Numeric game id embedded in page markup.
pub fn extract_game_id(html: &str) -> Option<u64> {
    game_id_re()
        .captures(html)
        .and_then(|c| c[1].parse().ok())
}

async fn read_anchors(session: &dyn BrowserSession) -> Result<Vec<RawLink>, SessionError> {
    let value = session.evaluate(COLLECTION_LINKS_SCRIPT).await?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Navigate to the collection and extract its queue.
pub async fn extract_queue(
    session: &dyn BrowserSession,
    collection: &CollectionRef,
    timing: &Timing,
    diagnostics: DiagnosticsTarget<'_>,
) -> Result<QueueExtraction, ExtractionError> {
    let mut details = ExtractionDetails {
        page_url: collection.mods_url.clone(),
        ..Default::default()
    };

    if let Err(e) = session.start_capture("graphql").await {
        warn!("could not record network responses, relying on page anchors: {e}");
    }
    info!("loading collection page {}", collection.mods_url);
    if let Err(e) = session
        .navigate(&collection.mods_url, timing.navigation_timeout)
        .await
    {
        session.finish_capture().await;
        return Err(e.into());
    }

    let deadline = Instant::now() + timing.queue_settle_timeout;
    let mut previous: Option<Vec<RawLink>> = None;
    let mut scrolled = false;
    let anchors = loop {
        details.polls += 1;
        let current = read_anchors(session).await?;
        // Site chrome has mod links too; wait for ones belonging to this game.
        let has_entries = !entries_from_links(&current, &collection.game_slug).0.is_empty();

        if has_entries && previous.as_ref() == Some(&current) {
            details.settled = true;
            break current;
        }
        if has_entries && !scrolled {
            // Lazy-loaded rows only render once scrolled into view.
            session.evaluate(SCROLL_TO_BOTTOM_SCRIPT).await?;
            tokio::time::sleep(timing.poll_interval).await;
            session.evaluate(SCROLL_TO_TOP_SCRIPT).await?;
            scrolled = true;
        }
        if Instant::now() >= deadline {
            debug!("collection list did not settle after {} polls", details.polls);
            break current;
        }
        previous = Some(current);
        tokio::time::sleep(timing.poll_interval).await;
    };
    details.anchors_seen = anchors.len();

    match session.content().await {
        Ok(html) => details.game_id = extract_game_id(&html),
        Err(e) => warn!("could not read page markup for game id: {e}"),
    }

    let captured = session.finish_capture().await;
    let from_payload =
        entries_from_payloads(&captured, &anchors, &collection.game_slug, &mut details);

    let (from_anchors, stats) = entries_from_links(&anchors, &collection.game_slug);
    details.links_normalized = stats.normalized;
    details.duplicates_dropped = stats.duplicates;
    details.foreign_dropped = stats.foreign;

    let entries = if from_payload.is_empty() {
        details.strategy = ExtractionStrategy::DomAnchors;
        from_anchors
    } else {
        details.strategy = ExtractionStrategy::NetworkGraphql;
        from_payload
    };
    info!(
        "extracted {} entries via {} ({} payloads, {} anchors, {} duplicates)",
        entries.len(),
        details.strategy.as_str(),
        details.payloads_parsed,
        details.anchors_seen,
        stats.duplicates
    );

    if entries.is_empty() {
        warn!("collection page yielded no entries; writing diagnostics");
        details.artifacts = write_zero_queue_artifacts(session, diagnostics).await;
    }

    Ok(QueueExtraction { entries, details })
}

/// Capture markup, a screenshot and page metadata. Each capture failure is
/// recorded under `<kind>_error` instead of aborting the others.
pub async fn write_zero_queue_artifacts(
    session: &dyn BrowserSession,
    target: DiagnosticsTarget<'_>,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Err(e) = tokio::fs::create_dir_all(target.dir).await {
        out.insert("dir_error".to_string(), e.to_string());
        return out;
    }

    let html_path = target.dir.join(format!("{}-zero-queue.html", target.stem));
    match session.content().await {
        Ok(html) => match tokio::fs::write(&html_path, html).await {
            Ok(()) => {
                out.insert("html".to_string(), html_path.display().to_string());
            }
            Err(e) => {
                out.insert("html_error".to_string(), e.to_string());
            }
        },
        Err(e) => {
            out.insert("html_error".to_string(), e.to_string());
        }
    }

    let png_path = target.dir.join(format!("{}-zero-queue.png", target.stem));
    match session.screenshot().await {
        Ok(png) => match tokio::fs::write(&png_path, png).await {
            Ok(()) => {
                out.insert("screenshot".to_string(), png_path.display().to_string());
            }
            Err(e) => {
                out.insert("screenshot_error".to_string(), e.to_string());
            }
        },
        Err(e) => {
            out.insert("screenshot_error".to_string(), e.to_string());
        }
    }

    let meta_path = target.dir.join(format!("{}-zero-queue-meta.json", target.stem));
    let url = session.current_url().await.unwrap_or_default();
    let title = session
        .evaluate(TITLE_SCRIPT)
        .await
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();
    let meta = serde_json::json!({
        "url": url,
        "title": title,
        "captured_at": chrono::Local::now().to_rfc3339(),
    });
    let written = serde_json::to_vec_pretty(&meta)
        .map_err(std::io::Error::other)
        .map(|bytes| std::fs::write(&meta_path, bytes));
    match written {
        Ok(Ok(())) => {
            out.insert("meta".to_string(), meta_path.display().to_string());
        }
        Ok(Err(e)) | Err(e) => {
            out.insert("meta_error".to_string(), e.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(href: &str, text: &str) -> RawLink {
        RawLink {
            href: href.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_entries_preserve_order_and_dedupe() {
        let links = vec![
            raw("https://www.nexusmods.com/skyrimspecialedition/mods/266", "USSEP"),
            raw("https://www.nexusmods.com/skyrimspecialedition/mods/12604", ""),
            raw("https://www.nexusmods.com/skyrimspecialedition/mods/266", "USSEP again"),
            raw(
                "https://www.nexusmods.com/skyrimspecialedition/mods/12604?tab=files&file_id=35407",
                "SkyUI",
            ),
            raw("https://www.nexusmods.com/skyrim/mods/3863", "Oldrim SkyUI"),
            raw("https://www.nexusmods.com/about", "About"),
        ];

        let (entries, stats) = entries_from_links(&links, "skyrimspecialedition");
        let ids: Vec<_> = entries.iter().map(|e| e.identifier.as_str()).collect();
        assert_eq!(ids, vec!["skyrimspecialedition/266", "skyrimspecialedition/12604"]);
        assert_eq!(entries[0].display_name, "USSEP");
        assert_eq!(entries[0].position, 1);

        // The repeat supplied both the pinned file and the name.
        assert_eq!(entries[1].position, 2);
        assert_eq!(entries[1].file_id, Some(35407));
        assert_eq!(entries[1].display_name, "SkyUI");
        assert!(entries[1].detail_url.ends_with("file_id=35407"));

        assert_eq!(stats, LinkStats { normalized: 5, duplicates: 2, foreign: 1 });
    }

    #[test]
    fn test_identifiers_unique() {
        let links: Vec<_> = (0..20)
            .map(|i| raw(&format!("https://www.nexusmods.com/x/mods/{}", i % 7), "m"))
            .collect();
        let (entries, _) = entries_from_links(&links, "x");
        let unique: std::collections::HashSet<_> = entries.iter().map(|e| &e.identifier).collect();
        assert_eq!(unique.len(), entries.len());
        assert_eq!(entries.len(), 7);
    }

    fn collection_payload() -> serde_json::Value {
        serde_json::json!({
            "data": {
                "collectionRevision": {
                    "revisionNumber": 12,
                    "modFiles": [
                        { "fileId": 35407, "optional": false,
                          "file": { "fileId": 35407, "name": "SkyUI 5.2 SE",
                                    "mod": { "modId": 12604, "name": "SkyUI" } } },
                        { "modId": "266", "fileId": "486123" },
                        { "file": { "id": 0, "mod": { "id": 3863 } } },
                        { "file": { "fileId": 1 } },
                        "not an object"
                    ]
                }
            }
        })
    }

    const COLLECTION_QUERY: &str = r#"{"query":"query CollectionRevisionMods($slug: String)"}"#;

    fn captured(
        operation: Option<&str>,
        status: i64,
        body: Option<serde_json::Value>,
    ) -> CapturedResponse {
        CapturedResponse {
            url: "https://api-router.nexusmods.com/graphql".to_string(),
            status,
            operation: operation.map(String::from),
            post_data: Some(COLLECTION_QUERY.to_string()),
            body,
        }
    }

    #[test]
    fn test_links_from_collection_payload() {
        let links = links_from_collection_payload(&collection_payload(), "skyrimspecialedition");
        let hrefs: Vec<_> = links.iter().map(|l| l.href.as_str()).collect();
        assert_eq!(
            hrefs,
            vec![
                "https://www.nexusmods.com/skyrimspecialedition/mods/12604?tab=files&file_id=35407",
                "https://www.nexusmods.com/skyrimspecialedition/mods/266?tab=files&file_id=486123",
                "https://www.nexusmods.com/skyrimspecialedition/mods/3863",
            ]
        );
        assert_eq!(links[0].text, "SkyUI");
        assert_eq!(links[1].text, "");

        assert!(links_from_collection_payload(&serde_json::json!({"data": null}), "x").is_empty());
        assert!(links_from_collection_payload(&serde_json::json!([1, 2]), "x").is_empty());
    }

    #[test]
    fn test_is_collection_query() {
        assert!(is_collection_query(&captured(Some("CollectionRevisionMods"), 200, None)));
        assert!(is_collection_query(&captured(None, 200, None)));

        let unrelated = CapturedResponse {
            url: "https://api-router.nexusmods.com/graphql".to_string(),
            status: 200,
            operation: Some("UserNotifications".to_string()),
            post_data: Some(r#"{"query":"query UserNotifications"}"#.to_string()),
            body: None,
        };
        assert!(!is_collection_query(&unrelated));
    }

    #[test]
    fn test_payload_entries_take_names_from_anchors() {
        let anchors = vec![
            raw("https://www.nexusmods.com/skyrimspecialedition/mods/266", "Unofficial Patch"),
            raw("https://www.nexusmods.com/skyrimspecialedition/mods/99999", "Trending mod"),
        ];
        let responses = vec![
            captured(Some("CollectionRevisionMods"), 503, None),
            captured(Some("CollectionRevisionMods"), 200, Some(collection_payload())),
        ];
        let mut details = ExtractionDetails::default();

        let entries =
            entries_from_payloads(&responses, &anchors, "skyrimspecialedition", &mut details);
        let ids: Vec<_> = entries.iter().map(|e| e.mod_id).collect();
        // Anchors outside the payload are site chrome, not queue entries.
        assert_eq!(ids, vec![12604, 266, 3863]);
        assert_eq!(entries[1].display_name, "Unofficial Patch");
        assert_eq!(entries[1].file_id, Some(486123));
        assert_eq!(entries[2].display_name, "skyrimspecialedition/3863");
        assert_eq!(details.payload_candidates_seen, 2);
        assert_eq!(details.payloads_parsed, 1);
    }

    /// Page that renders `anchors` and, when capturing, answers the
    /// collection query with `payload`.
    struct StubPage {
        anchors: serde_json::Value,
        payload: Option<serde_json::Value>,
        capturing: std::sync::Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl BrowserSession for StubPage {
        fn info(&self) -> crate::session::SessionInfo {
            crate::session::SessionInfo {
                endpoint: "stub".to_string(),
                browser: None,
                launched: false,
            }
        }
        async fn navigate(
            &self,
            _url: &str,
            _timeout: std::time::Duration,
        ) -> Result<(), SessionError> {
            Ok(())
        }
        async fn evaluate(&self, script: &str) -> Result<serde_json::Value, SessionError> {
            if script == COLLECTION_LINKS_SCRIPT {
                return Ok(self.anchors.clone());
            }
            Ok(serde_json::Value::Null)
        }
        async fn content(&self) -> Result<String, SessionError> {
            Ok(r#"<img src="/images/games/v2/1704/tile.jpg">"#.to_string())
        }
        async fn current_url(&self) -> Result<String, SessionError> {
            Ok(String::new())
        }
        async fn screenshot(&self) -> Result<Vec<u8>, SessionError> {
            Ok(Vec::new())
        }
        async fn cookies(
            &self,
            _url: &str,
        ) -> Result<Vec<crate::session::SessionCookie>, SessionError> {
            Ok(Vec::new())
        }
        async fn set_download_dir(&self, _dir: &Path) -> Result<(), SessionError> {
            Ok(())
        }
        async fn start_capture(&self, url_marker: &str) -> Result<(), SessionError> {
            assert_eq!(url_marker, "graphql");
            *self.capturing.lock().unwrap() = true;
            Ok(())
        }
        async fn finish_capture(&self) -> Vec<CapturedResponse> {
            if !std::mem::take(&mut *self.capturing.lock().unwrap()) {
                return Vec::new();
            }
            self.payload
                .iter()
                .map(|body| captured(Some(COLLECTION_OPERATION), 200, Some(body.clone())))
                .collect()
        }
        async fn close(&self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn timing() -> Timing {
        Timing {
            poll_interval: std::time::Duration::from_millis(5),
            queue_settle_timeout: std::time::Duration::from_millis(200),
            ..Timing::default()
        }
    }

    #[tokio::test]
    async fn test_extract_queue_prefers_collection_payload() {
        let dir = tempfile::tempdir().unwrap();
        let page = StubPage {
            anchors: serde_json::json!([{
                "href": "https://www.nexusmods.com/skyrimspecialedition/mods/266",
                "text": "Unofficial Patch"
            }]),
            payload: Some(collection_payload()),
            capturing: std::sync::Mutex::new(false),
        };
        let collection = CollectionRef::parse(
            "https://www.nexusmods.com/games/skyrimspecialedition/collections/qdurkx",
        )
        .unwrap();

        let extraction = extract_queue(
            &page,
            &collection,
            &timing(),
            DiagnosticsTarget { dir: dir.path(), stem: "run" },
        )
        .await
        .unwrap();

        assert_eq!(extraction.details.strategy, ExtractionStrategy::NetworkGraphql);
        assert_eq!(extraction.entries.len(), 3);
        assert!(extraction.entries.iter().take(2).all(|e| e.file_id.is_some()));
        assert_eq!(extraction.details.game_id, Some(1704));
    }

    #[tokio::test]
    async fn test_extract_queue_falls_back_to_anchors() {
        let dir = tempfile::tempdir().unwrap();
        let page = StubPage {
            anchors: serde_json::json!([
                {
                    "href": "https://www.nexusmods.com/skyrimspecialedition/mods/266",
                    "text": "Unofficial Patch"
                },
                {
                    "href": "https://www.nexusmods.com/skyrimspecialedition/mods/12604",
                    "text": "SkyUI"
                }
            ]),
            payload: None,
            capturing: std::sync::Mutex::new(false),
        };
        let collection = CollectionRef::parse(
            "https://www.nexusmods.com/games/skyrimspecialedition/collections/qdurkx",
        )
        .unwrap();

        let extraction = extract_queue(
            &page,
            &collection,
            &timing(),
            DiagnosticsTarget { dir: dir.path(), stem: "run" },
        )
        .await
        .unwrap();

        assert_eq!(extraction.details.strategy, ExtractionStrategy::DomAnchors);
        assert_eq!(extraction.details.payload_candidates_seen, 0);
        let ids: Vec<_> = extraction.entries.iter().map(|e| e.mod_id).collect();
        assert_eq!(ids, vec![266, 12604]);
    }

    #[test]
    fn test_extract_game_id() {
        let html = r#"<img src="https://staticdelivery.nexusmods.com/images/games/v2/1704/tile.jpg">"#;
        assert_eq!(extract_game_id(html), Some(1704));
        assert_eq!(extract_game_id("<html></html>"), None);
    }
}
