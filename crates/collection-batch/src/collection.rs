//! Collection and mod-link parsing.
//!
//! Turns user input into a [`CollectionRef`] and normalizes the mod links
//! found on a collection page into canonical [`ModLink`]s.

use crate::error::ExtractionError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use url::Url;

/// Canonical origin of the collection site.
pub const SITE_ORIGIN: &str = "https://www.nexusmods.com";

const SITE_HOSTS: [&str; 2] = ["www.nexusmods.com", "nexusmods.com"];

fn collection_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^https?://(?:www\.)?nexusmods\.com/games/([^/]+)/collections/([^/?#]+)(?:/mods)?/?$",
        )
        .expect("collection URL pattern is valid")
    })
}

fn mod_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^/([^/]+)/mods/(\d+)$").expect("mod path pattern is valid"))
}

/// Identifies one collection. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRef {
    /// Site host, e.g. `www.nexusmods.com`.
    pub site: String,
    /// Game slug from the URL, lower-cased (doubles as the mod link domain).
    pub game_slug: String,
    /// Collection slug from the URL.
    pub collection_slug: String,
    /// Cleaned URL of the collection's mods page.
    pub mods_url: String,
}

impl CollectionRef {
    /// Parse a collection URL as typed by the user.
    pub fn parse(input: &str) -> Result<Self, ExtractionError> {
        let trimmed = input.trim();
        let caps = collection_url_re()
            .captures(trimmed)
            .ok_or_else(|| ExtractionError::InvalidCollectionUrl(trimmed.to_string()))?;

        let game_slug = caps[1].to_ascii_lowercase();
        let collection_slug = caps[2].to_string();
        let mods_url =
            format!("{SITE_ORIGIN}/games/{game_slug}/collections/{collection_slug}/mods");

        Ok(Self {
            site: "www.nexusmods.com".to_string(),
            game_slug,
            collection_slug,
            mods_url,
        })
    }

    /// Origin the session cookies and direct requests are scoped to.
    pub fn origin(&self) -> String {
        format!("https://{}", self.site)
    }
}

/// A canonical link to a mod (optionally pinned to one file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModLink {
    pub domain: String,
    pub mod_id: u64,
    pub file_id: Option<u64>,
}

impl ModLink {
    /// Stable identifier used for queue deduplication.
    pub fn identifier(&self) -> String {
        format!("{}/{}", self.domain, self.mod_id)
    }

    /// Canonical URL of the mod page (files tab when a file is pinned).
    pub fn url(&self) -> String {
        let base = format!("{SITE_ORIGIN}/{}/mods/{}", self.domain, self.mod_id);
        match self.file_id {
            Some(file_id) => format!("{base}?tab=files&file_id={file_id}"),
            None => base,
        }
    }

    /// URL of the files tab, where the download controls live.
    pub fn files_url(&self) -> String {
        match self.file_id {
            Some(_) => self.url(),
            None => format!("{}?tab=files", self.url()),
        }
    }
}

/// Normalize an anchor href into a [`ModLink`], rejecting anything that is
/// not a mod page on the collection site.
pub fn normalize_mod_link(href: &str) -> Option<ModLink> {
    let parsed = Url::parse(href.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_ascii_lowercase();
    if !SITE_HOSTS.contains(&host.as_str()) {
        return None;
    }

    let path = parsed.path().trim_end_matches('/');
    let caps = mod_path_re().captures(path)?;
    let domain = caps[1].to_ascii_lowercase();
    let mod_id: u64 = caps[2].parse().ok()?;

    let file_id = parsed
        .query_pairs()
        .find(|(k, _)| k == "file_id")
        .and_then(|(_, v)| v.parse::<u64>().ok())
        .filter(|id| *id > 0);

    Some(ModLink {
        domain,
        mod_id,
        file_id,
    })
}
