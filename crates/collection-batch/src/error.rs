//! Error taxonomy for the engine.
//!
//! Per-entry errors ([`AcquisitionError`], [`InstallError`]) are recorded on
//! the entry and never abort the run. Run-level errors ([`SessionError`],
//! [`ExtractionError`], [`BatchError`]) decide the process exit status.

use std::path::PathBuf;

/// Failures obtaining or using the browser session.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("browser session unavailable: {0}")]
    Unavailable(String),

    #[error("navigation to {url} timed out after {timeout_ms}ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },

    #[error("page operation failed: {0}")]
    Page(String),
}

/// Failures extracting the collection queue.
#[derive(thiserror::Error, Debug)]
pub enum ExtractionError {
    #[error("invalid collection URL: {0}")]
    InvalidCollectionUrl(String),

    #[error("collection page yielded no mod entries")]
    EmptyQueue,

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Failure of a single acquisition strategy for one entry.
#[derive(thiserror::Error, Debug)]
pub enum AcquisitionError {
    /// The strategy cannot run for this entry (missing file id, cookies, ...).
    #[error("not applicable: {0}")]
    NotApplicable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("UI element not found: {0}")]
    ElementNotFound(String),

    #[error("{stage} timed out after {after_ms}ms")]
    Timeout { stage: String, after_ms: u64 },

    #[error("corrupt download: {0}")]
    Corrupt(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AcquisitionError {
    /// Whether this failure means "nothing arrived in time".
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            AcquisitionError::Timeout { .. }
                | AcquisitionError::Session(SessionError::NavigationTimeout { .. })
        )
    }

    /// Classify a reqwest failure into the acquisition taxonomy.
    pub fn from_http(stage: &str, err: &reqwest::Error) -> Self {
        let chain = error_chain(err);
        let lower = chain.to_ascii_lowercase();
        if err.is_timeout() {
            return AcquisitionError::Timeout {
                stage: stage.to_string(),
                after_ms: 0,
            };
        }
        if lower.contains("certificate")
            || lower.contains("self-signed")
            || lower.contains("unknownissuer")
            || lower.contains("invalid peer certificate")
        {
            return AcquisitionError::Tls(chain);
        }
        if let Some(status) = err.status() {
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return AcquisitionError::Permission(format!("{stage}: HTTP {status}"));
            }
        }
        AcquisitionError::Network(format!("{stage}: {chain}"))
    }
}

/// Failures staging or installing one archive.
#[derive(thiserror::Error, Debug)]
pub enum InstallError {
    #[error("archive not found: {}", .0.display())]
    MissingArchive(PathBuf),

    #[error("copy failed for {}: {source}", path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("extraction failed: {0}")]
    Extract(String),

    #[error("unsupported archive (no 7-Zip available): {0}")]
    Unsupported(String),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run-level failures surfaced to the exit status.
#[derive(thiserror::Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Flatten an error and its sources into one line.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = inner.source();
    }
    out
}
