//! Async HTTP client wrapping reqwest.
//!
//! Not a browser, just session-authenticated requests. Retries 5xx and 429,
//! streams transfers to disk, and can repeat a request once with certificate
//! checks disabled when the caller allows it.

use crate::error::AcquisitionError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/131.0.0.0 Safari/537.36";

/// Response with its body read as text.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Original requested URL.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A transfer written to disk.
#[derive(Debug, Clone)]
pub struct SavedFile {
    pub path: PathBuf,
    pub bytes: u64,
    pub content_type: Option<String>,
}

/// HTTP client for the direct strategy.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    /// Certificate checks disabled; present only when the run allows it.
    insecure: Option<reqwest::Client>,
}

impl HttpClient {
    pub fn new(timeout: Duration, allow_insecure: bool) -> Self {
        let build = |insecure: bool| {
            reqwest::Client::builder()
                .timeout(timeout)
                .redirect(reqwest::redirect::Policy::limited(10))
                .user_agent(USER_AGENT)
                .danger_accept_invalid_certs(insecure)
                .build()
                .unwrap_or_default()
        };

        Self {
            client: build(false),
            insecure: allow_insecure.then(|| build(true)),
        }
    }

    /// POST form data and return the response with all headers.
    pub async fn post_form(
        &self,
        url: &str,
        form_fields: &[(&str, String)],
        extra_headers: &[(&str, String)],
    ) -> Result<HttpResponse, AcquisitionError> {
        match self.post_form_inner(&self.client, url, form_fields, extra_headers).await {
            Err(AcquisitionError::Tls(detail)) if self.insecure.is_some() => {
                warn!(
                    "TLS verification failed for {url} ({detail}); \
                     retrying without certificate checks"
                );
                let insecure = self.insecure.as_ref().unwrap_or(&self.client);
                self.post_form_inner(insecure, url, form_fields, extra_headers).await
            }
            other => other,
        }
    }

    async fn post_form_inner(
        &self,
        client: &reqwest::Client,
        url: &str,
        form_fields: &[(&str, String)],
        extra_headers: &[(&str, String)],
    ) -> Result<HttpResponse, AcquisitionError> {
        let mut retries = 0u32;
        let max_retries = 2;

        loop {
            let mut builder = client.post(url);
            for (name, value) in extra_headers {
                builder = builder.header(*name, value.as_str());
            }
            let resp = builder
                .form(form_fields)
                .send()
                .await
                .map_err(|e| AcquisitionError::from_http("download URL request", &e))?;

            let status = resp.status().as_u16();
            if (status >= 500 || status == 429) && retries < max_retries {
                retries += 1;
                let delay = retry_delay(status, retries, resp.headers());
                debug!("{url} answered {status}; retry {retries} in {delay:?}");
                tokio::time::sleep(delay).await;
                continue;
            }

            let final_url = resp.url().to_string();
            let headers = collect_headers(resp.headers());
            let body = resp
                .text()
                .await
                .map_err(|e| AcquisitionError::from_http("download URL response", &e))?;

            return Ok(HttpResponse {
                url: url.to_string(),
                final_url,
                status,
                headers,
                body,
            });
        }
    }

    /// Stream `url` into `dest_dir`. The name comes from the response
    /// (`Content-Disposition`, then the final URL) or `fallback_name`.
    pub async fn download_to(
        &self,
        url: &str,
        extra_headers: &[(&str, String)],
        dest_dir: &Path,
        fallback_name: &str,
    ) -> Result<SavedFile, AcquisitionError> {
        match self
            .download_inner(&self.client, url, extra_headers, dest_dir, fallback_name)
            .await
        {
            Err(AcquisitionError::Tls(detail)) if self.insecure.is_some() => {
                warn!(
                    "TLS verification failed for {url} ({detail}); \
                     retrying without certificate checks"
                );
                let insecure = self.insecure.as_ref().unwrap_or(&self.client);
                self.download_inner(insecure, url, extra_headers, dest_dir, fallback_name)
                    .await
            }
            other => other,
        }
    }

    async fn download_inner(
        &self,
        client: &reqwest::Client,
        url: &str,
        extra_headers: &[(&str, String)],
        dest_dir: &Path,
        fallback_name: &str,
    ) -> Result<SavedFile, AcquisitionError> {
        let mut builder = client.get(url);
        for (name, value) in extra_headers {
            builder = builder.header(*name, value.as_str());
        }
        let mut resp = builder
            .send()
            .await
            .map_err(|e| AcquisitionError::from_http("file transfer", &e))?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AcquisitionError::Permission(format!(
                "file transfer: HTTP {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(AcquisitionError::UnexpectedResponse(format!(
                "file transfer: HTTP {}",
                status.as_u16()
            )));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let name = resp
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .or_else(|| filename_from_url(resp.url().as_str()))
            .unwrap_or_else(|| fallback_name.to_string());
        let name = with_archive_extension(&sanitize_filename(&name));

        tokio::fs::create_dir_all(dest_dir).await?;
        let target = unique_destination(dest_dir, &name);
        let partial = partial_path(&target);

        let mut guard = PartialFile::new(partial.clone());
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut bytes = 0u64;
        let streamed: Result<(), AcquisitionError> = async {
            while let Some(chunk) = resp
                .chunk()
                .await
                .map_err(|e| AcquisitionError::from_http("file transfer", &e))?
            {
                file.write_all(&chunk).await?;
                bytes += chunk.len() as u64;
            }
            file.flush().await?;
            Ok::<(), AcquisitionError>(())
        }
        .await;
        drop(file);
        streamed?;

        tokio::fs::rename(&partial, &target).await?;
        guard.disarm();
        Ok(SavedFile {
            path: target,
            bytes,
            content_type,
        })
    }
}

fn retry_delay(status: u16, retries: u32, headers: &reqwest::header::HeaderMap) -> Duration {
    if status == 429 {
        let retry_after = headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(2);
        return Duration::from_secs(retry_after.min(10));
    }
    Duration::from_millis(500 * 2u64.pow(retries - 1))
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect()
}

/// Filename from a `Content-Disposition` value. `filename*=UTF-8''` wins over
/// a plain `filename=`.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    for part in value.split(';').map(str::trim) {
        let Some((key, raw)) = part.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = raw.trim().trim_matches('"');
                let encoded = match encoded.split_once("''") {
                    Some((_, rest)) => rest,
                    None => encoded,
                };
                if let Ok(decoded) = urlencoding::decode(encoded) {
                    if !decoded.trim().is_empty() {
                        return Some(decoded.into_owned());
                    }
                }
            }
            "filename" => {
                let name = raw.trim().trim_matches('"');
                if !name.is_empty() {
                    plain = Some(name.to_string());
                }
            }
            _ => {}
        }
    }
    plain
}

/// Last path segment of a URL, percent-decoded.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = urlencoding::decode(segment).ok()?.into_owned();
    (!decoded.trim().is_empty()).then_some(decoded)
}

/// Strip path separators and characters Windows refuses in filenames.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').to_string();
    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned
    }
}

fn with_archive_extension(name: &str) -> String {
    if Path::new(name).extension().is_some() {
        name.to_string()
    } else {
        format!("{name}.zip")
    }
}

/// `dir/name`, or `dir/stem (n).ext` for the first free `n`.
pub fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{stem} ({n}){ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Removes an unfinished `.part` file on drop, including when the download
/// future is cancelled mid-stream.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!("could not remove {}: {e}", self.path.display());
                }
            }
        }
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
