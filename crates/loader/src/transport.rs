//! Source transports: where the raw delimited text comes from.

use async_trait::async_trait;
use bytes::BytesMut;
use insights_core::{LoadError, LoadResult};
use serde::Serialize;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{debug, info};
use url::Url;

/// One URL the loader may fetch from. Candidates are tried in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceCandidate {
    pub url: String,
    pub label: String,
}

impl SourceCandidate {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
        }
    }
}

/// Download progress; `total_bytes` only when the length is known up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DownloadProgress {
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
}

impl DownloadProgress {
    pub fn fraction(&self) -> Option<f64> {
        self.total_bytes
            .filter(|t| *t > 0)
            .map(|t| (self.downloaded_bytes as f64 / t as f64).min(1.0))
    }
}

#[async_trait]
pub trait SourceTransport: Send + Sync {
    /// Fetch the full payload of `candidate`, reporting progress as bytes
    /// arrive. Timeouts and cancellation are applied by the caller by
    /// dropping this future.
    async fn fetch(
        &self,
        candidate: &SourceCandidate,
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> LoadResult<String>;

    /// Cheap reachability check run before the first fetch when enabled.
    async fn health_check(&self, _candidate: &SourceCandidate) -> LoadResult<()> {
        Ok(())
    }
}

/// Candidate export URLs for a published spreadsheet sheet, most reliable
/// first, followed by any configured extras.
pub fn sheet_candidates(document_id: &str, sheet_gid: &str, extra_urls: &[String]) -> LoadResult<Vec<SourceCandidate>> {
    let base = format!("https://docs.google.com/spreadsheets/d/{document_id}/");
    let base = Url::parse(&base).map_err(|e| LoadError::Transport(format!("invalid document id: {e}")))?;

    let join = |path: &str| {
        base.join(path)
            .map_err(|e| LoadError::Transport(format!("invalid export url: {e}")))
    };

    let mut export = join("export")?;
    export
        .query_pairs_mut()
        .append_pair("format", "csv")
        .append_pair("gid", sheet_gid);

    let mut gviz = join("gviz/tq")?;
    gviz.query_pairs_mut()
        .append_pair("tqx", "out:csv")
        .append_pair("gid", sheet_gid);

    let mut published = Url::parse("https://docs.google.com/spreadsheets/d/e/")
        .and_then(|u| u.join(&format!("{document_id}/pub")))
        .map_err(|e| LoadError::Transport(format!("invalid publish url: {e}")))?;
    published
        .query_pairs_mut()
        .append_pair("gid", sheet_gid)
        .append_pair("single", "true")
        .append_pair("output", "csv");

    let mut candidates = vec![
        SourceCandidate::new("export", export.to_string()),
        SourceCandidate::new("gviz", gviz.to_string()),
        SourceCandidate::new("published", published.to_string()),
    ];
    for (i, extra) in extra_urls.iter().enumerate() {
        let url = Url::parse(extra).map_err(|e| LoadError::Transport(format!("invalid fallback url {extra}: {e}")))?;
        candidates.push(SourceCandidate::new(format!("fallback-{}", i + 1), url.to_string()));
    }
    Ok(candidates)
}

/// HTTP GET transport with a streamed body.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> LoadResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("spend-insights/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LoadError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

/// Upper bound on what a declared Content-Length may reserve up front; the
/// buffer still grows past it as bytes actually arrive.
const MAX_PREALLOCATE: usize = 8 << 20;
const DEFAULT_CAPACITY: usize = 64 * 1024;

fn initial_capacity(content_length: Option<u64>) -> usize {
    content_length.map_or(DEFAULT_CAPACITY, |len| len.min(MAX_PREALLOCATE as u64) as usize)
}

fn network_error(e: reqwest::Error) -> LoadError {
    LoadError::Network {
        attempts: 1,
        message: e.to_string(),
    }
}

#[async_trait]
impl SourceTransport for HttpTransport {
    async fn fetch(
        &self,
        candidate: &SourceCandidate,
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> LoadResult<String> {
        debug!(source = %candidate.label, url = %candidate.url, "Fetching source");
        let response = self.client.get(&candidate.url).send().await.map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Network {
                attempts: 1,
                message: format!("{} returned HTTP {status}", candidate.label),
            });
        }

        // Unpublished sheets answer with a sign-in page instead of CSV
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/html"));
        if is_html {
            return Err(LoadError::Transport(format!("{} returned HTML, not CSV", candidate.label)));
        }

        let total_bytes = response.content_length();
        let mut buffer = BytesMut::with_capacity(initial_capacity(total_bytes));
        let mut stream = std::pin::pin!(response.bytes_stream());

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(network_error)?;
            buffer.extend_from_slice(&chunk);
            progress(DownloadProgress {
                downloaded_bytes: buffer.len() as u64,
                total_bytes,
            });
        }

        info!(source = %candidate.label, bytes = buffer.len(), "Source downloaded");
        String::from_utf8(buffer.to_vec())
            .map_err(|e| LoadError::Transport(format!("{} is not valid UTF-8: {e}", candidate.label)))
    }

    async fn health_check(&self, candidate: &SourceCandidate) -> LoadResult<()> {
        let response = self.client.head(&candidate.url).send().await.map_err(network_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(LoadError::Network {
                attempts: 1,
                message: format!("health check returned HTTP {}", response.status()),
            })
        }
    }
}
