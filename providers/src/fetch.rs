//! Reference fetching.
//!
//! Resolves the URLs a user referenced in their request into
//! [`ReferenceDocument`]s. Fetches run concurrently since they are read-only
//! and independent, but the set fails together: silently proceeding with a
//! reduced reference set would change the prompt without anyone noticing.

use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::join_all;
use thiserror::Error;
use url::Url;

use scribe_types::ReferenceDocument;

use crate::http_client;

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;
const DEFAULT_MAX_BODY_BYTES: usize = 512 * 1024;

/// One URL that could not be resolved, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub url: String,
    pub reason: String,
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.url, self.reason)
    }
}

/// Aggregate failure for a reference set.
#[derive(Debug, Clone, Error)]
#[error("failed to fetch: {}", join_failures(.failures))]
pub struct FetchError {
    pub failures: Vec<FetchFailure>,
}

fn join_failures(failures: &[FetchFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fetches raw reference content by URL.
#[derive(Debug, Clone)]
pub struct ReferenceFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl Default for ReferenceFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: http_client().clone(),
            timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch every URL concurrently.
    ///
    /// Returns the documents in input order, or an aggregate error naming
    /// every URL that failed. A partial result is never returned.
    pub async fn fetch_all(&self, urls: &[String]) -> Result<Vec<ReferenceDocument>, FetchError> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let results = join_all(urls.iter().map(|url| self.fetch_one(url))).await;

        let mut documents = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(doc) => documents.push(doc),
                Err(failure) => failures.push(failure),
            }
        }

        if failures.is_empty() {
            Ok(documents)
        } else {
            Err(FetchError { failures })
        }
    }

    async fn fetch_one(&self, url: &str) -> Result<ReferenceDocument, FetchFailure> {
        let fail = |reason: String| FetchFailure {
            url: url.to_string(),
            reason,
        };

        let parsed = Url::parse(url).map_err(|e| fail(format!("invalid url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(fail(format!("scheme '{}' not allowed", parsed.scheme())));
        }
        if parsed.host_str().is_none() {
            return Err(fail("url has no host".to_string()));
        }

        let response = self
            .client
            .get(parsed)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("http status {status}")));
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| fail(e.to_string()))?;
            body.extend_from_slice(&chunk);
            if body.len() >= self.max_body_bytes {
                body.truncate(self.max_body_bytes);
                tracing::debug!(url, "reference body truncated at size cap");
                break;
            }
        }

        let content = String::from_utf8_lossy(&body).into_owned();
        if content.trim().is_empty() {
            return Err(fail("empty response body".to_string()));
        }

        Ok(ReferenceDocument::new(url, content))
    }
}
