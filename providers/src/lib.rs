//! Network boundary: chat-completion streaming and reference fetching.
//!
//! # Architecture
//!
//! - [`chat::ChatClient`] - issues chat-completion requests and normalizes
//!   the SSE token-delta stream into [`StreamEvent`]s over an
//!   [`tokio::sync::mpsc::Sender`] channel
//! - [`retry`] - HTTP retry policy with exponential backoff, applied to the
//!   initial request before any streaming begins
//! - [`fetch::ReferenceFetcher`] - resolves user-referenced URLs into
//!   reference documents, failing the whole set together
//!
//! # Error Handling
//!
//! Stream failures are delivered as `StreamEvent::Error` carrying a closed
//! [`scribe_types::StreamErrorKind`], so retry eligibility downstream is a
//! total match, never a string comparison. Malformed individual deltas are
//! logged and skipped; only consecutive garbage terminates the stream.

pub mod chat;
pub mod fetch;
pub mod retry;

pub(crate) use scribe_types::{StreamError, StreamEvent};

use std::sync::OnceLock;
use std::time::Duration;

const CONNECT_TIMEOUT_SECS: u64 = 30;

const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

const MAX_SSE_PARSE_ERRORS: usize = 3;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

pub(crate) fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build HTTP client: {e}. Falling back to defaults.");
                reqwest::Client::new()
            })
    })
}

pub(crate) fn find_sse_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

pub(crate) fn drain_next_sse_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_sse_event_boundary(buffer)?;
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(event)
}

pub(crate) fn extract_sse_data(event: &str) -> Option<String> {
    let mut data = String::new();
    let mut found = false;

    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(mut rest) = line.strip_prefix("data:") {
            if let Some(stripped) = rest.strip_prefix(' ') {
                rest = stripped;
            }

            if found {
                data.push('\n');
            }
            data.push_str(rest);
            found = true;
        }
    }

    if found { Some(data) } else { None }
}

pub(crate) async fn read_capped_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Classify a transport-level failure from the HTTP client.
pub(crate) fn classify_request_error(error: &reqwest::Error) -> StreamError {
    if error.is_timeout() {
        StreamError::timeout(error.to_string())
    } else {
        StreamError::connection(error.to_string())
    }
}
