//! Chat-completion client.
//!
//! Issues the POST for one generation request and normalizes the SSE
//! token-delta response into [`StreamEvent`]s. One wall-clock timer covers
//! the whole transfer and an idle timer covers each chunk read, so a stalled
//! transport cannot hold a session open.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use scribe_types::{PromptEnvelope, Settings, StreamErrorKind};

use crate::retry::{RetryConfig, RetryOutcome, send_with_retry};
use crate::{
    MAX_SSE_BUFFER_BYTES, MAX_SSE_PARSE_ERRORS, StreamError, StreamEvent, classify_request_error,
    drain_next_sse_event, extract_sse_data, http_client, read_capped_body,
};

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: [WireMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for one chat-completion endpoint.
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    stop: Vec<String>,
    request_timeout: Duration,
    retry: RetryConfig,
}

impl ChatClient {
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: http_client().clone(),
            endpoint: settings.endpoint().to_string(),
            api_key: settings.api_key().to_string(),
            model: settings.model().to_string(),
            temperature: settings.temperature(),
            max_tokens: settings.max_output_tokens(),
            stop: settings.stop().to_vec(),
            request_timeout: Duration::from_secs(settings.request_timeout_secs()),
            retry: RetryConfig::default(),
        }
    }

    fn build_request(&self, envelope: &PromptEnvelope, user_content: &str, stream: bool) -> reqwest::RequestBuilder {
        let body = ChatRequestBody {
            model: &self.model,
            messages: [
                WireMessage {
                    role: "system",
                    content: &envelope.system_instructions,
                },
                WireMessage {
                    role: "user",
                    content: user_content,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stop: if self.stop.is_empty() {
                None
            } else {
                Some(&self.stop)
            },
            stream,
        };
        self.client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
            .json(&body)
    }

    /// Issue a streaming request and forward normalized events into `tx`.
    ///
    /// Transport retries here are disabled on purpose: the generation
    /// controller owns retry for the streaming path, and a clean reader per
    /// attempt requires the request to fail all the way up to it.
    pub async fn stream_chat(&self, envelope: &PromptEnvelope, tx: mpsc::Sender<StreamEvent>) {
        let user_content = envelope.user_content();
        let outcome = send_with_retry(
            || self.build_request(envelope, &user_content, true),
            &RetryConfig::none(),
        )
        .await;

        let response = match outcome {
            RetryOutcome::Success(response) => response,
            RetryOutcome::HttpError(response) => {
                let status = response.status();
                let body = read_capped_body(response).await;
                let _ = tx
                    .send(StreamEvent::Error(StreamError::api(format!(
                        "API error {status}: {body}"
                    ))))
                    .await;
                return;
            }
            RetryOutcome::ConnectionError { source, .. } => {
                let _ = tx
                    .send(StreamEvent::Error(classify_request_error(&source)))
                    .await;
                return;
            }
        };

        if !is_event_stream(&response) {
            let _ = tx
                .send(StreamEvent::Error(StreamError::new(
                    StreamErrorKind::StreamUnsupported,
                    "endpoint did not answer with an event stream",
                )))
                .await;
            return;
        }

        self.process_stream(response, &tx).await;
    }

    async fn process_stream(&self, response: reqwest::Response, tx: &mpsc::Sender<StreamEvent>) {
        use futures_util::StreamExt;

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut parse_errors = 0usize;

        loop {
            let Ok(next) = tokio::time::timeout(self.request_timeout, stream.next()).await else {
                let _ = tx
                    .send(StreamEvent::Error(StreamError::timeout(
                        "stream idle timeout",
                    )))
                    .await;
                return;
            };

            let Some(chunk) = next else { break };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = tx
                        .send(StreamEvent::Error(classify_request_error(&e)))
                        .await;
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);

            if buffer.len() > MAX_SSE_BUFFER_BYTES {
                let _ = tx
                    .send(StreamEvent::Error(StreamError::new(
                        StreamErrorKind::InvalidPayload,
                        "SSE buffer exceeded maximum size",
                    )))
                    .await;
                return;
            }

            while let Some(event) = drain_next_sse_event(&mut buffer) {
                if event.is_empty() {
                    continue;
                }

                let Ok(event) = std::str::from_utf8(&event) else {
                    tracing::warn!("skipping non-UTF-8 SSE event");
                    continue;
                };

                let Some(data) = extract_sse_data(event) else {
                    continue;
                };

                if data == "[DONE]" {
                    let _ = tx.send(StreamEvent::Done).await;
                    return;
                }

                match serde_json::from_str::<ChatChunk>(&data) {
                    Ok(chunk) => {
                        parse_errors = 0;
                        let delta = chunk
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|c| c.delta.content);
                        if let Some(text) = delta
                            && !text.is_empty()
                            && tx.send(StreamEvent::TextDelta(text)).await.is_err()
                        {
                            // Receiver gone: the session was cancelled.
                            return;
                        }
                    }
                    Err(e) => {
                        // One bad delta must not fail the response.
                        parse_errors = parse_errors.saturating_add(1);
                        tracing::warn!(
                            %e,
                            payload_bytes = data.len(),
                            "skipping invalid stream payload"
                        );
                        if parse_errors >= MAX_SSE_PARSE_ERRORS {
                            let _ = tx
                                .send(StreamEvent::Error(StreamError::new(
                                    StreamErrorKind::InvalidPayload,
                                    format!("invalid stream payload: {e}"),
                                )))
                                .await;
                            return;
                        }
                    }
                }
            }
        }

        // Premature EOF: connection closed without the [DONE] sentinel.
        let _ = tx
            .send(StreamEvent::Error(StreamError::connection(
                "connection closed before stream completed",
            )))
            .await;
    }

    /// Issue a non-streaming request and return the whole response text.
    pub async fn complete(&self, envelope: &PromptEnvelope) -> Result<String, StreamError> {
        let user_content = envelope.user_content();
        let outcome = send_with_retry(
            || self.build_request(envelope, &user_content, false),
            &self.retry,
        )
        .await;

        let response = match outcome {
            RetryOutcome::Success(response) => response,
            RetryOutcome::HttpError(response) => {
                let status = response.status();
                let body = read_capped_body(response).await;
                return Err(StreamError::api(format!("API error {status}: {body}")));
            }
            RetryOutcome::ConnectionError { source, .. } => {
                return Err(classify_request_error(&source));
            }
        };

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| StreamError::new(StreamErrorKind::InvalidPayload, e.to_string()))?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                StreamError::new(
                    StreamErrorKind::InvalidPayload,
                    "completion carried no content",
                )
            })
    }
}

fn is_event_stream(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/event-stream"))
}

#[cfg(test)]
mod tests {
    use super::ChatClient;
    use scribe_types::{PromptEnvelope, Settings, StreamErrorKind, StreamEvent};
    use tokio::sync::mpsc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn envelope() -> PromptEnvelope {
        PromptEnvelope {
            system_instructions: "rules".to_string(),
            task: "summarize".to_string(),
            context: String::new(),
            references: Vec::new(),
        }
    }

    fn settings_for(server: &MockServer) -> Settings {
        Settings::new("sk-test", "test-model")
            .unwrap()
            .with_endpoint(format!("{}/v1/chat/completions", server.uri()))
            .with_request_timeout_secs(5)
    }

    fn sse_body(deltas: &[&str], done: bool) -> String {
        let mut body = String::new();
        for delta in deltas {
            let payload = serde_json::json!({
                "choices": [{"delta": {"content": delta}}]
            });
            body.push_str(&format!("data: {payload}\n\n"));
        }
        if done {
            body.push_str("data: [DONE]\n\n");
        }
        body
    }

    fn sse_response(body: String) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(body)
    }

    async fn collect_events(client: &ChatClient) -> Vec<StreamEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        client.stream_chat(&envelope(), tx).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn deltas_are_forwarded_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(sse_response(sse_body(&["Hel", "lo"], true)))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(&settings_for(&server));
        let events = collect_events(&client).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("Hel".to_string()),
                StreamEvent::TextDelta("lo".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn malformed_delta_is_skipped() {
        let server = MockServer::start().await;
        let mut body = String::from("data: {not json}\n\n");
        body.push_str(&sse_body(&["ok"], true));
        Mock::given(method("POST"))
            .respond_with(sse_response(body))
            .mount(&server)
            .await;

        let client = ChatClient::new(&settings_for(&server));
        let events = collect_events(&client).await;
        assert_eq!(
            events,
            vec![StreamEvent::TextDelta("ok".to_string()), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn premature_eof_is_a_connection_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse_response(sse_body(&["partial"], false)))
            .mount(&server)
            .await;

        let client = ChatClient::new(&settings_for(&server));
        let events = collect_events(&client).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            StreamEvent::Error(e) if e.kind == StreamErrorKind::Connection
        ));
    }

    #[tokio::test]
    async fn non_event_stream_response_is_stream_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string("{}"),
            )
            .mount(&server)
            .await;

        let client = ChatClient::new(&settings_for(&server));
        let events = collect_events(&client).await;
        assert!(matches!(
            &events[0],
            StreamEvent::Error(e) if e.kind == StreamErrorKind::StreamUnsupported
        ));
    }

    #[tokio::test]
    async fn api_error_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let client = ChatClient::new(&settings_for(&server));
        let events = collect_events(&client).await;
        match &events[0] {
            StreamEvent::Error(e) => {
                assert_eq!(e.kind, StreamErrorKind::Api);
                assert!(e.message.contains("401"));
                assert!(e.message.contains("bad key"));
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn complete_returns_whole_message() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "<p>Hi</p>"}}]
        });
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = ChatClient::new(&settings_for(&server));
        let text = client.complete(&envelope()).await.unwrap();
        assert_eq!(text, "<p>Hi</p>");
    }
}
