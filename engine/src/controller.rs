//! Generation orchestration.
//!
//! One [`GenerationController`] drives a whole request: reference fetching,
//! context budgeting, the streaming network request, fragment reassembly,
//! and incremental insertion. The document is placed under a read-only lock
//! for the session's lifetime and the lock is released on every exit path.
//!
//! Retry policy: a transport failure with a retryable kind re-issues the
//! request with the identical envelope and a fresh fragment assembler. No
//! partial-fragment state survives across attempts. Once insertion has
//! begun, partial content is kept on failure and on cancellation; nothing is
//! rolled back.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use scribe_context::{BudgetAllocator, PromptAssembler};
use scribe_document::DocumentEditor;
use scribe_providers::chat::ChatClient;
use scribe_providers::fetch::{FetchError, ReferenceFetcher};
use scribe_types::{PromptEnvelope, ReferenceDocument, Settings, StreamError, StreamEvent};

use crate::fragment::FragmentAssembler;
use crate::insert::{DocumentInserter, SessionCancelled, TypingPolicy};
use crate::notify::Notifier;

const STREAM_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A user request against the current document.
#[derive(Debug, Clone)]
pub struct AssistRequest {
    /// Natural-language task, possibly a slash-command.
    pub task: String,
    /// URLs to fetch as reference material.
    pub reference_urls: Vec<String>,
    /// Response language, from the document locale.
    pub language: String,
}

/// Why a generation session failed.
#[derive(Debug, Clone, Error)]
pub enum GenerateError {
    #[error(transparent)]
    ReferenceFetch(#[from] FetchError),
    #[error("request failed after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: StreamError,
    },
    #[error("the model returned an empty response")]
    EmptyResponse,
}

/// Terminal state of a generation session.
///
/// Failures are surfaced through the [`Notifier`] before this is returned;
/// the host gets the outcome as a value, never as a propagated exception.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    Completed,
    Aborted,
    Failed(GenerateError),
}

impl GenerationOutcome {
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Orchestrates one generation session at a time.
#[derive(Debug, Clone)]
pub struct GenerationController {
    settings: Settings,
    client: ChatClient,
    fetcher: ReferenceFetcher,
}

impl GenerationController {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            client: ChatClient::new(&settings),
            fetcher: ReferenceFetcher::new(),
            settings,
        }
    }

    /// Full pipeline: fetch references, budget context, assemble the prompt,
    /// generate into the document.
    pub async fn assist<E: DocumentEditor, N: Notifier>(
        &self,
        editor: &mut E,
        notifier: &N,
        request: &AssistRequest,
        cancel: CancellationToken,
    ) -> GenerationOutcome {
        let references = match self.fetcher.fetch_all(&request.reference_urls).await {
            Ok(references) => references,
            Err(e) => {
                // Fail fast and fail together: a silently reduced reference
                // set would change the prompt without anyone noticing.
                notifier.show_error(&e.to_string());
                return GenerationOutcome::Failed(e.into());
            }
        };

        let envelope = self.compose(editor, &request.task, &request.language, references);
        self.generate(editor, notifier, &envelope, cancel).await
    }

    /// Budget the context window and assemble the envelope for `task`.
    #[must_use]
    pub fn compose<E: DocumentEditor>(
        &self,
        editor: &E,
        task: &str,
        language: &str,
        references: Vec<ReferenceDocument>,
    ) -> PromptEnvelope {
        let allocator = BudgetAllocator::new(self.settings.editor_context_ratio());
        let allocation = allocator.allocate(
            self.settings.context_size(),
            &editor.plain_text(),
            editor.selection_text_offset(),
            references,
        );
        let assembler = PromptAssembler::new(language, editor.allowed_markup_vocabulary());
        assembler.assemble(
            task,
            &allocation.editor_context,
            allocation.references,
            editor.is_empty(),
        )
    }

    /// Run one generation session for an already-assembled envelope.
    ///
    /// Locks the document, streams the response into it, and releases the
    /// lock whatever happens. Failures are reported through `notifier` and
    /// returned as a [`GenerationOutcome`], not raised.
    pub async fn generate<E: DocumentEditor, N: Notifier>(
        &self,
        editor: &mut E,
        notifier: &N,
        envelope: &PromptEnvelope,
        cancel: CancellationToken,
    ) -> GenerationOutcome {
        let request_id = Uuid::new_v4();
        let lock_id = format!("scribe-generation-{request_id}");
        tracing::debug!(%request_id, stream = self.settings.stream(), "starting generation session");

        editor.enable_read_only(&lock_id);
        notifier.show_loader();

        let outcome = self.run_session(editor, envelope, &cancel).await;

        notifier.hide_loader();
        editor.disable_read_only(&lock_id);

        match &outcome {
            GenerationOutcome::Completed => {
                tracing::debug!(%request_id, "generation completed");
            }
            GenerationOutcome::Aborted => {
                tracing::debug!(%request_id, "generation aborted");
            }
            GenerationOutcome::Failed(e) => {
                tracing::warn!(%request_id, error = %e, "generation failed");
                notifier.show_error(&e.to_string());
            }
        }
        outcome
    }

    async fn run_session<E: DocumentEditor>(
        &self,
        editor: &mut E,
        envelope: &PromptEnvelope,
        cancel: &CancellationToken,
    ) -> GenerationOutcome {
        let mut inserter = DocumentInserter::new(TypingPolicy::new(Duration::from_millis(
            self.settings.typing_delay_ms(),
        )));

        // A non-collapsed selection means "replace this": clear it so the
        // session cursor starts where the removed content was.
        if let Some(range) = editor.selection_range()
            && let Err(e) = editor.remove_range(range)
        {
            tracing::warn!(error = %e, "could not clear the selected range");
        }

        if !self.settings.stream() {
            return self.run_whole_document(editor, envelope, &mut inserter, cancel).await;
        }

        let mut retries_remaining = self.settings.max_retries();
        let mut attempts = 1u32;

        loop {
            let (tx, mut rx) = mpsc::channel(STREAM_EVENT_CHANNEL_CAPACITY);
            let client = self.client.clone();
            let request_envelope = envelope.clone();
            let producer =
                tokio::spawn(async move { client.stream_chat(&request_envelope, tx).await });

            // A clean reader per attempt: no partial-fragment state carries
            // across retries.
            let mut assembler = FragmentAssembler::new();

            let failure: Option<StreamError> = loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => {
                        producer.abort();
                        return GenerationOutcome::Aborted;
                    }
                    event = rx.recv() => event,
                };

                match event {
                    Some(StreamEvent::TextDelta(delta)) => {
                        if let Some(fragment) = assembler.push_delta(&delta)
                            && let Err(SessionCancelled) =
                                inserter.apply_fragment(editor, &fragment, cancel).await
                        {
                            producer.abort();
                            return GenerationOutcome::Aborted;
                        }
                    }
                    Some(StreamEvent::Done) => {
                        // Best-effort flush of a trailing incomplete fragment.
                        if let Some(fragment) = assembler.finish()
                            && let Err(SessionCancelled) =
                                inserter.apply_fragment(editor, &fragment, cancel).await
                        {
                            return GenerationOutcome::Aborted;
                        }
                        break None;
                    }
                    Some(StreamEvent::Error(e)) => break Some(e),
                    None => break Some(StreamError::connection("event channel closed")),
                }
            };

            match failure {
                None => {
                    return if inserter.has_inserted() {
                        GenerationOutcome::Completed
                    } else {
                        GenerationOutcome::Failed(GenerateError::EmptyResponse)
                    };
                }
                Some(error) if error.kind.is_retryable() && retries_remaining > 0 => {
                    retries_remaining -= 1;
                    attempts += 1;
                    tracing::debug!(
                        %error,
                        retries_remaining,
                        "retrying generation with identical prompt"
                    );
                }
                Some(error) => {
                    return GenerationOutcome::Failed(GenerateError::Transport {
                        attempts,
                        source: error,
                    });
                }
            }
        }
    }

    /// Non-streaming mode: one whole-document payload through the inserter.
    async fn run_whole_document<E: DocumentEditor>(
        &self,
        editor: &mut E,
        envelope: &PromptEnvelope,
        inserter: &mut DocumentInserter,
        cancel: &CancellationToken,
    ) -> GenerationOutcome {
        let result = tokio::select! {
            () = cancel.cancelled() => return GenerationOutcome::Aborted,
            result = self.client.complete(envelope) => result,
        };

        match result {
            Ok(text) if !text.trim().is_empty() => {
                match inserter.apply_fragment(editor, &text, cancel).await {
                    Ok(()) => GenerationOutcome::Completed,
                    Err(SessionCancelled) => GenerationOutcome::Aborted,
                }
            }
            Ok(_) => GenerationOutcome::Failed(GenerateError::EmptyResponse),
            Err(e) => GenerationOutcome::Failed(GenerateError::Transport {
                attempts: 1,
                source: e,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AssistRequest, GenerateError, GenerationController, GenerationOutcome};
    use crate::notify::Notifier;
    use scribe_document::memory::MemoryEditor;
    use scribe_document::{Position, Range};
    use scribe_types::Settings;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingNotifier {
        errors: Mutex<Vec<String>>,
        loader_events: Mutex<Vec<&'static str>>,
    }

    impl Notifier for RecordingNotifier {
        fn show_loader(&self) {
            self.loader_events.lock().unwrap().push("show");
        }

        fn hide_loader(&self) {
            self.loader_events.lock().unwrap().push("hide");
        }

        fn show_error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    fn sse_body(deltas: &[&str]) -> String {
        let mut body = String::new();
        for delta in deltas {
            let payload = serde_json::json!({
                "choices": [{"delta": {"content": delta}}]
            });
            body.push_str(&format!("data: {payload}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn sse_response(body: String) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(body)
    }

    fn controller_for(server: &MockServer) -> GenerationController {
        let settings = Settings::new("sk-test", "test-model")
            .unwrap()
            .with_endpoint(format!("{}/v1/chat/completions", server.uri()))
            .with_request_timeout_secs(1)
            .with_typing_delay_ms(0);
        GenerationController::new(settings)
    }

    fn request() -> AssistRequest {
        AssistRequest {
            task: "/summarize".to_string(),
            reference_urls: Vec::new(),
            language: "English".to_string(),
        }
    }

    #[tokio::test]
    async fn streamed_response_lands_in_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse_response(sse_body(&["<p>Hel", "lo</p>"])))
            .expect(1)
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        let mut editor = MemoryEditor::new();
        let notifier = RecordingNotifier::default();

        let outcome = controller
            .assist(&mut editor, &notifier, &request(), CancellationToken::new())
            .await;

        assert!(outcome.is_completed());
        assert_eq!(editor.to_html(), "<p>Hello</p>");
        assert!(!editor.is_read_only(), "lock must be released on success");
        assert_eq!(
            *notifier.loader_events.lock().unwrap(),
            vec!["show", "hide"]
        );
        assert!(notifier.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn timeout_retries_once_with_identical_prompt() {
        let server = MockServer::start().await;
        let attempt = AtomicU32::new(0);
        let body = sse_body(&["<p>ok</p>"]);

        Mock::given(method("POST"))
            .respond_with(move |_: &wiremock::Request| {
                if attempt.fetch_add(1, Ordering::SeqCst) == 0 {
                    // Stall past the 1s request timeout.
                    sse_response(body.clone()).set_delay(Duration::from_secs(3))
                } else {
                    sse_response(body.clone())
                }
            })
            .expect(2)
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        let mut editor = MemoryEditor::new();
        let notifier = RecordingNotifier::default();

        let outcome = controller
            .assist(&mut editor, &notifier, &request(), CancellationToken::new())
            .await;

        assert!(outcome.is_completed());
        assert_eq!(editor.to_html(), "<p>ok</p>");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[0].body, requests[1].body,
            "retried request must carry the identical envelope"
        );
    }

    #[tokio::test]
    async fn api_error_fails_without_retry_and_notifies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        let mut editor = MemoryEditor::new();
        let notifier = RecordingNotifier::default();

        let outcome = controller
            .assist(&mut editor, &notifier, &request(), CancellationToken::new())
            .await;

        assert!(matches!(
            outcome,
            GenerationOutcome::Failed(GenerateError::Transport { attempts: 1, .. })
        ));
        assert!(!editor.is_read_only(), "lock must be released on failure");
        let errors = notifier.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("401"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_aborts_and_releases_lock() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                sse_response(sse_body(&["<p>late</p>"])).set_delay(Duration::from_millis(800)),
            )
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        let mut editor = MemoryEditor::new();
        let notifier = RecordingNotifier::default();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let outcome = controller
            .assist(&mut editor, &notifier, &request(), cancel)
            .await;

        assert!(matches!(outcome, GenerationOutcome::Aborted));
        assert_eq!(editor.to_html(), "", "no insertions after cancellation");
        assert!(!editor.is_read_only(), "lock must be released on abort");
        assert!(
            notifier.errors.lock().unwrap().is_empty(),
            "cancellation is not an error"
        );
    }

    #[tokio::test]
    async fn non_collapsed_selection_is_replaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse_response(sse_body(&[" there"])))
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        let mut editor = MemoryEditor::new();
        let paragraph = editor.seed_paragraph("Hello world");
        editor.select_range(Range::new(
            Position::new(paragraph, 5),
            Position::new(paragraph, 11),
        ));
        let notifier = RecordingNotifier::default();

        let outcome = controller
            .assist(&mut editor, &notifier, &request(), CancellationToken::new())
            .await;

        assert!(outcome.is_completed());
        assert_eq!(editor.to_html(), "<p>Hello there</p>");
    }

    #[tokio::test]
    async fn empty_stream_is_an_empty_response_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse_response("data: [DONE]\n\n".to_string()))
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        let mut editor = MemoryEditor::new();
        let notifier = RecordingNotifier::default();

        let outcome = controller
            .assist(&mut editor, &notifier, &request(), CancellationToken::new())
            .await;

        assert!(matches!(
            outcome,
            GenerationOutcome::Failed(GenerateError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn reference_fetch_failure_aborts_before_any_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/source"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(sse_response(sse_body(&["<p>x</p>"])))
            .expect(0)
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        let mut editor = MemoryEditor::new();
        let notifier = RecordingNotifier::default();
        let request = AssistRequest {
            task: "compare".to_string(),
            reference_urls: vec![format!("{}/source", server.uri())],
            language: "English".to_string(),
        };

        let outcome = controller
            .assist(&mut editor, &notifier, &request, CancellationToken::new())
            .await;

        assert!(matches!(
            outcome,
            GenerationOutcome::Failed(GenerateError::ReferenceFetch(_))
        ));
        assert!(editor.to_html().is_empty());
        let errors = notifier.errors.lock().unwrap();
        assert!(errors[0].starts_with("failed to fetch:"));
    }

    #[tokio::test]
    async fn composed_prompt_carries_task_and_context() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse_response(sse_body(&["<p>done</p>"])))
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        let mut editor = MemoryEditor::new();
        editor.seed_paragraph("Our cat naps here.");
        let notifier = RecordingNotifier::default();

        controller
            .assist(&mut editor, &notifier, &request(), CancellationToken::new())
            .await;

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.starts_with("TASK:\nsummarize"), "got: {user}");
        assert!(user.contains("CONTEXT:\nOur cat naps here."));
        let system = body["messages"][0]["content"].as_str().unwrap();
        assert!(system.contains("Respond in English."));
        assert!(system.contains("Integrate the response"));
        assert!(body["stream"].as_bool().unwrap());
    }

    #[tokio::test]
    async fn non_streaming_mode_inserts_whole_payload() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant",
                "content": "<h2>Title</h2><p>Body text.</p>"}}]
        });
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let settings = Settings::new("sk-test", "test-model")
            .unwrap()
            .with_endpoint(format!("{}/v1/chat/completions", server.uri()))
            .with_typing_delay_ms(0)
            .with_stream(false);
        let controller = GenerationController::new(settings);
        let mut editor = MemoryEditor::new();
        let notifier = RecordingNotifier::default();

        let outcome = controller
            .assist(&mut editor, &notifier, &request(), CancellationToken::new())
            .await;

        assert!(outcome.is_completed());
        assert_eq!(editor.to_html(), "<h2>Title</h2><p>Body text.</p>");
    }
}
