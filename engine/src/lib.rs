//! Streaming generation and incremental document merge.
//!
//! # Architecture
//!
//! One generation session flows through three layers:
//!
//! - [`fragment::FragmentAssembler`] - reassembles structurally complete
//!   markup fragments from the raw token-delta stream
//! - [`insert::DocumentInserter`] - merges fragments into the live document,
//!   choosing an insertion strategy per element and maintaining one session
//!   cursor across fragment arrivals
//! - [`controller::GenerationController`] - orchestrates the request:
//!   reference fetching, context budgeting, the document read-only lock,
//!   bounded retries, cancellation, and cleanup
//!
//! The host document is reached only through the
//! [`scribe_document::DocumentEditor`] capability trait, and UI feedback only
//! through the injected [`notify::Notifier`], so every algorithm here runs
//! against the in-memory editor in tests.
//!
//! # Concurrency
//!
//! A session is one sequential awaited loop: the network read and the
//! character-by-character insertion both suspend cooperatively, so no two
//! document mutations race. Cancellation is observed at every suspension
//! point with at most one typing-delay of latency.

pub mod controller;
pub mod fragment;
pub mod insert;
pub mod notify;

pub use controller::{AssistRequest, GenerateError, GenerationController, GenerationOutcome};
pub use fragment::FragmentAssembler;
pub use insert::{DocumentInserter, SessionCancelled, TypingPolicy};
pub use notify::{LogNotifier, Notifier};
