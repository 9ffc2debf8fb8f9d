//! User-notification capability.
//!
//! The controller and inserter never talk to UI chrome directly; they are
//! handed a [`Notifier`] at the call site. Hosts plug in their own loader and
//! error-banner wiring; tests record calls.

/// UI notification channel injected into the generation controller.
pub trait Notifier {
    /// A generation request started; show progress feedback.
    fn show_loader(&self);

    /// The request reached a terminal state; hide progress feedback.
    fn hide_loader(&self);

    /// Surface a user-visible failure. The host owns presentation and
    /// auto-dismiss timing.
    fn show_error(&self, message: &str);
}

/// Notifier that only logs; for headless hosts and examples.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show_loader(&self) {
        tracing::debug!("generation started");
    }

    fn hide_loader(&self) {
        tracing::debug!("generation finished");
    }

    fn show_error(&self, message: &str) {
        tracing::error!(message, "generation failed");
    }
}
