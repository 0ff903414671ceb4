//! Cooperative cancellation and progress text.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Shared cancellation flag, cloneable across threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears a previous request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Progress of the current run: a cancellation token and a status text.
#[derive(Debug, Default)]
pub struct ProgressIndicator {
    token: CancelToken,
    text: Mutex<String>,
}

impl ProgressIndicator {
    /// Creates an indicator observing `token`.
    pub fn new(token: CancelToken) -> Self {
        Self {
            token,
            text: Mutex::new(String::new()),
        }
    }

    /// Returns `true` if the run should stop.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The token this indicator observes.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Replaces the status text.
    pub fn set_text(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::trace!(progress = %text);
        *self.text.lock().unwrap_or_else(|e| e.into_inner()) = text;
    }

    /// The current status text.
    pub fn text(&self) -> String {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
