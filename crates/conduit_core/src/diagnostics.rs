//! Diagnostic scopes and error kinds.

use serde::Serialize;
use std::fmt;
use tracing::Span;

/// Classifies errors reported to diagnostic listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The request document could not be parsed.
    SyntaxError,
    /// The request document failed validation.
    ValidationError,
    /// The request failed before execution started.
    RequestError,
    /// A field resolver failed.
    FieldError,
    /// Processing a subscription event failed.
    SubscriptionEventError,
    /// Anything else.
    OtherError,
}

impl ErrorKind {
    /// Returns the string representation of the error kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SyntaxError => "SYNTAX_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::RequestError => "REQUEST_ERROR",
            Self::FieldError => "FIELD_ERROR",
            Self::SubscriptionEventError => "SUBSCRIPTION_EVENT_ERROR",
            Self::OtherError => "OTHER_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type CloseFn = Box<dyn FnOnce() + Send + Sync>;

/// A scope opened by a diagnostic event.
///
/// The scope closes when it is dropped. Closing runs the registered close
/// callback exactly once.
#[must_use = "a diagnostic scope closes as soon as it is dropped"]
pub struct DiagnosticScope {
    span: Span,
    on_close: Option<CloseFn>,
}

impl DiagnosticScope {
    /// A scope that records nothing.
    pub fn noop() -> Self {
        Self {
            span: Span::none(),
            on_close: None,
        }
    }

    /// A scope tied to a tracing span.
    pub fn new(span: Span) -> Self {
        Self {
            span,
            on_close: None,
        }
    }

    /// Registers a callback that runs when the scope closes.
    pub fn on_close(mut self, f: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }

    /// The tracing span of this scope.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Closes the scope now.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for DiagnosticScope {
    fn drop(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

impl fmt::Debug for DiagnosticScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticScope")
            .field("span", &self.span)
            .field("open", &self.on_close.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_scope_closes_once() {
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed);

        let scope = DiagnosticScope::noop().on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(closed.load(Ordering::SeqCst), 0);

        scope.close();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(
            ErrorKind::SubscriptionEventError.to_string(),
            "SUBSCRIPTION_EVENT_ERROR"
        );
    }
}
