//! Shaping errors before they reach clients.

use conduit_core::{codes, GraphqlError};
use serde_json::json;

const UNEXPECTED_ERROR_MESSAGE: &str = "Unexpected Execution Error";

/// Rewrites errors before they are returned.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, error: GraphqlError) -> GraphqlError;
}

/// Error handler options.
#[derive(Debug, Clone, Default)]
pub struct ErrorHandlerOptions {
    /// Keep the messages of captured Rust errors.
    pub include_exception_details: bool,
}

/// Hides captured error details unless configured otherwise.
#[derive(Debug, Clone, Default)]
pub struct DefaultErrorHandler {
    options: ErrorHandlerOptions,
}

impl DefaultErrorHandler {
    pub fn new(options: ErrorHandlerOptions) -> Self {
        Self { options }
    }
}

impl ErrorHandler for DefaultErrorHandler {
    fn handle(&self, error: GraphqlError) -> GraphqlError {
        let Some(exception) = error.exception.clone() else {
            return error;
        };

        if self.options.include_exception_details {
            return error.with_extension("exception", json!({ "message": exception }));
        }

        let error = if error.code.is_none() {
            error.with_code(codes::UNEXPECTED_EXECUTION_ERROR)
        } else {
            error
        };
        error
            .with_message(UNEXPECTED_ERROR_MESSAGE)
            .without_exception()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("database is down")]
    struct DbError;

    #[test]
    fn test_hides_exception_details() {
        let handler = DefaultErrorHandler::default();
        let error = handler.handle(GraphqlError::from_error(&DbError));

        assert_eq!(error.message, UNEXPECTED_ERROR_MESSAGE);
        assert_eq!(error.code.as_deref(), Some(codes::UNEXPECTED_EXECUTION_ERROR));
        assert!(error.exception.is_none());
    }

    #[test]
    fn test_includes_exception_details() {
        let handler = DefaultErrorHandler::new(ErrorHandlerOptions {
            include_exception_details: true,
        });
        let error = handler.handle(GraphqlError::from_error(&DbError));

        assert_eq!(error.message, "database is down");
        assert_eq!(error.extensions["exception"], json!({"message": "database is down"}));
    }

    #[test]
    fn test_plain_errors_pass_through() {
        let handler = DefaultErrorHandler::default();
        let error = GraphqlError::new("Not allowed").with_code("FORBIDDEN");
        assert_eq!(handler.handle(error.clone()), error);
    }
}
