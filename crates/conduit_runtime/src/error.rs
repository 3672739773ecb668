//! Execution errors.

use crate::result::ResultError;
use conduit_core::{codes, GraphqlError};
use thiserror::Error;

/// Errors raised while setting up or executing an operation.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// One or more GraphQL errors, e.g. argument coercion failures.
    #[error("{}", display_errors(.0))]
    Graphql(Vec<GraphqlError>),

    /// The operation was canceled.
    #[error("the operation was canceled")]
    Canceled,

    /// A resolver failed outside of field error handling.
    #[error("resolver failed: {0}")]
    Resolver(String),

    /// The source stream failed.
    #[error("source stream failed: {0}")]
    SourceStream(String),

    /// The operation is not a subscription.
    #[error("operation `{0}` is not a subscription")]
    NotASubscription(String),

    /// The subscription operation has no root field.
    #[error("the subscription operation has no root selection")]
    NoRootSelection,

    /// The root field cannot create a source stream.
    #[error("field `{0}` has no subscribe resolver")]
    NoSubscribeResolver(String),

    /// An operation context was used before `initialize`.
    #[error("the operation context was used before it was initialized")]
    ContextNotInitialized,

    /// Writing into the result tree failed.
    #[error(transparent)]
    Result(#[from] ResultError),
}

impl ExecutionError {
    /// Returns true if this error represents a cancellation.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Converts this error into a single client-facing error.
    ///
    /// Multiple GraphQL errors come back as an aggregate.
    #[must_use]
    pub fn to_graphql_error(&self) -> GraphqlError {
        match self {
            Self::Graphql(errors) if errors.len() == 1 => errors[0].clone(),
            Self::Graphql(errors) => GraphqlError::aggregate(errors.iter().cloned()),
            Self::Canceled => GraphqlError::from_error(self).with_code(codes::OPERATION_CANCELED),
            Self::SourceStream(_) => {
                GraphqlError::from_error(self).with_code(codes::SOURCE_STREAM_ERROR)
            }
            _ => GraphqlError::from_error(self).with_code(codes::UNEXPECTED_EXECUTION_ERROR),
        }
    }
}

fn display_errors(errors: &[GraphqlError]) -> String {
    match errors {
        [] => "unknown GraphQL error".to_string(),
        [error] => error.message.clone(),
        errors => errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let error = ExecutionError::Graphql(vec![GraphqlError::new("a"), GraphqlError::new("b")]);
        assert_eq!(error.to_string(), "a; b");
        assert_eq!(ExecutionError::Canceled.to_string(), "the operation was canceled");
    }

    #[test]
    fn test_to_graphql_error() {
        let single = ExecutionError::Graphql(vec![GraphqlError::new("only")]);
        assert_eq!(single.to_graphql_error().message, "only");

        let many = ExecutionError::Graphql(vec![GraphqlError::new("a"), GraphqlError::new("b")]);
        assert_eq!(many.to_graphql_error().flatten().len(), 2);

        let canceled = ExecutionError::Canceled.to_graphql_error();
        assert_eq!(canceled.code.as_deref(), Some(codes::OPERATION_CANCELED));
        assert!(canceled.exception.is_some());
    }
}
