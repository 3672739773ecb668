//! Client-facing GraphQL errors.

use crate::path::Path;
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Message used for aggregate errors.
const AGGREGATE_MESSAGE: &str = "Multiple errors occurred.";

/// A GraphQL error as reported to clients.
///
/// An error may also be an *aggregate* of other errors. Aggregates only exist
/// while errors travel through the runtime; result builders flatten them
/// before they reach a response.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct GraphqlError {
    /// The error message.
    pub message: String,
    /// Where in the response the error happened.
    pub path: Option<Path>,
    /// Error code, serialized as `extensions.code`.
    pub code: Option<String>,
    /// Additional extension entries.
    pub extensions: IndexMap<String, Value>,
    /// The message of the underlying Rust error, if this error was captured
    /// from one. Never serialized.
    pub exception: Option<String>,
    aggregated: Vec<GraphqlError>,
}

impl GraphqlError {
    /// Creates a new error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            code: None,
            extensions: IndexMap::new(),
            exception: None,
            aggregated: Vec::new(),
        }
    }

    /// Captures an arbitrary error.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }

        Self {
            exception: Some(message.clone()),
            ..Self::new(message)
        }
    }

    /// Wraps several errors into one aggregate error.
    pub fn aggregate(errors: impl IntoIterator<Item = GraphqlError>) -> Self {
        Self {
            aggregated: errors.into_iter().collect(),
            ..Self::new(AGGREGATE_MESSAGE)
        }
    }

    /// Returns true if this error wraps other errors.
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        !self.aggregated.is_empty()
    }

    /// Returns the wrapped errors of an aggregate.
    #[must_use]
    pub fn aggregated(&self) -> &[GraphqlError] {
        &self.aggregated
    }

    /// Expands aggregates (recursively) into their constituent errors.
    #[must_use]
    pub fn flatten(self) -> Vec<GraphqlError> {
        if self.aggregated.is_empty() {
            return vec![self];
        }
        self.aggregated
            .into_iter()
            .flat_map(GraphqlError::flatten)
            .collect()
    }

    /// Sets the response path.
    #[must_use]
    pub fn with_path(mut self, path: Path) -> Self {
        self.path = Some(path);
        self
    }

    /// Sets the error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Adds an extension entry.
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Replaces the message, keeping everything else.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Drops the captured exception message.
    #[must_use]
    pub fn without_exception(mut self) -> Self {
        self.exception = None;
        self
    }
}

impl Serialize for GraphqlError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let has_extensions = self.code.is_some() || !self.extensions.is_empty();
        let len = 1 + usize::from(self.path.is_some()) + usize::from(has_extensions);

        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("message", &self.message)?;
        if let Some(ref path) = self.path {
            map.serialize_entry("path", path)?;
        }
        if has_extensions {
            map.serialize_entry("extensions", &Extensions(self))?;
        }
        map.end()
    }
}

struct Extensions<'a>(&'a GraphqlError);

impl Serialize for Extensions<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let error = self.0;
        let mut map = serializer.serialize_map(None)?;
        if let Some(ref code) = error.code {
            map.serialize_entry("code", code)?;
        }
        for (key, value) in &error.extensions {
            if key == "code" && error.code.is_some() {
                continue;
            }
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Common error codes.
pub mod codes {
    pub const UNEXPECTED_EXECUTION_ERROR: &str = "UNEXPECTED_EXECUTION_ERROR";
    pub const ARGUMENT_COERCION: &str = "ARGUMENT_COERCION";
    pub const NON_NULL_VIOLATION: &str = "NON_NULL_VIOLATION";
    pub const RESOLVER_ERROR: &str = "RESOLVER_ERROR";
    pub const OPERATION_CANCELED: &str = "OPERATION_CANCELED";
    pub const SOURCE_STREAM_ERROR: &str = "SOURCE_STREAM_ERROR";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("outer")]
    struct Outer(#[source] Inner);

    #[derive(Debug, Error)]
    #[error("inner")]
    struct Inner;

    #[test]
    fn test_from_error_walks_sources() {
        let error = GraphqlError::from_error(&Outer(Inner));
        assert_eq!(error.message, "outer: inner");
        assert_eq!(error.exception.as_deref(), Some("outer: inner"));
    }

    #[test]
    fn test_flatten_aggregate() {
        let e1 = GraphqlError::new("e1");
        let e2 = GraphqlError::new("e2");
        let e3 = GraphqlError::new("e3");
        let nested = GraphqlError::aggregate([e2.clone(), e3.clone()]);
        let aggregate = GraphqlError::aggregate([e1.clone(), nested]);

        assert!(aggregate.is_aggregate());
        assert_eq!(aggregate.flatten(), vec![e1, e2, e3]);
    }

    #[test]
    fn test_flatten_single() {
        let error = GraphqlError::new("single");
        assert!(!error.is_aggregate());
        assert_eq!(error.clone().flatten(), vec![error]);
    }

    #[test]
    fn test_serialize() {
        let error = GraphqlError::new("Boom")
            .with_path(Path::from_iter(["onMessage"]))
            .with_code(codes::RESOLVER_ERROR)
            .with_extension("retry", serde_json::json!(false));

        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "message": "Boom",
                "path": ["onMessage"],
                "extensions": {"code": "RESOLVER_ERROR", "retry": false}
            })
        );
    }

    #[test]
    fn test_serialize_minimal() {
        let json = serde_json::to_value(GraphqlError::new("plain")).unwrap();
        assert_eq!(json, serde_json::json!({"message": "plain"}));
    }
}
