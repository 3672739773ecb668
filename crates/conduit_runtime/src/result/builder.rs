//! Assembling operation results.

use super::operation_result::{CleanupHook, DataMap, OperationResult};
use conduit_core::{GraphqlError, Path};
use futures_util::FutureExt;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors raised by [`OperationResultBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    /// `add_extension` was called with a key that is already present.
    #[error("an extension with the key `{0}` was already added")]
    DuplicateExtension(String),

    /// `add_context_data` was called with a key that is already present.
    #[error("context data with the key `{0}` was already added")]
    DuplicateContextData(String),
}

/// Mutable accumulator for an [`OperationResult`].
#[derive(Default)]
pub struct OperationResultBuilder {
    data: Option<Arc<Map<String, Value>>>,
    items: Option<Arc<Vec<Value>>>,
    errors: Vec<GraphqlError>,
    extensions: Option<DataMap>,
    context_data: Option<DataMap>,
    incremental: Vec<OperationResult>,
    label: Option<String>,
    path: Option<Path>,
    has_next: Option<bool>,
    is_data_set: bool,
    request_index: Option<usize>,
    variable_index: Option<usize>,
    cleanup: Vec<CleanupHook>,
}

impl OperationResultBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a builder from an existing result.
    ///
    /// Errors, extensions and context data are copied; data and items are
    /// shared with the source. Cleanup hooks and patches stay with the
    /// source result.
    #[must_use]
    pub fn from_result(result: &OperationResult) -> Self {
        Self {
            data: result.shared_data(),
            items: result.shared_items(),
            errors: result.errors().map(<[_]>::to_vec).unwrap_or_default(),
            extensions: result.extensions().cloned(),
            context_data: result.context_data().cloned(),
            label: result.label().map(str::to_string),
            path: result.path().cloned(),
            has_next: result.has_next(),
            is_data_set: result.is_data_set(),
            request_index: result.request_index(),
            variable_index: result.variable_index(),
            ..Self::default()
        }
    }

    /// Sets the data map and clears items.
    pub fn set_data(&mut self, data: Option<Map<String, Value>>) -> &mut Self {
        self.data = data.map(Arc::new);
        self.items = None;
        self.is_data_set = true;
        self
    }

    /// Sets the items. Non-empty items clear data.
    pub fn set_items(&mut self, items: Option<Vec<Value>>) -> &mut Self {
        if items.is_some() {
            self.data = None;
        }
        self.items = items.map(Arc::new);
        self
    }

    /// Appends an error. Aggregates are flattened.
    pub fn add_error(&mut self, error: GraphqlError) -> &mut Self {
        self.errors.extend(error.flatten());
        self
    }

    pub fn add_errors(&mut self, errors: impl IntoIterator<Item = GraphqlError>) -> &mut Self {
        for error in errors {
            self.add_error(error);
        }
        self
    }

    /// Adds an extension entry. Fails if the key is present.
    pub fn add_extension(
        &mut self,
        key: impl Into<String>,
        value: Value,
    ) -> Result<&mut Self, BuilderError> {
        insert_new(&mut self.extensions, key.into(), value).map_err(BuilderError::DuplicateExtension)?;
        Ok(self)
    }

    /// Sets an extension entry, overwriting any previous value.
    pub fn set_extension(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.extensions
            .get_or_insert_with(DataMap::new)
            .insert(key.into(), value);
        self
    }

    /// Replaces the whole extension bag.
    pub fn set_extensions(&mut self, extensions: Option<DataMap>) -> &mut Self {
        self.extensions = extensions;
        self
    }

    /// Adds a context data entry. Fails if the key is present.
    pub fn add_context_data(
        &mut self,
        key: impl Into<String>,
        value: Value,
    ) -> Result<&mut Self, BuilderError> {
        insert_new(&mut self.context_data, key.into(), value)
            .map_err(BuilderError::DuplicateContextData)?;
        Ok(self)
    }

    /// Sets a context data entry, overwriting any previous value.
    pub fn set_context_data(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.context_data
            .get_or_insert_with(DataMap::new)
            .insert(key.into(), value);
        self
    }

    /// Replaces the whole context data bag.
    pub fn set_context_data_map(&mut self, context_data: Option<DataMap>) -> &mut Self {
        self.context_data = context_data;
        self
    }

    /// Appends an incremental patch.
    pub fn add_patch(&mut self, patch: OperationResult) -> &mut Self {
        self.incremental.push(patch);
        self
    }

    /// Labels the result as a deferred patch.
    pub fn set_label(&mut self, label: Option<String>) -> &mut Self {
        self.label = label;
        self
    }

    /// Sets where a patch attaches in the initial result.
    pub fn set_path(&mut self, path: Option<Path>) -> &mut Self {
        self.path = path;
        self
    }

    /// Marks whether more incremental payloads follow.
    pub fn set_has_next(&mut self, has_next: Option<bool>) -> &mut Self {
        self.has_next = has_next;
        self
    }

    /// Records the position of the request inside a batch.
    pub fn set_request_index(&mut self, index: Option<usize>) -> &mut Self {
        self.request_index = index;
        self
    }

    /// Records the position of the variable set inside a batch.
    pub fn set_variable_index(&mut self, index: Option<usize>) -> &mut Self {
        self.variable_index = index;
        self
    }

    /// Registers an async callback to run when the result is cleaned up.
    pub fn register_for_cleanup<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cleanup.push(Box::new(move || hook().boxed()));
        self
    }

    /// Errors added so far.
    #[must_use]
    pub fn errors(&self) -> &[GraphqlError] {
        &self.errors
    }

    /// True once any error was added.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Looks up one context data entry.
    #[must_use]
    pub fn context_data(&self, key: &str) -> Option<&Value> {
        self.context_data.as_ref()?.get(key)
    }

    /// Freezes the builder. Empty collections become `None`.
    #[must_use]
    pub fn build(self) -> OperationResult {
        OperationResult {
            data: self.data,
            items: self.items,
            errors: non_empty(self.errors),
            extensions: self.extensions.filter(|m| !m.is_empty()),
            context_data: self.context_data.filter(|m| !m.is_empty()),
            incremental: non_empty(self.incremental),
            label: self.label,
            path: self.path,
            has_next: self.has_next,
            is_data_set: self.is_data_set,
            request_index: self.request_index,
            variable_index: self.variable_index,
            cleanup: Mutex::new(self.cleanup),
        }
    }

    /// A result carrying a single error. Aggregates are expanded.
    #[must_use]
    pub fn create_error(error: GraphqlError, context_data: Option<DataMap>) -> OperationResult {
        Self::create_errors(error.flatten(), context_data)
    }

    /// A result carrying the given errors and no data.
    #[must_use]
    pub fn create_errors(
        errors: impl IntoIterator<Item = GraphqlError>,
        context_data: Option<DataMap>,
    ) -> OperationResult {
        let mut builder = Self::new();
        builder.add_errors(errors).set_context_data_map(context_data);
        builder.build()
    }
}

fn insert_new(map: &mut Option<DataMap>, key: String, value: Value) -> Result<(), String> {
    let map = map.get_or_insert_with(DataMap::new);
    if map.contains_key(&key) {
        return Err(key);
    }
    map.insert(key, value);
    Ok(())
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

impl fmt::Debug for OperationResultBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationResultBuilder")
            .field("is_data_set", &self.is_data_set)
            .field("has_items", &self.items.is_some())
            .field("error_count", &self.errors.len())
            .field("extensions", &self.extensions)
            .field("context_data", &self.context_data)
            .field("patch_count", &self.incremental.len())
            .field("cleanup_count", &self.cleanup.len())
            .finish()
    }
}
