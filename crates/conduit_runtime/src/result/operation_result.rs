//! Immutable operation results.

use conduit_core::{GraphqlError, Path};
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// An async callback that releases resources held by a result.
pub type CleanupHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Ordered key/value bag used for extensions and context data.
pub type DataMap = IndexMap<String, Value>;

/// The frozen result of one execution.
///
/// Built by [`OperationResultBuilder`](super::OperationResultBuilder).
/// `data` and `items` are mutually exclusive. Context data travels with the
/// result but is never written to the response.
pub struct OperationResult {
    pub(super) data: Option<Arc<Map<String, Value>>>,
    pub(super) items: Option<Arc<Vec<Value>>>,
    pub(super) errors: Option<Vec<GraphqlError>>,
    pub(super) extensions: Option<DataMap>,
    pub(super) context_data: Option<DataMap>,
    pub(super) incremental: Option<Vec<OperationResult>>,
    pub(super) label: Option<String>,
    pub(super) path: Option<Path>,
    pub(super) has_next: Option<bool>,
    pub(super) is_data_set: bool,
    pub(super) request_index: Option<usize>,
    pub(super) variable_index: Option<usize>,
    pub(super) cleanup: Mutex<Vec<CleanupHook>>,
}

impl OperationResult {
    /// The response data of an object result.
    #[must_use]
    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.data.as_deref()
    }

    /// The response items of a list result.
    #[must_use]
    pub fn items(&self) -> Option<&[Value]> {
        self.items.as_deref().map(Vec::as_slice)
    }

    /// Errors raised while executing, `None` when there were none.
    #[must_use]
    pub fn errors(&self) -> Option<&[GraphqlError]> {
        self.errors.as_deref()
    }

    /// Extension entries written to the response.
    #[must_use]
    pub fn extensions(&self) -> Option<&DataMap> {
        self.extensions.as_ref()
    }

    /// Data carried alongside the result but never serialized.
    #[must_use]
    pub fn context_data(&self) -> Option<&DataMap> {
        self.context_data.as_ref()
    }

    /// Incremental patches in the order they were added.
    #[must_use]
    pub fn incremental(&self) -> Option<&[OperationResult]> {
        self.incremental.as_deref()
    }

    /// Label of the deferred fragment this patch belongs to.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Where an incremental patch attaches in the initial result.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_ref()
    }

    /// Whether more incremental payloads follow.
    #[must_use]
    pub fn has_next(&self) -> Option<bool> {
        self.has_next
    }

    /// True once data was explicitly set, even to `None`.
    #[must_use]
    pub fn is_data_set(&self) -> bool {
        self.is_data_set
    }

    /// Position of the request inside a batch.
    #[must_use]
    pub fn request_index(&self) -> Option<usize> {
        self.request_index
    }

    /// Position of the variable set inside a variable batch.
    #[must_use]
    pub fn variable_index(&self) -> Option<usize> {
        self.variable_index
    }

    /// Number of cleanup hooks that have not run yet.
    #[must_use]
    pub fn pending_cleanup(&self) -> usize {
        self.cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Runs the registered cleanup hooks in registration order.
    ///
    /// Each hook runs at most once; later calls are no-ops. Hooks still
    /// pending when the result is dropped are spawned onto the current
    /// tokio runtime.
    pub async fn cleanup(&self) {
        let hooks = std::mem::take(
            &mut *self
                .cleanup
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for hook in hooks {
            hook().await;
        }
    }

    pub(super) fn shared_data(&self) -> Option<Arc<Map<String, Value>>> {
        self.data.clone()
    }

    pub(super) fn shared_items(&self) -> Option<Arc<Vec<Value>>> {
        self.items.clone()
    }
}

impl Serialize for OperationResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        if let Some(index) = self.request_index {
            map.serialize_entry("requestIndex", &index)?;
        }
        if let Some(index) = self.variable_index {
            map.serialize_entry("variableIndex", &index)?;
        }
        if let Some(ref label) = self.label {
            map.serialize_entry("label", label)?;
        }
        if let Some(ref path) = self.path {
            map.serialize_entry("path", path)?;
        }
        if let Some(ref items) = self.items {
            map.serialize_entry("items", items.as_ref())?;
        } else if self.data.is_some() || self.is_data_set {
            map.serialize_entry("data", &self.data.as_deref())?;
        }
        if let Some(ref errors) = self.errors {
            map.serialize_entry("errors", errors)?;
        }
        if let Some(ref incremental) = self.incremental {
            map.serialize_entry("incremental", incremental)?;
        }
        if let Some(ref extensions) = self.extensions {
            map.serialize_entry("extensions", extensions)?;
        }
        if let Some(has_next) = self.has_next {
            map.serialize_entry("hasNext", &has_next)?;
        }
        map.end()
    }
}

impl Drop for OperationResult {
    fn drop(&mut self) {
        let hooks = std::mem::take(
            self.cleanup
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if hooks.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for hook in hooks {
                        hook().await;
                    }
                });
            }
            Err(_) => warn!(
                hooks = hooks.len(),
                "operation result dropped outside a runtime, cleanup skipped"
            ),
        }
    }
}

impl fmt::Debug for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationResult")
            .field("data", &self.data)
            .field("items", &self.items)
            .field("errors", &self.errors)
            .field("extensions", &self.extensions)
            .field("context_data", &self.context_data)
            .field("incremental", &self.incremental)
            .field("label", &self.label)
            .field("path", &self.path)
            .field("has_next", &self.has_next)
            .field("is_data_set", &self.is_data_set)
            .field("pending_cleanup", &self.pending_cleanup())
            .finish()
    }
}
