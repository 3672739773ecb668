//! Per-operation execution state.

use crate::dispatcher::BatchDispatcher;
use crate::error::ExecutionError;
use crate::operation::{Operation, Variables};
use crate::request::RequestContext;
use crate::result::{OperationResultBuilder, ResultTree};
use crate::services::Services;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Key under which the current subscription event is stored, both in the
/// scoped context data and in the result's context data.
pub const EVENT_MESSAGE: &str = "conduit.eventMessage";

/// Immutable, cheaply cloned context data scoped to a resolver subtree.
pub type ScopedContextData = im::HashMap<String, Value>;

/// The value the root resolvers see as their parent.
pub type RootValue = Arc<dyn Any + Send + Sync>;

struct ContextState {
    request_id: String,
    operation: Arc<Operation>,
    variables: Variables,
    services: Services,
    dispatcher: Arc<dyn BatchDispatcher>,
    root_value: Option<RootValue>,
}

/// Heavyweight execution state for one operation run.
///
/// Contexts are rented from an
/// [`OperationContextPool`](crate::pool::OperationContextPool), initialized
/// for a request, and reset before they go back.
#[derive(Default)]
pub struct OperationContext {
    state: Option<ContextState>,
    tree: ResultTree,
    result: OperationResultBuilder,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the context to a request.
    pub fn initialize(
        &mut self,
        request: &RequestContext,
        services: Services,
        dispatcher: Arc<dyn BatchDispatcher>,
        root_value: Option<RootValue>,
    ) {
        self.state = Some(ContextState {
            request_id: request.id().to_string(),
            operation: Arc::clone(request.operation()),
            variables: request.variables(),
            services,
            dispatcher,
            root_value,
        });
    }

    /// True between `initialize` and the next `reset`.
    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    fn state(&self) -> Result<&ContextState, ExecutionError> {
        self.state.as_ref().ok_or(ExecutionError::ContextNotInitialized)
    }

    /// Id of the request this context runs for.
    pub fn request_id(&self) -> Result<&str, ExecutionError> {
        Ok(&self.state()?.request_id)
    }

    /// The operation being executed.
    pub fn operation(&self) -> Result<&Arc<Operation>, ExecutionError> {
        Ok(&self.state()?.operation)
    }

    /// Coerced variable values of the request.
    pub fn variables(&self) -> Result<&Variables, ExecutionError> {
        Ok(&self.state()?.variables)
    }

    /// Services visible to resolvers during this run.
    pub fn services(&self) -> Result<&Services, ExecutionError> {
        Ok(&self.state()?.services)
    }

    /// Batch dispatcher shared by the resolvers of this run.
    pub fn dispatcher(&self) -> Result<&Arc<dyn BatchDispatcher>, ExecutionError> {
        Ok(&self.state()?.dispatcher)
    }

    /// The root value the operation resolves against, if any.
    pub fn root_value(&self) -> Result<Option<&RootValue>, ExecutionError> {
        Ok(self.state()?.root_value.as_ref())
    }

    /// The result buffer resolvers write into.
    pub fn result_tree(&self) -> &ResultTree {
        &self.tree
    }

    /// Mutable access to the result buffer.
    pub fn result_tree_mut(&mut self) -> &mut ResultTree {
        &mut self.tree
    }

    /// The builder collecting the result of this run.
    pub fn result(&self) -> &OperationResultBuilder {
        &self.result
    }

    /// Mutable access to the result builder.
    pub fn result_mut(&mut self) -> &mut OperationResultBuilder {
        &mut self.result
    }

    /// Takes the builder, leaving an empty one behind.
    pub fn take_result(&mut self) -> OperationResultBuilder {
        std::mem::take(&mut self.result)
    }

    /// Drops whatever was written into the result so far.
    pub fn discard_result(&mut self) {
        self.result = OperationResultBuilder::default();
        self.tree.clear();
    }

    /// Returns the context to its pristine state.
    pub fn reset(&mut self) {
        self.state = None;
        self.discard_result();
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("initialized", &self.state.is_some())
            .field("nodes", &self.tree.len())
            .field("result", &self.result)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::NoopBatchDispatcher;
    use crate::operation::Selection;
    use crate::services::ServiceProvider;
    use conduit_core::GraphqlError;

    #[test]
    fn test_uninitialized_access_fails() {
        let ctx = OperationContext::new();
        assert!(matches!(ctx.operation(), Err(ExecutionError::ContextNotInitialized)));
        assert!(matches!(ctx.variables(), Err(ExecutionError::ContextNotInitialized)));
    }

    #[test]
    fn test_initialize_and_reset() {
        let operation = Operation::subscription("op", Selection::new("onMessage"));
        let request = RequestContext::new(operation, ServiceProvider::default()).with_id("r1");

        let mut ctx = OperationContext::new();
        ctx.initialize(&request, Services::new(), Arc::new(NoopBatchDispatcher), None);
        assert_eq!(ctx.request_id().unwrap(), "r1");
        assert_eq!(ctx.operation().unwrap().id, "op");
        assert!(ctx.root_value().unwrap().is_none());

        ctx.result_mut().add_error(GraphqlError::new("boom"));
        let node = ctx.result_tree_mut().rent_object(1);

        ctx.reset();
        assert!(!ctx.is_initialized());
        assert!(!ctx.result().has_errors());
        assert!(!ctx.result_tree().contains(node));
    }
}
