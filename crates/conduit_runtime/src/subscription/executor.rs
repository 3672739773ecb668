use super::{Subscription, SubscriptionRuntime};
use crate::error::ExecutionError;
use crate::error_handler::{DefaultErrorHandler, ErrorHandler};
use crate::executor::QueryExecutor;
use crate::instrumentation::{DiagnosticEvents, TracingDiagnosticEvents};
use crate::operation::OperationKind;
use crate::pool::OperationContextPool;
use crate::request::RequestContext;
use std::fmt;
use std::sync::Arc;

/// Starts subscriptions.
///
/// Owns the collaborators every subscription needs: the context pool, the
/// query executor run per event, the diagnostics sink and the error handler.
#[derive(Clone)]
pub struct SubscriptionExecutor {
    runtime: SubscriptionRuntime,
}

impl SubscriptionExecutor {
    /// Creates an executor that logs diagnostics with `tracing` and hides
    /// exception details.
    pub fn new(pool: impl Into<Arc<OperationContextPool>>, query_executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            runtime: SubscriptionRuntime {
                pool: pool.into(),
                query_executor,
                diagnostics: Arc::new(TracingDiagnosticEvents),
                error_handler: Arc::new(DefaultErrorHandler::default()),
            },
        }
    }

    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticEvents>) -> Self {
        self.runtime.diagnostics = diagnostics;
        self
    }

    #[must_use]
    pub fn with_error_handler(mut self, error_handler: Arc<dyn ErrorHandler>) -> Self {
        self.runtime.error_handler = error_handler;
        self
    }

    pub fn pool(&self) -> &Arc<OperationContextPool> {
        &self.runtime.pool
    }

    /// Subscribes to the source stream of the operation's root field.
    pub async fn execute(&self, request: RequestContext) -> Result<Subscription, ExecutionError> {
        let operation = request.operation();
        if operation.kind != OperationKind::Subscription {
            return Err(ExecutionError::NotASubscription(
                operation.display_name().to_string(),
            ));
        }
        if operation.root_selection().is_none() {
            return Err(ExecutionError::NoRootSelection);
        }

        Subscription::subscribe(self.runtime.clone(), request).await
    }
}

impl fmt::Debug for SubscriptionExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionExecutor")
            .field("pool", &self.runtime.pool)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ResolverExecutor;
    use crate::operation::{Operation, Selection};
    use crate::resolver::ResolverMap;
    use crate::services::ServiceProvider;

    fn executor() -> SubscriptionExecutor {
        SubscriptionExecutor::new(
            OperationContextPool::default(),
            Arc::new(ResolverExecutor::new(ResolverMap::new())),
        )
    }

    #[tokio::test]
    async fn test_rejects_queries() {
        let operation = Operation::new("q", OperationKind::Query)
            .with_name("Feed")
            .with_selection(Selection::new("feed"));
        let request = RequestContext::new(operation, ServiceProvider::default());

        let error = executor().execute(request).await.unwrap_err();
        assert!(matches!(error, ExecutionError::NotASubscription(name) if name == "Feed"));
    }

    #[tokio::test]
    async fn test_rejects_empty_selection() {
        let operation = Operation::new("s", OperationKind::Subscription);
        let request = RequestContext::new(operation, ServiceProvider::default());

        let error = executor().execute(request).await.unwrap_err();
        assert!(matches!(error, ExecutionError::NoRootSelection));
        assert_eq!(executor().pool().idle(), 0);
    }
}
