//! Live subscriptions.
//!
//! A [`Subscription`] runs the subscribe resolver of the root field once,
//! then re-executes the operation for every event of the resulting
//! [`SourceStream`]. Results are pulled through a
//! [`SubscriptionEnumerator`].

mod enumerator;
mod executor;

pub use enumerator::{SubscriptionEnumerable, SubscriptionEnumerator};
pub use executor::SubscriptionExecutor;

use crate::context::{OperationContext, RootValue, ScopedContextData, EVENT_MESSAGE};
use crate::dispatcher::NoopBatchDispatcher;
use crate::error::ExecutionError;
use crate::error_handler::ErrorHandler;
use crate::executor::QueryExecutor;
use crate::instrumentation::DiagnosticEvents;
use crate::pool::OperationContextPool;
use crate::request::RequestContext;
use crate::resolver::{ResolverArgs, ResolverContext, ResolverInfo};
use crate::result::OperationResult;
use crate::services::ServiceScope;
use crate::source_stream::SourceStream;
use conduit_core::{DiagnosticScope, ErrorKind, Path};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Collaborators shared by every subscription of an executor.
#[derive(Clone)]
pub(crate) struct SubscriptionRuntime {
    pub(crate) pool: Arc<OperationContextPool>,
    pub(crate) query_executor: Arc<dyn QueryExecutor>,
    pub(crate) diagnostics: Arc<dyn DiagnosticEvents>,
    pub(crate) error_handler: Arc<dyn ErrorHandler>,
}

pub(crate) struct SubscriptionInner {
    id: u64,
    request: RequestContext,
    runtime: SubscriptionRuntime,
    source_stream: Arc<dyn SourceStream>,
    scoped: ScopedContextData,
    root_value: OnceLock<Option<RootValue>>,
    scope: Mutex<Option<DiagnosticScope>>,
    disposed: AtomicBool,
}

/// One live subscription.
///
/// Cloning is cheap; clones share the same source stream.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    /// Runs the subscribe resolver of the root field.
    ///
    /// The operation context used for setup is always returned to the pool
    /// with its result discarded. On failure the diagnostic scope of the
    /// subscription is closed and no source stream stays subscribed.
    pub(crate) async fn subscribe(
        runtime: SubscriptionRuntime,
        request: RequestContext,
    ) -> Result<Self, ExecutionError> {
        let id = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed);
        let scope = runtime.diagnostics.execute_subscription(&request, id);
        let root_value = OnceLock::new();

        let mut context = runtime.pool.get();
        let subscribed = subscribe_to_source(&request, &mut context, &root_value).await;
        context.discard_result();
        runtime.pool.release(context);

        let (source_stream, scoped) = match subscribed {
            Ok(subscribed) => subscribed,
            Err(error) => {
                scope.close();
                return Err(error);
            }
        };

        Ok(Self {
            inner: Arc::new(SubscriptionInner {
                id,
                request,
                runtime,
                source_stream,
                scoped,
                root_value,
                scope: Mutex::new(Some(scope)),
                disposed: AtomicBool::new(false),
            }),
        })
    }

    /// Process-unique id of this subscription.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn request(&self) -> &RequestContext {
        &self.inner.request
    }

    /// Scoped context data left behind by the subscribe resolver.
    pub fn scoped_context_data(&self) -> &ScopedContextData {
        &self.inner.scoped
    }

    /// The sequence of results, one per source event.
    pub fn execute(&self) -> SubscriptionEnumerable {
        SubscriptionEnumerable::new(Arc::clone(&self.inner))
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Releases the source stream and closes the diagnostic scope.
    ///
    /// Only the first call has an effect.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(error) = self.inner.source_stream.dispose().await {
            debug!(subscription_id = self.inner.id, error = %error, "failed to dispose source stream");
        }
        let scope = self
            .inner
            .scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(scope);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("request_id", &self.inner.request.id())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

async fn subscribe_to_source(
    request: &RequestContext,
    context: &mut OperationContext,
    root_value: &OnceLock<Option<RootValue>>,
) -> Result<(Arc<dyn SourceStream>, ScopedContextData), ExecutionError> {
    let operation = Arc::clone(request.operation());
    let selection = operation
        .root_selection()
        .ok_or(ExecutionError::NoRootSelection)?;
    let resolver = selection
        .subscribe
        .clone()
        .ok_or_else(|| ExecutionError::NoSubscribeResolver(selection.field_name.clone()))?;

    let services = request.services().root().clone();
    let root_value = root_value
        .get_or_init(|| request.resolve_root_value(&services))
        .clone();
    context.initialize(
        request,
        services.clone(),
        Arc::new(NoopBatchDispatcher),
        root_value.clone(),
    );

    let path = Path::root().append_field(selection.response_name.as_str());
    let args = match selection.coerce_arguments(context.variables()?, &path) {
        Ok(args) => ResolverArgs::from(args),
        Err(errors) => {
            context.result_mut().add_errors(errors.clone());
            return Err(ExecutionError::Graphql(errors));
        }
    };
    let info = ResolverInfo::new(selection.field_name.as_str(), operation.root_type.as_str())
        .with_response_name(selection.response_name.as_str())
        .with_return_type(selection.return_type.as_str())
        .with_path(path.clone());

    let mut resolver_ctx = ResolverContext::new(
        services,
        Arc::clone(context.dispatcher()?),
        root_value,
        ScopedContextData::new(),
    );
    let source_stream = match resolver.subscribe(&args, &mut resolver_ctx, &info).await {
        Ok(source_stream) => source_stream,
        Err(error) => {
            let error = error.into_graphql_error(path);
            context.result_mut().add_error(error.clone());
            return Err(ExecutionError::Graphql(vec![error]));
        }
    };

    let (scoped, reported) = resolver_ctx.into_parts();
    if !reported.is_empty() {
        context.result_mut().add_errors(reported.iter().cloned());
        if let Err(error) = source_stream.dispose().await {
            debug!(error = %error, "failed to dispose source stream");
        }
        return Err(ExecutionError::Graphql(context.result().errors().to_vec()));
    }

    Ok((source_stream, scoped))
}

impl SubscriptionInner {
    pub(crate) fn request(&self) -> &RequestContext {
        &self.request
    }

    pub(crate) fn runtime(&self) -> &SubscriptionRuntime {
        &self.runtime
    }

    pub(crate) fn source_stream(&self) -> &Arc<dyn SourceStream> {
        &self.source_stream
    }

    /// Executes the operation for one event.
    ///
    /// A canceled run abandons its operation context. Any other failure is
    /// reported and the context goes back to the pool.
    pub(crate) async fn on_event(
        &self,
        payload: Value,
        token: &CancellationToken,
    ) -> Result<OperationResult, ExecutionError> {
        let _event_scope = self
            .runtime
            .diagnostics
            .on_subscription_event(&self.request, self.id);
        let service_scope = self.request.services().create_scope();
        let mut context = self.runtime.pool.get();

        let executed = tokio::select! {
            biased;
            () = token.cancelled() => Err(ExecutionError::Canceled),
            result = self.execute_event(&mut context, &service_scope, payload) => result,
        };

        match executed {
            Ok(result) => {
                self.runtime.pool.release(context);
                Ok(result)
            }
            Err(error) => {
                self.runtime.diagnostics.execution_error(
                    &self.request,
                    ErrorKind::SubscriptionEventError,
                    &[error.to_graphql_error()],
                );
                if error.is_canceled() {
                    drop(context);
                } else {
                    self.runtime.pool.release(context);
                }
                Err(error)
            }
        }
    }

    async fn execute_event(
        &self,
        context: &mut OperationContext,
        service_scope: &ServiceScope,
        payload: Value,
    ) -> Result<OperationResult, ExecutionError> {
        let mut scoped = self.scoped.clone();
        scoped.insert(EVENT_MESSAGE.to_string(), payload.clone());

        let services = service_scope.services().clone();
        let root_value = self
            .root_value
            .get_or_init(|| self.request.resolve_root_value(&services))
            .clone();
        context.initialize(
            &self.request,
            services,
            service_scope.dispatcher(),
            root_value,
        );
        context.result_mut().set_context_data(EVENT_MESSAGE, payload);

        self.runtime.query_executor.execute(context, scoped).await
    }
}
