use super::SubscriptionInner;
use crate::error::ExecutionError;
use crate::result::{OperationResult, OperationResultBuilder};
use crate::source_stream::EventStream;
use conduit_core::ErrorKind;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::fmt;
use std::slice;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The results of a subscription.
pub struct SubscriptionEnumerable {
    subscription: Arc<SubscriptionInner>,
}

impl SubscriptionEnumerable {
    pub(super) fn new(subscription: Arc<SubscriptionInner>) -> Self {
        Self { subscription }
    }

    /// Starts reading the source stream.
    ///
    /// If the source stream cannot be read, the failure is reported and an
    /// enumerator without results is returned.
    pub fn enumerator(&self, token: CancellationToken) -> SubscriptionEnumerator {
        match self.subscription.source_stream().read_events() {
            Ok(events) => SubscriptionEnumerator {
                active: Some(Active {
                    events,
                    subscription: Arc::clone(&self.subscription),
                }),
                token,
                current: None,
                completed: false,
            },
            Err(error) => {
                self.subscription.runtime().diagnostics.execution_error(
                    self.subscription.request(),
                    ErrorKind::SubscriptionEventError,
                    &[error.to_graphql_error()],
                );
                SubscriptionEnumerator::empty(token)
            }
        }
    }
}

impl fmt::Debug for SubscriptionEnumerable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEnumerable")
            .field("subscription_id", &self.subscription.id)
            .finish()
    }
}

struct Active {
    events: EventStream,
    subscription: Arc<SubscriptionInner>,
}

/// Pulls one result per source event.
///
/// Events are processed one at a time in arrival order. After an error the
/// enumerator yields a single error result and then stops.
///
/// A result left in [`current`](Self::current) is cleaned up when the
/// enumerator advances or is disposed. Results handed out by
/// [`take_current`](Self::take_current) or [`next`](Self::next) belong to
/// the caller, who runs [`OperationResult::cleanup`].
pub struct SubscriptionEnumerator {
    active: Option<Active>,
    token: CancellationToken,
    current: Option<OperationResult>,
    completed: bool,
}

impl SubscriptionEnumerator {
    fn empty(token: CancellationToken) -> Self {
        Self {
            active: None,
            token,
            current: None,
            completed: true,
        }
    }

    /// Advances to the next result. Returns `false` once the sequence is
    /// over.
    pub async fn move_next(&mut self) -> bool {
        self.release_current().await;
        if self.token.is_cancelled() || self.completed {
            return false;
        }
        let Some(active) = self.active.as_mut() else {
            return false;
        };

        let pulled = tokio::select! {
            biased;
            () = self.token.cancelled() => Err(ExecutionError::Canceled),
            event = active.events.next() => Ok(event),
        };

        let outcome = match pulled {
            Ok(Some(Ok(payload))) => active.subscription.on_event(payload, &self.token).await,
            Ok(Some(Err(error))) | Err(error) => Err(error),
            Ok(None) => {
                self.completed = true;
                return false;
            }
        };

        match outcome {
            Ok(result) => {
                self.current = Some(result);
                true
            }
            Err(error) if error.is_canceled() => false,
            Err(error) => {
                let subscription = &active.subscription;
                let error = subscription
                    .runtime()
                    .error_handler
                    .handle(error.to_graphql_error());
                subscription.runtime().diagnostics.execution_error(
                    subscription.request(),
                    ErrorKind::SubscriptionEventError,
                    slice::from_ref(&error),
                );
                self.completed = true;
                self.current = Some(OperationResultBuilder::create_error(error, None));
                true
            }
        }
    }

    /// The result produced by the last successful [`move_next`](Self::move_next).
    pub fn current(&self) -> Option<&OperationResult> {
        self.current.as_ref()
    }

    /// Takes ownership of the current result, cleanup included.
    pub fn take_current(&mut self) -> Option<OperationResult> {
        self.current.take()
    }

    /// Advances and takes the next result.
    pub async fn next(&mut self) -> Option<OperationResult> {
        if self.move_next().await {
            self.take_current()
        } else {
            None
        }
    }

    /// True once the source ended, failed or the enumerator was disposed.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Cleans up the current result and releases the event stream. Later
    /// calls do nothing.
    pub async fn dispose(&mut self) {
        self.release_current().await;
        if self.active.take().is_some() {
            self.completed = true;
        }
    }

    async fn release_current(&mut self) {
        if let Some(result) = self.current.take() {
            result.cleanup().await;
        }
    }

    /// Adapts the enumerator into a stream of results. The stream's
    /// consumer owns every yielded result.
    pub fn into_stream(self) -> BoxStream<'static, OperationResult> {
        stream::unfold(self, |mut enumerator| async move {
            match enumerator.next().await {
                Some(result) => Some((result, enumerator)),
                None => {
                    enumerator.dispose().await;
                    None
                }
            }
        })
        .boxed()
    }
}

impl fmt::Debug for SubscriptionEnumerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEnumerator")
            .field("active", &self.active.is_some())
            .field("completed", &self.completed)
            .field("has_current", &self.current.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handler::DefaultErrorHandler;
    use crate::executor::ResolverExecutor;
    use crate::instrumentation::NoopDiagnosticEvents;
    use crate::operation::{Operation, Selection};
    use crate::pool::OperationContextPool;
    use crate::request::RequestContext;
    use crate::resolver::{FnSubscribeResolver, ResolverMap};
    use crate::services::ServiceProvider;
    use crate::source_stream::{channel, SourceStream};
    use crate::subscription::{Subscription, SubscriptionRuntime};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    type Sender = mpsc::Sender<Result<Value, ExecutionError>>;

    async fn subscription() -> (Sender, Subscription) {
        let (tx, source) = channel(8);
        let source: Arc<dyn SourceStream> = Arc::new(source);
        let root = Selection::new("onMessage")
            .with_selection(Selection::new("id"))
            .with_subscribe(FnSubscribeResolver::new(move |_, _, _| Ok(Arc::clone(&source))));
        let request = RequestContext::new(
            Operation::subscription("op", root),
            ServiceProvider::default(),
        );
        let runtime = SubscriptionRuntime {
            pool: Arc::new(OperationContextPool::default()),
            query_executor: Arc::new(ResolverExecutor::new(ResolverMap::new())),
            diagnostics: Arc::new(NoopDiagnosticEvents),
            error_handler: Arc::new(DefaultErrorHandler::default()),
        };
        (tx, Subscription::subscribe(runtime, request).await.unwrap())
    }

    #[tokio::test]
    async fn test_yields_one_result_per_event() {
        let (tx, subscription) = subscription().await;
        tx.send(Ok(json!({"id": 1}))).await.unwrap();
        tx.send(Ok(json!({"id": 2}))).await.unwrap();
        drop(tx);

        let mut results = subscription.execute().enumerator(CancellationToken::new());
        assert!(results.move_next().await);
        assert_eq!(
            serde_json::to_value(results.current().unwrap()).unwrap(),
            json!({"data": {"onMessage": {"id": 1}}})
        );
        assert!(results.move_next().await);
        assert!(!results.move_next().await);
        assert!(!results.move_next().await);
    }

    #[tokio::test]
    async fn test_source_error_ends_with_error_result() {
        let (tx, subscription) = subscription().await;
        tx.send(Err(ExecutionError::SourceStream("broker gone".into())))
            .await
            .unwrap();
        tx.send(Ok(json!({"id": 2}))).await.unwrap();

        let mut results = subscription.execute().enumerator(CancellationToken::new());
        let result = results.next().await.unwrap();
        assert!(result.data().is_none());
        let errors = result.errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].code.as_deref(),
            Some(conduit_core::codes::SOURCE_STREAM_ERROR)
        );
        assert!(results.is_completed());
        assert!(!results.move_next().await);
    }

    #[tokio::test]
    async fn test_second_enumerator_is_empty() {
        let (_tx, subscription) = subscription().await;
        let enumerable = subscription.execute();
        let _first = enumerable.enumerator(CancellationToken::new());

        let mut second = enumerable.enumerator(CancellationToken::new());
        assert!(second.is_completed());
        assert!(!second.move_next().await);
    }

    #[tokio::test]
    async fn test_dispose_twice() {
        let (_tx, subscription) = subscription().await;
        let mut results = subscription.execute().enumerator(CancellationToken::new());
        results.dispose().await;
        results.dispose().await;
        assert!(!results.move_next().await);
    }

    #[tokio::test]
    async fn test_into_stream() {
        let (tx, subscription) = subscription().await;
        for id in 0..3 {
            tx.send(Ok(json!({"id": id}))).await.unwrap();
        }
        drop(tx);

        let results: Vec<_> = subscription
            .execute()
            .enumerator(CancellationToken::new())
            .into_stream()
            .collect()
            .await;
        assert_eq!(results.len(), 3);
    }
}
