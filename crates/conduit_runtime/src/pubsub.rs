//! In-memory publish/subscribe hub backing subscription source streams.

use crate::error::ExecutionError;
use crate::resolver::{ResolverArgs, ResolverContext, ResolverError, ResolverInfo, SubscribeResolver};
use crate::source_stream::{EventStream, SourceStream};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_CAPACITY: usize = 256;

/// A topic-keyed broadcast hub.
#[derive(Clone)]
pub struct PubSub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Value>>>>,
    capacity: usize,
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Publishes an event. Returns the number of receivers reached.
    pub async fn publish(&self, topic: impl AsRef<str>, event: Value) -> usize {
        let channels = self.channels.read().await;
        channels
            .get(topic.as_ref())
            .and_then(|sender| sender.send(event).ok())
            .unwrap_or(0)
    }

    async fn sender(&self, topic: &str) -> broadcast::Sender<Value> {
        let mut channels = self.channels.write().await;
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Subscribes to a topic. The receiver sees events published from now
    /// on.
    pub async fn source_stream(&self, topic: impl Into<String>) -> PubSubSourceStream {
        let topic = topic.into();
        let sender = self.sender(&topic).await;
        let receiver = sender.subscribe();
        debug!(topic = %topic, "source stream subscribed");
        PubSubSourceStream {
            topic,
            sender,
            receiver: Mutex::new(Some(receiver)),
            disposed: CancellationToken::new(),
        }
    }

    /// A subscribe resolver that picks the topic from the field arguments.
    pub fn resolver<F>(&self, topic: F) -> PubSubResolver
    where
        F: Fn(&ResolverArgs, &ResolverInfo) -> String + Send + Sync + 'static,
    {
        PubSubResolver {
            pubsub: self.clone(),
            topic: Arc::new(topic),
        }
    }

    pub async fn topic_count(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn has_subscribers(&self, topic: &str) -> bool {
        self.channels
            .read()
            .await
            .get(topic)
            .is_some_and(|sender| sender.receiver_count() > 0)
    }

    /// Drops topics nobody listens to.
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

impl fmt::Debug for PubSub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSub")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// A source stream subscribed to one [`PubSub`] topic.
#[derive(Debug)]
pub struct PubSubSourceStream {
    topic: String,
    sender: broadcast::Sender<Value>,
    receiver: Mutex<Option<broadcast::Receiver<Value>>>,
    disposed: CancellationToken,
}

impl PubSubSourceStream {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl SourceStream for PubSubSourceStream {
    fn read_events(&self) -> Result<EventStream, ExecutionError> {
        if self.disposed.is_cancelled() {
            return Err(ExecutionError::SourceStream(format!(
                "source stream for topic `{}` was disposed",
                self.topic
            )));
        }
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| self.sender.subscribe());

        let state = (receiver, self.disposed.clone(), self.topic.clone());
        let events = stream::unfold(state, |(mut receiver, token, topic)| async move {
            loop {
                let received = tokio::select! {
                    biased;
                    () = token.cancelled() => return None,
                    received = receiver.recv() => received,
                };
                match received {
                    Ok(event) => return Some((Ok(event), (receiver, token, topic))),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(topic = %topic, skipped, "subscriber lagged, events dropped");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(events.boxed())
    }

    async fn dispose(&self) -> Result<(), ExecutionError> {
        self.disposed.cancel();
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!(topic = %self.topic, "source stream disposed");
        Ok(())
    }
}

type TopicFn = Arc<dyn Fn(&ResolverArgs, &ResolverInfo) -> String + Send + Sync>;

/// Subscribes the root field to a [`PubSub`] topic.
pub struct PubSubResolver {
    pubsub: PubSub,
    topic: TopicFn,
}

#[async_trait]
impl SubscribeResolver for PubSubResolver {
    async fn subscribe(
        &self,
        args: &ResolverArgs,
        _ctx: &mut ResolverContext,
        info: &ResolverInfo,
    ) -> Result<Arc<dyn SourceStream>, ResolverError> {
        let topic = (self.topic)(args, info);
        Ok(Arc::new(self.pubsub.source_stream(topic).await))
    }
}

impl fmt::Debug for PubSubResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSubResolver")
            .field("pubsub", &self.pubsub)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_stream() {
        let pubsub = PubSub::new();
        let source = pubsub.source_stream("news").await;
        let mut events = source.read_events().unwrap();

        assert!(pubsub.has_subscribers("news").await);
        assert_eq!(pubsub.publish("news", json!({"id": 1})).await, 1);
        assert_eq!(pubsub.publish("other", json!({"id": 2})).await, 0);

        let event = events.next().await.unwrap().unwrap();
        assert_eq!(event, json!({"id": 1}));
    }

    #[tokio::test]
    async fn test_lagged_receiver_skips() {
        let pubsub = PubSub::with_capacity(2);
        let source = pubsub.source_stream("t").await;
        for i in 0..5 {
            pubsub.publish("t", json!(i)).await;
        }

        let mut events = source.read_events().unwrap();
        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first, json!(3));
    }

    #[tokio::test]
    async fn test_dispose() {
        let pubsub = PubSub::new();
        let source = pubsub.source_stream("t").await;
        let mut events = source.read_events().unwrap();

        source.dispose().await.unwrap();
        assert!(events.next().await.is_none());
        assert!(source.read_events().is_err());

        drop(events);
        pubsub.cleanup().await;
        assert_eq!(pubsub.topic_count().await, 0);
    }
}
