//! Source streams feed subscription events into the runtime.

use crate::error::ExecutionError;
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The events of a source stream. An `Err` item is an upstream failure.
pub type EventStream = BoxStream<'static, Result<Value, ExecutionError>>;

/// A stream of subscription events created by a subscribe resolver.
#[async_trait]
pub trait SourceStream: Send + Sync {
    /// Starts reading events.
    fn read_events(&self) -> Result<EventStream, ExecutionError>;

    /// Releases the upstream subscription. Streams returned by
    /// `read_events` end once the source is disposed.
    async fn dispose(&self) -> Result<(), ExecutionError>;
}

/// A source stream over an mpsc channel.
#[derive(Debug)]
pub struct ChannelSourceStream {
    receiver: Mutex<Option<mpsc::Receiver<Result<Value, ExecutionError>>>>,
    disposed: CancellationToken,
}

/// Creates a bounded channel and the source stream reading from it.
pub fn channel(capacity: usize) -> (mpsc::Sender<Result<Value, ExecutionError>>, ChannelSourceStream) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, ChannelSourceStream::new(rx))
}

impl ChannelSourceStream {
    pub fn new(receiver: mpsc::Receiver<Result<Value, ExecutionError>>) -> Self {
        Self {
            receiver: Mutex::new(Some(receiver)),
            disposed: CancellationToken::new(),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.is_cancelled()
    }
}

#[async_trait]
impl SourceStream for ChannelSourceStream {
    fn read_events(&self) -> Result<EventStream, ExecutionError> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| ExecutionError::SourceStream("events were already read".into()))?;

        let token = self.disposed.clone();
        let events = stream::unfold((receiver, token), |(mut receiver, token)| async move {
            let item = tokio::select! {
                biased;
                () = token.cancelled() => None,
                item = receiver.recv() => item,
            };
            item.map(|item| (item, (receiver, token)))
        });
        Ok(events.boxed())
    }

    async fn dispose(&self) -> Result<(), ExecutionError> {
        self.disposed.cancel();
        if let Some(mut receiver) = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            receiver.close();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_reads_in_order() {
        let (tx, source) = channel(4);
        tx.send(Ok(json!(1))).await.unwrap();
        tx.send(Err(ExecutionError::SourceStream("down".into()))).await.unwrap();
        drop(tx);

        let items: Vec<_> = source.read_events().unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &json!(1));
        assert!(matches!(items[1], Err(ExecutionError::SourceStream(_))));
    }

    #[tokio::test]
    async fn test_read_twice_fails() {
        let (_tx, source) = channel(1);
        assert!(source.read_events().is_ok());
        assert!(matches!(source.read_events(), Err(ExecutionError::SourceStream(_))));
    }

    #[tokio::test]
    async fn test_dispose_ends_stream() {
        let (_tx, source) = channel(1);
        let mut events = source.read_events().unwrap();
        source.dispose().await.unwrap();

        assert!(source.is_disposed());
        assert!(events.next().await.is_none());
    }
}
