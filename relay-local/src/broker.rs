use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::LocalError;

/// A message received from the local broker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Publishing side of the local broker connection
#[async_trait]
pub trait LocalSink: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), LocalError>;
}

/// A connected and subscribed local broker
///
/// Messages on the subscribed topics arrive in order on `messages`, while
/// `sink` can be cloned into anything that needs to publish locally.
pub struct LocalBroker {
    sink: Arc<dyn LocalSink>,
    messages: mpsc::Receiver<LocalMessage>,
}

impl LocalBroker {
    pub fn new(sink: Arc<dyn LocalSink>, messages: mpsc::Receiver<LocalMessage>) -> Self {
        Self { sink, messages }
    }

    pub fn into_parts(self) -> (Arc<dyn LocalSink>, mpsc::Receiver<LocalMessage>) {
        (self.sink, self.messages)
    }
}
