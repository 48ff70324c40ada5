// Boundary to the shared message broker
//
// The relay only needs publish/subscribe/unsubscribe plus one inbound stream
// fed by every active subscription. `MemoryHub` provides an in-process broker
// for tests and local runs.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

pub use memory::{MemoryBroker, MemoryHub};

mod memory;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Broker connection closed")]
    Closed,
}

/// A raw message as delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Connection to the broker shared by every component of one node
///
/// Implementations must be safe for concurrent use; the relay never retries a
/// failed call.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    async fn subscribe(&self, channel: &str) -> Result<(), BrokerError>;

    async fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError>;

    /// The stream every subscribed channel delivers into
    fn inbound(&self) -> InboundStream;
}

/// Sending half paired with an [`InboundStream`]
pub type InboundSender = mpsc::UnboundedSender<BrokerMessage>;

/// Inbound message stream that any number of workers may pull from concurrently
///
/// Each message is handed to exactly one caller of [`InboundStream::recv`].
#[derive(Clone)]
pub struct InboundStream {
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<BrokerMessage>>>,
}

impl InboundStream {
    pub fn channel() -> (InboundSender, InboundStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            sender,
            InboundStream {
                receiver: Arc::new(Mutex::new(receiver)),
            },
        )
    }

    /// Waits for the next message; `None` once the broker side is gone
    ///
    /// Cancel safe: dropping the future never loses a message.
    pub async fn recv(&self) -> Option<BrokerMessage> {
        self.receiver.lock().await.recv().await
    }
}
