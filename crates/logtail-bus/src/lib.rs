//! # logtail-bus
//!
//! The message bus as seen by the gateway: a producer side used by worker
//! ingress and a per-topic consumer used by each log streamer.
//!
//! - [`LogBus`] / [`LogConsumer`]: the only bus operations the gateway uses
//! - [`BusError::NoData`]: the distinguished "nothing yet" result, never fatal
//! - [`MemoryBus`]: retained in-process bus, the default backend

#![deny(unsafe_code)]

mod error;
pub mod memory;

pub use error::BusError;
pub use memory::{MemoryBus, MemoryBusConfig};

use async_trait::async_trait;
use bytes::Bytes;

/// One message read from a topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub offset: u64,
    pub payload: Bytes,
}

/// Producer and consumer factory for bus topics.
#[async_trait]
pub trait LogBus: Send + Sync {
    /// Append `payload` to `topic`, creating the topic if needed.
    async fn produce(&self, topic: &str, payload: Bytes) -> Result<(), BusError>;

    /// Open a consumer on `topic`. Safe to call before anything was produced.
    async fn new_consumer(&self, topic: &str) -> Result<Box<dyn LogConsumer>, BusError>;
}

/// Sequential reader over one topic.
#[async_trait]
pub trait LogConsumer: Send {
    /// Topic this consumer reads.
    fn topic(&self) -> &str;

    /// Wait for the next message.
    ///
    /// Callers bound the wait themselves; an implementation may also return
    /// [`BusError::NoData`] when its own poll window elapses.
    async fn consume(&mut self) -> Result<BusMessage, BusError>;
}
