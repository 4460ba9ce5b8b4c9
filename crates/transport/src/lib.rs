//! Broker abstraction for OTS.
//!
//! A *queue* is a named, durable FIFO that any number of consumers may pull
//! from, one delivery at a time. Workers bind to device-group queues (named by
//! routing key); each test run owns a private reply queue named from its id.
//!
//! [`NatsTransport`] maps queues onto NATS JetStream work-queue streams.
//! [`MemoryTransport`] is an in-process broker with the same semantics.

mod error;
mod memory;
mod naming;
mod nats;

pub use error::TransportError;
pub use memory::MemoryTransport;
pub use naming::{stream_name, subject, testrun_queue};
pub use nats::{NatsOptions, NatsTransport};

use async_trait::async_trait;

/// Operations every broker binding offers to the task broker and task runner.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create the queue if it does not exist yet. Idempotent.
    async fn declare_queue(&self, queue: &str) -> Result<(), TransportError>;

    async fn queue_exists(&self, queue: &str) -> Result<bool, TransportError>;

    async fn delete_queue(&self, queue: &str) -> Result<(), TransportError>;

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Block until one message is available on any of `queues` and hand it
    /// out. Nothing else is pulled until the caller asks again.
    async fn next_delivery(&self, queues: &[String]) -> Result<Delivery, TransportError>;

    /// Drop the current connection and establish a new one.
    async fn reconnect(&self) -> Result<(), TransportError>;
}

/// A message handed out by [`Transport::next_delivery`]; must be either
/// acknowledged or requeued.
pub struct Delivery {
    pub queue: String,
    pub payload: Vec<u8>,
    handle: AckHandle,
}

pub(crate) enum AckHandle {
    Nats(async_nats::jetstream::Message),
    Memory(memory::Requeue),
}

impl Delivery {
    pub(crate) fn new(queue: String, payload: Vec<u8>, handle: AckHandle) -> Self {
        Self {
            queue,
            payload,
            handle,
        }
    }

    /// Remove the message from the queue for good.
    pub async fn ack(self) -> Result<(), TransportError> {
        match self.handle {
            AckHandle::Nats(message) => message
                .ack()
                .await
                .map_err(|e| TransportError::Acknowledge(e.to_string())),
            AckHandle::Memory(_) => Ok(()),
        }
    }

    /// Give the message back so that another consumer can take it.
    pub async fn requeue(self) -> Result<(), TransportError> {
        match self.handle {
            AckHandle::Nats(message) => message
                .ack_with(async_nats::jetstream::AckKind::Nak(None))
                .await
                .map_err(|e| TransportError::Acknowledge(e.to_string())),
            AckHandle::Memory(requeue) => requeue.put_back(self.payload),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("payload_size", &self.payload.len())
            .finish()
    }
}
