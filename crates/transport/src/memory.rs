use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;

use crate::{AckHandle, Delivery, Transport, TransportError};

/// In-process broker.
///
/// Cloning yields another handle onto the same broker, so a server and any
/// number of workers can share it inside one process.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Broker>,
}

#[derive(Default)]
struct Broker {
    queues: Mutex<HashMap<String, Arc<QueueSlot>>>,
    history: Mutex<Vec<(String, Vec<u8>)>>,
    activity: Notify,
    disconnected: AtomicBool,
    reconnects: AtomicU64,
}

#[derive(Default)]
struct QueueSlot {
    items: Mutex<VecDeque<Vec<u8>>>,
}

/// Puts a requeued payload back at the head of its queue.
pub(crate) struct Requeue {
    slot: Arc<QueueSlot>,
    broker: Arc<Broker>,
}

impl Requeue {
    pub(crate) fn put_back(self, payload: Vec<u8>) -> Result<(), TransportError> {
        lock(&self.slot.items)?.push_front(payload);
        self.broker.activity.notify_waiters();
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, TransportError> {
    mutex.lock().map_err(|_| TransportError::Closed)
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a lost broker connection: every operation fails until
    /// [`Transport::reconnect`] is called.
    pub fn disconnect(&self) {
        self.inner.disconnected.store(true, Ordering::SeqCst);
        self.inner.activity.notify_waiters();
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.disconnected.load(Ordering::SeqCst)
    }

    pub fn reconnect_count(&self) -> u64 {
        self.inner.reconnects.load(Ordering::SeqCst)
    }

    /// Every payload ever published to `queue`, in publish order.
    pub fn published(&self, queue: &str) -> Vec<Vec<u8>> {
        self.inner
            .history
            .lock()
            .map(|history| {
                history
                    .iter()
                    .filter(|(q, _)| q == queue)
                    .map(|(_, payload)| payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn published_total(&self) -> usize {
        self.inner
            .history
            .lock()
            .map(|history| history.len())
            .unwrap_or_default()
    }

    /// Number of messages waiting on `queue`.
    pub fn depth(&self, queue: &str) -> usize {
        self.slot(queue)
            .ok()
            .flatten()
            .and_then(|slot| slot.items.lock().ok().map(|items| items.len()))
            .unwrap_or(0)
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::Connection(
                "in-memory broker disconnected".to_string(),
            ))
        }
    }

    fn slot(&self, queue: &str) -> Result<Option<Arc<QueueSlot>>, TransportError> {
        Ok(lock(&self.inner.queues)?.get(queue).cloned())
    }

    fn existing_slot(&self, queue: &str) -> Result<Arc<QueueSlot>, TransportError> {
        self.slot(queue)?
            .ok_or_else(|| TransportError::QueueDoesNotExist {
                queue: queue.to_string(),
            })
    }

    fn try_pop(&self, queues: &[String]) -> Result<Option<Delivery>, TransportError> {
        for queue in queues {
            let slot = self.existing_slot(queue)?;
            let popped = lock(&slot.items)?.pop_front();
            if let Some(payload) = popped {
                let requeue = Requeue {
                    slot,
                    broker: self.inner.clone(),
                };
                return Ok(Some(Delivery::new(
                    queue.clone(),
                    payload,
                    AckHandle::Memory(requeue),
                )));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn declare_queue(&self, queue: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;
        lock(&self.inner.queues)?
            .entry(queue.to_string())
            .or_default();
        debug!(queue = %queue, "Declared in-memory queue");
        Ok(())
    }

    async fn queue_exists(&self, queue: &str) -> Result<bool, TransportError> {
        self.ensure_connected()?;
        Ok(self.slot(queue)?.is_some())
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;
        lock(&self.inner.queues)?.remove(queue);
        self.inner.activity.notify_waiters();
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let slot = self
            .existing_slot(queue)
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        lock(&slot.items)?.push_back(payload.clone());
        lock(&self.inner.history)?.push((queue.to_string(), payload));
        self.inner.activity.notify_waiters();
        Ok(())
    }

    async fn next_delivery(&self, queues: &[String]) -> Result<Delivery, TransportError> {
        loop {
            // Register interest before looking, so a publish between the
            // check and the wait is not missed.
            let notified = self.inner.activity.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.ensure_connected()?;
            if let Some(delivery) = self.try_pop(queues)? {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnected.store(false, Ordering::SeqCst);
        self.inner.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
