use async_nats::jetstream::{
    self,
    consumer::{AckPolicy, DeliverPolicy, PullConsumer},
    stream::RetentionPolicy,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::naming::{stream_name, subject};
use crate::{AckHandle, Delivery, Transport, TransportError};

/// Name of the durable consumer shared by everyone pulling from a queue.
const CONSUMER_NAME: &str = "ots-consumers";

#[derive(Debug, Clone)]
pub struct NatsOptions {
    pub url: String,
    pub creds_path: Option<String>,
    /// Messages older than this are dropped from a queue.
    pub max_age: Duration,
    /// Long-poll window when waiting on a single queue.
    pub pull_timeout: Duration,
    /// Pause between sweeps when waiting on several queues.
    pub idle_backoff: Duration,
}

impl Default for NatsOptions {
    fn default() -> Self {
        Self {
            url: std::env::var("NATS_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string()),
            creds_path: std::env::var("NATS_CREDS_PATH").ok(),
            max_age: Duration::from_secs(3600 * 24),
            pull_timeout: Duration::from_secs(5),
            idle_backoff: Duration::from_millis(250),
        }
    }
}

struct Connection {
    jetstream: jetstream::Context,
    consumers: HashMap<String, PullConsumer>,
}

/// OTS queues on NATS JetStream: one work-queue stream per queue, one shared
/// durable pull consumer per stream.
pub struct NatsTransport {
    options: NatsOptions,
    connection: Mutex<Connection>,
}

impl NatsTransport {
    pub async fn connect(options: NatsOptions) -> Result<Self, TransportError> {
        let jetstream = open(&options).await?;
        Ok(Self {
            options,
            connection: Mutex::new(Connection {
                jetstream,
                consumers: HashMap::new(),
            }),
        })
    }

    async fn context(&self) -> jetstream::Context {
        self.connection.lock().await.jetstream.clone()
    }

    async fn consumer(&self, queue: &str) -> Result<PullConsumer, TransportError> {
        let mut connection = self.connection.lock().await;
        if let Some(consumer) = connection.consumers.get(queue) {
            return Ok(consumer.clone());
        }

        let stream = connection
            .jetstream
            .get_stream(stream_name(queue))
            .await
            .map_err(|_| TransportError::QueueDoesNotExist {
                queue: queue.to_string(),
            })?;
        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                CONSUMER_NAME,
                jetstream::consumer::pull::Config {
                    durable_name: Some(CONSUMER_NAME.to_string()),
                    deliver_policy: DeliverPolicy::All,
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| TransportError::Receive(e.to_string()))?;

        connection
            .consumers
            .insert(queue.to_string(), consumer.clone());
        Ok(consumer)
    }

    /// Pull at most one message from `queue`, waiting up to `expires` for it.
    async fn pull_one(
        &self,
        queue: &str,
        expires: Option<Duration>,
    ) -> Result<Option<Delivery>, TransportError> {
        let consumer = self.consumer(queue).await?;

        let mut messages = match expires {
            Some(expires) => consumer
                .batch()
                .max_messages(1)
                .expires(expires)
                .messages()
                .await
                .map_err(|e| TransportError::Receive(e.to_string()))?,
            None => consumer
                .fetch()
                .max_messages(1)
                .messages()
                .await
                .map_err(|e| TransportError::Receive(e.to_string()))?,
        };

        match messages.next().await {
            Some(Ok(message)) => {
                let payload = message.message.payload.to_vec();
                Ok(Some(Delivery::new(
                    queue.to_string(),
                    payload,
                    AckHandle::Nats(message),
                )))
            }
            Some(Err(e)) => Err(TransportError::Receive(e.to_string())),
            None => Ok(None),
        }
    }
}

async fn open(options: &NatsOptions) -> Result<jetstream::Context, TransportError> {
    info!(url = %options.url, "Connecting to NATS");
    let client = match &options.creds_path {
        Some(creds) => async_nats::ConnectOptions::new()
            .credentials_file(creds)
            .await
            .map_err(|e| TransportError::Connection(format!("credentials: {e}")))?
            .connect(&options.url)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?,
        None => async_nats::connect(&options.url)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?,
    };
    Ok(jetstream::new(client))
}

#[async_trait]
impl Transport for NatsTransport {
    async fn declare_queue(&self, queue: &str) -> Result<(), TransportError> {
        let name = stream_name(queue);
        self.context()
            .await
            .get_or_create_stream(jetstream::stream::Config {
                name: name.clone(),
                subjects: vec![subject(queue)],
                retention: RetentionPolicy::WorkQueue,
                max_age: self.options.max_age,
                ..Default::default()
            })
            .await
            .map_err(|e| TransportError::Connection(format!("declare {name}: {e}")))?;
        debug!(queue = %queue, stream = %name, "Declared queue");
        Ok(())
    }

    async fn queue_exists(&self, queue: &str) -> Result<bool, TransportError> {
        let wanted = stream_name(queue);
        let context = self.context().await;
        let mut names = context.stream_names();
        while let Some(name) = names.next().await {
            let name = name.map_err(|e| TransportError::Connection(e.to_string()))?;
            if name == wanted {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), TransportError> {
        self.connection.lock().await.consumers.remove(queue);
        self.context()
            .await
            .delete_stream(stream_name(queue))
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        debug!(queue = %queue, "Deleted queue");
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.context()
            .await
            .publish(subject(queue), payload.into())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn next_delivery(&self, queues: &[String]) -> Result<Delivery, TransportError> {
        if let [queue] = queues {
            loop {
                if let Some(delivery) = self
                    .pull_one(queue, Some(self.options.pull_timeout))
                    .await?
                {
                    return Ok(delivery);
                }
            }
        }

        loop {
            for queue in queues {
                if let Some(delivery) = self.pull_one(queue, None).await? {
                    return Ok(delivery);
                }
            }
            tokio::time::sleep(self.options.idle_backoff).await;
        }
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        let jetstream = open(&self.options).await?;
        let mut connection = self.connection.lock().await;
        connection.jetstream = jetstream;
        connection.consumers.clear();
        warn!(url = %self.options.url, "Re-established NATS connection");
        Ok(())
    }
}
