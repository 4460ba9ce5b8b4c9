use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("queue '{queue}' does not exist")]
    QueueDoesNotExist { queue: String },

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("acknowledgement failed: {0}")]
    Acknowledge(String),

    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Errors after which the connection has to be re-established.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, TransportError::Connection(_) | TransportError::Closed)
    }
}
