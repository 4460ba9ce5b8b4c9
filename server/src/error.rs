use protocol::MessageError;
use std::time::Duration;
use thiserror::Error;
use transport::TransportError;

use crate::timeout::Expiry;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("task runner has already been run")]
    AlreadyRun,

    #[error("no worker queue for routing key '{queue}'")]
    QueueDoesNotExist { queue: String },

    #[error("no worker picked up a task within {timeout:?}")]
    QueueTimeout { timeout: Duration },

    #[error("tasks did not finish within {timeout:?} of the first start")]
    GlobalTimeout { timeout: Duration },

    #[error("controller did not finish within {timeout:?}")]
    ControllerTimeout { timeout: Duration },

    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("state change for unknown task '{task_id}'")]
    UnknownTask { task_id: String },

    #[error("protocol error: {0}")]
    Protocol(#[from] MessageError),
}

impl From<TransportError> for RunnerError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::QueueDoesNotExist { queue } => RunnerError::QueueDoesNotExist { queue },
            other => RunnerError::Connection(other.to_string()),
        }
    }
}

impl From<Expiry> for RunnerError {
    fn from(expiry: Expiry) -> Self {
        match expiry {
            Expiry::Queue(timeout) => RunnerError::QueueTimeout { timeout },
            Expiry::Global(timeout) => RunnerError::GlobalTimeout { timeout },
            Expiry::Controller(timeout) => RunnerError::ControllerTimeout { timeout },
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid package '{value}', expected <environment>:<package>")]
    InvalidPackage { value: String },

    #[error("no tasks given")]
    NoTasks,
}
