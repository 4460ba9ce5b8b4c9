use std::time::Duration;
use thiserror::Error;

use crate::command::CommandOutput;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("command exited with {actual:?}, expected {expected}")]
    CommandFailed {
        expected: i32,
        /// `None` when the process was terminated by a signal.
        actual: Option<i32>,
        output: Box<CommandOutput>,
    },

    #[error("soft timeout of {timeout:?} expired; process group terminated")]
    SoftTimeout {
        timeout: Duration,
        output: Box<CommandOutput>,
    },

    #[error("hard timeout of {timeout:?} expired; process group killed")]
    HardTimeout {
        timeout: Duration,
        output: Box<CommandOutput>,
    },

    #[error("command failed after {attempts} attempts")]
    FailedAfterRetries {
        attempts: u32,
        last: Option<Box<ExecError>>,
    },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(String),

    #[error("hard timeout {hard:?} is shorter than soft timeout {soft:?}")]
    InvalidTimeouts { soft: Duration, hard: Duration },

    #[error("empty command line")]
    EmptyCommand,

    #[error("no process is running")]
    NotRunning,
}

impl ExecError {
    /// Failures that another attempt of the same command might not hit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::CommandFailed { .. }
                | ExecError::SoftTimeout { .. }
                | ExecError::HardTimeout { .. }
        )
    }

    /// What the process printed before it failed, when it got that far.
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            ExecError::CommandFailed { output, .. }
            | ExecError::SoftTimeout { output, .. }
            | ExecError::HardTimeout { output, .. } => Some(output),
            ExecError::FailedAfterRetries { last, .. } => last.as_ref().and_then(|e| e.output()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}
