use thiserror::Error;

/// Failure to decode or encode a protocol message.
///
/// Fatal to the message, never to the loop that received it.
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("message is not a JSON object: {reason}")]
    NotAnObject { reason: String },

    #[error("message has no '{field}' field")]
    MissingHeader { field: &'static str },

    #[error("unknown message type: {message_type}")]
    UnknownType { message_type: String },

    #[error("{message_type} message is missing mandatory field '{field}'")]
    MissingField {
        message_type: &'static str,
        field: &'static str,
    },

    #[error("malformed {message_type} message: {reason}")]
    Malformed {
        message_type: &'static str,
        reason: String,
    },

    #[error("failed to encode message: {reason}")]
    Encode { reason: String },
}

/// Numeric codes carried by `TESTRUN_ERROR` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    CommandFailed = 1001,
    SoftTimeout = 1002,
    HardTimeout = 1003,
    SpawnFailed = 1004,
    IncompatibleWorker = 1005,
    Internal = 1099,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1001 => Some(Self::CommandFailed),
            1002 => Some(Self::SoftTimeout),
            1003 => Some(Self::HardTimeout),
            1004 => Some(Self::SpawnFailed),
            1005 => Some(Self::IncompatibleWorker),
            1099 => Some(Self::Internal),
            _ => None,
        }
    }
}
