use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ErrorCode;

/// Version of the wire format spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 1;

/// Argv of the control command that stops a worker loop.
pub const QUIT_COMMAND: &str = "quit";
/// Argv of the no-op control command.
pub const IGNORE_COMMAND: &str = "ignore";

/// Every message kind exchanged between server and workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    StateChange(StateChangeMessage),
    Command(CommandMessage),
    ResultObject(ResultMessage),
    TestrunStatus(StatusMessage),
    TestrunError(ErrorMessage),
    TestpackageList(PackageListMessage),
    Monitor(MonitorMessage),
}

/// Discriminant of [`Message`], with the wire name and mandatory fields of
/// each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    StateChange,
    Command,
    ResultObject,
    TestrunStatus,
    TestrunError,
    TestpackageList,
    Monitor,
}

impl MessageKind {
    pub const ALL: [MessageKind; 7] = [
        MessageKind::StateChange,
        MessageKind::Command,
        MessageKind::ResultObject,
        MessageKind::TestrunStatus,
        MessageKind::TestrunError,
        MessageKind::TestpackageList,
        MessageKind::Monitor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::StateChange => "STATE_CHANGE",
            MessageKind::Command => "COMMAND",
            MessageKind::ResultObject => "RESULT_OBJECT",
            MessageKind::TestrunStatus => "TESTRUN_STATUS",
            MessageKind::TestrunError => "TESTRUN_ERROR",
            MessageKind::TestpackageList => "TESTPACKAGE_LIST",
            MessageKind::Monitor => "MONITOR",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Fields that must be present on the wire for this kind, besides
    /// `message_type` and `version`.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            MessageKind::StateChange => &["task_id", "status"],
            MessageKind::Command => &["argv", "response_queue", "task_id", "timeout"],
            MessageKind::ResultObject => &["result"],
            MessageKind::TestrunStatus => &["state", "status_info"],
            MessageKind::TestrunError => &["error_info", "error_code"],
            MessageKind::TestpackageList => &["environment", "packages"],
            MessageKind::Monitor => &["event", "sender", "description", "timestamp"],
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition reported by a [`StateChangeMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCondition {
    Started,
    Finished,
}

impl fmt::Display for TaskCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskCondition::Started => f.write_str("started"),
            TaskCondition::Finished => f.write_str("finished"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeMessage {
    pub version: u32,
    pub task_id: String,
    pub status: TaskCondition,
}

/// Dispatch envelope published by the task runner to a device-group queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub version: u32,
    pub argv: Vec<String>,
    pub response_queue: String,
    pub task_id: String,
    /// Execution timeout in seconds.
    pub timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_worker_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xml_plan: Option<String>,
}

impl CommandMessage {
    pub fn new(
        argv: Vec<String>,
        response_queue: impl Into<String>,
        task_id: impl Into<String>,
        timeout: u64,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            argv,
            response_queue: response_queue.into(),
            task_id: task_id.into(),
            timeout,
            min_worker_version: None,
            xml_plan: None,
        }
    }

    pub fn with_min_worker_version(mut self, version: impl Into<String>) -> Self {
        self.min_worker_version = Some(version.into());
        self
    }

    pub fn with_xml_plan(mut self, plan: impl Into<String>) -> Self {
        self.xml_plan = Some(plan.into());
        self
    }

    pub fn is_quit(&self) -> bool {
        self.is_control(QUIT_COMMAND)
    }

    pub fn is_ignore(&self) -> bool {
        self.is_control(IGNORE_COMMAND)
    }

    fn is_control(&self, name: &str) -> bool {
        matches!(self.argv.as_slice(), [only] if only == name)
    }
}

/// A result artifact produced by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultObject {
    pub filename: String,
    #[serde(with = "base64_content")]
    pub content: Vec<u8>,
    pub origin: String,
    pub package: String,
    pub environment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub version: u32,
    pub result: ResultObject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub version: u32,
    pub state: String,
    pub status_info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub version: u32,
    pub error_info: String,
    pub error_code: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageListMessage {
    pub version: u32,
    pub environment: String,
    pub packages: Vec<String>,
}

/// Worker lifecycle events forwarded for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorEventKind {
    TaskStarted,
    TaskFinished,
    TaskFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorMessage {
    pub version: u32,
    pub event: MonitorEventKind,
    pub sender: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn state_change(task_id: impl Into<String>, status: TaskCondition) -> Self {
        Message::StateChange(StateChangeMessage {
            version: PROTOCOL_VERSION,
            task_id: task_id.into(),
            status,
        })
    }

    pub fn result(result: ResultObject) -> Self {
        Message::ResultObject(ResultMessage {
            version: PROTOCOL_VERSION,
            result,
        })
    }

    pub fn status(state: impl Into<String>, status_info: impl Into<String>) -> Self {
        Message::TestrunStatus(StatusMessage {
            version: PROTOCOL_VERSION,
            state: state.into(),
            status_info: status_info.into(),
        })
    }

    pub fn error(error_info: impl Into<String>, code: ErrorCode) -> Self {
        Message::TestrunError(ErrorMessage {
            version: PROTOCOL_VERSION,
            error_info: error_info.into(),
            error_code: code.code(),
        })
    }

    pub fn package_list(environment: impl Into<String>, packages: Vec<String>) -> Self {
        Message::TestpackageList(PackageListMessage {
            version: PROTOCOL_VERSION,
            environment: environment.into(),
            packages,
        })
    }

    pub fn monitor(
        event: MonitorEventKind,
        sender: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Message::Monitor(MonitorMessage {
            version: PROTOCOL_VERSION,
            event,
            sender: sender.into(),
            description: description.into(),
            timestamp: Utc::now(),
        })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::StateChange(_) => MessageKind::StateChange,
            Message::Command(_) => MessageKind::Command,
            Message::ResultObject(_) => MessageKind::ResultObject,
            Message::TestrunStatus(_) => MessageKind::TestrunStatus,
            Message::TestrunError(_) => MessageKind::TestrunError,
            Message::TestpackageList(_) => MessageKind::TestpackageList,
            Message::Monitor(_) => MessageKind::Monitor,
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            Message::StateChange(m) => m.version,
            Message::Command(m) => m.version,
            Message::ResultObject(m) => m.version,
            Message::TestrunStatus(m) => m.version,
            Message::TestrunError(m) => m.version,
            Message::TestpackageList(m) => m.version,
            Message::Monitor(m) => m.version,
        }
    }
}

impl From<CommandMessage> for Message {
    fn from(command: CommandMessage) -> Self {
        Message::Command(command)
    }
}

mod base64_content {
    use base64ct::{Base64, Encoding};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        Base64::decode_vec(&text).map_err(|e| D::Error::custom(format!("invalid base64: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(argv: &[&str]) -> CommandMessage {
        CommandMessage::new(
            argv.iter().map(|s| s.to_string()).collect(),
            "testrun_1",
            "t1",
            60,
        )
    }

    #[test]
    fn control_commands_are_recognised() {
        assert!(command(&["quit"]).is_quit());
        assert!(command(&["ignore"]).is_ignore());
        assert!(!command(&["quit", "now"]).is_quit());
        assert!(!command(&["flash", "image.bin"]).is_ignore());
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::from_wire("BOGUS"), None);
    }

    #[test]
    fn constructors_stamp_protocol_version() {
        let msg = Message::error("boom", ErrorCode::CommandFailed);
        assert_eq!(msg.version(), PROTOCOL_VERSION);
        assert_eq!(msg.kind(), MessageKind::TestrunError);
        match msg {
            Message::TestrunError(e) => assert_eq!(e.error_code, 1001),
            other => panic!("unexpected message {other:?}"),
        }
    }
}
