use serde_json::Value;
use tracing::warn;

use crate::error::MessageError;
use crate::message::{Message, MessageKind, PROTOCOL_VERSION};

/// Serialize a message into its wire form.
pub fn pack(message: &Message) -> Result<Vec<u8>, MessageError> {
    serde_json::to_vec(message).map_err(|e| MessageError::Encode {
        reason: e.to_string(),
    })
}

/// Decode and validate a message received from the broker.
///
/// Headers are checked first, then the mandatory fields of the announced
/// kind, then the field types. A version other than [`PROTOCOL_VERSION`] is
/// only logged.
pub fn unpack(bytes: &[u8]) -> Result<Message, MessageError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| MessageError::NotAnObject {
        reason: e.to_string(),
    })?;
    let object = value.as_object().ok_or_else(|| MessageError::NotAnObject {
        reason: "top-level value is not an object".to_string(),
    })?;

    let type_value = object
        .get("message_type")
        .ok_or(MessageError::MissingHeader {
            field: "message_type",
        })?;
    if !object.contains_key("version") {
        return Err(MessageError::MissingHeader { field: "version" });
    }

    let kind = type_value
        .as_str()
        .and_then(MessageKind::from_wire)
        .ok_or_else(|| MessageError::UnknownType {
            message_type: match type_value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        })?;

    if let Some(field) = kind
        .required_fields()
        .iter()
        .copied()
        .find(|field| !object.contains_key(*field))
    {
        return Err(MessageError::MissingField {
            message_type: kind.as_str(),
            field,
        });
    }

    let message: Message =
        serde_json::from_value(value).map_err(|e| MessageError::Malformed {
            message_type: kind.as_str(),
            reason: e.to_string(),
        })?;

    if message.version() != PROTOCOL_VERSION {
        warn!(
            message_type = %kind,
            received = message.version(),
            expected = PROTOCOL_VERSION,
            "Protocol version mismatch; accepting message"
        );
    }

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_non_object_payloads() {
        assert!(matches!(
            unpack(b"[1, 2]"),
            Err(MessageError::NotAnObject { .. })
        ));
        assert!(matches!(
            unpack(b"not json"),
            Err(MessageError::NotAnObject { .. })
        ));
    }

    #[test]
    fn rejects_missing_headers() {
        let no_type = json!({ "version": 1, "task_id": "t", "status": "started" });
        assert!(matches!(
            unpack(no_type.to_string().as_bytes()),
            Err(MessageError::MissingHeader {
                field: "message_type"
            })
        ));

        let no_version = json!({ "message_type": "STATE_CHANGE", "task_id": "t", "status": "started" });
        assert!(matches!(
            unpack(no_version.to_string().as_bytes()),
            Err(MessageError::MissingHeader { field: "version" })
        ));
    }

    #[test]
    fn rejects_unknown_type() {
        let payload = json!({ "message_type": "TELEPORT", "version": 1 });
        match unpack(payload.to_string().as_bytes()) {
            Err(MessageError::UnknownType { message_type }) => assert_eq!(message_type, "TELEPORT"),
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn rejects_badly_typed_fields() {
        let payload = json!({
            "message_type": "STATE_CHANGE",
            "version": 1,
            "task_id": "t",
            "status": "exploded"
        });
        assert!(matches!(
            unpack(payload.to_string().as_bytes()),
            Err(MessageError::Malformed {
                message_type: "STATE_CHANGE",
                ..
            })
        ));
    }

    #[test]
    fn accepts_other_versions() {
        let payload = json!({
            "message_type": "STATE_CHANGE",
            "version": 7,
            "task_id": "t",
            "status": "finished"
        });
        let message = unpack(payload.to_string().as_bytes()).unwrap();
        assert_eq!(message.version(), 7);
    }
}
