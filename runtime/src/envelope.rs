//! Message envelope shapes and their JSON wire encoding, per §4.2.
//!
//! `input_values`/`output_values` are carried as `serde_json::Value` rather
//! than a generic type parameter: the runtime never interprets their
//! contents, it only needs to round-trip whatever the embedding application's
//! own `Serialize` impl produced. A custom type's `serialise()`-style hook is
//! simply `impl Serialize for T`; `serde_json` does the rest, including
//! timestamps already rendered as ISO-8601 strings by the caller.

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// Message attribute carrying the question/answer correlation id. Always an
/// attribute, never part of the payload (§4.2).
pub const QUESTION_UUID_ATTRIBUTE: &str = "question_uuid";
pub const FORWARD_LOGS_ATTRIBUTE: &str = "forward_logs";
pub const KIND_ATTRIBUTE: &str = "kind";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    DeliveryAck,
    LogRecord,
    Monitor,
    Result,
    Error,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::DeliveryAck => "delivery_ack",
            MessageKind::LogRecord => "log_record",
            MessageKind::Monitor => "monitor",
            MessageKind::Result => "result",
            MessageKind::Error => "error",
        }
    }

    pub fn from_str(value: &str) -> Option<MessageKind> {
        match value {
            "delivery_ack" => Some(MessageKind::DeliveryAck),
            "log_record" => Some(MessageKind::LogRecord),
            "monitor" => Some(MessageKind::Monitor),
            "result" => Some(MessageKind::Result),
            "error" => Some(MessageKind::Error),
            _ => None,
        }
    }
}

/// Question payload (§4.2). `question_uuid` and `forward_logs` travel as
/// attributes, not fields of this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub input_values: Option<serde_json::Value>,
    pub input_manifest: Option<String>,
}

impl Question {
    pub fn to_bytes(&self) -> Result<Vec<u8>, RuntimeError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Question, RuntimeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// One stack frame of a remote traceback, carried as a printable string per
/// frame rather than a structured backtrace - the remote runtime producing it
/// may not be this one.
pub type TracebackFrame = String;

/// The terminal message for one question (§4.2): either a result or an
/// error, never both. Modeled as an enum rather than two optional field
/// pairs so the mutual exclusivity is structural, per the dynamic-dispatch
/// note in the design notes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Ok {
        output_values: Option<serde_json::Value>,
        output_manifest: Option<String>,
    },
    Err {
        exception_type: String,
        exception_message: String,
        traceback: Vec<TracebackFrame>,
    },
}

impl Answer {
    pub fn ok(output_values: Option<serde_json::Value>, output_manifest: Option<String>) -> Self {
        Answer::Ok {
            output_values,
            output_manifest,
        }
    }

    pub fn err(exception_type: impl Into<String>, message: impl Into<String>, traceback: Vec<TracebackFrame>) -> Self {
        Answer::Err {
            exception_type: exception_type.into(),
            exception_message: message.into(),
            traceback,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RuntimeError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Answer, RuntimeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Payload of a `log_record` intermediate message (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecordPayload {
    pub level: i32,
    pub msg: String,
    pub created: f64,
    pub logger: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exc_info: Option<String>,
}

impl LogRecordPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, RuntimeError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<LogRecordPayload, RuntimeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Application-defined progress datum (§4.6). The runtime transports it
/// opaquely; schema validation, when a schema is supplied, happens at the
/// edges (emission on the child, `monitor_handler` on the asker).
pub type MonitorPayload = serde_json::Value;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_ok_and_err_are_mutually_exclusive_on_the_wire() {
        let ok = Answer::ok(Some(serde_json::json!("Hello! It worked!")), None);
        let bytes = ok.to_bytes().unwrap();
        let roundtripped = Answer::from_bytes(&bytes).unwrap();
        match roundtripped {
            Answer::Ok { output_values, output_manifest } => {
                assert_eq!(output_values, Some(serde_json::json!("Hello! It worked!")));
                assert_eq!(output_manifest, None);
            }
            Answer::Err { .. } => panic!("expected Ok"),
        }
    }

    #[test]
    fn question_roundtrips_through_json() {
        let question = Question {
            input_values: Some(serde_json::json!({"height": 10})),
            input_manifest: None,
        };
        let bytes = question.to_bytes().unwrap();
        let roundtripped = Question::from_bytes(&bytes).unwrap();
        assert_eq!(roundtripped.input_values, question.input_values);
    }

    #[test]
    fn kind_attribute_values_match_the_wire_vocabulary() {
        assert_eq!(MessageKind::DeliveryAck.as_str(), "delivery_ack");
        assert_eq!(MessageKind::from_str("monitor"), Some(MessageKind::Monitor));
        assert_eq!(MessageKind::from_str("bogus"), None);
    }
}
