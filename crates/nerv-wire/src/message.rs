//! Wire protocol message types.
//!
//! Every frame is a single JSON object carried in one transport message:
//! `{ "type": <string>, ...type specific fields }`. There is no length prefix,
//! compression or chunking; the transport delimits frames.

use crate::error::WireError;
use serde::Serialize;
use serde_json::{Map, Value};

/// Free-form JSON fields of a job request or result.
pub type Payload = Map<String, Value>;

/// Field names owned by the protocol. They are stripped from job results and
/// never forwarded from a job payload.
pub const PROTOCOL_FIELDS: [&str; 3] = ["type", "jobId", "jobType"];

/// Frame types accepted from a computer.
pub const TYPE_HANDSHAKE: &str = "handshake";
pub const TYPE_FINISH_JOB: &str = "finishJob";
pub const TYPE_PONG: &str = "pong";

/// A decoded but not yet classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// The `type` field, when present and a string.
    pub frame_type: Option<String>,
    /// All fields of the frame, `type` included.
    pub fields: Payload,
}

impl Envelope {
    /// Parse raw text as a JSON frame.
    ///
    /// Only invalid JSON is an error. Valid JSON that is not an object decodes
    /// to an envelope without a type, which the router rejects.
    pub fn decode(raw: &str) -> Result<Self, WireError> {
        let fields = match serde_json::from_str::<Value>(raw)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let frame_type = fields
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned);
        Ok(Self { frame_type, fields })
    }

    pub fn is_handshake(&self) -> bool {
        self.frame_type.as_deref() == Some(TYPE_HANDSHAKE)
    }

    /// Classify the envelope into one of the known inbound frames.
    pub fn into_frame(self) -> Result<InboundFrame, WireError> {
        let Self {
            frame_type,
            mut fields,
        } = self;
        match frame_type.as_deref() {
            Some(TYPE_HANDSHAKE) => Ok(InboundFrame::Handshake(Handshake {
                computer_label: fields
                    .get("computerLabel")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                computer_id: fields.remove("computerId").filter(|v| !v.is_null()),
            })),
            Some(TYPE_FINISH_JOB) => {
                let job_id = fields
                    .remove("jobId")
                    .and_then(|v| v.as_str().map(str::to_owned));
                for field in PROTOCOL_FIELDS {
                    fields.remove(field);
                }
                Ok(InboundFrame::FinishJob(JobCompletion {
                    job_id,
                    payload: fields,
                }))
            }
            Some(TYPE_PONG) => Ok(InboundFrame::Pong),
            other => Err(WireError::ProtocolViolation(format!(
                "unrecognized message type {other:?}"
            ))),
        }
    }
}

/// Frames a computer may send.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// First frame of every session.
    Handshake(Handshake),
    /// Completion of a previously dispatched job.
    FinishJob(JobCompletion),
    /// Liveness acknowledgement.
    Pong,
}

/// Identity claimed by a computer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Handshake {
    /// Registry key; must be on the known-label list.
    pub computer_label: Option<String>,
    /// Opaque identifier chosen by the computer.
    pub computer_id: Option<Value>,
}

/// Result of a job, already stripped of protocol fields.
#[derive(Debug, Clone, PartialEq)]
pub struct JobCompletion {
    pub job_id: Option<String>,
    pub payload: Payload,
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundFrame {
    /// Handshake accepted.
    #[serde(rename = "handshakeOK")]
    HandshakeOk,
    /// Fatal condition; the connection closes after this frame.
    #[serde(rename = "error")]
    Error { message: String },
    /// Graceful close notice.
    #[serde(rename = "disconnect")]
    Disconnect { message: String },
    /// Request to execute work.
    #[serde(rename = "runJob")]
    RunJob {
        #[serde(rename = "jobId")]
        job_id: String,
        #[serde(rename = "jobType")]
        job_type: String,
        #[serde(flatten)]
        payload: Payload,
    },
}

impl OutboundFrame {
    /// The `type` tag, for logging.
    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::HandshakeOk => "handshakeOK",
            Self::Error { .. } => "error",
            Self::Disconnect { .. } => "disconnect",
            Self::RunJob { .. } => "runJob",
        }
    }
}

/// Encode an outbound frame to its JSON text form.
pub fn encode_frame(frame: &OutboundFrame) -> Result<String, WireError> {
    Ok(serde_json::to_string(frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_handshake() {
        let env = Envelope::decode(r#"{"type":"handshake","computerLabel":"Battery","computerId":7}"#)
            .unwrap();
        assert!(env.is_handshake());
        match env.into_frame().unwrap() {
            InboundFrame::Handshake(h) => {
                assert_eq!(h.computer_label.as_deref(), Some("Battery"));
                assert_eq!(h.computer_id, Some(json!(7)));
            }
            other => panic!("Expected Handshake, got {other:?}"),
        }
    }

    #[test]
    fn test_handshake_with_non_string_label_has_no_label() {
        let env = Envelope::decode(r#"{"type":"handshake","computerLabel":42}"#).unwrap();
        match env.into_frame().unwrap() {
            InboundFrame::Handshake(h) => assert!(h.computer_label.is_none()),
            other => panic!("Expected Handshake, got {other:?}"),
        }
    }

    #[test]
    fn test_finish_job_strips_protocol_fields() {
        let env = Envelope::decode(
            r#"{"type":"finishJob","jobId":"abc","jobType":"getStatus","energy":1000,"units":"FE"}"#,
        )
        .unwrap();
        match env.into_frame().unwrap() {
            InboundFrame::FinishJob(done) => {
                assert_eq!(done.job_id.as_deref(), Some("abc"));
                assert_eq!(Value::Object(done.payload), json!({"energy": 1000, "units": "FE"}));
            }
            other => panic!("Expected FinishJob, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(matches!(
            Envelope::decode("{not json"),
            Err(WireError::Json(_))
        ));
    }

    #[test]
    fn test_non_object_json_has_no_type() {
        let env = Envelope::decode("[1, 2, 3]").unwrap();
        assert!(env.frame_type.is_none());
        assert!(!env.is_handshake());
        assert!(env.into_frame().is_err());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let env = Envelope::decode(r#"{"type":"runJob","jobId":"x"}"#).unwrap();
        assert!(matches!(
            env.into_frame(),
            Err(WireError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_encode_run_job() {
        let mut payload = Payload::new();
        payload.insert("units".to_string(), json!("FE"));
        let frame = OutboundFrame::RunJob {
            job_id: "j-1".to_string(),
            job_type: "getStatus".to_string(),
            payload,
        };
        let value: Value = serde_json::from_str(&encode_frame(&frame).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "runJob", "jobId": "j-1", "jobType": "getStatus", "units": "FE"})
        );
    }

    #[test]
    fn test_encode_control_frames() {
        assert_eq!(
            encode_frame(&OutboundFrame::HandshakeOk).unwrap(),
            r#"{"type":"handshakeOK"}"#
        );
        assert_eq!(
            encode_frame(&OutboundFrame::Error {
                message: "Bad label".to_string()
            })
            .unwrap(),
            r#"{"type":"error","message":"Bad label"}"#
        );
    }
}
