//! Inbound frame dispatch.
//!
//! The router is deny-by-default: it only knows the closed set of frames in
//! [`InboundFrame`]. Anything it cannot place ends the session.

use crate::connection::ComputerConnection;
use crate::handshake::HandshakeGate;
use crate::message::{Envelope, InboundFrame};
use crate::registry::ComputerRegistry;
use std::sync::Arc;
use tracing::{debug, error};

/// Error frame message for an unrecognized frame type.
pub const UNRECOGNIZED: &str = "Message type unrecognized";

/// What the transport should do after a frame was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Keep reading.
    Continue,
    /// The connection has been asked to close; stop reading.
    Closed,
}

/// Routes decoded frames to the handshake gate, the job manager or the
/// liveness flag.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    gate: HandshakeGate,
}

impl MessageRouter {
    pub fn new(gate: HandshakeGate) -> Self {
        Self { gate }
    }

    pub fn registry(&self) -> &ComputerRegistry {
        self.gate.registry()
    }

    /// Handle one raw frame received on `connection`.
    pub fn dispatch(&self, connection: &Arc<ComputerConnection>, raw: &str) -> Dispatch {
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                // No error frame: never echo malformed input back.
                error!(
                    remote_addr = %connection.remote_addr(),
                    error = %e,
                    "Bad parse on message. Disconnecting for safety."
                );
                connection.close();
                return Dispatch::Closed;
            }
        };

        if !connection.is_authenticated() && !envelope.is_handshake() {
            self.gate.reject_unauthenticated(connection);
            return Dispatch::Closed;
        }

        let frame = match envelope.into_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(
                    remote_addr = %connection.remote_addr(),
                    error = %e,
                    "No handler for message type. Disconnecting for safety."
                );
                connection.disconnect_error(UNRECOGNIZED);
                return Dispatch::Closed;
            }
        };

        match frame {
            InboundFrame::Handshake(handshake) => match self.gate.admit(connection, handshake) {
                Ok(()) => Dispatch::Continue,
                Err(e) => {
                    debug!(remote_addr = %connection.remote_addr(), error = %e, "Handshake rejected");
                    Dispatch::Closed
                }
            },
            InboundFrame::FinishJob(completion) => {
                debug!(
                    label = connection.label().unwrap_or_default(),
                    job_id = completion.job_id.as_deref().unwrap_or_default(),
                    "Routing job completion"
                );
                connection.jobs().finish_job(completion);
                Dispatch::Continue
            }
            InboundFrame::Pong => {
                connection.mark_alive();
                Dispatch::Continue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use crate::message::Payload;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn router() -> MessageRouter {
        MessageRouter::new(HandshakeGate::new(["Battery"], ComputerRegistry::new()))
    }

    fn make_connection() -> (Arc<ComputerConnection>, mpsc::UnboundedReceiver<Outbound>) {
        ComputerConnection::new("10.0.0.5:1234".parse().unwrap())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    fn error_frame(message: &str) -> Outbound {
        Outbound::Text(json!({"type": "error", "message": message}).to_string())
    }

    #[test]
    fn test_malformed_json_closes_without_error_frame() {
        let router = router();
        let (conn, mut rx) = make_connection();
        assert_eq!(router.dispatch(&conn, "{{{"), Dispatch::Closed);
        assert_eq!(drain(&mut rx), vec![Outbound::Close]);
    }

    #[test]
    fn test_frames_before_handshake_are_rejected() {
        let router = router();
        for raw in [
            r#"{"type":"runJob","jobId":"x","jobType":"getStatus"}"#,
            r#"{"type":"finishJob","jobId":"x"}"#,
            r#"{"type":"pong"}"#,
            r#"{"computerLabel":"Battery"}"#,
            "42",
        ] {
            let (conn, mut rx) = make_connection();
            assert_eq!(router.dispatch(&conn, raw), Dispatch::Closed);
            assert_eq!(
                drain(&mut rx),
                vec![error_frame("No handshake message"), Outbound::Close]
            );
            assert!(!conn.is_authenticated());
        }
        assert!(router.registry().is_empty());
    }

    #[test]
    fn test_handshake_then_unknown_type_is_fatal() {
        let router = router();
        let (conn, mut rx) = make_connection();
        assert_eq!(
            router.dispatch(&conn, r#"{"type":"handshake","computerLabel":"Battery"}"#),
            Dispatch::Continue
        );
        assert_eq!(
            drain(&mut rx),
            vec![Outbound::Text(r#"{"type":"handshakeOK"}"#.to_string())]
        );

        assert_eq!(
            router.dispatch(&conn, r#"{"type":"ping"}"#),
            Dispatch::Closed
        );
        assert_eq!(
            drain(&mut rx),
            vec![error_frame("Message type unrecognized"), Outbound::Close]
        );
    }

    #[test]
    fn test_bad_label_handshake_closes() {
        let router = router();
        let (conn, mut rx) = make_connection();
        assert_eq!(
            router.dispatch(&conn, r#"{"type":"handshake","computerLabel":"Reactor"}"#),
            Dispatch::Closed
        );
        assert_eq!(drain(&mut rx), vec![error_frame("Bad label"), Outbound::Close]);
        assert!(router.registry().lookup("Reactor").is_none());
    }

    #[test]
    fn test_pong_marks_alive() {
        let router = router();
        let (conn, _rx) = make_connection();
        router.dispatch(&conn, r#"{"type":"handshake","computerLabel":"Battery"}"#);
        conn.take_alive();
        assert!(!conn.is_alive());
        assert_eq!(router.dispatch(&conn, r#"{"type":"pong"}"#), Dispatch::Continue);
        assert!(conn.is_alive());
    }

    #[tokio::test]
    async fn test_finish_job_resolves_caller() {
        let router = router();
        let (conn, mut rx) = make_connection();
        router.dispatch(&conn, r#"{"type":"handshake","computerLabel":"Battery","computerId":3}"#);
        drain(&mut rx);

        let registry = router.registry().clone();
        let caller = tokio::spawn(async move {
            let mut payload = Payload::new();
            payload.insert("units".to_string(), json!("FE"));
            registry
                .run_job("Battery", "getStatus", payload, Duration::from_secs(1))
                .await
        });

        let job_id = match rx.recv().await {
            Some(Outbound::Text(text)) => {
                let frame: Value = serde_json::from_str(&text).unwrap();
                frame["jobId"].as_str().unwrap().to_string()
            }
            other => panic!("Expected runJob, got {other:?}"),
        };
        let raw = json!({"type": "finishJob", "jobId": job_id, "energy": 1000}).to_string();
        assert_eq!(router.dispatch(&conn, &raw), Dispatch::Continue);

        let result = caller.await.unwrap().unwrap();
        assert_eq!(Value::Object(result), json!({"energy": 1000}));
    }

    #[test]
    fn test_finish_job_for_unknown_id_keeps_connection() {
        let router = router();
        let (conn, mut rx) = make_connection();
        router.dispatch(&conn, r#"{"type":"handshake","computerLabel":"Battery"}"#);
        drain(&mut rx);
        assert_eq!(
            router.dispatch(&conn, r#"{"type":"finishJob","jobId":"stale"}"#),
            Dispatch::Continue
        );
        assert!(drain(&mut rx).is_empty());
    }
}
