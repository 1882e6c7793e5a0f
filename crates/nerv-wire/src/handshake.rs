//! Handshake gate: admits a connection to the registry.
//!
//! A connection is only usable once its first frame, a `handshake`, names a
//! label from the configured allow-list. Anything else ends the session.

use crate::connection::{ComputerConnection, ComputerMeta};
use crate::error::WireError;
use crate::message::{Handshake, OutboundFrame};
use crate::registry::ComputerRegistry;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Error frame message for a label outside the allow-list.
pub const BAD_LABEL: &str = "Bad label";
/// Error frame message for any frame that precedes the handshake.
pub const NO_HANDSHAKE: &str = "No handshake message";
/// Error frame message for a repeated handshake.
pub const ALREADY_AUTHENTICATED: &str = "Already authenticated";

/// Validates handshakes against the known-label list.
#[derive(Debug, Clone)]
pub struct HandshakeGate {
    known_labels: Arc<HashSet<String>>,
    registry: ComputerRegistry,
}

impl HandshakeGate {
    pub fn new<I, S>(known_labels: I, registry: ComputerRegistry) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_labels: Arc::new(known_labels.into_iter().map(Into::into).collect()),
            registry,
        }
    }

    pub fn registry(&self) -> &ComputerRegistry {
        &self.registry
    }

    /// Exact, case-sensitive allow-list check.
    pub fn is_known(&self, label: &str) -> bool {
        self.known_labels.contains(label)
    }

    /// Authenticate `connection`, register it and acknowledge.
    ///
    /// On failure the connection has already been sent an `error` frame and
    /// asked to close; it is never registered.
    pub fn admit(
        &self,
        connection: &Arc<ComputerConnection>,
        handshake: Handshake,
    ) -> Result<(), WireError> {
        if connection.is_authenticated() {
            warn!(
                remote_addr = %connection.remote_addr(),
                "Repeated handshake. Disconnecting."
            );
            connection.disconnect_error(ALREADY_AUTHENTICATED);
            return Err(WireError::ProtocolViolation(
                "handshake on an authenticated connection".into(),
            ));
        }

        let label = match handshake.computer_label {
            Some(label) if self.is_known(&label) => label,
            other => {
                warn!(
                    remote_addr = %connection.remote_addr(),
                    label = ?other,
                    "Bad label. Disconnecting."
                );
                connection.disconnect_error(BAD_LABEL);
                return Err(WireError::HandshakeFailed(format!(
                    "label {other:?} is not on the known-label list"
                )));
            }
        };

        if self.registry.lookup(&label).is_some() {
            warn!(
                label = %label,
                remote_addr = %connection.remote_addr(),
                "Computer is reconnecting; previous connection may have been lost. Accepting connection."
            );
        } else {
            info!(label = %label, remote_addr = %connection.remote_addr(), "Successful handshake");
        }

        connection.authenticate(ComputerMeta {
            label: label.clone(),
            computer_id: handshake.computer_id,
        });
        self.registry.register(&label, Arc::clone(connection));
        connection.send(&OutboundFrame::HandshakeOk)
    }

    /// Reject a frame received before the handshake.
    pub fn reject_unauthenticated(&self, connection: &ComputerConnection) {
        warn!(
            remote_addr = %connection.remote_addr(),
            "Expected a handshake message. Disconnecting."
        );
        connection.disconnect_error(NO_HANDSHAKE);
    }
}
