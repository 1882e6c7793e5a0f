//! A single computer session.
//!
//! [`ComputerConnection`] owns the protocol state of one transport session:
//! whether (and as whom) it has authenticated, its liveness flag, its job
//! manager, and the outbound queue drained by the transport writer. It never
//! touches the socket itself.

use crate::error::WireError;
use crate::jobs::JobManager;
use crate::message::{encode_frame, OutboundFrame};
use crate::registry::ComputerRegistry;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Unique identifier of one transport session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Work item for the transport writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded JSON frame.
    Text(String),
    /// Transport-level liveness probe.
    Ping,
    /// Send a close frame and stop.
    Close,
    /// Drop the transport without a close frame.
    Terminate,
}

pub(crate) type OutboundTx = mpsc::UnboundedSender<Outbound>;

/// Identity recorded by a successful handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputerMeta {
    /// Registry key.
    pub label: String,
    /// Opaque identifier supplied by the computer, if any.
    pub computer_id: Option<Value>,
}

/// State of one connected computer.
#[derive(Debug)]
pub struct ComputerConnection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    connected_at: DateTime<Utc>,
    meta: OnceLock<ComputerMeta>,
    alive: AtomicBool,
    outbound: OutboundTx,
    jobs: JobManager,
}

impl ComputerConnection {
    /// Create a connection and the receiving end of its outbound queue.
    pub fn new(remote_addr: SocketAddr) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            id: ConnectionId::new(),
            remote_addr,
            connected_at: Utc::now(),
            meta: OnceLock::new(),
            alive: AtomicBool::new(true),
            jobs: JobManager::new(tx.clone()),
            outbound: tx,
        });
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    pub fn is_authenticated(&self) -> bool {
        self.meta.get().is_some()
    }

    pub fn meta(&self) -> Option<&ComputerMeta> {
        self.meta.get()
    }

    pub fn label(&self) -> Option<&str> {
        self.meta.get().map(|m| m.label.as_str())
    }

    /// Record the handshake identity. Succeeds exactly once per connection.
    pub(crate) fn authenticate(&self, meta: ComputerMeta) -> bool {
        self.meta.set(meta).is_ok()
    }

    /// Whether the transport writer is still draining the queue.
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Queue a frame for the computer.
    pub fn send(&self, frame: &OutboundFrame) -> Result<(), WireError> {
        send_frame(&self.outbound, frame)
    }

    pub fn ping(&self) -> Result<(), WireError> {
        push(&self.outbound, Outbound::Ping)
    }

    /// Close the transport without notifying the computer.
    pub fn close(&self) {
        let _ = push(&self.outbound, Outbound::Close);
    }

    /// Drop the transport as if it had crashed; no close frame is sent.
    pub fn terminate(&self) {
        let _ = push(&self.outbound, Outbound::Terminate);
    }

    /// Graceful close: `disconnect` notice, then close.
    pub fn disconnect(&self, message: &str) {
        let _ = self.send(&OutboundFrame::Disconnect {
            message: message.to_string(),
        });
        self.close();
    }

    /// Fatal close: `error` frame naming the reason, then close.
    pub fn disconnect_error(&self, message: &str) {
        let _ = self.send(&OutboundFrame::Error {
            message: message.to_string(),
        });
        self.close();
    }

    /// Record a probe acknowledgement.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Read and clear the liveness flag.
    pub(crate) fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    /// Release everything the session held once the transport is gone:
    /// the registry entry (only if it still points here) and every pending job.
    pub fn release(&self, registry: &ComputerRegistry) {
        if let Some(label) = self.label() {
            if registry.unregister(label, self) {
                info!(label, remote_addr = %self.remote_addr, "Computer unregistered");
            }
        }
        let failed = self.jobs.fail_all();
        if failed > 0 {
            info!(
                remote_addr = %self.remote_addr,
                failed,
                "Failed pending jobs of closed connection"
            );
        }
        let connected_for = Utc::now() - self.connected_at;
        debug!(
            connection_id = %self.id,
            connected_secs = connected_for.num_seconds(),
            "Connection released"
        );
    }
}

/// Encode and queue a frame on an outbound queue.
pub(crate) fn send_frame(tx: &OutboundTx, frame: &OutboundFrame) -> Result<(), WireError> {
    let text = encode_frame(frame)?;
    debug!(frame_type = frame.frame_type(), "Sending frame");
    push(tx, Outbound::Text(text))
}

fn push(tx: &OutboundTx, item: Outbound) -> Result<(), WireError> {
    tx.send(item).map_err(|_| WireError::ConnectionClosed)
}
