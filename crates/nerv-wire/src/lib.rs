//! nerv wire protocol: the bridge between HTTP callers and remote computers.
//!
//! Computers (embedded agents) hold one persistent connection each. After a
//! labelled handshake they execute jobs dispatched by the server and report
//! completion asynchronously; this crate correlates each completion with the
//! caller waiting on it.
//!
//! ## Architecture
//!
//! - **message**: JSON frame envelope (`{type, ...fields}`) and its codec
//! - **ComputerConnection**: one session: auth state, liveness, outbound queue
//! - **JobManager**: per-connection job id → awaiting caller table with timeouts
//! - **ComputerRegistry**: label → live connection, last writer wins
//! - **HandshakeGate**: label allow-list check and registry admission
//! - **MessageRouter**: deny-by-default dispatch of inbound frames
//! - **KeepAliveMonitor**: periodic probe that terminates silent sessions
//!
//! The crate is transport agnostic: a connection only pushes [`Outbound`]
//! items into a queue, and the transport (the WebSocket session in the API
//! server) drains it and feeds inbound text back through the router.

pub mod connection;
pub mod error;
pub mod handshake;
pub mod jobs;
pub mod keepalive;
pub mod message;
pub mod registry;
pub mod router;

pub use connection::{ComputerConnection, ComputerMeta, ConnectionId, Outbound};
pub use error::{JobError, WireError};
pub use handshake::HandshakeGate;
pub use jobs::JobManager;
pub use keepalive::{KeepAliveMonitor, Probe};
pub use message::{Envelope, InboundFrame, JobCompletion, OutboundFrame, Payload};
pub use registry::ComputerRegistry;
pub use router::{Dispatch, MessageRouter};
