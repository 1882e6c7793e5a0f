//! HTTP/WebSocket server for the nerv control plane.
//!
//! Exposes the agent endpoint (`/ws`), a small read-only JSON API that turns
//! each request into one job on a connected computer, and the static web UI.

pub mod computers;
pub mod routes;
pub mod server;
pub mod ws;
