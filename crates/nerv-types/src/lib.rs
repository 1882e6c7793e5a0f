//! Core types for the nerv control plane.
//!
//! This crate defines the configuration and error types shared by the wire
//! protocol, the HTTP server, and the binary. It contains no business logic.

pub mod config;
pub mod error;
