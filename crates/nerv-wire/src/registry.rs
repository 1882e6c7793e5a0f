//! Computer registry: which connection currently represents each label.
//!
//! The [`ComputerRegistry`] is the single source of truth for routing work to
//! a computer. Callers resolve a label through it on every call instead of
//! holding on to a connection, because a reconnect silently supersedes the
//! previous entry.

use crate::connection::ComputerConnection;
use crate::error::JobError;
use crate::message::Payload;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Thread-safe label → connection map. Cloning shares the same map.
#[derive(Debug, Clone, Default)]
pub struct ComputerRegistry {
    computers: Arc<DashMap<String, Arc<ComputerConnection>>>,
}

impl ComputerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `connection` under `label`, replacing (but not closing) any
    /// previous connection. Returns the superseded connection.
    pub fn register(
        &self,
        label: &str,
        connection: Arc<ComputerConnection>,
    ) -> Option<Arc<ComputerConnection>> {
        self.computers.insert(label.to_string(), connection)
    }

    /// Get the connection currently registered under `label`.
    pub fn lookup(&self, label: &str) -> Option<Arc<ComputerConnection>> {
        self.computers.get(label).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove `label` only if it still maps to `connection`, so a stale close
    /// cannot evict a newer connection that reused the label.
    pub fn unregister(&self, label: &str, connection: &ComputerConnection) -> bool {
        self.computers
            .remove_if(label, |_, current| current.id() == connection.id())
            .is_some()
    }

    /// Registered labels, sorted.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.computers.iter().map(|e| e.key().clone()).collect();
        labels.sort();
        labels
    }

    pub fn len(&self) -> usize {
        self.computers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.computers.is_empty()
    }

    /// Run a job on the computer registered under `label`.
    ///
    /// Fails immediately with [`JobError::Unavailable`] when nothing is
    /// registered; there is no queuing or retry.
    pub async fn run_job(
        &self,
        label: &str,
        job_type: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, JobError> {
        let connection = self
            .lookup(label)
            .ok_or_else(|| JobError::Unavailable(label.to_string()))?;
        connection.jobs().run_job(job_type, payload, timeout).await
    }

    /// Send every registered computer a `disconnect` notice and close it.
    pub fn disconnect_all(&self, message: &str) -> usize {
        let connections: Vec<Arc<ComputerConnection>> = self
            .computers
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        for connection in &connections {
            info!(
                label = connection.label().unwrap_or_default(),
                "Disconnecting computer"
            );
            connection.disconnect(message);
        }
        connections.len()
    }
}
