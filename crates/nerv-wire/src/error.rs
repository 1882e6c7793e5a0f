//! Errors from the wire protocol layer.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while handling a single connection.
///
/// Every variant is fatal to the connection it occurred on.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Failure of a single job. The connection stays usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// No computer is registered under the requested label.
    #[error("computer '{0}' is unavailable")]
    Unavailable(String),
    /// No completion arrived within the job's timeout.
    #[error("job '{job_type}' timed out after {} ms", .timeout.as_millis())]
    Timeout { job_type: String, timeout: Duration },
    /// The connection closed while the job was pending.
    #[error("computer disconnected before job completed")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_messages() {
        assert_eq!(
            JobError::Unavailable("Battery".to_string()).to_string(),
            "computer 'Battery' is unavailable"
        );
        let timeout = JobError::Timeout {
            job_type: "getStatus".to_string(),
            timeout: Duration::from_millis(1000),
        };
        assert_eq!(timeout.to_string(), "job 'getStatus' timed out after 1000 ms");
    }
}
