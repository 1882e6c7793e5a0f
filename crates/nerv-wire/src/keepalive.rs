//! Liveness probing for computer sessions.
//!
//! The first probe goes out as soon as the session starts. After that, every
//! interval the monitor checks the connection's liveness flag. If the computer
//! acknowledged the previous probe the flag is cleared and a new probe is sent;
//! otherwise the session is terminated without a close handshake. A silent
//! computer is therefore dropped one interval after its last acknowledgement.

use crate::connection::ComputerConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Outcome of a single probe round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// The previous probe was acknowledged; a new one is on its way.
    Sent,
    /// No acknowledgement since the last round; the session was terminated.
    Terminated,
}

/// Periodic liveness checker.
#[derive(Debug, Clone, Copy)]
pub struct KeepAliveMonitor {
    interval: Duration,
}

impl Default for KeepAliveMonitor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}

impl KeepAliveMonitor {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

    /// A zero interval falls back to [`Self::DEFAULT_INTERVAL`].
    pub fn new(interval: Duration) -> Self {
        if interval.is_zero() {
            warn!(
                default_secs = Self::DEFAULT_INTERVAL.as_secs(),
                "Zero keep-alive interval, using default"
            );
            return Self::default();
        }
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one probe round against `connection`.
    pub fn probe(&self, connection: &ComputerConnection) -> Probe {
        if !connection.take_alive() {
            warn!(
                label = connection.label().unwrap_or_default(),
                remote_addr = %connection.remote_addr(),
                "Computer failed to answer liveness probe. Terminating."
            );
            connection.terminate();
            return Probe::Terminated;
        }
        if connection.ping().is_err() {
            return Probe::Terminated;
        }
        Probe::Sent
    }

    /// Probe `connection` every interval until it is terminated or closed.
    ///
    /// The returned handle should be aborted when the session ends.
    pub fn spawn(&self, connection: Arc<ComputerConnection>) -> JoinHandle<()> {
        let monitor = *self;
        tokio::spawn(async move {
            let mut ticker = interval(monitor.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !connection.is_open() {
                    break;
                }
                if monitor.probe(&connection) == Probe::Terminated {
                    break;
                }
            }
            debug!(connection_id = %connection.id(), "Keep-alive stopped");
        })
    }
}
