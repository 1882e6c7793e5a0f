//! Per-connection job dispatch and completion correlation.
//!
//! A job is one `runJob` frame sent to a computer and the `finishJob` frame it
//! eventually answers with. [`JobManager::run_job`] turns that exchange into
//! an awaitable call: the pending table maps each job id to a one-shot
//! channel, and whichever of {completion, timeout, disconnect} removes the
//! entry from the table first decides the outcome. The others find nothing to
//! remove and do nothing.

use crate::connection::{send_frame, OutboundTx};
use crate::error::JobError;
use crate::message::{JobCompletion, OutboundFrame, Payload, PROTOCOL_FIELDS};
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

type JobResult = Result<Payload, JobError>;

/// Pending jobs of one connection.
#[derive(Debug)]
pub struct JobManager {
    outbound: OutboundTx,
    pending: DashMap<String, oneshot::Sender<JobResult>>,
}

/// Removes a pending entry when the caller stops waiting, whatever the reason.
struct PendingJob<'a> {
    pending: &'a DashMap<String, oneshot::Sender<JobResult>>,
    job_id: &'a str,
}

impl Drop for PendingJob<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.job_id);
    }
}

impl JobManager {
    /// Timeout used when the caller has no preference.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

    pub(crate) fn new(outbound: OutboundTx) -> Self {
        Self {
            outbound,
            pending: DashMap::new(),
        }
    }

    fn generate_job_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Dispatch a job and wait for its result.
    ///
    /// Protocol fields (`type`, `jobId`, `jobType`) in `payload` are dropped
    /// before sending. The result is the completion frame minus those fields.
    pub async fn run_job(
        &self,
        job_type: &str,
        mut payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, JobError> {
        let job_id = Self::generate_job_id();
        let (tx, mut rx) = oneshot::channel();

        // Bookkeeping exists before the frame leaves, so a completion can
        // never arrive for an id we do not know yet.
        self.pending.insert(job_id.clone(), tx);
        let _guard = PendingJob {
            pending: &self.pending,
            job_id: &job_id,
        };

        for field in PROTOCOL_FIELDS {
            payload.remove(field);
        }
        let frame = OutboundFrame::RunJob {
            job_id: job_id.clone(),
            job_type: job_type.to_string(),
            payload,
        };
        if send_frame(&self.outbound, &frame).is_err() {
            return Err(JobError::Disconnected);
        }
        debug!(job_id = %job_id, job_type, "Job dispatched");

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(JobError::Disconnected),
            Err(_) => {
                if self.pending.remove(&job_id).is_some() {
                    warn!(
                        job_id = %job_id,
                        job_type,
                        timeout_ms = timeout.as_millis() as u64,
                        "Job timed out"
                    );
                    return Err(JobError::Timeout {
                        job_type: job_type.to_string(),
                        timeout,
                    });
                }
                // A completion claimed the entry just before the timer fired;
                // its result is already on the way.
                rx.await.unwrap_or(Err(JobError::Disconnected))
            }
        }
    }

    /// Resolve the job a completion frame refers to.
    ///
    /// Returns `false` (and does nothing) for a missing, unknown or already
    /// resolved job id.
    pub fn finish_job(&self, completion: JobCompletion) -> bool {
        let Some(job_id) = completion.job_id else {
            warn!("Job completion without jobId ignored");
            return false;
        };
        match self.pending.remove(&job_id) {
            Some((_, tx)) => {
                debug!(job_id = %job_id, "Job finished");
                let _ = tx.send(Ok(completion.payload));
                true
            }
            None => {
                debug!(job_id = %job_id, "Completion for unknown or expired job dropped");
                false
            }
        }
    }

    /// Fail every pending job with [`JobError::Disconnected`].
    pub fn fail_all(&self) -> usize {
        let job_ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for job_id in job_ids {
            if let Some((_, tx)) = self.pending.remove(&job_id) {
                let _ = tx.send(Err(JobError::Disconnected));
                failed += 1;
            }
        }
        failed
    }

    /// Number of jobs awaiting completion.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
