//! Per-order polling of analysis jobs.
//!
//! Each polled order gets its own task and [`CancellationToken`]. A task
//! checks the job immediately, then once per interval, until the job is done,
//! the maximum wait has elapsed, or the token is cancelled. The task always
//! stops its own timer before it writes the order's terminal state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::artifacts::ArtifactProcessor;
use crate::clients::StorageClient;
use crate::clients::types::JobRecord;
use crate::config::PollingConfig;
use crate::error::PipelineError;
use crate::finalize::finalize_order;
use crate::order::Outcome;
use crate::store::OrderStore;

pub const TIMEOUT_REASON: &str = "Failed to generate report, try again later!";
pub const PROCESSING_FAILED_REASON: &str = "Failed to process report PDFs";
pub const INTERRUPTED_REASON: &str = "Report generation was interrupted, try again later!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl From<&PollingConfig> for PollPolicy {
    fn from(config: &PollingConfig) -> Self {
        Self {
            interval: config.interval(),
            max_wait: config.max_wait(),
        }
    }
}

/// Result of [`PollSupervisor::start_polling`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStart {
    Started,
    /// The order already has a polling task; nothing was started.
    AlreadyPolling,
    /// [`PollSupervisor::cancel_all`] ran and no new polls are accepted until
    /// [`PollSupervisor::resume`]. The caller owns the order's fate.
    Halted,
}

/// Everything one polling task needs to know about its job.
struct PollState {
    job_id: String,
    token: String,
    order_id: String,
    started_at: Instant,
}

struct PollHandle {
    job_id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct PollSupervisor {
    storage: StorageClient,
    processor: ArtifactProcessor,
    store: Arc<dyn OrderStore>,
    policy: PollPolicy,
    active: Mutex<HashMap<String, PollHandle>>,
    halted: AtomicBool,
}

impl PollSupervisor {
    pub fn new(
        storage: StorageClient,
        processor: ArtifactProcessor,
        store: Arc<dyn OrderStore>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            storage,
            processor,
            store,
            policy,
            active: Mutex::new(HashMap::new()),
            halted: AtomicBool::new(false),
        }
    }

    fn active(&self) -> MutexGuard<'_, HashMap<String, PollHandle>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of orders currently being polled.
    pub fn in_flight(&self) -> usize {
        self.active().len()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Accepts new polls again after [`cancel_all`](Self::cancel_all).
    pub fn resume(&self) {
        let _active = self.active();
        if self.halted.swap(false, Ordering::SeqCst) {
            info!("Polling resumed");
        }
    }

    /// Starts polling `job_id` on behalf of `order_id`.
    pub fn start_polling(
        self: &Arc<Self>,
        job_id: &str,
        token: &str,
        order_id: &str,
    ) -> PollStart {
        let mut active = self.active();
        if self.is_halted() {
            warn!(order_id, job_id, "Polling is halted, refusing new job");
            return PollStart::Halted;
        }
        if let Some(existing) = active.get(order_id) {
            warn!(
                order_id,
                job_id = %existing.job_id,
                "Order is already being polled, ignoring"
            );
            return PollStart::AlreadyPolling;
        }

        let cancel = CancellationToken::new();
        let state = PollState {
            job_id: job_id.to_string(),
            token: token.to_string(),
            order_id: order_id.to_string(),
            started_at: Instant::now(),
        };
        info!(
            order_id,
            job_id,
            interval_secs = self.policy.interval.as_secs_f64(),
            max_wait_secs = self.policy.max_wait.as_secs_f64(),
            "Polling started"
        );

        // The entry is inserted before the lock is released, so the task
        // cannot try to remove it first.
        let task = tokio::spawn(Arc::clone(self).run(state, cancel.clone()));
        active.insert(
            order_id.to_string(),
            PollHandle {
                job_id: job_id.to_string(),
                cancel,
                task,
            },
        );
        PollStart::Started
    }

    /// Cancels every in-flight poll and waits for each to finalize its order
    /// as interrupted. New polls are refused until [`resume`](Self::resume).
    /// Returns how many polls were cancelled.
    pub async fn cancel_all(&self) -> usize {
        let handles: Vec<(String, PollHandle)> = {
            let mut active = self.active();
            self.halted.store(true, Ordering::SeqCst);
            active.drain().collect()
        };
        for (_, handle) in &handles {
            handle.cancel.cancel();
        }

        let count = handles.len();
        for (order_id, handle) in handles {
            if let Err(e) = handle.task.await {
                error!(order_id = %order_id, error = %e, "Polling task panicked");
            }
        }
        if count > 0 {
            info!(count, "Cancelled in-flight polls");
        }
        count
    }

    async fn run(self: Arc<Self>, state: PollState, cancel: CancellationToken) {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(order_id = %state.order_id, job_id = %state.job_id, "Polling interrupted");
                Outcome::failed(INTERRUPTED_REASON)
            }
            outcome = self.watch(&state) => outcome,
        };

        cancel.cancel();
        self.active().remove(&state.order_id);
        finalize_order(self.store.as_ref(), &state.order_id, &outcome).await;
    }

    /// Polls until the job resolves one way or the other.
    ///
    /// Waiting for the job never outlasts `max_wait + interval`, even when a
    /// status query hangs.
    async fn watch(&self, state: &PollState) -> Outcome {
        let order_id = state.order_id.as_str();
        let deadline = state.started_at + self.policy.max_wait + self.policy.interval;

        let finished = tokio::select! {
            record = self.wait_for_report(state) => record,
            _ = time::sleep_until(deadline) => None,
        };
        let Some(record) = finished else {
            let err = PipelineError::PollTimeout {
                elapsed_secs: state.started_at.elapsed().as_secs(),
            };
            warn!(order_id, job_id = %state.job_id, error = %err, "Giving up on report");
            return Outcome::failed(TIMEOUT_REASON);
        };

        info!(order_id, job_id = %state.job_id, "Report ready, processing PDFs");
        match self.process_reports(&record).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(order_id, error = %e, "Report processing failed");
                Outcome::failed(PROCESSING_FAILED_REASON)
            }
        }
    }

    /// Returns the finished job record, or `None` once `max_wait` has elapsed.
    async fn wait_for_report(&self, state: &PollState) -> Option<JobRecord> {
        let order_id = state.order_id.as_str();
        let mut ticker = time::interval(self.policy.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if state.started_at.elapsed() > self.policy.max_wait {
                return None;
            }

            match self.storage.job_status(&state.token, &state.job_id).await {
                Ok(Some(record)) if record.is_done() => return Some(record),
                Ok(Some(record)) => {
                    debug!(order_id, status = ?record.status, "Report not ready yet");
                }
                Ok(None) => debug!(order_id, job_id = %state.job_id, "Job not found yet"),
                Err(e) => warn!(order_id, error = %e, "Failed to check job status"),
            }
        }
    }

    async fn process_reports(&self, record: &JobRecord) -> Result<Outcome, PipelineError> {
        let ai_report_url = self
            .processor
            .process(report_url(record.report_url.as_deref(), "AI report")?, "ai_report")
            .await?;
        let similarity_report_url = self
            .processor
            .process(
                report_url(record.similarity_report_url.as_deref(), "similarity report")?,
                "similarity_report",
            )
            .await?;
        Ok(Outcome::Completed {
            ai_report_url,
            similarity_report_url,
        })
    }
}

fn report_url<'a>(url: Option<&'a str>, what: &str) -> Result<&'a str, PipelineError> {
    url.filter(|url| !url.is_empty())
        .ok_or_else(|| PipelineError::Download {
            url: String::new(),
            reason: format!("job has no {what} URL"),
        })
}
