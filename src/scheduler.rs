use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::api::{JobResult, JobSpec, WorkerId};
use crate::id::Id;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// A job waiting in the scheduler queue, from `schedule_job` until a
/// heartbeat drains it with `pick_job`.
#[derive(Debug)]
pub struct PendingJob {
    pub spec: JobSpec,
}

/// Deliberately dumb scheduling core: a bounded FIFO of pending jobs plus a
/// registry of published artifact locations. Dependency ordering lives in
/// the coordinator, which only releases a job once every dep is locatable.
pub struct Scheduler {
    queue_tx: mpsc::Sender<Arc<PendingJob>>,
    queue_rx: AsyncMutex<mpsc::Receiver<Arc<PendingJob>>>,
    locations: Mutex<HashMap<Id, Arc<watch::Sender<Option<WorkerId>>>>>,
    stopped: CancellationToken,
}

impl Scheduler {
    pub fn new(queue_capacity: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity);
        Scheduler {
            queue_tx,
            queue_rx: AsyncMutex::new(queue_rx),
            locations: Mutex::new(HashMap::new()),
            stopped: CancellationToken::new(),
        }
    }

    /// Queue a job for execution. Suspends while the queue is full. Returns
    /// `None` if the scheduler has stopped.
    pub async fn schedule_job(&self, spec: JobSpec) -> Option<Arc<PendingJob>> {
        if self.stopped.is_cancelled() {
            return None;
        }
        tracing::info!(job_id = %spec.job.id, name = %spec.job.name, "schedule job");
        let pending = Arc::new(PendingJob { spec });
        tokio::select! {
            sent = self.queue_tx.send(pending.clone()) => sent.ok().map(|_| pending),
            _ = self.stopped.cancelled() => None,
        }
    }

    /// Take the next pending job, suspending until one is queued or the
    /// scheduler stops. FIFO across concurrent callers. The worker identity
    /// is accepted for future locality-aware policies and currently unused.
    pub async fn pick_job(&self, worker_id: &WorkerId) -> Option<Arc<PendingJob>> {
        let mut queue = tokio::select! {
            guard = self.queue_rx.lock() => guard,
            _ = self.stopped.cancelled() => return None,
        };
        tokio::select! {
            job = queue.recv() => {
                if let Some(pending) = &job {
                    tracing::info!(job_id = %pending.spec.job.id, worker_id = %worker_id, "job picked");
                }
                job
            }
            _ = self.stopped.cancelled() => None,
        }
    }

    /// Record where a finished job's artifact lives. Only successful results
    /// publish; returns whether the location was recorded.
    pub fn on_job_complete(&self, worker_id: &WorkerId, job_id: Id, result: &JobResult) -> bool {
        tracing::info!(
            job_id = %job_id,
            worker_id = %worker_id,
            exit_code = result.exit_code,
            "job complete"
        );
        if result.exit_code != 0 {
            return false;
        }
        self.location_slot(job_id).send_replace(Some(worker_id.clone()));
        true
    }

    pub fn locate_artifact(&self, id: &Id) -> Option<WorkerId> {
        self.locations
            .lock()
            .get(id)
            .and_then(|slot| slot.borrow().clone())
    }

    /// Suspend until the artifact is published somewhere, or the scheduler
    /// stops (`None`). One-shot per-artifact signal; no polling.
    pub async fn await_artifact(&self, id: &Id) -> Option<WorkerId> {
        let mut rx = self.location_slot(*id).subscribe();
        tokio::select! {
            located = rx.wait_for(|location| location.is_some()) => {
                located.ok().and_then(|location| location.clone())
            }
            _ = self.stopped.cancelled() => None,
        }
    }

    /// Stop the scheduler: blocked `pick_job` and `await_artifact` callers
    /// unblock with `None`, and later `schedule_job` calls are refused.
    pub fn stop(&self) {
        tracing::info!("scheduler stopped");
        self.stopped.cancel();
    }

    fn location_slot(&self, id: Id) -> Arc<watch::Sender<Option<WorkerId>>> {
        self.locations
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(watch::Sender::new(None)))
            .clone()
    }
}
