//! Build session state machine.
//!
//! Each build moves through admission (`start_build`), missing-source
//! negotiation (the client uploads, then signals `UploadDone`), job release
//! (`signal_build` hands jobs to the scheduler in topological order once
//! their deps are locatable) and streaming completion (`heartbeat` fans
//! `JobFinished` updates back to the owning session until the terminal
//! `BuildFinished`).

pub mod http;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::api::{
    BuildFinished, BuildRequest, BuildStarted, HeartbeatRequest, HeartbeatResponse, JobResult,
    JobSpec, SignalRequest, SignalResponse, StatusUpdate, StatusWriter, WorkerId,
};
use crate::cache::FileCache;
use crate::error::{Error, Result};
use crate::graph::{topo_sort, Job};
use crate::id::Id;
use crate::scheduler::Scheduler;

/// Per-build session. Everything but the progress section is immutable once
/// admitted; the mutex guards the status writer and the completion count.
pub struct BuildData {
    build_id: Id,
    jobs: Vec<Job>,
    file_id_by_name: HashMap<String, Id>,
    progress: AsyncMutex<BuildProgress>,
}

struct BuildProgress {
    writer: StatusWriter,
    jobs_done: usize,
}

pub struct Coordinator {
    files: Arc<FileCache>,
    scheduler: Arc<Scheduler>,
    builds: Mutex<HashMap<Id, Arc<BuildData>>>,
    /// Fan-in registry: completion heartbeats find the owning session here.
    /// Each admitted build enqueues its session handle under every job ID in
    /// its graph; each completion consumes one handle.
    build_by_job: Mutex<HashMap<Id, VecDeque<Arc<BuildData>>>>,
}

impl Coordinator {
    pub fn new(files: Arc<FileCache>, scheduler: Arc<Scheduler>) -> Self {
        Coordinator {
            files,
            scheduler,
            builds: Mutex::new(HashMap::new()),
            build_by_job: Mutex::new(HashMap::new()),
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// Admit a build: sort its graph, probe the file cache for missing
    /// sources, register the session, and emit `BuildStarted`. Errors before
    /// the emit leave no visible session.
    pub async fn start_build(&self, req: BuildRequest, writer: StatusWriter) -> Result<()> {
        if req.graph.jobs.is_empty() {
            return Err(Error::BadRequest("graph contains no jobs".into()));
        }
        let build_id = Id::random();
        let jobs = topo_sort(&req.graph.jobs)?;
        tracing::debug!(build_id = %build_id, jobs = jobs.len(), "build admitted");

        let mut file_id_by_name = HashMap::with_capacity(req.graph.source_files.len());
        let mut missing_files = Vec::new();
        for (file_id, file_name) in &req.graph.source_files {
            file_id_by_name.insert(file_name.clone(), *file_id);
            match self.files.get(file_id) {
                Ok(handle) => drop(handle),
                Err(_) => missing_files.push(*file_id),
            }
        }
        missing_files.sort();

        let data = Arc::new(BuildData {
            build_id,
            jobs,
            file_id_by_name,
            progress: AsyncMutex::new(BuildProgress {
                writer,
                jobs_done: 0,
            }),
        });

        {
            let mut by_job = self.build_by_job.lock();
            for job in &data.jobs {
                by_job.entry(job.id).or_default().push_back(data.clone());
            }
        }
        self.builds.lock().insert(build_id, data.clone());

        let progress = data.progress.lock().await;
        progress
            .writer
            .started(BuildStarted {
                id: build_id,
                missing_files,
            })
            .await
    }

    /// Release the build's jobs to the scheduler. Jobs go out in topological
    /// order; each waits until every dep artifact is locatable so a job is
    /// never dispatched before its inputs can be fetched.
    pub async fn signal_build(&self, build_id: Id, req: SignalRequest) -> Result<SignalResponse> {
        let Some(data) = self.builds.lock().get(&build_id).cloned() else {
            panic!("signal for unknown build {build_id}");
        };
        tracing::debug!(build_id = %build_id, "signal received");

        if req.upload_done.is_some() {
            for job in &data.jobs {
                let mut source_files = HashMap::with_capacity(job.inputs.len());
                for input in &job.inputs {
                    let Some(file_id) = data.file_id_by_name.get(input) else {
                        return Err(Error::BadRequest(format!(
                            "job {} reads {input:?}, which is not among the build's source files",
                            job.id
                        )));
                    };
                    source_files.insert(*file_id, input.clone());
                }

                let mut artifacts = HashMap::with_capacity(job.deps.len());
                for dep in &job.deps {
                    match self.scheduler.await_artifact(dep).await {
                        Some(worker_id) => {
                            artifacts.insert(*dep, worker_id);
                        }
                        None => return Err(Error::Cancelled),
                    }
                }

                self.scheduler
                    .schedule_job(JobSpec {
                        job: job.clone(),
                        source_files,
                        artifacts,
                    })
                    .await;
            }
        }

        Ok(SignalResponse {})
    }

    /// Handle one worker heartbeat: account for finished jobs, then hand out
    /// up to `free_slots` pending jobs, short-circuiting any whose artifact
    /// is already published.
    pub async fn heartbeat(&self, req: HeartbeatRequest) -> Result<HeartbeatResponse> {
        for finished in &req.finished_jobs {
            self.process_finished_job(finished, &req.worker_id).await;
        }

        let mut jobs_to_run = HashMap::new();
        for _ in 0..req.free_slots {
            let Some(pending) = self.scheduler.pick_job(&req.worker_id).await else {
                break;
            };
            let job_id = pending.spec.job.id;
            if let Some(owner) = self.scheduler.locate_artifact(&job_id) {
                tracing::info!(job_id = %job_id, owner = %owner, "artifact already cached, skipping dispatch");
                self.process_finished_job(&JobResult::success(job_id), &owner)
                    .await;
                continue;
            }
            jobs_to_run.insert(job_id, pending.spec.clone());
        }

        Ok(HeartbeatResponse { jobs_to_run })
    }

    async fn process_finished_job(&self, result: &JobResult, worker_id: &WorkerId) {
        self.scheduler.on_job_complete(worker_id, result.id, result);

        let data = {
            let mut by_job = self.build_by_job.lock();
            let sessions = by_job
                .get_mut(&result.id)
                .unwrap_or_else(|| panic!("completion for unknown job {}", result.id));
            let data = sessions
                .pop_front()
                .unwrap_or_else(|| panic!("completion for unknown job {}", result.id));
            if sessions.is_empty() {
                by_job.remove(&result.id);
            }
            data
        };

        let mut progress = data.progress.lock().await;
        if let Err(error) = progress
            .writer
            .updated(StatusUpdate::JobFinished(result.clone()))
            .await
        {
            tracing::error!(
                job_id = %result.id,
                build_id = %data.build_id,
                %error,
                "failed to deliver job status"
            );
        }
        progress.jobs_done += 1;
        tracing::debug!(
            job_id = %result.id,
            build_id = %data.build_id,
            done = progress.jobs_done,
            total = data.jobs.len(),
            "job finished"
        );

        if progress.jobs_done == data.jobs.len() {
            if let Err(error) = progress
                .writer
                .updated(StatusUpdate::BuildFinished(BuildFinished::default()))
                .await
            {
                tracing::error!(build_id = %data.build_id, %error, "failed to deliver terminal status");
            }
            drop(progress);
            self.builds.lock().remove(&data.build_id);
            tracing::info!(build_id = %data.build_id, "build finished");
        }
    }
}
