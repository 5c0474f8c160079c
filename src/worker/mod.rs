//! Worker process: serves its caches to peers and pulls jobs from the
//! coordinator over the heartbeat protocol.
//!
//! Each loop iteration reports the results accumulated since the previous
//! heartbeat and receives a batch of job specs. For every spec the worker
//! stages dependency artifacts (fetching from the owning worker when not
//! cached locally) and source files (fetching from the coordinator when
//! missing), materializes the source tree by symlink into a scratch
//! directory, runs the rendered commands, and commits the produced artifact.

pub mod executor;

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::api::{HeartbeatClient, HeartbeatRequest, JobResult, JobSpec, WorkerId};
use crate::cache::http::{artifact_router, download_artifact, file_router, FileClient};
use crate::cache::{ArtifactCache, FileCache};
use crate::error::Result;
use crate::graph::JobContext;
use crate::id::Id;

/// Jobs run sequentially within a heartbeat iteration, so exactly one slot
/// is advertised per round trip.
const FREE_SLOTS: usize = 1;

pub struct Worker {
    id: WorkerId,
    files: Arc<FileCache>,
    artifacts: Arc<ArtifactCache>,
    heartbeat: HeartbeatClient,
    file_client: FileClient,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        coordinator_endpoint: &str,
        files: Arc<FileCache>,
        artifacts: Arc<ArtifactCache>,
    ) -> Self {
        Worker {
            id,
            files,
            artifacts,
            heartbeat: HeartbeatClient::new(coordinator_endpoint),
            file_client: FileClient::new(coordinator_endpoint),
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Routes serving this worker's caches to the coordinator's other
    /// workers.
    pub fn router(&self) -> Router {
        file_router(self.files.clone())
            .merge(artifact_router(self.artifacts.clone()))
            .layer(TraceLayer::new_for_http())
    }

    /// Heartbeat loop. Returns when the shutdown token is cancelled, or with
    /// an error if a heartbeat round trip fails.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut finished_jobs: Vec<JobResult> = Vec::new();
        let mut added_artifacts: Vec<Id> = Vec::new();
        tracing::info!(worker_id = %self.id, "worker loop started");

        loop {
            let request = HeartbeatRequest {
                worker_id: self.id.clone(),
                running_jobs: Vec::new(),
                free_slots: FREE_SLOTS,
                finished_jobs: std::mem::take(&mut finished_jobs),
                added_artifacts: std::mem::take(&mut added_artifacts),
            };

            let response = tokio::select! {
                response = self.heartbeat.heartbeat(&request) => response?,
                _ = shutdown.cancelled() => {
                    tracing::info!(worker_id = %self.id, "worker loop stopped");
                    return Ok(());
                }
            };
            tracing::debug!(
                worker_id = %self.id,
                jobs = response.jobs_to_run.len(),
                "heartbeat served"
            );

            for (_, spec) in response.jobs_to_run {
                let result = self.run_job(&spec, &mut added_artifacts).await;
                finished_jobs.push(result);
            }
        }
    }

    async fn run_job(&self, spec: &JobSpec, added_artifacts: &mut Vec<Id>) -> JobResult {
        match self.try_run_job(spec, added_artifacts).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(job_id = %spec.job.id, error = %err, "job setup failed");
                JobResult {
                    id: spec.job.id,
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: 1,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn try_run_job(&self, spec: &JobSpec, added_artifacts: &mut Vec<Id>) -> Result<JobResult> {
        tracing::info!(job_id = %spec.job.id, name = %spec.job.name, worker_id = %self.id, "running job");

        // Dependency artifacts stay pinned until the job exits.
        let mut dep_paths = HashMap::with_capacity(spec.artifacts.len());
        let mut artifact_pins = Vec::with_capacity(spec.artifacts.len());
        for (artifact_id, owner) in &spec.artifacts {
            let handle = match self.artifacts.get(artifact_id) {
                Ok(handle) => handle,
                Err(_) => {
                    download_artifact(&self.artifacts, owner, artifact_id).await?;
                    added_artifacts.push(*artifact_id);
                    self.artifacts.get(artifact_id)?
                }
            };
            dep_paths.insert(*artifact_id, handle.path().to_path_buf());
            artifact_pins.push(handle);
        }

        for file_id in spec.source_files.keys() {
            if !self.files.contains(file_id) {
                self.file_client.download(&self.files, file_id).await?;
            }
        }

        let output = self.artifacts.create(&spec.job.id)?;
        let source_dir = tempfile::tempdir()?;

        let mut file_pins = Vec::with_capacity(spec.source_files.len());
        for (file_id, file_name) in &spec.source_files {
            let handle = self.files.get(file_id)?;
            let link = source_dir.path().join(file_name);
            if let Some(parent) = link.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::os::unix::fs::symlink(handle.path(), &link)?;
            file_pins.push(handle);
        }

        let ctx = JobContext {
            source_dir: source_dir.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
            deps: dep_paths,
        };
        let outcome = executor::run_commands(&spec.job.cmds, &ctx).await;

        if outcome.exit_code == 0 {
            output.commit()?;
            added_artifacts.push(spec.job.id);
            tracing::info!(job_id = %spec.job.id, "job succeeded");
        } else {
            output.abort()?;
            tracing::warn!(
                job_id = %spec.job.id,
                exit_code = outcome.exit_code,
                "job failed"
            );
        }

        Ok(JobResult {
            id: spec.job.id,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            exit_code: outcome.exit_code,
            error: outcome.error,
        })
    }
}
