use std::path::PathBuf;

use crate::api::{BuildClient, BuildRequest, SignalRequest, StatusUpdate, UploadDone};
use crate::cache::http::FileClient;
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::id::Id;

/// Callbacks observing per-job progress of a running build.
pub trait BuildListener: Send {
    fn on_job_stdout(&mut self, job_id: Id, stdout: &str);
    fn on_job_stderr(&mut self, job_id: Id, stderr: &str);
    fn on_job_finished(&mut self, job_id: Id);
    fn on_job_failed(&mut self, job_id: Id, exit_code: i32, error: &str);
}

/// Drives one build end to end: submit the graph, upload whatever sources
/// the coordinator is missing, signal `UploadDone`, then pump status updates
/// into the listener until the terminal update arrives.
pub struct Client {
    source_dir: PathBuf,
    build_client: BuildClient,
    file_client: FileClient,
}

impl Client {
    pub fn new(endpoint: &str, source_dir: impl Into<PathBuf>) -> Self {
        Client {
            source_dir: source_dir.into(),
            build_client: BuildClient::new(endpoint),
            file_client: FileClient::new(endpoint),
        }
    }

    pub async fn build(&self, graph: Graph, listener: &mut dyn BuildListener) -> Result<()> {
        let request = BuildRequest { graph };
        let (started, mut updates) = self.build_client.start_build(&request).await?;

        for file_id in &started.missing_files {
            let Some(rel_path) = request.graph.source_files.get(file_id) else {
                return Err(Error::Internal(format!(
                    "coordinator requested unknown file {file_id}"
                )));
            };
            self.file_client
                .upload(file_id, &self.source_dir.join(rel_path))
                .await?;
        }

        self.build_client
            .signal_build(
                started.id,
                &SignalRequest {
                    upload_done: Some(UploadDone {}),
                },
            )
            .await?;

        while let Some(update) = updates.next().await? {
            match update {
                StatusUpdate::JobFinished(result) => {
                    listener.on_job_stdout(result.id, &result.stdout);
                    listener.on_job_stderr(result.id, &result.stderr);
                    match &result.error {
                        Some(error) => {
                            listener.on_job_failed(result.id, result.exit_code, error)
                        }
                        None => listener.on_job_finished(result.id),
                    }
                }
                StatusUpdate::BuildFinished(_) => {
                    tracing::info!(build_id = %started.id, "build finished");
                    return Ok(());
                }
                StatusUpdate::BuildFailed(failed) => {
                    tracing::warn!(build_id = %started.id, error = %failed.error, "build failed");
                    return Err(Error::Remote(failed.error));
                }
            }
        }

        Err(Error::Remote(
            "status stream ended without a terminal update".into(),
        ))
    }
}
