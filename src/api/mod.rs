//! Wire types and HTTP clients for the coordinator's protocol surface.
//!
//! The `/build` response stream is newline-delimited JSON: the first line is
//! a [`BuildStarted`], every following line a [`StatusUpdate`]. All other
//! endpoints exchange single JSON documents. Non-2xx responses carry a
//! JSON-encoded error string.

pub mod build_client;
pub mod heartbeat_client;
pub mod status;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::graph::{Graph, Job};
use crate::id::Id;

pub use build_client::{BuildClient, StatusReader};
pub use heartbeat_client::HeartbeatClient;
pub use status::{StatusFrame, StatusWriter};

/// Persistent worker identity. Doubles as the base URL other processes use
/// to fetch files and artifacts from the worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(endpoint: impl Into<String>) -> Self {
        WorkerId(endpoint.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub graph: Graph,
}

/// First frame of the `/build` response stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildStarted {
    pub id: Id,
    #[serde(default)]
    pub missing_files: Vec<Id>,
}

/// One framed status message; exactly one variant per line on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusUpdate {
    JobFinished(JobResult),
    BuildFinished(BuildFinished),
    BuildFailed(BuildFailed),
}

impl StatusUpdate {
    /// Terminal updates end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StatusUpdate::BuildFinished(_) | StatusUpdate::BuildFailed(_)
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildFinished {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildFailed {
    pub error: String,
}

/// Outcome of one job, reported by the worker on its next heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub id: Id,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub exit_code: i32,
    /// Why the job could not be executed. `None` means the job ran to
    /// completion (its commands may still have failed; see `exit_code`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    /// Synthetic success, used when a job's artifact is already cached.
    pub fn success(id: Id) -> Self {
        JobResult {
            id,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadDone {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_done: Option<UploadDone>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalResponse {}

/// A job released for execution, with everything the worker needs to stage
/// its inputs: which source files to place where, and which worker owns each
/// dependency artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(flatten)]
    pub job: Job,
    #[serde(default)]
    pub source_files: HashMap<Id, String>,
    #[serde(default)]
    pub artifacts: HashMap<Id, WorkerId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: WorkerId,
    #[serde(default)]
    pub running_jobs: Vec<Id>,
    pub free_slots: usize,
    #[serde(default)]
    pub finished_jobs: Vec<JobResult>,
    #[serde(default)]
    pub added_artifacts: Vec<Id>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(default)]
    pub jobs_to_run: HashMap<Id, JobSpec>,
}

/// Decode the JSON-encoded error string a server puts in non-2xx bodies.
pub(crate) async fn remote_error(response: reqwest::Response) -> Error {
    let status = response.status();
    match response.text().await {
        Ok(body) => {
            let message = serde_json::from_str::<String>(&body).unwrap_or(body);
            Error::Remote(format!("{status}: {message}"))
        }
        Err(err) => Error::Transport(err),
    }
}
