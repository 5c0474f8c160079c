use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::api::{remote_error, WorkerId};
use crate::cache::{ArtifactCache, FileCache, FileWriter};
use crate::error::{Error, Result};
use crate::id::Id;

/// Routes serving a [`FileCache`] over HTTP: GET streams the entry's bytes,
/// PUT uploads them idempotently. The entry ID travels in the `id` header.
pub fn file_router(cache: Arc<FileCache>) -> Router {
    Router::new()
        .route("/file", get(get_file).put(put_file))
        .with_state(FileRoutes {
            cache,
            gate: Arc::new(UploadGate::default()),
        })
}

/// Routes serving an [`ArtifactCache`] over HTTP: GET responds with the
/// artifact tree as a tar archive.
pub fn artifact_router(cache: Arc<ArtifactCache>) -> Router {
    Router::new()
        .route("/artifact", get(get_artifact))
        .with_state(cache)
}

#[derive(Clone)]
struct FileRoutes {
    cache: Arc<FileCache>,
    gate: Arc<UploadGate>,
}

/// Keyed gate deduplicating concurrent uploads of the same entry: the loser
/// of the race waits for the winner, then observes the committed entry and
/// short-circuits.
#[derive(Default)]
struct UploadGate {
    locks: parking_lot::Mutex<HashMap<Id, Arc<tokio::sync::Mutex<()>>>>,
}

impl UploadGate {
    async fn acquire(&self, id: &Id) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .entry(*id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

async fn get_file(State(routes): State<FileRoutes>, headers: HeaderMap) -> Response {
    let id = match id_from_headers(&headers, "id") {
        Ok(id) => id,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err),
    };
    let handle = match routes.cache.get(&id) {
        Ok(handle) => handle,
        Err(err) => return error_response(StatusCode::NOT_FOUND, &err),
    };
    match tokio::fs::read(handle.path()).await {
        Ok(data) => data.into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err),
    }
}

async fn put_file(State(routes): State<FileRoutes>, headers: HeaderMap, body: Bytes) -> Response {
    let id = match id_from_headers(&headers, "id") {
        Ok(id) => id,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err),
    };

    let _permit = routes.gate.acquire(&id).await;
    match routes.cache.write(&id) {
        Err(err) if err.is_exists() => {
            tracing::debug!(file_id = %id, "file already cached, skipping upload");
            StatusCode::OK.into_response()
        }
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err),
        Ok(writer) => match store_file(writer, &body) {
            Ok(()) => StatusCode::OK.into_response(),
            Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err),
        },
    }
}

fn store_file(mut writer: FileWriter, data: &[u8]) -> Result<()> {
    writer.write_all(data)?;
    writer.commit()
}

async fn get_artifact(State(cache): State<Arc<ArtifactCache>>, headers: HeaderMap) -> Response {
    let id = match id_from_headers(&headers, "id") {
        Ok(id) => id,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err),
    };
    let handle = match cache.get(&id) {
        Ok(handle) => handle,
        Err(err) => return error_response(StatusCode::NOT_FOUND, &err),
    };
    let packed =
        tokio::task::spawn_blocking(move || super::tar::pack(handle.path())).await;
    match packed {
        Ok(Ok(data)) => data.into_response(),
        Ok(Err(err)) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err),
    }
}

/// Client side of the coordinator's `/file` endpoint.
pub struct FileClient {
    endpoint: String,
    http: reqwest::Client,
}

impl FileClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        FileClient {
            endpoint: endpoint.into(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn upload(&self, id: &Id, local_path: &Path) -> Result<()> {
        let content = tokio::fs::read(local_path).await?;
        let response = self
            .http
            .put(format!("{}/file", self.endpoint))
            .header("id", id.to_string())
            .body(content)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        tracing::debug!(file_id = %id, path = %local_path.display(), "file uploaded");
        Ok(())
    }

    /// Fetch a file into the local cache. A concurrent download of the same
    /// entry winning the race counts as success.
    pub async fn download(&self, cache: &FileCache, id: &Id) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/file", self.endpoint))
            .header("id", id.to_string())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        let content = response.bytes().await?;

        let writer = match cache.write(id) {
            Ok(writer) => writer,
            Err(err) if err.is_exists() => return Ok(()),
            Err(err) => return Err(err),
        };
        store_file(writer, &content)
    }
}

/// Fetch an artifact tree from the worker that owns it into the local cache.
pub async fn download_artifact(cache: &ArtifactCache, owner: &WorkerId, id: &Id) -> Result<()> {
    let response = reqwest::Client::new()
        .get(format!("{}/artifact", owner.as_str()))
        .header("id", id.to_string())
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(remote_error(response).await);
    }
    let content = response.bytes().await?;

    let writer = match cache.create(id) {
        Ok(writer) => writer,
        Err(err) if err.is_exists() => return Ok(()),
        Err(err) => return Err(err),
    };
    super::tar::unpack(&content, writer.path())?;
    writer.commit()?;
    tracing::debug!(artifact_id = %id, owner = %owner, "artifact downloaded");
    Ok(())
}

pub(crate) fn id_from_headers(headers: &HeaderMap, name: &str) -> Result<Id> {
    let value = headers
        .get(name)
        .ok_or_else(|| Error::BadRequest(format!("missing {name} header")))?;
    let text = value
        .to_str()
        .map_err(|_| Error::BadRequest(format!("malformed {name} header")))?;
    text.parse()
}

pub(crate) fn error_response(status: StatusCode, err: &impl fmt::Display) -> Response {
    (status, Json(err.to_string())).into_response()
}
