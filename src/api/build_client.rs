use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;

use crate::api::{
    remote_error, BuildRequest, BuildStarted, SignalRequest, SignalResponse, StatusUpdate,
};
use crate::error::{Error, Result};
use crate::id::Id;

/// Client side of `/build` and `/signal`.
pub struct BuildClient {
    endpoint: String,
    http: reqwest::Client,
}

impl BuildClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        BuildClient {
            endpoint: endpoint.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Submit a build. Returns the `BuildStarted` header frame and a reader
    /// for the rest of the status stream.
    pub async fn start_build(
        &self,
        request: &BuildRequest,
    ) -> Result<(BuildStarted, StatusReader)> {
        let response = self
            .http
            .post(format!("{}/build", self.endpoint))
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }

        let mut reader = StatusReader::new(response);
        let started: BuildStarted = reader.next_frame().await?;
        tracing::debug!(build_id = %started.id, missing = started.missing_files.len(), "build started");
        Ok((started, reader))
    }

    pub async fn signal_build(
        &self,
        build_id: Id,
        signal: &SignalRequest,
    ) -> Result<SignalResponse> {
        let response = self
            .http
            .post(format!("{}/signal", self.endpoint))
            .header("build_id", build_id.to_string())
            .json(signal)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        Ok(response.json().await?)
    }
}

/// Incrementally decodes the newline-delimited JSON status stream.
pub struct StatusReader {
    body: Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
    buf: Vec<u8>,
}

impl StatusReader {
    fn new(response: reqwest::Response) -> Self {
        StatusReader {
            body: Box::pin(response.bytes_stream()),
            buf: Vec::new(),
        }
    }

    /// Next status update, or `None` when the stream ends.
    pub async fn next(&mut self) -> Result<Option<StatusUpdate>> {
        match self.next_line().await? {
            Some(line) => Ok(Some(serde_json::from_str(&line)?)),
            None => Ok(None),
        }
    }

    async fn next_frame<T: DeserializeOwned>(&mut self) -> Result<T> {
        let line = self
            .next_line()
            .await?
            .ok_or_else(|| Error::Remote("status stream ended before the first frame".into()))?;
        Ok(serde_json::from_str(&line)?)
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                return Ok(Some(
                    String::from_utf8_lossy(&line[..line.len() - 1]).into_owned(),
                ));
            }
            match self.body.next().await {
                Some(chunk) => self.buf.extend_from_slice(&chunk?),
                None if self.buf.is_empty() => return Ok(None),
                None => {
                    let line = String::from_utf8_lossy(&self.buf).into_owned();
                    self.buf.clear();
                    return Ok(Some(line));
                }
            }
        }
    }
}
