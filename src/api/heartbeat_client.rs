use crate::api::{remote_error, HeartbeatRequest, HeartbeatResponse};
use crate::error::Result;

/// Client side of `/heartbeat`. The request deliberately has no timeout:
/// the coordinator parks it until work is available.
pub struct HeartbeatClient {
    endpoint: String,
    http: reqwest::Client,
}

impl HeartbeatClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        HeartbeatClient {
            endpoint: endpoint.into(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<HeartbeatResponse> {
        let response = self
            .http
            .post(format!("{}/heartbeat", self.endpoint))
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        Ok(response.json().await?)
    }
}
