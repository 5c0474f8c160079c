use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::stream;
use tower_http::trace::TraceLayer;

use crate::api::{
    BuildFailed, BuildRequest, HeartbeatRequest, SignalRequest, StatusFrame, StatusUpdate,
    StatusWriter,
};
use crate::cache::http::{error_response, file_router, id_from_headers};
use crate::cache::FileCache;
use crate::coordinator::Coordinator;

/// Buffered status updates per build; the producer suspends when the
/// client's reader falls this far behind.
const STATUS_BUFFER: usize = 100;

pub fn router(coordinator: Arc<Coordinator>, files: Arc<FileCache>) -> Router {
    Router::new()
        .route("/build", post(start_build))
        .route("/signal", post(signal_build))
        .route("/heartbeat", post(heartbeat))
        .with_state(coordinator)
        .merge(file_router(files))
        .layer(TraceLayer::new_for_http())
}

async fn start_build(State(coordinator): State<Arc<Coordinator>>, body: Bytes) -> Response {
    let req: BuildRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err),
    };

    let (writer, mut updates) = StatusWriter::channel(STATUS_BUFFER);
    if let Err(err) = coordinator.start_build(req, writer.clone()).await {
        if !writer.has_started() {
            tracing::error!(error = %err, "start build failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err);
        }
        // The stream is already open; deliver the failure in-band.
        let failed = StatusUpdate::BuildFailed(BuildFailed {
            error: err.to_string(),
        });
        if let Err(error) = writer.updated(failed).await {
            tracing::error!(%error, "failed to deliver build failure");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &error);
        }
    }

    let body = Body::from_stream(stream::poll_fn(move |cx| {
        updates
            .poll_recv(cx)
            .map(|frame| frame.map(|frame| Ok::<_, Infallible>(frame_line(&frame))))
    }));
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        body,
    )
        .into_response()
}

fn frame_line(frame: &StatusFrame) -> String {
    let encoded = match frame {
        StatusFrame::Started(started) => serde_json::to_string(started),
        StatusFrame::Update(update) => serde_json::to_string(update),
    };
    match encoded {
        Ok(mut line) => {
            line.push('\n');
            line
        }
        Err(error) => {
            tracing::error!(%error, "failed to encode status frame");
            String::from("\n")
        }
    }
}

async fn signal_build(
    State(coordinator): State<Arc<Coordinator>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let build_id = match id_from_headers(&headers, "build_id") {
        Ok(id) => id,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err),
    };
    let req: SignalRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err),
    };
    match coordinator.signal_build(build_id, req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(err) => {
            tracing::error!(build_id = %build_id, error = %err, "signal build failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &err)
        }
    }
}

async fn heartbeat(State(coordinator): State<Arc<Coordinator>>, body: Bytes) -> Response {
    let req: HeartbeatRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err),
    };
    match coordinator.heartbeat(req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "heartbeat failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &err)
        }
    }
}
