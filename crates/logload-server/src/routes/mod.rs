//! Stage routes
//!
//! | Route | Payload | Stage |
//! |---|---|---|
//! | `POST /unzip` | storage event | unpack, zip |
//! | `POST /untar` | push envelope | unpack, tar.gz |
//! | `POST /load` | push envelope | load |
//! | `POST /load-log` | storage event | load |
//! | `GET /health` | | |
//!
//! Every invocation gets its own cancellation token. It is cancelled when
//! the deadline passes or when the request is dropped (client disconnect,
//! shutdown), and the stage winds down and reports `Cancelled`.

use crate::error::ServerResult;
use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use logload_common::types::{PubSubPushEnvelope, StorageObjectEvent};
use logload_ingest::{load::LoadReceipt, unpack::UnpackReport, Stages};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

pub mod cloudevent;

pub use cloudevent::CloudEvent;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub stages: Stages,
    pub request_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/unzip", post(unzip))
        .route("/untar", post(untar))
        .route("/load", post(load))
        .route("/load-log", post(load_log))
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn unzip(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Json<UnpackReport>> {
    let event = CloudEvent::from_http(&headers, body)?;
    let object = StorageObjectEvent::from_json(&event.data)?;
    let report = with_deadline(&event, state.request_timeout, |cancel| async move {
        state.stages.unzip(&object, &cancel).await
    })
    .await?;
    Ok(Json(report))
}

async fn untar(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Json<UnpackReport>> {
    let event = CloudEvent::from_http(&headers, body)?;
    let envelope = PubSubPushEnvelope::from_json(&event.data)?;
    let report = with_deadline(&event, state.request_timeout, |cancel| async move {
        state.stages.untar(&envelope, &cancel).await
    })
    .await?;
    Ok(Json(report))
}

async fn load(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Json<LoadReceipt>> {
    let event = CloudEvent::from_http(&headers, body)?;
    let envelope = PubSubPushEnvelope::from_json(&event.data)?;
    let receipt = with_deadline(&event, state.request_timeout, |cancel| async move {
        state.stages.load(&envelope, &cancel).await
    })
    .await?;
    Ok(Json(receipt))
}

async fn load_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Json<LoadReceipt>> {
    let event = CloudEvent::from_http(&headers, body)?;
    let object = StorageObjectEvent::from_json(&event.data)?;
    let receipt = with_deadline(&event, state.request_timeout, |cancel| async move {
        state.stages.load_log(&object, &cancel).await
    })
    .await?;
    Ok(Json(receipt))
}

/// Run one stage invocation under a deadline.
///
/// When the deadline passes the token is cancelled and the stage is still
/// awaited, so its in-flight work is joined before the response is sent.
async fn with_deadline<T, F, Fut>(
    event: &CloudEvent,
    deadline: Duration,
    stage: F,
) -> logload_common::Result<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = logload_common::Result<T>>,
{
    let cancel = CancellationToken::new();
    let _on_drop = cancel.clone().drop_guard();

    let span = tracing::info_span!(
        "invocation",
        event_id = event.id.as_deref().unwrap_or("-"),
        event_type = event.event_type.as_deref().unwrap_or("-"),
    );
    let invocation = stage(cancel.clone()).instrument(span);
    tokio::pin!(invocation);

    tokio::select! {
        result = &mut invocation => result,
        _ = tokio::time::sleep(deadline) => {
            warn!(deadline_secs = deadline.as_secs(), "Deadline reached, cancelling invocation");
            cancel.cancel();
            let result = invocation.await;
            info!(ok = result.is_ok(), "Cancelled invocation finished");
            result
        },
    }
}
