//! HTTP surface of the relay.

use crate::{
    ApiError, AppState,
    paced::{self, AppendItemsRequest, CreatePostRequest},
};
use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use pacer_error::{PacerError, RequestError};
use pacer_rate_limit::{ChunkedUpload, HEADER_BUCKET, Provider, RateLimitResource, UpstreamResponse};
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

/// Largest request body accepted, in bytes.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Build the relay router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/rate-limits", get(get_rate_limits).delete(reset_rate_limits))
        .route("/upload/passthrough", post(upload_passthrough))
        .route("/upload/bucketed/collections", post(upload_collections))
        .route("/upload/bucketed/files", post(upload_files))
        .route("/upload/paced/post", post(create_post))
        .route("/upload/paced/post/:id/add", post(append_to_post))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// Snapshot of tracked rate-limit state.
async fn get_rate_limits(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.store().snapshot().await;
    (StatusCode::OK, Json(snapshot))
}

/// Forget every tracked window.
async fn reset_rate_limits(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.store().reset().await?;
    info!("Rate-limit state reset by request");
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[instrument(skip_all)]
async fn upload_passthrough(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let handle = state.provider(Provider::Passthrough);
    let content_type = headers.get(header::CONTENT_TYPE).cloned();
    let response = state
        .orchestrator()
        .execute_with_retry(&RateLimitResource::passthrough(), handle.profile(), || {
            handle
                .client()
                .post("upload", body.clone(), content_type.clone())
        })
        .await?;
    Ok(forward(response))
}

async fn upload_collections(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    upload_bucketed(&state, "collections", &headers, body).await
}

async fn upload_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    upload_bucketed(&state, "files", &headers, body).await
}

/// The caller may pin a bucket with `X-RateLimit-Bucket`; otherwise the
/// bucket learned for the route applies.
#[instrument(skip(state, headers, body), fields(bytes = body.len()))]
async fn upload_bucketed(
    state: &AppState,
    route: &'static str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let handle = state.provider(Provider::Bucketed);
    let mut resource = RateLimitResource::bucketed(route);
    if let Some(bucket) = headers
        .get(HEADER_BUCKET)
        .and_then(|v| v.to_str().ok())
        .filter(|b| !b.is_empty())
    {
        resource = resource.with_bucket(bucket);
    }
    let content_type = headers.get(header::CONTENT_TYPE).cloned();

    let response = state
        .orchestrator()
        .execute_with_retry(&resource, handle.profile(), || {
            handle.client().post(route, body.clone(), content_type.clone())
        })
        .await?;
    Ok(forward(response))
}

async fn create_post(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request: CreatePostRequest = parse_body(&body)?;
    let upload = paced::create_post(&state, request).await?;
    Ok(chunked(upload))
}

async fn append_to_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: AppendItemsRequest = parse_body(&body)?;
    let upload = paced::append_to_post(&state, &id, request).await?;
    Ok(chunked(upload))
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        ApiError::from(PacerError::from(RequestError::new(format!(
            "Invalid request body: {}",
            e
        ))))
    })
}

/// Relay an upstream (or locally synthesized) answer: status, body, content
/// type, rate-limit headers and `Retry-After`.
pub fn forward(response: UpstreamResponse) -> Response {
    let mut headers = response.rate_limit_header_map();
    for name in [header::CONTENT_TYPE, header::RETRY_AFTER] {
        if let Some(value) = response.headers().get(&name) {
            headers.insert(name, value.clone());
        }
    }
    let status = *response.status();
    let body = response.body().clone();
    (status, headers, Body::from(body)).into_response()
}

/// Summarize a finished chunked upload; a single failed chunk is relayed as-is.
fn chunked(upload: ChunkedUpload) -> Response {
    if !upload.response().is_success() {
        return forward(upload.into_response());
    }
    let summary = json!({
        "id": upload.resource_id(),
        "chunks": upload.chunks(),
        "upstream": upload
            .response()
            .json::<serde_json::Value>()
            .unwrap_or_else(|_| json!(upload.response().body_excerpt(2000))),
    });
    let status = *upload.response().status();
    let headers = upload.response().rate_limit_header_map();
    (status, headers, Json(summary)).into_response()
}
