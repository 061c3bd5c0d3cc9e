//! Chunked posts on the paced host.

use crate::AppState;
use bytes::Bytes;
use pacer_error::{
    JsonError, PacerError, PacerResult, RequestError, UpstreamError, UpstreamErrorKind,
};
use pacer_rate_limit::{
    Chunk, ChunkReceipt, ChunkTarget, ChunkedUpload, ChunkedUploadCoordinator, Provider,
    RateLimitResource, UpstreamResponse,
};
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument};

/// Body of `POST /upload/paced/post`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePostRequest {
    /// Post-level fields, sent only with the first chunk
    #[serde(flatten)]
    pub metadata: PostMetadata,
    /// Opaque item descriptors, in display order
    pub items: Vec<Value>,
}

/// Top-level post fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostMetadata {
    /// Post title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Post description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Body of `POST /upload/paced/post/{id}/add`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppendItemsRequest {
    /// Opaque item descriptors, in display order
    pub items: Vec<Value>,
}

/// Create a post, splitting items across a create and follow-up appends.
///
/// # Errors
///
/// Anonymous posts larger than one request are rejected up front, since
/// they cannot be appended to.
#[instrument(skip(state, request), fields(items = request.items.len()))]
pub async fn create_post(state: &AppState, request: CreatePostRequest) -> PacerResult<ChunkedUpload> {
    let handle = state.provider(Provider::Paced);
    let max = *handle.max_per_request();
    if handle.client().is_anonymous() && request.items.len() > max {
        return Err(RequestError::new(format!(
            "Anonymous posts are limited to {} items, got {}",
            max,
            request.items.len()
        ))
        .into());
    }

    let coordinator = ChunkedUploadCoordinator::new(max)?;
    let upload = coordinator
        .submit_chunked(request.items, Some(request.metadata), |chunk| {
            submit_chunk(state, chunk)
        })
        .await?;
    info!(resource_id = ?upload.resource_id(), chunks = upload.chunks(), "Post created");
    Ok(upload)
}

/// Append items to an existing post.
///
/// # Errors
///
/// Requires a credential; anonymous posts cannot be appended to.
#[instrument(skip(state, request), fields(items = request.items.len()))]
pub async fn append_to_post(
    state: &AppState,
    post_id: &str,
    request: AppendItemsRequest,
) -> PacerResult<ChunkedUpload> {
    let handle = state.provider(Provider::Paced);
    if handle.client().is_anonymous() {
        return Err(UpstreamError::new(
            UpstreamErrorKind::Unauthorized(
                "Appending requires a credential for the paced host".to_string(),
            ),
        )
        .into());
    }

    let coordinator = ChunkedUploadCoordinator::new(*handle.max_per_request())?;
    let upload = coordinator
        .append_chunked(post_id, request.items, |chunk| {
            submit_chunk(state, chunk)
        })
        .await?;
    info!(resource_id = post_id, chunks = upload.chunks(), "Items appended");
    Ok(upload)
}

/// One chunk through the orchestrator.
async fn submit_chunk(
    state: &AppState,
    chunk: Chunk<Value, PostMetadata>,
) -> PacerResult<ChunkReceipt> {
    let (items, metadata, target) = chunk.into_parts();
    let (path, payload) = match &target {
        ChunkTarget::Create => {
            let metadata = metadata.unwrap_or_default();
            (
                "post".to_string(),
                json!({
                    "title": metadata.title,
                    "description": metadata.description,
                    "items": items,
                }),
            )
        }
        ChunkTarget::Append(id) => (format!("post/{}/add", id), json!({ "items": items })),
    };
    let body = Bytes::from(serde_json::to_vec(&payload).map_err(|e| {
        PacerError::from(JsonError::new(format!("Failed to encode chunk: {}", e)))
    })?);

    let handle = state.provider(Provider::Paced);
    let client = handle.client();
    let path = path.as_str();
    let body = &body;
    let content_type = &HeaderValue::from_static("application/json");
    let creating = target == ChunkTarget::Create;
    let response = state
        .orchestrator()
        .execute_with_retry(&RateLimitResource::paced(), handle.profile(), move || async move {
            let response = client.post(path, body.clone(), Some(content_type.clone())).await?;
            // A created post without an id cannot be appended to; ask again.
            if creating && response.is_success() && resource_id(&response).is_none() {
                return Err(PacerError::from(UpstreamError::new(
                    UpstreamErrorKind::MalformedPayload(format!(
                        "Create answer carried no post id: {}",
                        response.body_excerpt(200)
                    )),
                )));
            }
            Ok::<_, PacerError>(response)
        })
        .await?;

    let resource_id = match target {
        ChunkTarget::Append(id) => Some(id),
        ChunkTarget::Create => resource_id(&response),
    };
    Ok(ChunkReceipt {
        response,
        resource_id,
    })
}

/// The host answers `{"data": {"id": ..}}`; a bare `{"id": ..}` is accepted too.
pub fn resource_id(response: &UpstreamResponse) -> Option<String> {
    let body: Value = response.json().ok()?;
    let id = body
        .get("data")
        .and_then(|data| data.get("id"))
        .or_else(|| body.get("id"))?;
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use reqwest::header::HeaderMap;

    fn answer(body: &str) -> UpstreamResponse {
        UpstreamResponse::new(StatusCode::OK, HeaderMap::new(), body.to_string())
    }

    #[test]
    fn test_resource_id_shapes() {
        assert_eq!(
            resource_id(&answer(r#"{"data":{"id":"abc"},"success":true}"#)).as_deref(),
            Some("abc")
        );
        assert_eq!(resource_id(&answer(r#"{"id":42}"#)).as_deref(), Some("42"));
        assert_eq!(resource_id(&answer(r#"{"data":{}}"#)), None);
        assert_eq!(resource_id(&answer("not json")), None);
    }

    #[test]
    fn test_create_request_flattens_metadata() {
        let request: CreatePostRequest =
            serde_json::from_str(r#"{"title":"Trip","items":[{"image":"a"},{"image":"b"}]}"#)
                .unwrap();
        assert_eq!(request.metadata.title.as_deref(), Some("Trip"));
        assert_eq!(request.metadata.description, None);
        assert_eq!(request.items.len(), 2);
    }
}
