//! Splitting oversized uploads into ordered, sequential requests.

use crate::UpstreamResponse;
use derive_getters::Getters;
use pacer_error::{
    ChunkError, ChunkErrorKind, PacerError, PacerErrorKind, PacerResult, RequestError,
    UpstreamErrorKind,
};
use reqwest::header::HeaderMap;
use std::future::Future;
use tracing::{debug, info, instrument, warn};

/// Partition `items` into contiguous chunks of at most `max_per_request`,
/// preserving order. An empty input yields no chunks.
///
/// # Errors
///
/// `ChunkError::InvalidChunkSize` when `max_per_request` is zero.
///
/// # Example
///
/// ```
/// use pacer_rate_limit::plan_chunks;
///
/// let chunks = plan_chunks((1..=45).collect::<Vec<_>>(), 20).unwrap();
/// let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
/// assert_eq!(sizes, vec![20, 20, 5]);
/// ```
pub fn plan_chunks<T>(items: Vec<T>, max_per_request: usize) -> PacerResult<Vec<Vec<T>>> {
    if max_per_request == 0 {
        return Err(ChunkError::new(ChunkErrorKind::InvalidChunkSize).into());
    }
    let mut chunks = Vec::with_capacity(items.len().div_ceil(max_per_request));
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        chunks.push(items.by_ref().take(max_per_request).collect());
    }
    Ok(chunks)
}

/// Where a chunk goes upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkTarget {
    /// Create the remote resource
    Create,
    /// Add to the resource with this id
    Append(String),
}

/// One upstream request's share of an upload.
#[derive(Debug, Clone, Getters)]
pub struct Chunk<T, M> {
    /// 1-based position
    index: usize,
    /// Number of chunks planned
    total: usize,
    /// Items in this chunk, in original order
    items: Vec<T>,
    /// Resource metadata; only on the creating chunk
    metadata: Option<M>,
    /// Create or append
    target: ChunkTarget,
}

impl<T, M> Chunk<T, M> {
    /// Split into owned parts.
    pub fn into_parts(self) -> (Vec<T>, Option<M>, ChunkTarget) {
        (self.items, self.metadata, self.target)
    }
}

/// What one chunk submission returned.
#[derive(Debug, Clone)]
pub struct ChunkReceipt {
    /// The upstream answer
    pub response: UpstreamResponse,
    /// Id of the created or appended resource, if the answer carried one
    pub resource_id: Option<String>,
}

/// A finished chunked upload.
#[derive(Debug, Clone, Getters)]
pub struct ChunkedUpload {
    /// Last chunk's response, with the freshest rate-limit headers
    response: UpstreamResponse,
    /// Id of the remote resource
    resource_id: Option<String>,
    /// Number of chunks submitted
    chunks: usize,
}

impl ChunkedUpload {
    /// Take the final response.
    pub fn into_response(self) -> UpstreamResponse {
        self.response
    }
}

/// Submits chunked uploads strictly in order, stopping at the first failure.
///
/// A single-chunk upload behaves like a plain call: its error or
/// non-success response is handed back unchanged. Multi-chunk uploads turn
/// any failure into `ChunkError::Failed` naming the chunk.
#[derive(Debug, Clone, Copy, Getters)]
pub struct ChunkedUploadCoordinator {
    max_per_request: usize,
}

impl ChunkedUploadCoordinator {
    /// Coordinator sending at most `max_per_request` items per request.
    ///
    /// # Errors
    ///
    /// `ChunkError::InvalidChunkSize` when `max_per_request` is zero.
    pub fn new(max_per_request: usize) -> PacerResult<Self> {
        if max_per_request == 0 {
            return Err(ChunkError::new(ChunkErrorKind::InvalidChunkSize).into());
        }
        Ok(Self { max_per_request })
    }

    /// Create a resource from `items`: the first chunk carries `metadata`
    /// and creates it, later chunks append to the id it returned.
    #[instrument(skip_all, fields(items = items.len(), max = self.max_per_request))]
    pub async fn submit_chunked<T, M, F, Fut>(
        &self,
        items: Vec<T>,
        metadata: Option<M>,
        submit: F,
    ) -> PacerResult<ChunkedUpload>
    where
        F: FnMut(Chunk<T, M>) -> Fut,
        Fut: Future<Output = PacerResult<ChunkReceipt>>,
    {
        self.run(items, metadata, None, submit).await
    }

    /// Append `items` to an existing resource, chunk by chunk.
    #[instrument(skip_all, fields(items = items.len(), max = self.max_per_request))]
    pub async fn append_chunked<T, M, F, Fut>(
        &self,
        resource_id: impl Into<String>,
        items: Vec<T>,
        submit: F,
    ) -> PacerResult<ChunkedUpload>
    where
        F: FnMut(Chunk<T, M>) -> Fut,
        Fut: Future<Output = PacerResult<ChunkReceipt>>,
    {
        self.run(items, None, Some(resource_id.into()), submit).await
    }

    async fn run<T, M, F, Fut>(
        &self,
        items: Vec<T>,
        mut metadata: Option<M>,
        mut resource_id: Option<String>,
        mut submit: F,
    ) -> PacerResult<ChunkedUpload>
    where
        F: FnMut(Chunk<T, M>) -> Fut,
        Fut: Future<Output = PacerResult<ChunkReceipt>>,
    {
        if items.is_empty() {
            return Err(RequestError::new("Upload contains no items").into());
        }

        let plan = plan_chunks(items, self.max_per_request)?;
        let total = plan.len();
        let mut carried = HeaderMap::new();
        let mut last = None;

        for (offset, items) in plan.into_iter().enumerate() {
            let index = offset + 1;
            let target = match &resource_id {
                Some(id) => ChunkTarget::Append(id.clone()),
                None => ChunkTarget::Create,
            };
            info!(index, total, size = items.len(), ?target, "Submitting chunk");

            let chunk = Chunk {
                index,
                total,
                items,
                metadata: metadata.take(),
                target,
            };

            let receipt = match submit(chunk).await {
                Ok(receipt) => receipt,
                Err(e) if total == 1 => return Err(e),
                Err(e) => {
                    warn!(index, total, error = %e, "Chunk failed, abandoning remaining chunks");
                    return Err(failed(
                        index,
                        total,
                        status_of(&e),
                        resource_id,
                        failure_message(&e),
                    ));
                }
            };

            let ChunkReceipt {
                mut response,
                resource_id: returned,
            } = receipt;

            if !response.is_success() {
                if total == 1 {
                    return Ok(ChunkedUpload {
                        response,
                        resource_id: resource_id.or(returned),
                        chunks: 1,
                    });
                }
                warn!(
                    index,
                    total,
                    status = response.status().as_u16(),
                    "Chunk rejected upstream, abandoning remaining chunks"
                );
                return Err(failed(
                    index,
                    total,
                    Some(response.status().as_u16()),
                    resource_id.or(returned),
                    response.body_excerpt(200),
                ));
            }

            if resource_id.is_none() {
                resource_id = returned;
                if resource_id.is_none() && index < total {
                    return Err(failed(
                        index,
                        total,
                        Some(response.status().as_u16()),
                        None,
                        UpstreamErrorKind::MalformedPayload(
                            "Upstream did not return a resource id".to_string(),
                        )
                        .to_string(),
                    ));
                }
            }

            response.inherit_rate_limit_headers(&carried);
            carried = response.rate_limit_header_map();
            debug!(index, total, resource_id = ?resource_id, "Chunk accepted");
            last = Some(response);
        }

        let response = last.ok_or_else(|| RequestError::new("Upload contains no items"))?;
        Ok(ChunkedUpload {
            response,
            resource_id,
            chunks: total,
        })
    }
}

fn failed(
    index: usize,
    total: usize,
    status: Option<u16>,
    resource_id: Option<String>,
    message: String,
) -> PacerError {
    ChunkError::new(ChunkErrorKind::Failed {
        index,
        total,
        status,
        resource_id,
        message,
    })
    .into()
}

fn status_of(error: &PacerError) -> Option<u16> {
    match error.kind() {
        PacerErrorKind::RateLimit(_) => Some(429),
        PacerErrorKind::Upstream(e) => match &e.kind {
            UpstreamErrorKind::Status { status, .. } => Some(*status),
            UpstreamErrorKind::Unauthorized(_) => Some(401),
            _ => None,
        },
        _ => None,
    }
}

fn failure_message(error: &PacerError) -> String {
    match error.kind() {
        PacerErrorKind::RateLimit(e) => e.kind.to_string(),
        PacerErrorKind::Upstream(e) => e.kind.to_string(),
        _ => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_preserves_order_and_sizes() {
        let chunks = plan_chunks((0..45).collect::<Vec<u32>>(), 20).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 20);
        assert_eq!(chunks[2], (40..45).collect::<Vec<u32>>());
        let flattened: Vec<u32> = chunks.into_iter().flatten().collect();
        assert_eq!(flattened, (0..45).collect::<Vec<u32>>());
    }

    #[test]
    fn test_plan_exact_multiple_and_small() {
        assert_eq!(plan_chunks(vec![1; 40], 20).unwrap().len(), 2);
        assert_eq!(plan_chunks(vec![1; 3], 20).unwrap().len(), 1);
        assert!(plan_chunks(Vec::<u8>::new(), 20).unwrap().is_empty());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let err = plan_chunks(vec![1, 2, 3], 0).unwrap_err();
        assert!(matches!(err.kind(), PacerErrorKind::Chunk(_)));
        assert!(ChunkedUploadCoordinator::new(0).is_err());
    }
}
