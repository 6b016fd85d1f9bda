//! The `Retriever` trait and its no-op implementation.

use async_trait::async_trait;

use crate::types::Snippet;

/// Similarity search over a user's uploaded documents.
///
/// Infallible by contract: failures are logged by the implementation and
/// reported as an empty result so the turn proceeds without references.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str, user_id: &str, top_k: u32) -> Vec<Snippet>;
}

/// Retriever used when no document service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRetriever;

#[async_trait]
impl Retriever for NoopRetriever {
    async fn search(&self, _query: &str, _user_id: &str, _top_k: u32) -> Vec<Snippet> {
        Vec::new()
    }
}
