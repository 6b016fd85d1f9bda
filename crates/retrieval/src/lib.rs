//! `lx-retrieval`: client for the per-user document search service.
//!
//! Provides the [`Retriever`] trait consumed by the turn orchestrator, a
//! REST implementation ([`RestRetriever`]) with retry and back-off, and a
//! [`NoopRetriever`] used when retrieval is disabled.
//!
//! Retrieval never fails a turn: every implementation returns an empty
//! list when the service is unreachable or misbehaves.

pub mod provider;
pub mod rest;
pub mod types;

pub use provider::{NoopRetriever, Retriever};
pub use rest::RestRetriever;
pub use types::{SearchRequest, SearchResponse, Snippet};

use std::sync::Arc;

use lx_domain::config::RetrievalConfig;
use lx_domain::error::Result;

/// Build the retriever selected by `cfg.enabled`.
pub fn create_retriever(cfg: &RetrievalConfig) -> Result<Arc<dyn Retriever>> {
    if !cfg.enabled {
        tracing::info!("document retrieval disabled");
        return Ok(Arc::new(NoopRetriever));
    }
    let client = RestRetriever::new(cfg)?;
    tracing::info!(base_url = %cfg.base_url, top_k = cfg.top_k, "document retrieval enabled");
    Ok(Arc::new(client))
}
