//! REST implementation of [`Retriever`].
//!
//! `RestRetriever` wraps a `reqwest::Client` and posts search requests to
//! the document service with retry + exponential back-off on transient
//! (5xx / timeout / connect) failures.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use uuid::Uuid;

use lx_domain::config::RetrievalConfig;
use lx_domain::error::{Error, Result};
use lx_domain::trace::TraceEvent;

use crate::provider::Retriever;
use crate::types::{SearchRequest, SearchResponse, Snippet};

const SEARCH_ENDPOINT: &str = "POST /search";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Created once at startup; the underlying `reqwest::Client` keeps a
/// connection pool.
#[derive(Debug, Clone)]
pub struct RestRetriever {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl RestRetriever {
    pub fn new(cfg: &RetrievalConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key: cfg.api_key.clone(),
            max_retries: cfg.max_retries,
        })
    }

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        let rb = rb
            .header("X-Client-Type", "lexchat")
            .header("X-Trace-Id", Uuid::new_v4().to_string());
        match &self.api_key {
            Some(key) => rb.header("X-Api-Key", key),
            None => rb,
        }
    }

    /// Execute a request with retry + exponential back-off.
    ///
    /// * Retries on 5xx, timeouts and connection errors.
    /// * Does **not** retry on 4xx.
    /// * Emits a `TraceEvent::RetrievalCall` after every attempt.
    async fn execute_with_retry(
        &self,
        endpoint: &str,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let start = Instant::now();
            let result = self.decorate(build_request()).send().await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    TraceEvent::RetrievalCall {
                        endpoint: endpoint.to_owned(),
                        status: status.as_u16(),
                        duration_ms,
                    }
                    .emit();

                    if status.is_server_error() {
                        let body = resp.text().await.unwrap_or_default();
                        last_err = Some(Error::Retrieval(format!(
                            "{endpoint} returned {status}: {body}"
                        )));
                        continue;
                    }
                    if status.is_client_error() {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Error::Retrieval(format!(
                            "{endpoint} returned {status}: {body}"
                        )));
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    TraceEvent::RetrievalCall {
                        endpoint: endpoint.to_owned(),
                        status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                        duration_ms,
                    }
                    .emit();
                    last_err = Some(from_reqwest(e));
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::Retrieval(format!("{endpoint}: all retries exhausted"))))
    }

    /// Fallible search; [`Retriever::search`] swallows the error.
    pub async fn try_search(&self, req: &SearchRequest) -> Result<Vec<Snippet>> {
        let url = format!("{}/search", self.base_url);
        let resp = self
            .execute_with_retry(SEARCH_ENDPOINT, || self.http.post(&url).json(req))
            .await?;

        let body = resp.text().await.map_err(from_reqwest)?;
        let parsed: SearchResponse = serde_json::from_str(&body).map_err(|e| {
            Error::Retrieval(format!("failed to parse search response: {e}: {body}"))
        })?;

        Ok(parsed
            .into_snippets()
            .into_iter()
            .filter(|s| !s.content.trim().is_empty())
            .take(req.top_k as usize)
            .collect())
    }
}

#[async_trait]
impl Retriever for RestRetriever {
    async fn search(&self, query: &str, user_id: &str, top_k: u32) -> Vec<Snippet> {
        if top_k == 0 || query.trim().is_empty() {
            return Vec::new();
        }
        let req = SearchRequest {
            query: query.to_owned(),
            user_id: user_id.to_owned(),
            top_k,
        };
        match self.try_search(&req).await {
            Ok(snippets) => snippets,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "document search failed, continuing without references");
                Vec::new()
            }
        }
    }
}

/// Timeout errors become `Error::Timeout`; everything else `Error::Http`.
fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
