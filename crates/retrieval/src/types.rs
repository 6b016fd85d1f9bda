use serde::{Deserialize, Serialize};

/// One ranked document fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub content: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Body of `POST {base_url}/search`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub query: String,
    pub user_id: String,
    pub top_k: u32,
}

/// The service may answer with a bare array or `{ "results": [...] }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SearchResponse {
    Wrapped { results: Vec<Snippet> },
    Bare(Vec<Snippet>),
}

impl SearchResponse {
    pub fn into_snippets(self) -> Vec<Snippet> {
        match self {
            SearchResponse::Wrapped { results } => results,
            SearchResponse::Bare(results) => results,
        }
    }
}
