/// Shared error type used across all lexchat crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// The remote LLM rejected or failed the request.
    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// A durable write or read against the conversation store failed.
    #[error("storage: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A store invariant would be violated by the requested write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("retrieval: {0}")]
    Retrieval(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures that originate in the upstream LLM call.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::Provider { .. } | Error::Http(_) | Error::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
