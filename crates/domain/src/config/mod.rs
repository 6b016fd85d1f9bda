mod auth;
mod chat;
mod llm;
mod observability;
mod retrieval;
mod server;
mod store;

pub use auth::*;
pub use chat::*;
pub use llm::*;
pub use observability::*;
pub use retrieval::*;
pub use server::*;
pub use store::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub auth: ApiAuthConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }
        if self.server.max_concurrent_requests == 0 {
            errors.push(ConfigError::error(
                "server.max_concurrent_requests",
                "must be greater than 0",
            ));
        }
        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 || rl.burst_size == 0 {
                errors.push(ConfigError::error(
                    "server.rate_limit",
                    "requests_per_second and burst_size must be greater than 0",
                ));
            }
        }
        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        if self.llm.provider.base_url.is_empty() {
            errors.push(ConfigError::error(
                "llm.provider.base_url",
                "provider base_url must not be empty",
            ));
        }
        if self.llm.provider.default_model.is_empty() {
            errors.push(ConfigError::error(
                "llm.provider.default_model",
                "default_model must not be empty",
            ));
        }
        if self.llm.provider.auth.env.is_none() && self.llm.provider.auth.key.is_none() {
            errors.push(ConfigError::warning(
                "llm.provider.auth",
                "no API key source configured (set `env` or `key`)",
            ));
        }
        if self.llm.provider.auth.key.is_some() {
            errors.push(ConfigError::warning(
                "llm.provider.auth.key",
                "plaintext API key in config; prefer `env`",
            ));
        }
        if self.llm.idle_timeout_ms == 0 || self.llm.first_delta_timeout_ms == 0 {
            errors.push(ConfigError::error(
                "llm.idle_timeout_ms",
                "stream timeouts must be greater than 0",
            ));
        }

        if self.chat.title_max_chars == 0 {
            errors.push(ConfigError::error(
                "chat.title_max_chars",
                "title budget must be greater than 0",
            ));
        }
        if self.chat.event_buffer == 0 {
            errors.push(ConfigError::error(
                "chat.event_buffer",
                "event channel capacity must be greater than 0",
            ));
        }
        if self.chat.ws_sweep_interval_secs == 0 {
            errors.push(ConfigError::error(
                "chat.ws_sweep_interval_secs",
                "sweep interval must be greater than 0",
            ));
        }
        if self.chat.ws_max_pending_frames == 0 {
            errors.push(ConfigError::warning(
                "chat.ws_max_pending_frames",
                "0 drops every frame sent while a turn is running",
            ));
        }
        if self.chat.history_window == 0 {
            errors.push(ConfigError::warning(
                "chat.history_window",
                "history window is 0; turns will not see earlier messages",
            ));
        }

        if self.retrieval.enabled && self.retrieval.base_url.is_empty() {
            errors.push(ConfigError::error(
                "retrieval.base_url",
                "base_url must not be empty when retrieval is enabled",
            ));
        }
        if self.retrieval.enabled && self.retrieval.top_k == 0 {
            errors.push(ConfigError::warning(
                "retrieval.top_k",
                "top_k is 0; no reference material will be retrieved",
            ));
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError::error(
                "observability.sample_rate",
                "sample_rate must be within 0.0..=1.0",
            ));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors() {
        let issues = Config::default().validate();
        assert!(issues
            .iter()
            .all(|i| i.severity != ConfigSeverity::Error));
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "server.port" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn enabled_retrieval_requires_url() {
        let mut cfg = Config::default();
        cfg.retrieval.enabled = true;
        cfg.retrieval.base_url.clear();
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.field == "retrieval.base_url"));
    }

    #[test]
    fn display_has_severity_tag() {
        let e = ConfigError::warning("chat.history_window", "zero");
        assert_eq!(e.to_string(), "[WARN] chat.history_window: zero");
    }
}
