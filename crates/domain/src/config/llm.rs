use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Settings for the streamed answer.
    #[serde(default = "d_chat_model")]
    pub chat: ModelSettings,
    /// Settings for title regeneration.
    #[serde(default = "d_title_model")]
    pub title: ModelSettings,
    /// Settings for the file-need classifier.
    #[serde(default = "d_classifier_model")]
    pub classifier: ModelSettings,
    /// TCP connect timeout for the provider HTTP client.
    #[serde(default = "d_10000u")]
    pub connect_timeout_ms: u64,
    /// Whole-request timeout for non-streaming calls (title, classifier).
    #[serde(default = "d_30000u")]
    pub request_timeout_ms: u64,
    /// Maximum wait for the first delta after the stream opens.
    #[serde(default = "d_60000u")]
    pub first_delta_timeout_ms: u64,
    /// Maximum gap between two consecutive deltas.
    #[serde(default = "d_30000u")]
    pub idle_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            chat: d_chat_model(),
            title: d_title_model(),
            classifier: d_classifier_model(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            first_delta_timeout_ms: 60_000,
            idle_timeout_ms: 30_000,
        }
    }
}

/// Connection details for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "d_provider_id")]
    pub id: String,
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_auth")]
    pub auth: AuthConfig,
    #[serde(default = "d_default_model")]
    pub default_model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            id: d_provider_id(),
            base_url: d_base_url(),
            auth: d_auth(),
            default_model: d_default_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Header name (defaults to `Authorization`).
    #[serde(default)]
    pub header: Option<String>,
    /// Header value prefix (defaults to `Bearer `).
    #[serde(default)]
    pub prefix: Option<String>,
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (for config-only setups; prefer `env`).
    #[serde(default)]
    pub key: Option<String>,
}

/// Per-purpose model settings. `None` fields defer to the provider.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelSettings {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ModelSettings {
    fn with_temperature(temperature: f32) -> Self {
        Self {
            model: None,
            temperature: Some(temperature),
            max_tokens: None,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_provider_id() -> String {
    "dashscope".into()
}
fn d_base_url() -> String {
    "https://dashscope.aliyuncs.com/compatible-mode/v1".into()
}
fn d_auth() -> AuthConfig {
    AuthConfig {
        env: Some("DASHSCOPE_API_KEY".into()),
        ..AuthConfig::default()
    }
}
fn d_default_model() -> String {
    "qwen-max".into()
}
fn d_chat_model() -> ModelSettings {
    ModelSettings::with_temperature(0.7)
}
fn d_title_model() -> ModelSettings {
    ModelSettings::with_temperature(0.3)
}
fn d_classifier_model() -> ModelSettings {
    ModelSettings::with_temperature(0.1)
}
fn d_10000u() -> u64 {
    10_000
}
fn d_30000u() -> u64 {
    30_000
}
fn d_60000u() -> u64 {
    60_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_dashscope() {
        let cfg = LlmConfig::default();
        assert_eq!(cfg.provider.id, "dashscope");
        assert_eq!(cfg.provider.default_model, "qwen-max");
        assert_eq!(cfg.provider.auth.env.as_deref(), Some("DASHSCOPE_API_KEY"));
        assert_eq!(cfg.chat.temperature, Some(0.7));
        assert_eq!(cfg.title.temperature, Some(0.3));
        assert_eq!(cfg.classifier.temperature, Some(0.1));
    }

    #[test]
    fn partial_provider_table_keeps_other_defaults() {
        let toml_str = r#"
            [provider]
            base_url = "http://localhost:11434/v1"
            default_model = "qwen2.5"
        "#;
        let cfg: LlmConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.provider.base_url, "http://localhost:11434/v1");
        assert_eq!(cfg.provider.default_model, "qwen2.5");
        assert_eq!(cfg.provider.id, "dashscope");
        assert_eq!(cfg.idle_timeout_ms, 30_000);
    }

    #[test]
    fn explicit_model_table_replaces_default_temperature() {
        let toml_str = r#"
            [title]
            model = "qwen-turbo"
        "#;
        let cfg: LlmConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.title.model.as_deref(), Some("qwen-turbo"));
        assert!(cfg.title.temperature.is_none());
        assert_eq!(cfg.chat.temperature, Some(0.7));
    }
}
