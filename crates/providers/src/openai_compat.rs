//! OpenAI-compatible adapter.
//!
//! Works with DashScope compatible mode (the default), OpenAI, vLLM,
//! Ollama and any other endpoint that follows the chat completions
//! contract.

use std::time::{Duration, Instant};

use lx_domain::config::{LlmConfig, ProviderConfig};
use lx_domain::error::{Error, Result};
use lx_domain::message::Message;
use lx_domain::stream::{BoxStream, StreamEvent, Usage};
use lx_domain::trace::TraceEvent;
use serde_json::Value;

use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use crate::util::{from_reqwest, resolve_api_key};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    auth_header: String,
    auth_prefix: String,
    default_model: String,
    /// Used for `chat_stream`; carries no total timeout so long answers
    /// are not cut off. Stall detection lives in the caller.
    stream_client: reqwest::Client,
    /// Used for `chat`; bounded by `request_timeout_ms`.
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create the provider from the `[llm]` config section.
    pub fn from_config(llm: &LlmConfig) -> Result<Self> {
        let cfg: &ProviderConfig = &llm.provider;
        let api_key = resolve_api_key(&cfg.auth)?;
        Self::with_key(llm, api_key)
    }

    /// Create the provider with an explicit API key.
    pub fn with_key(llm: &LlmConfig, api_key: String) -> Result<Self> {
        let cfg = &llm.provider;
        let connect = Duration::from_millis(llm.connect_timeout_ms);

        let stream_client = reqwest::Client::builder()
            .connect_timeout(connect)
            .build()
            .map_err(from_reqwest)?;
        let client = reqwest::Client::builder()
            .connect_timeout(connect)
            .timeout(Duration::from_millis(llm.request_timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            auth_header: cfg
                .auth
                .header
                .clone()
                .unwrap_or_else(|| "Authorization".into()),
            auth_prefix: cfg.auth.prefix.clone().unwrap_or_else(|| "Bearer ".into()),
            default_model: cfg.default_model.clone(),
            stream_client,
            client,
        })
    }

    // ── Internal: request building ────────────────────────────────

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn authed_post(&self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        client
            .post(self.chat_url())
            .header(
                self.auth_header.as_str(),
                format!("{}{}", self.auth_prefix, self.api_key),
            )
            .header("Content-Type", "application/json")
    }

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "model": self.effective_model(req),
            "messages": messages,
            "stream": stream,
        });
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }

    /// Map a non-2xx response to a provider error. The upstream body is
    /// logged, the error message carries only the status.
    async fn status_error(&self, resp: reqwest::Response) -> Error {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        tracing::warn!(
            provider = %self.id,
            status,
            body = %truncate_for_log(&body),
            "provider returned error status"
        );
        Error::Provider {
            provider: self.id.clone(),
            message: format!("HTTP {status}"),
        }
    }
}

fn truncate_for_log(s: &str) -> &str {
    match s.char_indices().nth(500) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    serde_json::json!({
        "role": msg.role.as_str(),
        "content": msg.content,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(provider: &str, body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.into(),
            message: "no choices in response".into(),
        })?;

    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    Ok(ChatResponse {
        content,
        usage: body.get("usage").and_then(parse_openai_usage),
        model,
        finish_reason,
    })
}

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE streaming helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse one `data:` payload. A chunk may carry both a final content
/// delta and a `finish_reason`, so this returns up to two events.
fn parse_sse_data(data: &str) -> Vec<Result<StreamEvent>> {
    if data.trim() == "[DONE]" {
        return vec![Ok(StreamEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        })];
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    // In-band error object (some compatible servers send these mid-stream).
    if let Some(err) = v.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("upstream error")
            .to_string();
        return vec![Ok(StreamEvent::Error { message })];
    }

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    let Some(choice) = choice else {
        // Usage-only chunk (stream_options.include_usage).
        return match v.get("usage").and_then(parse_openai_usage) {
            Some(usage) => vec![Ok(StreamEvent::Done {
                usage: Some(usage),
                finish_reason: None,
            })],
            None => Vec::new(),
        };
    };

    let mut events = Vec::new();

    if let Some(text) = choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|v| v.as_str())
    {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::Token {
                text: text.to_string(),
            }));
        }
    }

    // `finish_reason` arrives before the usage chunk when include_usage
    // is set, so it is not treated as the end of the stream.
    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        tracing::debug!(finish_reason = fr, "upstream finished generating");
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let body = self.build_chat_body(req, false);
        let model = self.effective_model(req);
        let start = Instant::now();

        tracing::debug!(provider = %self.id, model = %model, "chat request");

        let resp = self
            .authed_post(&self.client)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(self.status_error(resp).await);
        }

        let resp_text = resp.text().await.map_err(from_reqwest)?;
        let resp_json: Value = serde_json::from_str(&resp_text)?;

        TraceEvent::LlmRequest {
            provider: self.id.clone(),
            model,
            streaming: false,
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        parse_chat_response(&self.id, &resp_json)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_chat_body(req, true);
        let model = self.effective_model(req);
        let start = Instant::now();

        tracing::debug!(provider = %self.id, model = %model, "stream request");

        let resp = self
            .authed_post(&self.stream_client)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(self.status_error(resp).await);
        }

        TraceEvent::LlmRequest {
            provider: self.id.clone(),
            model,
            streaming: true,
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        Ok(crate::sse::sse_response_stream(resp, parse_sse_data))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
