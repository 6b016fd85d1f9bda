//! Chat title regeneration.
//!
//! After every user message the model is asked whether the chat title
//! still fits. The answer is cleaned up and cut to the title budget.

use lx_domain::config::ModelSettings;
use lx_domain::error::Result;
use lx_domain::message::Message;
use lx_providers::{ChatRequest, LlmProvider};

/// Characters a long title may be cut before.
const TITLE_BREAKS: &[char] = &['，', '。', '；', '！', '？', ',', '.', ';', '!', '?'];

const QUOTES: &[char] = &['"', '\'', '“', '”', '‘', '’'];

pub fn title_prompt(current_title: &str, latest_message: &str, max_chars: usize) -> String {
    format!(
        "请根据以下信息生成一个新的对话标题：

当前标题：{current_title}
最新问题：{latest_message}

要求：
1. 标题长度不超过{max_chars}个字
2. 如果最新问题与当前标题主题相关，保持当前标题
3. 如果最新问题引入新的法律领域或主题，生成新标题反映主要内容
4. 使用简洁专业的语言
5. 优先保留法律领域相关的关键词

请直接返回新标题，不要包含其他内容。"
    )
}

/// Normalize raw model output into a title of at most `max_chars`
/// characters. Returns an empty string when nothing usable is left.
pub fn clean_title(raw: &str, max_chars: usize) -> String {
    let unquoted: String = raw.chars().filter(|c| !QUOTES.contains(c)).collect();
    let first_line = unquoted.trim().lines().next().unwrap_or("").trim();

    let chars: Vec<char> = first_line.chars().collect();
    if chars.len() <= max_chars {
        return first_line.to_owned();
    }

    // Prefer cutting before the last sentence break within the budget.
    for i in (0..=max_chars).rev() {
        if TITLE_BREAKS.contains(&chars[i]) {
            return chars[..i].iter().collect::<String>().trim_end().to_owned();
        }
    }
    chars[..max_chars].iter().collect()
}

/// Title derived from the message itself, used when the model answers
/// with nothing usable.
pub fn fallback_title(latest_message: &str, max_chars: usize) -> String {
    let trimmed = latest_message.trim();
    let head: String = trimmed.chars().take(max_chars).collect();
    if trimmed.chars().count() > max_chars {
        format!("{head}...")
    } else {
        head
    }
}

/// Ask the model for a title. Errors from the provider propagate; an
/// empty answer falls back to [`fallback_title`].
pub async fn generate_title(
    provider: &dyn LlmProvider,
    settings: &ModelSettings,
    current_title: &str,
    latest_message: &str,
    max_chars: usize,
) -> Result<String> {
    let req = ChatRequest {
        messages: vec![Message::user(title_prompt(
            current_title,
            latest_message,
            max_chars,
        ))],
        temperature: settings.temperature,
        max_tokens: settings.max_tokens,
        model: settings.model.clone(),
    };
    let resp = provider.chat(&req).await?;
    let title = clean_title(&resp.content, max_chars);
    tracing::debug!(raw = %resp.content, title = %title, "title generated");

    if title.is_empty() {
        return Ok(fallback_title(latest_message, max_chars));
    }
    Ok(title)
}
