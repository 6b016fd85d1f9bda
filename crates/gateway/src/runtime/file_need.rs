//! Classifies whether a question calls for an uploaded document.

use lx_domain::config::ModelSettings;
use lx_domain::error::Result;
use lx_domain::message::Message;
use lx_providers::{ChatRequest, LlmProvider};

pub fn file_need_prompt(question: &str) -> String {
    format!(
        "请分析用户的问题是否需要上传文件来辅助回答。
只需返回\"true\"或\"false\"，不需要其他解释。

以下情况需要返回\"true\"：
1. 用户提到具体的文件、合同、协议等
2. 用户需要分析具体的文档内容
3. 用户需要查看图片或扫描件
4. 用户提到需要审查或审阅某些材料

以下情况返回\"false\"：
1. 用户询问一般性法律问题
2. 用户寻求法律建议但没有具体文件
3. 用户咨询法律概念或程序
4. 用户进行假设性讨论

用户问题：{question}

请直接返回："
    )
}

/// Only an answer of exactly `true` (any case, surrounding whitespace
/// ignored) counts as yes.
pub fn parse_answer(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

pub async fn needs_file(
    provider: &dyn LlmProvider,
    settings: &ModelSettings,
    question: &str,
) -> Result<bool> {
    let req = ChatRequest {
        messages: vec![Message::user(file_need_prompt(question))],
        temperature: settings.temperature,
        max_tokens: settings.max_tokens,
        model: settings.model.clone(),
    };
    let resp = provider.chat(&req).await?;
    Ok(parse_answer(&resp.content))
}
