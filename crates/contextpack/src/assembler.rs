use lx_domain::message::{HistoryEntry, Message};

use crate::injection;
use crate::report::ContextReport;
use crate::truncation::{self, Section};

/// Legal-advisor persona used when no system prompt is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "你是一个专业的法律顾问。请根据用户的问题提供专业、准确的法律建议。

请先给出简短的开场语，表达理解和共情。

然后按以下方面展开说明：

1. 分析用户问题涉及的法律问题
2. 提供具体的建议和解决方案
3. 引用相关法律条文和法规
4. 说明需要注意的风险
5. 补充其他重要信息

要自然流畅表达，注意控制篇幅，最后给出简短的结束语，表达鼓励和支持。

请记住：你的建议可能影响用户的重要决策，务必谨慎和专业。";

/// Deterministic prompt assembler.
///
/// Pure function: accepts already-loaded history and snippets plus the
/// configured caps, returns the ordered prompt and a report.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    /// Number of trailing history entries kept.
    pub history_window: usize,
    pub max_snippet_chars: usize,
    pub max_reference_chars: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self {
            history_window: 10,
            max_snippet_chars: 2000,
            max_reference_chars: 6000,
        }
    }
}

impl ContextAssembler {
    pub fn new(history_window: usize, max_snippet_chars: usize, max_reference_chars: usize) -> Self {
        Self {
            history_window,
            max_snippet_chars,
            max_reference_chars,
        }
    }

    /// Build the prompt.
    ///
    /// - `system_prompt`: persona text, placed first
    /// - `history`: prior messages of the chat in creation order, not
    ///   including `current`
    /// - `current`: the new user message, placed last
    /// - `snippets`: retrieved reference texts in rank order
    pub fn assemble(
        &self,
        system_prompt: &str,
        history: &[HistoryEntry],
        current: &str,
        snippets: &[String],
    ) -> (Vec<Message>, ContextReport) {
        let (reference_block, snippets_included, snippets_truncated) =
            self.reference_block(snippets);
        let system = injection::with_references(system_prompt, &reference_block);

        let non_empty: Vec<&HistoryEntry> = history
            .iter()
            .filter(|h| !h.content.trim().is_empty())
            .collect();
        let start = non_empty.len().saturating_sub(self.history_window);
        let kept = &non_empty[start..];

        let mut messages = Vec::with_capacity(kept.len() + 2);
        messages.push(Message::system(system.as_str()));
        messages.extend(kept.iter().map(|h| Message::from(*h)));
        messages.push(Message::user(current));

        let report = ContextReport {
            history_messages: kept.len(),
            history_dropped: history.len() - kept.len(),
            snippets_included,
            snippets_truncated,
            reference_chars: reference_block.chars().count(),
            system_chars: system.chars().count(),
        };

        (messages, report)
    }

    /// Returns the joined block, the number of snippets in it and how many
    /// of those were cut.
    fn reference_block(&self, snippets: &[String]) -> (String, usize, usize) {
        let mut sections: Vec<Section> = snippets
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|raw| {
                let (content, truncated) = truncation::truncate_chars(raw, self.max_snippet_chars);
                Section {
                    content: injection::format_snippet(&content),
                    raw_chars: raw.chars().count(),
                    truncated_per_snippet: truncated,
                    truncated_total_cap: false,
                    included: true,
                }
            })
            .collect();

        truncation::apply_total_cap(&mut sections, self.max_reference_chars);

        let included: Vec<&Section> = sections.iter().filter(|s| s.included).collect();
        let truncated = included
            .iter()
            .filter(|s| s.truncated_per_snippet || s.truncated_total_cap)
            .count();
        if sections.len() > included.len() {
            tracing::debug!(
                dropped = sections.len() - included.len(),
                "reference snippets dropped by total cap"
            );
        }

        let block = injection::join_snippets(included.iter().map(|s| s.content.as_str()));
        (block, included.len(), truncated)
    }
}
