/// Header placed between the system prompt and the reference block.
pub const REFERENCE_HEADER: &str = "\n\n请基于以下参考资料回答问题：\n";

/// Format one retrieved snippet.
pub fn format_snippet(content: &str) -> String {
    format!("相关文档内容：{content}")
}

/// Join formatted snippets into the reference block.
pub fn join_snippets<'a>(sections: impl IntoIterator<Item = &'a str>) -> String {
    sections.into_iter().collect::<Vec<_>>().join("\n\n")
}

/// System prompt with the reference block appended. An empty block leaves
/// the prompt unchanged.
pub fn with_references(system_prompt: &str, reference_block: &str) -> String {
    if reference_block.is_empty() {
        return system_prompt.to_string();
    }
    format!("{system_prompt}{REFERENCE_HEADER}{reference_block}")
}
