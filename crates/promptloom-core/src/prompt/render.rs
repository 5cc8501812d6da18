//! Flat-text rendering of a composed prompt.

use super::merge::merge_chat_log;
use super::types::{PromptPart, PromptStruct};
use crate::config::SectionHeaders;

/// Render every non-chat section of `prompt`.
///
/// Sections appear in the order char, user, world, other characters,
/// plugins. A section whose parts hold no non-empty text is left out
/// entirely, header included.
pub fn to_system_text(prompt: &PromptStruct, headers: &SectionHeaders) -> String {
    let mut lines: Vec<&str> = Vec::new();
    push_section(&mut lines, &headers.char, [&prompt.char_prompt]);
    push_section(&mut lines, &headers.user, [&prompt.user_prompt]);
    push_section(&mut lines, &headers.world, [&prompt.world_prompt]);
    push_section(
        &mut lines,
        &headers.other_chars,
        prompt.other_chars_prompt.values(),
    );
    push_section(&mut lines, &headers.plugins, prompt.plugin_prompts.values());
    lines.join("\n")
}

/// Render the system text followed by the merged chat log as `name: content`
/// lines, for backends that only take plain text.
pub fn to_single_text(prompt: &PromptStruct, headers: &SectionHeaders) -> String {
    let mut out = to_system_text(prompt, headers);
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(&headers.chat_log);
    for entry in merge_chat_log(prompt) {
        out.push('\n');
        out.push_str(&entry.name);
        out.push_str(": ");
        out.push_str(&entry.content);
    }
    out
}

fn push_section<'a>(
    lines: &mut Vec<&'a str>,
    header: &'a str,
    parts: impl IntoIterator<Item = &'a PromptPart>,
) {
    let body: Vec<&str> = parts
        .into_iter()
        .flat_map(|part| part.sorted_text())
        .collect();
    if body.is_empty() {
        return;
    }
    lines.push(header);
    lines.extend(body);
}
