//! Chat log merging.
//!
//! Flattens the base chat log and every part's `additional_chat_log` into
//! the exact history the model sees.

use super::types::{ChatLogEntry, PromptStruct};

/// Merge the chat log for the responding character of `prompt`.
///
/// Concatenation order is fixed: base log, user, world, other characters,
/// plugins, and the responding character last. Each entry's context windows
/// are spliced around it (one level deep), then entries hidden from the
/// responder are dropped.
pub fn merge_chat_log(prompt: &PromptStruct) -> Vec<ChatLogEntry> {
    let sources = prompt
        .chat_log
        .iter()
        .chain(&prompt.user_prompt.additional_chat_log)
        .chain(&prompt.world_prompt.additional_chat_log)
        .chain(
            prompt
                .other_chars_prompt
                .values()
                .flat_map(|part| &part.additional_chat_log),
        )
        .chain(
            prompt
                .plugin_prompts
                .values()
                .flat_map(|part| &part.additional_chat_log),
        )
        .chain(&prompt.char_prompt.additional_chat_log);

    let mut merged: Vec<&ChatLogEntry> = Vec::new();
    for entry in sources {
        merged.extend(entry.log_context_before.iter());
        merged.push(entry);
        merged.extend(entry.log_context_after.iter());
    }

    merged
        .into_iter()
        .filter(|entry| entry.is_visible_to(&prompt.char_id))
        .cloned()
        .collect()
}
