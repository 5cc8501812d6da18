//! Prompt composition, chat log merging and text rendering.

mod compose;
mod merge;
mod render;
mod types;

pub use compose::PromptComposer;
pub use merge::merge_chat_log;
pub use render::{to_single_text, to_system_text};
pub use types::{ChatLogEntry, Extension, FileRef, PromptPart, PromptStruct, Role, TextSegment};
