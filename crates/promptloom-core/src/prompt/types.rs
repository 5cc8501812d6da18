//! Prompt data model: parts, chat log entries and the composed struct.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form extension mapping carried by parts, entries and replies.
pub type Extension = Map<String, Value>;

/// Speaker role of a chat log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Char,
    System,
    Tool,
}

/// A file attached to a chat entry or reply.
///
/// The buffer travels base64-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FileRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, with = "base64_bytes")]
    #[schemars(with = "String")]
    pub buffer: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FileRef {
    pub fn new(name: impl Into<String>, buffer: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: None,
            buffer,
            description: None,
        }
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// One entry of conversation history as the model will see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChatLogEntry {
    pub name: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRef>,
    /// Unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_stamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extension: Extension,
    /// When set, only these responding characters may see the entry.
    #[serde(
        default,
        rename = "charVisibility",
        skip_serializing_if = "Option::is_none"
    )]
    pub char_visibility: Option<Vec<String>>,
    #[serde(
        default,
        rename = "logContextBefore",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub log_context_before: Vec<ChatLogEntry>,
    #[serde(
        default,
        rename = "logContextAfter",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub log_context_after: Vec<ChatLogEntry>,
}

impl ChatLogEntry {
    pub fn new(name: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            content: content.into(),
            files: Vec::new(),
            time_stamp: None,
            extension: Extension::new(),
            char_visibility: None,
            log_context_before: Vec::new(),
            log_context_after: Vec::new(),
        }
    }

    /// Stamp the entry with the current time.
    pub fn stamped(mut self) -> Self {
        self.time_stamp = Some(chrono::Utc::now().timestamp_millis());
        self
    }

    pub fn visible_only_to(mut self, char_ids: &[&str]) -> Self {
        self.char_visibility = Some(char_ids.iter().map(|id| id.to_string()).collect());
        self
    }

    /// Entries without a visibility list are visible to everyone.
    pub fn is_visible_to(&self, char_id: &str) -> bool {
        match &self.char_visibility {
            Some(ids) => ids.iter().any(|id| id == char_id),
            None => true,
        }
    }
}

/// A ranked fragment of prompt text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TextSegment {
    pub content: String,
    /// Ascending sort key; lower sorts first.
    #[serde(default)]
    pub important: f64,
}

impl TextSegment {
    pub fn new(content: impl Into<String>, important: f64) -> Self {
        Self {
            content: content.into(),
            important,
        }
    }
}

/// One provider's contribution to the prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PromptPart {
    #[serde(default)]
    pub text: Vec<TextSegment>,
    #[serde(default)]
    pub additional_chat_log: Vec<ChatLogEntry>,
    #[serde(default)]
    pub extension: Extension,
}

impl PromptPart {
    pub fn push_text(&mut self, content: impl Into<String>, important: f64) {
        self.text.push(TextSegment::new(content, important));
    }

    /// Segment contents in ascending importance, ties kept in insertion
    /// order, empty contents dropped.
    pub fn sorted_text(&self) -> Vec<&str> {
        let mut segments: Vec<&TextSegment> = self.text.iter().collect();
        // sort_by is stable
        segments.sort_by(|a, b| a.important.total_cmp(&b.important));
        segments
            .into_iter()
            .map(|segment| segment.content.as_str())
            .filter(|content| !content.is_empty())
            .collect()
    }
}

/// The fully composed request context for one reply.
///
/// Every slot is present after composition; absent providers leave an empty
/// part behind, never a hole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptStruct {
    pub char_id: String,
    pub charname: String,
    pub user_charname: String,
    pub reply_to_charname: String,
    pub char_prompt: PromptPart,
    pub user_prompt: PromptPart,
    pub world_prompt: PromptPart,
    pub other_chars_prompt: IndexMap<String, PromptPart>,
    pub plugin_prompts: IndexMap<String, PromptPart>,
    pub chat_log: Vec<ChatLogEntry>,
}
