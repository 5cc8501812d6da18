//! Reply accumulator and preview snapshot.

use crate::prompt::{ChatLogEntry, Extension, FileRef};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Map;

/// The mutable accumulator for one reply.
///
/// Owned by the regeneration loop; backends write into it and reply handlers
/// receive it by mutable reference for the length of one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReplyResult {
    pub content: String,
    /// Display text, when it differs from `content`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_for_show: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRef>,
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
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extension: Extension,
}

impl ReplyResult {
    /// Text a client would render.
    pub fn shown(&self) -> &str {
        self.content_for_show.as_deref().unwrap_or(&self.content)
    }

    pub fn preview(&self) -> ReplyPreview {
        ReplyPreview {
            content: self.content.clone(),
            content_for_show: self.content_for_show.clone(),
            files: self.files.clone(),
        }
    }
}

/// What preview stages see and rewrite: the visible slice of a reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_for_show: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRef>,
}

impl ReplyPreview {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn shown(&self) -> &str {
        self.content_for_show.as_deref().unwrap_or(&self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shown_prefers_content_for_show() {
        let mut result = ReplyResult {
            content: "raw".to_string(),
            ..ReplyResult::default()
        };
        assert_eq!(result.shown(), "raw");
        result.content_for_show = Some("pretty".to_string());
        assert_eq!(result.shown(), "pretty");
        assert_eq!(result.preview().shown(), "pretty");
    }

    #[test]
    fn test_wire_names() {
        let mut result = ReplyResult::default();
        result
            .log_context_before
            .push(ChatLogEntry::new("S", crate::prompt::Role::System, "note"));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["content"], "");
        assert_eq!(json["logContextBefore"][0]["content"], "note");
        assert!(json.get("content_for_show").is_none());
        assert!(json.get("files").is_none());
    }
}
