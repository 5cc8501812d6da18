//! Pipeline configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is a valid
//! configuration. Per-request data (chat log, prompt sources, output
//! capabilities) lives in [`crate::request::ReplyRequest`], not here.

use crate::error::{PipelineError, Result};
use crate::reply::tool_use::Marker;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default number of prompt refinement rounds.
pub const DEFAULT_DETAIL_LEVEL: u32 = 3;

fn default_detail_level() -> u32 {
    DEFAULT_DETAIL_LEVEL
}

fn default_tool_info_block() -> String {
    "get-tool-info".to_string()
}

fn default_tool_info_missing() -> String {
    "No such tool.".to_string()
}

/// Text used by the tool-use hider placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PlaceholderConfig {
    /// Localized "tool is running" text.
    pub tool_calling_text: String,
    /// i18n key emitted instead of the text when the client resolves keys itself.
    pub i18n_key: String,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            tool_calling_text: "Tool calling...".to_string(),
            i18n_key: "chat.messageView.commonToolCalling".to_string(),
        }
    }
}

/// Fixed headers emitted in front of each non-empty system text section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SectionHeaders {
    pub char: String,
    pub user: String,
    pub world: String,
    pub other_chars: String,
    pub plugins: String,
    pub chat_log: String,
}

impl Default for SectionHeaders {
    fn default() -> Self {
        Self {
            char: "The character you are playing is described as follows:".to_string(),
            user: "The user is described as follows:".to_string(),
            world: "The current environment is described as follows:".to_string(),
            other_chars: "The other characters are described as follows:".to_string(),
            plugins: "You can use the following plugins, as described:".to_string(),
            chat_log: "The chat log is as follows:".to_string(),
        }
    }
}

/// A delimited tool-use block to hide from previews.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ToolBlockConfig {
    pub id: String,
    pub start: Marker,
    pub end: Marker,
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of sequential prompt refinement rounds.
    pub detail_level: u32,
    /// Turn prompt source failures into empty contributions instead of
    /// aborting the reply.
    pub isolate_provider_errors: bool,
    /// Upper bound on backend calls per reply. Unset means unbounded.
    pub max_passes: Option<usize>,
    pub placeholder: PlaceholderConfig,
    pub sections: SectionHeaders,
    pub tool_blocks: Vec<ToolBlockConfig>,
    /// Fence tag that asks for a tool's usage text.
    pub tool_info_block: String,
    /// Logged when the requested tool has no registered usage text.
    pub tool_info_missing: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detail_level: default_detail_level(),
            isolate_provider_errors: false,
            max_passes: None,
            placeholder: PlaceholderConfig::default(),
            sections: SectionHeaders::default(),
            tool_blocks: Vec::new(),
            tool_info_block: default_tool_info_block(),
            tool_info_missing: default_tool_info_missing(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_passes == Some(0) {
            return Err(PipelineError::Config(
                "max_passes must be at least 1".to_string(),
            ));
        }
        if self.tool_info_block.trim().is_empty() {
            return Err(PipelineError::Config(
                "tool_info_block cannot be empty".to_string(),
            ));
        }
        let mut seen = Vec::new();
        for block in &self.tool_blocks {
            if seen.contains(&block.id.as_str()) {
                return Err(PipelineError::Config(format!(
                    "duplicate tool block id '{}'",
                    block.id
                )));
            }
            seen.push(block.id.as_str());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.detail_level, 3);
        assert!(!config.isolate_provider_errors);
        assert!(config.max_passes.is_none());
    }

    #[test]
    fn test_tool_blocks_accept_literal_and_pattern_markers() {
        let config = PipelineConfig::from_toml_str(
            r#"
            detail_level = 1

            [[tool_blocks]]
            id = "js"
            start = "<inline-js>"
            end = "</inline-js>"

            [[tool_blocks]]
            id = "fence"
            start = { pattern = "```run-[a-z]+" }
            end = "```"
            "#,
        )
        .unwrap();
        assert_eq!(config.detail_level, 1);
        assert_eq!(
            config.tool_blocks[0].start,
            Marker::Literal("<inline-js>".to_string())
        );
        assert_eq!(
            config.tool_blocks[1].start,
            Marker::Pattern {
                pattern: "```run-[a-z]+".to_string()
            }
        );
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [sections]
            char = "You are:"
            "#,
        )
        .unwrap();
        assert_eq!(config.sections.char, "You are:");
        assert_eq!(config.sections.user, SectionHeaders::default().user);
    }

    #[test]
    fn test_zero_max_passes_rejected() {
        let err = PipelineConfig::from_toml_str("max_passes = 0").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_duplicate_tool_block_ids_rejected() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [[tool_blocks]]
            id = "a"
            start = "<a>"
            end = "</a>"

            [[tool_blocks]]
            id = "a"
            start = "<b>"
            end = "</b>"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate tool block id"));
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load(&dir.path().join("promptloom.toml")).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promptloom.toml");
        std::fs::write(&path, "max_passes = 4\nisolate_provider_errors = true\n").unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.max_passes, Some(4));
        assert!(config.isolate_provider_errors);
    }
}
