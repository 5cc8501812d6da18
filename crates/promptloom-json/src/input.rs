use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use promptloom_core::{
    BoxError, ChatLogEntry, ChatPlugin, OutputCapabilities, PipelineConfig, PromptPart,
    PromptSource, ReplyRequest,
};
use schemars::JsonSchema;
use serde::Deserialize;

/// JSON-mode input -- read from stdin, stateless per invocation.
///
/// Prompt sources are static: each contributes the parts given here. The
/// backend replays `replies` in order, repeating the last one.
///
/// Config priority (highest → lowest): `config` > `config_path` > defaults
#[derive(Debug, Deserialize, JsonSchema)]
pub struct JsonInput {
    /// Id of the responding character
    pub char_id: String,
    /// Display name of the responding character
    pub charname: String,
    /// Display name of the user
    pub user_charname: String,
    /// Who the reply is addressed to; defaults to the user
    #[serde(default)]
    pub reply_to_charname: Option<String>,
    #[serde(default)]
    pub chat_log: Vec<ChatLogEntry>,
    #[serde(default)]
    pub world: Option<StaticSource>,
    #[serde(default)]
    pub user: Option<StaticSource>,
    #[serde(default)]
    pub char: Option<StaticSource>,
    /// Other characters present, in order
    #[serde(default)]
    pub other_chars: Vec<StaticRecord>,
    /// Plugins, in order
    #[serde(default)]
    pub plugins: Vec<StaticRecord>,
    #[serde(default)]
    pub capabilities: OutputCapabilities,
    /// Backend replies, one per generation pass
    pub replies: Vec<String>,
    /// Stream each reply word by word instead of all at once
    #[serde(default)]
    pub stream: bool,
    /// Usage text served by the tool-info lookup, keyed by tool name
    #[serde(default)]
    pub tool_info: BTreeMap<String, String>,
    /// Directory that `generate-char` blocks create characters in
    #[serde(default)]
    pub generator_root: Option<PathBuf>,
    /// Path to a promptloom.toml
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    /// Inline configuration (replaces the file entirely)
    #[serde(default)]
    pub config: Option<PipelineConfig>,
}

/// Fixed prompt parts for one source.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct StaticSource {
    /// Contributed when filling its own slot
    #[serde(default)]
    pub prompt: PromptPart,
    /// Contributed when present as another character
    #[serde(default)]
    pub prompt_for_other: PromptPart,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct StaticRecord {
    pub id: String,
    #[serde(flatten)]
    pub source: StaticSource,
}

#[async_trait]
impl PromptSource for StaticSource {
    async fn get_prompt(&self, _request: &ReplyRequest) -> Result<PromptPart, BoxError> {
        Ok(self.prompt.clone())
    }

    async fn get_prompt_for_other(&self, _request: &ReplyRequest) -> Result<PromptPart, BoxError> {
        Ok(self.prompt_for_other.clone())
    }
}

impl ChatPlugin for StaticSource {}

impl JsonInput {
    /// Build the request; sources keep their input order.
    pub fn to_request(&self) -> ReplyRequest {
        let mut request = ReplyRequest::new(&self.char_id, &self.charname, &self.user_charname)
            .with_chat_log(self.chat_log.clone())
            .with_capabilities(self.capabilities);
        if let Some(name) = &self.reply_to_charname {
            request = request.with_reply_to(name);
        }
        if let Some(world) = &self.world {
            request = request.with_world(Arc::new(world.clone()));
        }
        if let Some(user) = &self.user {
            request = request.with_user(Arc::new(user.clone()));
        }
        if let Some(char) = &self.char {
            request = request.with_char(Arc::new(char.clone()));
        }
        for record in &self.other_chars {
            request = request.with_other_char(&record.id, Arc::new(record.source.clone()));
        }
        for record in &self.plugins {
            request = request.with_plugin(&record.id, Arc::new(record.source.clone()));
        }
        request
    }

    /// Resolve the pipeline configuration.
    pub fn resolve_config(&self) -> promptloom_core::Result<PipelineConfig> {
        if let Some(config) = &self.config {
            config.validate()?;
            return Ok(config.clone());
        }
        match &self.config_path {
            Some(path) => PipelineConfig::load(path),
            None => Ok(PipelineConfig::default()),
        }
    }
}
