//! Reply handlers: inspect a finished generation pass and optionally ask
//! for another.

use super::result::ReplyResult;
use super::tool_use::{InlineToolExecutor, ToolCache};
use crate::error::{BoxError, Result};
use crate::prompt::{ChatLogEntry, PromptStruct, Role};
use crate::request::ReplyRequest;
use async_trait::async_trait;
use indexmap::IndexMap;
use log::debug;
use regex::Regex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Explicit per-reply state handed to each handler for one call.
pub struct ReplyContext<'a> {
    pub request: &'a ReplyRequest,
    pub prompt: &'a mut PromptStruct,
    pub result: &'a mut ReplyResult,
    pub tool_cache: &'a mut ToolCache,
    pub signal: &'a CancellationToken,
}

impl ReplyContext<'_> {
    /// Record `entry` where both the reply and the next pass will see it.
    ///
    /// The entry is made private to the responding character, appended to the
    /// result's `logContextBefore`, and appended to the character's
    /// additional chat log.
    pub fn add_long_time_log(&mut self, mut entry: ChatLogEntry) {
        entry.char_visibility = Some(vec![self.request.char_id.clone()]);
        if entry.time_stamp.is_none() {
            entry = entry.stamped();
        }
        self.result.log_context_before.push(entry.clone());
        self.prompt.char_prompt.additional_chat_log.push(entry);
    }

    /// Display name of the responding character.
    pub fn charname(&self) -> &str {
        &self.request.charname
    }
}

/// Runs after every generation pass. Returning `true` requests another pass.
#[async_trait]
pub trait ReplyHandler: Send + Sync {
    /// Name used in errors and logs.
    fn name(&self) -> &str;

    async fn handle(&self, ctx: &mut ReplyContext<'_>) -> Result<bool, BoxError>;
}

/// Answers ```` ```get-tool-info ```` requests with registered usage text.
pub struct ToolInfoHandler {
    tag: String,
    missing: String,
    pattern: Regex,
    infos: IndexMap<String, String>,
}

impl ToolInfoHandler {
    pub fn new(tag: &str, missing: impl Into<String>) -> Result<Self> {
        let pattern = Regex::new(&format!(
            r"```{}\n(?<toolname>[^\n]+)\n```",
            regex::escape(tag)
        ))
        .map_err(|source| crate::error::PipelineError::Pattern {
            id: tag.to_string(),
            source,
        })?;
        Ok(Self {
            tag: tag.to_string(),
            missing: missing.into(),
            pattern,
            infos: IndexMap::new(),
        })
    }

    pub fn with_info(mut self, tool: impl Into<String>, info: impl Into<String>) -> Self {
        self.infos.insert(tool.into(), info.into());
        self
    }
}

#[async_trait]
impl ReplyHandler for ToolInfoHandler {
    fn name(&self) -> &str {
        "tool-info"
    }

    async fn handle(&self, ctx: &mut ReplyContext<'_>) -> Result<bool, BoxError> {
        let Some(caps) = self.pattern.captures(&ctx.result.content) else {
            return Ok(false);
        };
        let tool = caps["toolname"].trim().to_string();
        debug!("tool info requested for '{}'", tool);

        let request = ChatLogEntry::new(
            ctx.charname().to_string(),
            Role::Tool,
            format!("```{}\n{}\n```", self.tag, tool),
        );
        ctx.add_long_time_log(request);

        let info = self
            .infos
            .get(&tool)
            .cloned()
            .unwrap_or_else(|| self.missing.clone());
        ctx.add_long_time_log(ChatLogEntry::new("system", Role::System, info));
        Ok(true)
    }
}

/// Splices inline tool results into the final content.
///
/// Shares the reply's tool cache with the preview stage, so blocks already
/// executed while streaming are not executed again.
pub struct InlineToolReplyHandler {
    executor: Arc<InlineToolExecutor>,
}

impl InlineToolReplyHandler {
    pub fn new(executor: Arc<InlineToolExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ReplyHandler for InlineToolReplyHandler {
    fn name(&self) -> &str {
        "inline-tools"
    }

    async fn handle(&self, ctx: &mut ReplyContext<'_>) -> Result<bool, BoxError> {
        let original = ctx.result.content.clone();
        let replaced = self
            .executor
            .apply(ctx.tool_cache, &original, ctx.signal)
            .await;
        if replaced == original {
            return Ok(false);
        }

        let visibility = Some(vec![ctx.request.char_id.clone()]);
        let mut before = ChatLogEntry::new(ctx.charname().to_string(), Role::Char, original);
        before.files = ctx.result.files.clone();
        before.char_visibility = visibility.clone();
        let mut note = ChatLogEntry::new(
            "inline-tools",
            Role::Tool,
            "Inline tool blocks executed and replaced.\n",
        );
        note.char_visibility = visibility;

        ctx.result.log_context_before.push(before);
        ctx.result.log_context_before.push(note);
        ctx.result.content = replaced;
        Ok(false)
    }
}
