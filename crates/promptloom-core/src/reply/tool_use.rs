//! Tool-use interception.
//!
//! Two preview stages over delimited blocks in generated text:
//!
//! - [`ToolUseHider`] swaps every block, including one still streaming, for
//!   a "tool calling" placeholder.
//! - [`InlineToolExecutor`] runs each complete block through its tool and
//!   splices the result in, caching results per match so a block executes at
//!   most once per reply.
//!
//! Markers are compiled once, when the stage is built.

use super::preview::{PreviewContext, PreviewStage};
use super::result::ReplyPreview;
use crate::config::{PlaceholderConfig, ToolBlockConfig};
use crate::error::{BoxError, PipelineError, Result};
use crate::request::OutputCapabilities;
use async_trait::async_trait;
use futures_util::future::join_all;
use log::debug;
use regex::{Captures, NoExpand, Regex};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A block delimiter: literal text, or a regular expression.
///
/// In TOML/JSON a bare string is a literal; `{ pattern = "..." }` is a regex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Marker {
    Literal(String),
    Pattern { pattern: String },
}

impl Marker {
    pub fn literal(text: impl Into<String>) -> Self {
        Marker::Literal(text.into())
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        Marker::Pattern {
            pattern: pattern.into(),
        }
    }

    fn regex_source(&self) -> Cow<'_, str> {
        match self {
            Marker::Literal(text) => Cow::Owned(regex::escape(text)),
            Marker::Pattern { pattern } => Cow::Borrowed(pattern),
        }
    }
}

fn compile(id: &str, source: &str) -> Result<Regex> {
    Regex::new(source).map_err(|source| PipelineError::Pattern {
        id: id.to_string(),
        source,
    })
}

/// Compiled matchers for one tool.
#[derive(Debug, Clone)]
pub struct ToolMatcher {
    id: String,
    /// `start (inner) end`, non-greedy.
    complete: Regex,
    /// `start` through end of text.
    pending: Regex,
}

impl ToolMatcher {
    pub fn new(id: impl Into<String>, start: &Marker, end: &Marker) -> Result<Self> {
        let id = id.into();
        let (start, end) = (start.regex_source(), end.regex_source());
        let complete = compile(&id, &format!(r"(?:{start})([\s\S]*?)(?:{end})"))?;
        let pending = compile(&id, &format!(r"(?:{start})[\s\S]*$"))?;
        Ok(Self {
            id,
            complete,
            pending,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Hides tool blocks behind a placeholder.
#[derive(Debug, Clone)]
pub struct ToolUseHider {
    /// `None` when no blocks are configured.
    pattern: Option<Regex>,
}

impl ToolUseHider {
    pub fn new(blocks: &[ToolBlockConfig]) -> Result<Self> {
        let mut alternatives = Vec::with_capacity(blocks.len());
        for block in blocks {
            let alternative = format!(
                r"(?:{})[\s\S]*?(?:(?:{})|$)",
                block.start.regex_source(),
                block.end.regex_source()
            );
            // compile alone first so a bad marker is reported against its block
            compile(&block.id, &alternative)?;
            alternatives.push(alternative);
        }
        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }
        let pattern = compile("tool_blocks", &alternatives.join("|"))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    pub fn hide(
        &self,
        content: &str,
        capabilities: OutputCapabilities,
        placeholder: &PlaceholderConfig,
    ) -> String {
        match &self.pattern {
            Some(pattern) => {
                let text = placeholder_text(capabilities, placeholder);
                pattern.replace_all(content, NoExpand(&text)).into_owned()
            }
            None => content.to_string(),
        }
    }
}

/// The placeholder form for what the client can render.
pub fn placeholder_text(capabilities: OutputCapabilities, placeholder: &PlaceholderConfig) -> String {
    if capabilities.html {
        let label = if capabilities.i18n_keys {
            format!(
                r#"<span class="tool-call-placeholder-text" data-i18n="{}"></span>"#,
                placeholder.i18n_key
            )
        } else {
            format!(
                r#"<span class="tool-call-placeholder-text">{}</span>"#,
                placeholder.tool_calling_text
            )
        };
        format!(
            "<div class=\"tool-call-placeholder card bg-base-100 shadow-xl\">\n\t<div class=\"card-body\">\n\t{label}\n\t</div>\n</div>\n"
        )
    } else if capabilities.markdown {
        format!("*[[{}]]*", placeholder.tool_calling_text)
    } else {
        format!("({})", placeholder.tool_calling_text)
    }
}

#[async_trait]
impl PreviewStage for ToolUseHider {
    async fn handle(
        &self,
        ctx: &mut PreviewContext<'_>,
        mut reply: ReplyPreview,
    ) -> Option<ReplyPreview> {
        reply.content = self.hide(&reply.content, ctx.capabilities, ctx.placeholder);
        Some(reply)
    }
}

/// Executes the inner text of a complete tool block.
#[async_trait]
pub trait ToolExec: Send + Sync {
    async fn exec(&self, inner: &str, signal: &CancellationToken) -> Result<String, BoxError>;
}

/// Execution results of one reply, per tool id, in match order.
/// Failures keep their message.
#[derive(Debug, Clone, Default)]
pub struct ToolCache {
    results: HashMap<String, Vec<Result<String, String>>>,
}

impl ToolCache {
    pub fn results(&self, id: &str) -> &[Result<String, String>] {
        self.results.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.results.values().all(Vec::is_empty)
    }
    pub fn clear(&mut self) {
        self.results.clear();
    }
}

struct InlineTool {
    matcher: ToolMatcher,
    exec: Arc<dyn ToolExec>,
}

/// Runs complete tool blocks and splices their results into the text.
#[derive(Default)]
pub struct InlineToolExecutor {
    tools: Vec<InlineTool>,
}

impl InlineToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Tools are applied in registration order.
    pub fn with_tool(
        mut self,
        id: impl Into<String>,
        start: &Marker,
        end: &Marker,
        exec: Arc<dyn ToolExec>,
    ) -> Result<Self> {
        self.tools.push(InlineTool {
            matcher: ToolMatcher::new(id, start, end)?,
            exec,
        });
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Rewrite `content`: complete blocks become their results, and a
    /// trailing unterminated block is cut off.
    ///
    /// Only match indices missing from `cache` execute; they run
    /// concurrently and are all awaited before any substitution. Cache
    /// entries past the current match count are dropped.
    pub async fn apply(
        &self,
        cache: &mut ToolCache,
        content: &str,
        signal: &CancellationToken,
    ) -> String {
        let mut content = content.to_string();
        for tool in &self.tools {
            let cached = cache.results.entry(tool.matcher.id.clone()).or_default();
            let inners: Vec<&str> = tool
                .matcher
                .complete
                .captures_iter(&content)
                .map(|caps| caps.get(1).map_or("", |m| m.as_str()))
                .collect();

            if inners.len() > cached.len() {
                debug!(
                    "executing {} new '{}' block(s)",
                    inners.len() - cached.len(),
                    tool.matcher.id
                );
                let fresh = join_all(
                    inners[cached.len()..]
                        .iter()
                        .map(|inner| tool.exec.exec(inner, signal)),
                )
                .await;
                cached.extend(fresh.into_iter().map(|r| r.map_err(|e| e.to_string())));
            }
            cached.truncate(inners.len());

            let mut index = 0;
            let replaced = tool
                .matcher
                .complete
                .replace_all(&content, |_: &Captures| {
                    let text = match cached.get(index) {
                        Some(Ok(output)) => output.clone(),
                        Some(Err(message)) => format!("[Error: {message}]"),
                        None => String::new(),
                    };
                    index += 1;
                    text
                })
                .into_owned();
            content = tool.matcher.pending.replace(&replaced, "").into_owned();
        }
        content
    }
}

#[async_trait]
impl PreviewStage for InlineToolExecutor {
    async fn handle(
        &self,
        ctx: &mut PreviewContext<'_>,
        mut reply: ReplyPreview,
    ) -> Option<ReplyPreview> {
        reply.content = self.apply(ctx.tool_cache, &reply.content, ctx.signal).await;
        Some(reply)
    }
}
