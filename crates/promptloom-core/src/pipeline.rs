//! High-level facade: one call from request to finished reply.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use promptloom_core::{
//!     Backend, BackendReply, BoxError, CollectingPreviewSink, Pipeline, PipelineConfig,
//!     ReplyRequest,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl Backend for Echo {
//!     async fn call(&self, _text: &str) -> Result<BackendReply, BoxError> {
//!         Ok(BackendReply::text("hello"))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> promptloom_core::Result<()> {
//!     let pipeline = Pipeline::builder(PipelineConfig::default(), Arc::new(Echo)).build()?;
//!     let request = ReplyRequest::new("alice", "Alice", "Bob");
//!     let mut sink = CollectingPreviewSink::new();
//!
//!     let reply = pipeline
//!         .get_reply(&request, &mut sink, CancellationToken::new())
//!         .await?;
//!     println!("{}", reply.content);
//!     Ok(())
//! }
//! ```

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::prompt::PromptComposer;
use crate::reply::{
    Backend, Generator, GeneratorToolHandler, InlineToolExecutor, InlineToolReplyHandler, Marker,
    PreviewSink, PreviewStage, PreviewUpdater, RegenerationLoop, ReplyHandler, ReplyResult,
    ToolExec, ToolInfoHandler, ToolUseHider,
};
use crate::request::ReplyRequest;
use log::debug;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Collects the static parts of a [`Pipeline`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    backend: Arc<dyn Backend>,
    tool_infos: Vec<(String, String)>,
    generators: Vec<Arc<dyn Generator>>,
    inline_tools: Vec<(String, Marker, Marker, Arc<dyn ToolExec>)>,
}

impl PipelineBuilder {
    /// Register usage text for the tool-info lookup.
    pub fn tool_info(mut self, tool: impl Into<String>, info: impl Into<String>) -> Self {
        self.tool_infos.push((tool.into(), info.into()));
        self
    }

    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generators.push(generator);
        self
    }

    pub fn inline_tool(
        mut self,
        id: impl Into<String>,
        start: Marker,
        end: Marker,
        exec: Arc<dyn ToolExec>,
    ) -> Self {
        self.inline_tools.push((id.into(), start, end, exec));
        self
    }

    /// Validate the configuration and compile every marker.
    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;

        let mut inline = InlineToolExecutor::new();
        for (id, start, end, exec) in self.inline_tools {
            inline = inline.with_tool(id, &start, &end, exec)?;
        }
        let inline = Arc::new(inline);

        let mut stages: Vec<Arc<dyn PreviewStage>> = Vec::new();
        if !inline.is_empty() {
            stages.push(inline.clone());
        }
        if !self.config.tool_blocks.is_empty() {
            stages.push(Arc::new(ToolUseHider::new(&self.config.tool_blocks)?));
        }

        let mut tool_info =
            ToolInfoHandler::new(&self.config.tool_info_block, self.config.tool_info_missing.clone())?;
        for (tool, info) in self.tool_infos {
            tool_info = tool_info.with_info(tool, info);
        }
        let mut generators = GeneratorToolHandler::new();
        for generator in self.generators {
            generators = generators.with_generator(generator)?;
        }

        let mut handlers: Vec<Arc<dyn ReplyHandler>> = vec![Arc::new(tool_info)];
        if !generators.is_empty() {
            handlers.push(Arc::new(generators));
        }
        if !inline.is_empty() {
            handlers.push(Arc::new(InlineToolReplyHandler::new(inline)));
        }

        Ok(Pipeline {
            config: self.config,
            backend: self.backend,
            stages,
            handlers,
        })
    }
}

/// The reply pipeline: composition, regeneration loop and previews.
///
/// Holds no per-reply state; one `Pipeline` serves any number of
/// concurrent replies.
pub struct Pipeline {
    config: PipelineConfig,
    backend: Arc<dyn Backend>,
    stages: Vec<Arc<dyn PreviewStage>>,
    handlers: Vec<Arc<dyn ReplyHandler>>,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig, backend: Arc<dyn Backend>) -> PipelineBuilder {
        PipelineBuilder {
            config,
            backend,
            tool_infos: Vec::new(),
            generators: Vec::new(),
            inline_tools: Vec::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Produce the finished reply for `request`.
    ///
    /// Previews go to `sink` as diff batches while the backend works.
    pub async fn get_reply(
        &self,
        request: &ReplyRequest,
        sink: &mut dyn PreviewSink,
        signal: CancellationToken,
    ) -> Result<ReplyResult> {
        let mut result = ReplyResult::default();
        self.get_reply_into(request, &mut result, sink, signal).await?;
        Ok(result)
    }

    /// Like [`Pipeline::get_reply`], but accumulates into `result`, which
    /// keeps whatever was generated when an error ends the reply early.
    /// Returns the number of backend calls made.
    pub async fn get_reply_into(
        &self,
        request: &ReplyRequest,
        result: &mut ReplyResult,
        sink: &mut dyn PreviewSink,
        signal: CancellationToken,
    ) -> Result<usize> {
        let composer =
            PromptComposer::new(self.config.detail_level, self.config.isolate_provider_errors);
        let mut prompt = composer.compose(request).await?;

        // built-ins first, then each plugin's contributions in plugin order
        let mut stages = self.stages.clone();
        let mut handlers = self.handlers.clone();
        for record in &request.plugins {
            stages.extend(record.plugin.preview_stages());
            handlers.extend(record.plugin.reply_handlers());
        }
        debug!(
            "reply for {}: {} preview stage(s), {} handler(s)",
            request.char_id,
            stages.len(),
            handlers.len()
        );

        let mut preview = PreviewUpdater::new(
            stages,
            sink,
            request.char_id.clone(),
            request.capabilities,
            self.config.placeholder.clone(),
            signal.clone(),
        );
        let regeneration = RegenerationLoop {
            backend: self.backend.as_ref(),
            handlers,
            max_passes: self.config.max_passes,
            sections: &self.config.sections,
        };
        regeneration
            .run(request, &mut prompt, result, &mut preview, &signal)
            .await
    }
}
