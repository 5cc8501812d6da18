//! Preview pipeline: an ordered list of stages that rewrite the evolving
//! reply, a diff against what the client already has, and a sink that
//! carries the resulting slices out.

use super::diff::{DiffSlice, apply_slices, reply_diff};
use super::result::{ReplyPreview, ReplyResult};
use super::tool_use::ToolCache;
use crate::config::PlaceholderConfig;
use crate::prompt::FileRef;
use crate::request::OutputCapabilities;
use async_trait::async_trait;
use log::warn;
use std::io;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-reply state shared by every preview stage.
pub struct PreviewContext<'a> {
    pub char_id: &'a str,
    pub capabilities: OutputCapabilities,
    pub placeholder: &'a PlaceholderConfig,
    pub tool_cache: &'a mut ToolCache,
    pub signal: &'a CancellationToken,
}

/// One step of the preview pipeline.
///
/// Returning `None` swallows the update: later stages are skipped and
/// nothing is sent.
#[async_trait]
pub trait PreviewStage: Send + Sync {
    async fn handle(
        &self,
        ctx: &mut PreviewContext<'_>,
        reply: ReplyPreview,
    ) -> Option<ReplyPreview>;
}

/// Receives each non-empty batch of diff slices.
pub trait PreviewSink: Send {
    fn emit(&mut self, slices: &[DiffSlice]) -> io::Result<()>;
}

/// A sink that rebuilds the rendered state and keeps every batch.
#[derive(Debug, Default)]
pub struct CollectingPreviewSink {
    pub text: String,
    pub files: Vec<FileRef>,
    pub batches: Vec<Vec<DiffSlice>>,
}

impl CollectingPreviewSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreviewSink for CollectingPreviewSink {
    fn emit(&mut self, slices: &[DiffSlice]) -> io::Result<()> {
        apply_slices(&mut self.text, &mut self.files, slices);
        self.batches.push(slices.to_vec());
        Ok(())
    }
}

/// Drives the stages for one reply and diffs against the last frame the
/// sink accepted.
///
/// Owns the reply's tool cache, so the cache lives exactly as long as the
/// reply does.
pub struct PreviewUpdater<'a> {
    stages: Vec<Arc<dyn PreviewStage>>,
    sink: &'a mut dyn PreviewSink,
    last_sent: ReplyPreview,
    tool_cache: ToolCache,
    char_id: String,
    capabilities: OutputCapabilities,
    placeholder: PlaceholderConfig,
    signal: CancellationToken,
}

impl<'a> PreviewUpdater<'a> {
    pub fn new(
        stages: Vec<Arc<dyn PreviewStage>>,
        sink: &'a mut dyn PreviewSink,
        char_id: impl Into<String>,
        capabilities: OutputCapabilities,
        placeholder: PlaceholderConfig,
        signal: CancellationToken,
    ) -> Self {
        Self {
            stages,
            sink,
            last_sent: ReplyPreview::default(),
            tool_cache: ToolCache::default(),
            char_id: char_id.into(),
            capabilities,
            placeholder,
            signal,
        }
    }

    /// Run `reply` through the stages and emit the difference, if any.
    pub async fn update(&mut self, reply: &ReplyResult) {
        let mut ctx = PreviewContext {
            char_id: &self.char_id,
            capabilities: self.capabilities,
            placeholder: &self.placeholder,
            tool_cache: &mut self.tool_cache,
            signal: &self.signal,
        };
        let mut preview = reply.preview();
        for stage in &self.stages {
            match stage.handle(&mut ctx, preview).await {
                Some(next) => preview = next,
                None => return,
            }
        }

        let slices = reply_diff(&self.last_sent, &preview);
        if slices.is_empty() {
            return;
        }
        match self.sink.emit(&slices) {
            Ok(()) => self.last_sent = preview,
            Err(e) => warn!("preview sink rejected {} slice(s): {}", slices.len(), e),
        }
    }

    pub fn tool_cache_mut(&mut self) -> &mut ToolCache {
        &mut self.tool_cache
    }
}
