//! Backend capability and the regeneration loop.

use super::handlers::{ReplyContext, ReplyHandler};
use super::preview::PreviewUpdater;
use super::result::ReplyResult;
use crate::config::SectionHeaders;
use crate::error::{BoxError, PipelineError, Result};
use crate::prompt::{FileRef, PromptStruct, to_single_text};
use crate::request::ReplyRequest;
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a plain-text backend call returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendReply {
    pub content: String,
    pub files: Vec<FileRef>,
}

impl BackendReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            files: Vec::new(),
        }
    }
}

/// Everything a backend gets for one generation pass.
pub struct GenerationOptions<'o, 'p> {
    /// The reply accumulator. Write generated content here.
    pub base_result: &'o mut ReplyResult,
    pub preview: &'o mut PreviewUpdater<'p>,
    pub signal: CancellationToken,
    pub sections: &'o SectionHeaders,
}

impl GenerationOptions<'_, '_> {
    /// Push the current state of `base_result` to the preview channel.
    pub async fn update_preview(&mut self) {
        self.preview.update(self.base_result).await;
    }

    /// Append streamed text and update the preview.
    pub async fn push_chunk(&mut self, chunk: &str) {
        self.base_result.content.push_str(chunk);
        self.update_preview().await;
    }
}

/// A language-model backend.
///
/// Only `call` is required; the default `struct_call` is
/// [`single_text_pass`]. Streaming backends override `struct_call` and use
/// [`GenerationOptions::push_chunk`].
#[async_trait]
pub trait Backend: Send + Sync {
    async fn call(&self, text: &str) -> Result<BackendReply, BoxError>;

    async fn struct_call(
        &self,
        prompt: &PromptStruct,
        options: &mut GenerationOptions<'_, '_>,
    ) -> Result<(), BoxError> {
        single_text_pass(self, prompt, options).await
    }
}

/// One non-streaming pass: render `prompt` to a single text, call the
/// backend, store the reply and send one preview.
///
/// The content is replaced; files add up across passes.
pub async fn single_text_pass<B: Backend + ?Sized>(
    backend: &B,
    prompt: &PromptStruct,
    options: &mut GenerationOptions<'_, '_>,
) -> Result<(), BoxError> {
    let text = to_single_text(prompt, options.sections);
    let reply = backend.call(&text).await?;
    options.base_result.content = reply.content;
    options.base_result.files.extend(reply.files);
    options.update_preview().await;
    Ok(())
}

/// Calls the backend, runs every handler, and repeats while any handler
/// asks for another pass.
pub struct RegenerationLoop<'a> {
    pub backend: &'a dyn Backend,
    pub handlers: Vec<Arc<dyn ReplyHandler>>,
    pub max_passes: Option<usize>,
    pub sections: &'a SectionHeaders,
}

impl RegenerationLoop<'_> {
    /// Returns the number of backend calls made.
    ///
    /// Cancellation is checked before each pass and raced against the
    /// backend call; either way the loop ends with [`PipelineError::Aborted`]
    /// and no further handlers run. Whatever was written to `result` before
    /// an error stays there.
    pub async fn run(
        &self,
        request: &ReplyRequest,
        prompt: &mut PromptStruct,
        result: &mut ReplyResult,
        preview: &mut PreviewUpdater<'_>,
        signal: &CancellationToken,
    ) -> Result<usize> {
        let mut passes = 0;
        loop {
            if signal.is_cancelled() {
                return Err(PipelineError::Aborted);
            }
            passes += 1;
            debug!("generation pass {} for {}", passes, request.char_id);
            // a regenerated text starts over, so must its tool results
            preview.tool_cache_mut().clear();

            let mut options = GenerationOptions {
                base_result: &mut *result,
                preview: &mut *preview,
                signal: signal.clone(),
                sections: self.sections,
            };
            tokio::select! {
                biased;
                _ = signal.cancelled() => return Err(PipelineError::Aborted),
                outcome = self.backend.struct_call(prompt, &mut options) => {
                    outcome.map_err(PipelineError::Backend)?;
                }
            }
            if signal.is_cancelled() {
                return Err(PipelineError::Aborted);
            }

            // every handler runs every pass, even after one asked to regenerate
            let mut regenerate = false;
            for handler in &self.handlers {
                let mut ctx = ReplyContext {
                    request,
                    prompt: &mut *prompt,
                    result: &mut *result,
                    tool_cache: preview.tool_cache_mut(),
                    signal,
                };
                let requested =
                    handler
                        .handle(&mut ctx)
                        .await
                        .map_err(|source| PipelineError::Handler {
                            name: handler.name().to_string(),
                            source,
                        })?;
                if requested {
                    debug!("handler '{}' requested regeneration", handler.name());
                }
                regenerate |= requested;
            }

            if !regenerate {
                return Ok(passes);
            }
            if let Some(max) = self.max_passes
                && passes >= max
            {
                warn!(
                    "stopping regeneration for {} after {} passes",
                    request.char_id, passes
                );
                return Ok(passes);
            }
        }
    }
}
