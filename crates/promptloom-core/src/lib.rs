//! promptloom-core: prompt composition and streaming-reply pipeline for
//! character chat.
//!
//! A reply is produced in three steps:
//!
//! 1. [`PromptComposer`] gathers [`PromptPart`]s from the request's prompt
//!    sources concurrently and runs the refinement rounds.
//! 2. [`merge_chat_log`] and [`to_system_text`] flatten the composed
//!    [`PromptStruct`] into what the model sees.
//! 3. The regeneration loop calls the [`Backend`], streams previews as
//!    [`DiffSlice`] batches, and runs the [`ReplyHandler`]s until none asks
//!    for another pass.
//!
//! Most embedders only need the [`Pipeline`] facade.

pub mod config;
pub mod error;
mod pipeline;
pub mod prompt;
pub mod reply;
pub mod request;
pub mod safe_io;

pub use config::{PipelineConfig, PlaceholderConfig, SectionHeaders, ToolBlockConfig};
pub use error::{BoxError, PipelineError, Result};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use prompt::{
    ChatLogEntry, Extension, FileRef, PromptComposer, PromptPart, PromptStruct, Role, TextSegment,
    merge_chat_log, to_single_text, to_system_text,
};
pub use reply::{
    Backend, BackendReply, CollectingPreviewSink, DiffSlice, DirectoryGenerator, GenerationOptions,
    Generator, Marker, PreviewSink, PreviewStage, ReplyContext, ReplyHandler, ReplyResult,
    ToolExec, single_text_pass,
};
pub use request::{ChatPlugin, OutputCapabilities, PromptSource, ReplyRequest};
