//! Reply generation: backend calls, previews, tool interception and reply
//! handlers.

pub mod diff;
pub mod engine;
pub mod generator;
pub mod handlers;
pub mod preview;
pub mod result;
pub mod tool_use;

pub use diff::{Appended, DiffSlice, apply_slices, reply_diff, text_diff};
pub use engine::{Backend, BackendReply, GenerationOptions, RegenerationLoop, single_text_pass};
pub use generator::{DirectoryGenerator, Generator, GeneratorToolHandler};
pub use handlers::{InlineToolReplyHandler, ReplyContext, ReplyHandler, ToolInfoHandler};
pub use preview::{CollectingPreviewSink, PreviewContext, PreviewSink, PreviewStage, PreviewUpdater};
pub use result::{ReplyPreview, ReplyResult};
pub use tool_use::{InlineToolExecutor, Marker, ToolCache, ToolExec, ToolMatcher, ToolUseHider};
