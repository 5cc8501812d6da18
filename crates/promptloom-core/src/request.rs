//! Reply requests and the capability traits of the objects they reference.
//!
//! A request names the responding character and carries up to five kinds of
//! optional prompt sources (world, user persona, the responding character,
//! other characters present, plugins). Every capability method has a no-op
//! default, so an object only implements what it contributes.

use crate::error::BoxError;
use crate::prompt::{ChatLogEntry, PromptPart, PromptStruct};
use crate::reply::handlers::ReplyHandler;
use crate::reply::preview::PreviewStage;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Slot id used for the world source in errors and logs.
pub const WORLD_SOURCE_ID: &str = "world";
/// Slot id used for the user persona source in errors and logs.
pub const USER_SOURCE_ID: &str = "user";
/// Slot id used for the responding character in errors and logs.
pub const CHAR_SOURCE_ID: &str = "char";

/// Something that contributes prompt text and extra chat log entries.
///
/// `get_prompt`/`tweak_prompt` are used when the object fills its own slot
/// (world, user, responding character, plugin). The `*_for_other` pair is
/// used when the object is a character present in the scene but not the one
/// replying.
#[async_trait]
pub trait PromptSource: Send + Sync {
    async fn get_prompt(&self, _request: &ReplyRequest) -> Result<PromptPart, BoxError> {
        Ok(PromptPart::default())
    }

    /// Refine `own` after every source has contributed. `prompt` is a
    /// read-only view of the whole struct as it stood when the round began;
    /// `rounds_left` counts the rounds still to run after this one.
    async fn tweak_prompt(
        &self,
        _request: &ReplyRequest,
        _prompt: &PromptStruct,
        _own: &mut PromptPart,
        _rounds_left: u32,
    ) -> Result<(), BoxError> {
        Ok(())
    }

    async fn get_prompt_for_other(&self, _request: &ReplyRequest) -> Result<PromptPart, BoxError> {
        Ok(PromptPart::default())
    }

    async fn tweak_prompt_for_other(
        &self,
        _request: &ReplyRequest,
        _prompt: &PromptStruct,
        _own: &mut PromptPart,
        _rounds_left: u32,
    ) -> Result<(), BoxError> {
        Ok(())
    }
}

/// A plugin: a prompt source that may also rewrite previews and inspect
/// finished replies.
pub trait ChatPlugin: PromptSource {
    /// Stages appended to the preview pipeline, in order.
    fn preview_stages(&self) -> Vec<Arc<dyn PreviewStage>> {
        Vec::new()
    }

    /// Handlers run after every generation pass, in order.
    fn reply_handlers(&self) -> Vec<Arc<dyn ReplyHandler>> {
        Vec::new()
    }
}

/// An id-tagged character present in the scene.
#[derive(Clone)]
pub struct SourceRecord {
    pub id: String,
    pub source: Arc<dyn PromptSource>,
}

/// An id-tagged plugin.
#[derive(Clone)]
pub struct PluginRecord {
    pub id: String,
    pub plugin: Arc<dyn ChatPlugin>,
}

/// What the consuming client can render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct OutputCapabilities {
    pub html: bool,
    pub markdown: bool,
    /// The client resolves i18n keys itself.
    pub i18n_keys: bool,
}

/// Everything `get_reply` needs for one reply.
pub struct ReplyRequest {
    pub char_id: String,
    pub charname: String,
    pub user_charname: String,
    pub reply_to_charname: String,
    pub chat_log: Vec<ChatLogEntry>,
    pub world: Option<Arc<dyn PromptSource>>,
    pub user: Option<Arc<dyn PromptSource>>,
    pub char: Option<Arc<dyn PromptSource>>,
    pub other_chars: Vec<SourceRecord>,
    pub plugins: Vec<PluginRecord>,
    pub capabilities: OutputCapabilities,
}

impl ReplyRequest {
    /// A request with no sources, replying to the user.
    pub fn new(
        char_id: impl Into<String>,
        charname: impl Into<String>,
        user_charname: impl Into<String>,
    ) -> Self {
        let user_charname = user_charname.into();
        Self {
            char_id: char_id.into(),
            charname: charname.into(),
            reply_to_charname: user_charname.clone(),
            user_charname,
            chat_log: Vec::new(),
            world: None,
            user: None,
            char: None,
            other_chars: Vec::new(),
            plugins: Vec::new(),
            capabilities: OutputCapabilities::default(),
        }
    }

    pub fn with_chat_log(mut self, chat_log: Vec<ChatLogEntry>) -> Self {
        self.chat_log = chat_log;
        self
    }

    pub fn with_reply_to(mut self, name: impl Into<String>) -> Self {
        self.reply_to_charname = name.into();
        self
    }

    pub fn with_world(mut self, source: Arc<dyn PromptSource>) -> Self {
        self.world = Some(source);
        self
    }

    pub fn with_user(mut self, source: Arc<dyn PromptSource>) -> Self {
        self.user = Some(source);
        self
    }

    pub fn with_char(mut self, source: Arc<dyn PromptSource>) -> Self {
        self.char = Some(source);
        self
    }

    pub fn with_other_char(mut self, id: impl Into<String>, source: Arc<dyn PromptSource>) -> Self {
        self.other_chars.push(SourceRecord {
            id: id.into(),
            source,
        });
        self
    }

    pub fn with_plugin(mut self, id: impl Into<String>, plugin: Arc<dyn ChatPlugin>) -> Self {
        self.plugins.push(PluginRecord {
            id: id.into(),
            plugin,
        });
        self
    }

    pub fn with_capabilities(mut self, capabilities: OutputCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl fmt::Debug for ReplyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyRequest")
            .field("char_id", &self.char_id)
            .field("charname", &self.charname)
            .field("user_charname", &self.user_charname)
            .field("reply_to_charname", &self.reply_to_charname)
            .field("chat_log_len", &self.chat_log.len())
            .field("world", &self.world.is_some())
            .field("user", &self.user.is_some())
            .field("char", &self.char.is_some())
            .field(
                "other_chars",
                &self.other_chars.iter().map(|r| &r.id).collect::<Vec<_>>(),
            )
            .field(
                "plugins",
                &self.plugins.iter().map(|r| &r.id).collect::<Vec<_>>(),
            )
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
