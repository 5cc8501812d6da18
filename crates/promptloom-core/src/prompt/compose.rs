//! Prompt composition.
//!
//! Every present source contributes concurrently, then `detail_level`
//! refinement rounds run strictly one after another. Within a round all
//! tweaks run concurrently against a snapshot of the struct taken when the
//! round began, so no source can observe a sibling's edit from the same
//! round.

use super::types::{PromptPart, PromptStruct};
use crate::error::{BoxError, PipelineError, Result};
use crate::request::{CHAR_SOURCE_ID, ReplyRequest, USER_SOURCE_ID, WORLD_SOURCE_ID};
use futures_util::future::{BoxFuture, try_join_all};
use indexmap::IndexMap;
use log::{debug, warn};
use std::future::Future;

/// Builds a [`PromptStruct`] from a request's prompt sources.
#[derive(Debug, Clone, Copy)]
pub struct PromptComposer {
    pub detail_level: u32,
    pub isolate_provider_errors: bool,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self {
            detail_level: crate::config::DEFAULT_DETAIL_LEVEL,
            isolate_provider_errors: false,
        }
    }
}

impl PromptComposer {
    pub fn new(detail_level: u32, isolate_provider_errors: bool) -> Self {
        Self {
            detail_level,
            isolate_provider_errors,
        }
    }

    /// Compose and refine. Absent sources yield empty parts.
    pub async fn compose(&self, request: &ReplyRequest) -> Result<PromptStruct> {
        let world = async {
            match &request.world {
                Some(source) => {
                    self.contribution(WORLD_SOURCE_ID, source.get_prompt(request))
                        .await
                }
                None => Ok(PromptPart::default()),
            }
        };
        let user = async {
            match &request.user {
                Some(source) => self.contribution(USER_SOURCE_ID, source.get_prompt(request)).await,
                None => Ok(PromptPart::default()),
            }
        };
        let char = async {
            match &request.char {
                Some(source) => self.contribution(CHAR_SOURCE_ID, source.get_prompt(request)).await,
                None => Ok(PromptPart::default()),
            }
        };
        let other_chars = try_join_all(request.other_chars.iter().map(|record| async move {
            let part = self
                .contribution(&record.id, record.source.get_prompt_for_other(request))
                .await?;
            Ok::<_, PipelineError>((record.id.clone(), part))
        }));
        let plugins = try_join_all(request.plugins.iter().map(|record| async move {
            let part = self
                .contribution(&record.id, record.plugin.get_prompt(request))
                .await?;
            Ok::<_, PipelineError>((record.id.clone(), part))
        }));

        let (world_prompt, user_prompt, char_prompt, other_chars, plugins) =
            tokio::try_join!(world, user, char, other_chars, plugins)?;

        let mut prompt = PromptStruct {
            char_id: request.char_id.clone(),
            charname: request.charname.clone(),
            user_charname: request.user_charname.clone(),
            reply_to_charname: request.reply_to_charname.clone(),
            char_prompt,
            user_prompt,
            world_prompt,
            other_chars_prompt: other_chars.into_iter().collect::<IndexMap<_, _>>(),
            plugin_prompts: plugins.into_iter().collect::<IndexMap<_, _>>(),
            chat_log: request.chat_log.clone(),
        };

        let mut rounds_left = self.detail_level;
        while rounds_left > 0 {
            rounds_left -= 1;
            debug!(
                "prompt refinement round {}/{} for {}",
                self.detail_level - rounds_left,
                self.detail_level,
                request.char_id
            );
            self.refine(request, &mut prompt, rounds_left).await?;
        }

        Ok(prompt)
    }

    /// One refinement round. Each tweak edits a working copy of its own part
    /// which is committed only when the tweak succeeds.
    async fn refine(
        &self,
        request: &ReplyRequest,
        prompt: &mut PromptStruct,
        rounds_left: u32,
    ) -> Result<()> {
        let snapshot = prompt.clone();
        let snapshot = &snapshot;
        let PromptStruct {
            char_prompt,
            user_prompt,
            world_prompt,
            other_chars_prompt,
            plugin_prompts,
            ..
        } = prompt;

        let mut tweaks: Vec<BoxFuture<'_, Result<()>>> = Vec::new();

        if let Some(source) = &request.world {
            tweaks.push(Box::pin(async move {
                let mut working = world_prompt.clone();
                let outcome = source
                    .tweak_prompt(request, snapshot, &mut working, rounds_left)
                    .await;
                self.commit(WORLD_SOURCE_ID, outcome, world_prompt, working)
            }));
        }
        if let Some(source) = &request.user {
            tweaks.push(Box::pin(async move {
                let mut working = user_prompt.clone();
                let outcome = source
                    .tweak_prompt(request, snapshot, &mut working, rounds_left)
                    .await;
                self.commit(USER_SOURCE_ID, outcome, user_prompt, working)
            }));
        }
        if let Some(source) = &request.char {
            tweaks.push(Box::pin(async move {
                let mut working = char_prompt.clone();
                let outcome = source
                    .tweak_prompt(request, snapshot, &mut working, rounds_left)
                    .await;
                self.commit(CHAR_SOURCE_ID, outcome, char_prompt, working)
            }));
        }
        for (id, part) in other_chars_prompt.iter_mut() {
            let Some(record) = request.other_chars.iter().find(|r| &r.id == id) else {
                continue;
            };
            tweaks.push(Box::pin(async move {
                let mut working = part.clone();
                let outcome = record
                    .source
                    .tweak_prompt_for_other(request, snapshot, &mut working, rounds_left)
                    .await;
                self.commit(id, outcome, part, working)
            }));
        }
        for (id, part) in plugin_prompts.iter_mut() {
            let Some(record) = request.plugins.iter().find(|r| &r.id == id) else {
                continue;
            };
            tweaks.push(Box::pin(async move {
                let mut working = part.clone();
                let outcome = record
                    .plugin
                    .tweak_prompt(request, snapshot, &mut working, rounds_left)
                    .await;
                self.commit(id, outcome, part, working)
            }));
        }

        try_join_all(tweaks).await?;
        Ok(())
    }

    async fn contribution<F>(&self, id: &str, pending: F) -> Result<PromptPart>
    where
        F: Future<Output = std::result::Result<PromptPart, BoxError>>,
    {
        match pending.await {
            Ok(part) => Ok(part),
            Err(source) if self.isolate_provider_errors => {
                warn!("prompt source '{}' failed, contributing nothing: {}", id, source);
                Ok(PromptPart::default())
            }
            Err(source) => Err(PipelineError::Provider {
                id: id.to_string(),
                source,
            }),
        }
    }

    fn commit(
        &self,
        id: &str,
        outcome: std::result::Result<(), BoxError>,
        part: &mut PromptPart,
        working: PromptPart,
    ) -> Result<()> {
        match outcome {
            Ok(()) => {
                *part = working;
                Ok(())
            }
            Err(source) if self.isolate_provider_errors => {
                warn!("prompt source '{}' failed to refine, keeping its part: {}", id, source);
                Ok(())
            }
            Err(source) => Err(PipelineError::Provider {
                id: id.to_string(),
                source,
            }),
        }
    }
}
