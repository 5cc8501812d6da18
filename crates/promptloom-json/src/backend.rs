use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use promptloom_core::{
    Backend, BackendReply, BoxError, GenerationOptions, PromptStruct, single_text_pass,
};

/// Backend that replays scripted replies, one per pass; the last repeats.
///
/// Stands in for a real model so the pipeline can be driven end to end.
pub struct ReplayBackend {
    replies: Vec<String>,
    stream: bool,
    calls: AtomicUsize,
}

impl ReplayBackend {
    pub fn new(replies: Vec<String>, stream: bool) -> Self {
        Self {
            replies,
            stream,
            calls: AtomicUsize::new(0),
        }
    }

    fn next_reply(&self) -> Result<String, BoxError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .get(n)
            .or_else(|| self.replies.last())
            .cloned()
            .ok_or_else(|| "no replies to replay".into())
    }
}

#[async_trait]
impl Backend for ReplayBackend {
    async fn call(&self, _text: &str) -> Result<BackendReply, BoxError> {
        Ok(BackendReply::text(self.next_reply()?))
    }

    async fn struct_call(
        &self,
        prompt: &PromptStruct,
        options: &mut GenerationOptions<'_, '_>,
    ) -> Result<(), BoxError> {
        if !self.stream {
            return single_text_pass(self, prompt, options).await;
        }

        let reply = self.next_reply()?;
        options.base_result.content.clear();
        for word in reply.split_inclusive(' ') {
            if options.signal.is_cancelled() {
                break;
            }
            options.push_chunk(word).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_then_repeats_last() {
        let backend = ReplayBackend::new(vec!["a".into(), "b".into()], false);
        assert_eq!(backend.call("").await.unwrap().content, "a");
        assert_eq!(backend.call("").await.unwrap().content, "b");
        assert_eq!(backend.call("").await.unwrap().content, "b");
    }

    #[tokio::test]
    async fn test_empty_script_is_an_error() {
        let backend = ReplayBackend::new(Vec::new(), false);
        assert!(backend.call("").await.is_err());
    }
}
