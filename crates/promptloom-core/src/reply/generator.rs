//! Generator tools: fenced blocks that ask for a new artifact to be
//! created, e.g. ```` ```generate-char luna ```` followed by its source.

use super::handlers::{ReplyContext, ReplyHandler};
use crate::error::{BoxError, PipelineError, Result};
use crate::prompt::{ChatLogEntry, Role};
use crate::safe_io::{atomic_write, atomic_write_json};
use async_trait::async_trait;
use log::{debug, warn};
use regex::Regex;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Creates an artifact from a generator block.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Fence tag that triggers this generator.
    fn tag(&self) -> &str;

    /// Create `name` from `body`. The returned text is shown to the model.
    async fn generate(&self, name: &str, body: &str) -> Result<String, BoxError>;
}

#[derive(Serialize)]
struct Manifest<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    dirname: &'a str,
}

/// Writes each generated artifact into its own directory under `root`:
/// the body as `entry_file`, plus a `manifest.json`.
pub struct DirectoryGenerator {
    tag: String,
    kind: String,
    root: PathBuf,
    entry_file: String,
}

impl DirectoryGenerator {
    pub fn new(
        tag: impl Into<String>,
        kind: impl Into<String>,
        root: impl Into<PathBuf>,
        entry_file: impl Into<String>,
    ) -> Self {
        Self {
            tag: tag.into(),
            kind: kind.into(),
            root: root.into(),
            entry_file: entry_file.into(),
        }
    }
}

/// A single normal path component: no separators, no `.`/`..`.
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[async_trait]
impl Generator for DirectoryGenerator {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn generate(&self, name: &str, body: &str) -> Result<String, BoxError> {
        if !is_plain_name(name) {
            return Err(format!("invalid name '{}'", name).into());
        }
        let dir = self.root.join(name);
        let entry = dir.join(&self.entry_file);
        if entry.exists() {
            return Err(format!("cannot overwrite existing {} '{}'", self.kind, name).into());
        }

        atomic_write(&entry, body.as_bytes())?;
        atomic_write_json(
            &dir.join("manifest.json"),
            &Manifest {
                kind: &self.kind,
                dirname: name,
            },
        )?;
        debug!("generated {} at {}", self.kind, dir.display());
        Ok(format!("Generated {} '{}'. Tell the user!", self.kind, name))
    }
}

/// Runs generators for the blocks they recognise.
///
/// The block is logged as the character's own message, then the outcome as
/// a system message. A pass with any generator block requests regeneration,
/// whether or not generation succeeded.
pub struct GeneratorToolHandler {
    generators: Vec<(Regex, Arc<dyn Generator>)>,
}

impl GeneratorToolHandler {
    pub fn new() -> Self {
        Self {
            generators: Vec::new(),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Result<Self> {
        let tag = generator.tag().to_string();
        let pattern = Regex::new(&format!(
            r"```{}(?<name>[^\n]+)\n(?<body>[\s\S]*)```",
            regex::escape(&tag)
        ))
        .map_err(|source| PipelineError::Pattern { id: tag, source })?;
        self.generators.push((pattern, generator));
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}

impl Default for GeneratorToolHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplyHandler for GeneratorToolHandler {
    fn name(&self) -> &str {
        "generator-tools"
    }

    async fn handle(&self, ctx: &mut ReplyContext<'_>) -> Result<bool, BoxError> {
        let mut regenerate = false;
        for (pattern, generator) in &self.generators {
            let Some((name, body)) = pattern.captures(&ctx.result.content).map(|caps| {
                (caps["name"].trim().to_string(), caps["body"].to_string())
            }) else {
                continue;
            };

            ctx.add_long_time_log(ChatLogEntry::new(
                ctx.charname().to_string(),
                Role::Char,
                format!("```{} {}\n{}\n```", generator.tag(), name, body),
            ));
            let outcome = match generator.generate(&name, &body).await {
                Ok(message) => message,
                Err(e) => {
                    warn!("generator '{}' failed for '{}': {}", generator.tag(), name, e);
                    format!("Generation failed!\nReason: {}", e)
                }
            };
            ctx.add_long_time_log(ChatLogEntry::new("system", Role::System, outcome));
            regenerate = true;
        }
        Ok(regenerate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptStruct;
    use crate::reply::result::ReplyResult;
    use crate::reply::tool_use::ToolCache;
    use crate::request::ReplyRequest;
    use std::fs;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    async fn run(handler: &GeneratorToolHandler, content: &str) -> (bool, ReplyResult) {
        let request = ReplyRequest::new("zl31", "ZL-31", "Bob");
        let mut prompt = PromptStruct::default();
        let mut result = ReplyResult {
            content: content.to_string(),
            ..ReplyResult::default()
        };
        let mut cache = ToolCache::default();
        let signal = CancellationToken::new();
        let mut ctx = ReplyContext {
            request: &request,
            prompt: &mut prompt,
            result: &mut result,
            tool_cache: &mut cache,
            signal: &signal,
        };
        let regen = handler.handle(&mut ctx).await.unwrap();
        (regen, result)
    }

    fn handler(root: &Path) -> GeneratorToolHandler {
        GeneratorToolHandler::new()
            .with_generator(Arc::new(DirectoryGenerator::new(
                "generate-char",
                "chars",
                root,
                "main.mjs",
            )))
            .unwrap()
    }

    #[tokio::test]
    async fn test_generates_directory_with_manifest() {
        let dir = TempDir::new().unwrap();
        let (regen, result) = run(
            &handler(dir.path()),
            "Sure!\n```generate-char luna\nexport default {}\n```",
        )
        .await;

        assert!(regen);
        let code = fs::read_to_string(dir.path().join("luna/main.mjs")).unwrap();
        assert_eq!(code, "export default {}\n");
        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("luna/manifest.json")).unwrap())
                .unwrap();
        assert_eq!(manifest, serde_json::json!({"type": "chars", "dirname": "luna"}));

        let log = &result.log_context_before;
        assert_eq!(log[0].role, Role::Char);
        assert!(log[0].content.starts_with("```generate-char luna\n"));
        assert_eq!(log[1].role, Role::System);
        assert!(log[1].content.contains("luna"));
    }

    #[tokio::test]
    async fn test_existing_entry_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("luna")).unwrap();
        fs::write(dir.path().join("luna/main.mjs"), "original").unwrap();

        let (regen, result) = run(
            &handler(dir.path()),
            "```generate-char luna\nreplacement\n```",
        )
        .await;

        assert!(regen);
        assert_eq!(
            fs::read_to_string(dir.path().join("luna/main.mjs")).unwrap(),
            "original"
        );
        assert!(result.log_context_before[1].content.starts_with("Generation failed!"));
    }

    #[tokio::test]
    async fn test_path_escaping_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        let (regen, result) = run(&handler(dir.path()), "```generate-char ../evil\nx\n```").await;
        assert!(regen);
        assert!(result.log_context_before[1].content.contains("invalid name"));
        assert!(!dir.path().parent().unwrap().join("evil").exists());
    }

    #[tokio::test]
    async fn test_no_block_no_regeneration() {
        let dir = TempDir::new().unwrap();
        let (regen, result) = run(&handler(dir.path()), "no tools today").await;
        assert!(!regen);
        assert!(result.log_context_before.is_empty());
    }

    #[test]
    fn test_plain_names() {
        assert!(is_plain_name("luna"));
        assert!(!is_plain_name(""));
        assert!(!is_plain_name(".."));
        assert!(!is_plain_name("a/b"));
        assert!(!is_plain_name("/abs"));
    }
}
