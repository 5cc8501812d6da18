use promptloom_core::{DiffSlice, PipelineError, PreviewSink, ReplyResult};
use std::io::{self, Write};

/// JSONL preview sink for promptloom-json.
///
/// One `preview` record per slice batch, slices serialized verbatim, so a
/// consumer can replay them exactly as a transport would.
pub struct JsonPreviewSink;

impl JsonPreviewSink {
    pub fn new() -> Self {
        Self
    }
}

impl PreviewSink for JsonPreviewSink {
    fn emit(&mut self, slices: &[DiffSlice]) -> io::Result<()> {
        let json = serde_json::json!({"type": "preview", "slices": slices});
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", json)?;
        stdout.flush()
    }
}

/// Map a pipeline error to a stable coarse-grained error code string.
pub fn error_code(e: &PipelineError) -> &'static str {
    match e {
        PipelineError::Provider { .. } => "provider_error",
        PipelineError::Backend(_) => "backend_error",
        PipelineError::Handler { .. } => "handler_error",
        PipelineError::Aborted => "aborted",
        PipelineError::Pattern { .. } => "invalid_pattern",
        PipelineError::Config(_) | PipelineError::Toml(_) => "invalid_config",
        PipelineError::Json(_) => "invalid_data",
        PipelineError::Io(_) => "io_error",
    }
}

pub fn emit_reply(reply: &ReplyResult) {
    println!("{}", serde_json::json!({"type": "reply", "reply": reply}));
}

/// Error record; `partial` is whatever the reply had accumulated.
pub fn emit_error(e: &PipelineError, partial: Option<&ReplyResult>) {
    println!(
        "{}",
        serde_json::json!({
            "type": "error",
            "code": error_code(e),
            "message": e.to_string(),
            "partial": partial,
        })
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(error_code(&PipelineError::Aborted), "aborted");
        assert_eq!(
            error_code(&PipelineError::Config("x".to_string())),
            "invalid_config"
        );
        assert_eq!(
            error_code(&PipelineError::Backend("down".into())),
            "backend_error"
        );
    }
}
