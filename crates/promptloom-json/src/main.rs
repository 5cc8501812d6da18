use std::io::{self, Read};
use std::sync::Arc;

use log::debug;
use promptloom_core::{DirectoryGenerator, Pipeline, ReplyResult};
use tokio_util::sync::CancellationToken;

mod backend;
mod input;
mod sink;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().collect();

    // --json-schema: print input schema and exit
    if args.iter().any(|a| a == "--json-schema") {
        let schema = schemars::schema_for!(input::JsonInput);
        let json = serde_json::to_string_pretty(&schema)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        println!("{}", json);
        return Ok(());
    }

    // --version
    if args.iter().any(|a| a == "--version") {
        println!("promptloom-json {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Read JSON from stdin
    let mut json_str = String::new();
    io::stdin().read_to_string(&mut json_str)?;

    let json_input: input::JsonInput = serde_json::from_str(&json_str).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Invalid JSON input: {}", e),
        )
    })?;

    let config = json_input.resolve_config().map_err(|e| {
        sink::emit_error(&e, None);
        io::Error::new(io::ErrorKind::InvalidInput, e)
    })?;

    let backend = backend::ReplayBackend::new(json_input.replies.clone(), json_input.stream);
    let mut builder = Pipeline::builder(config, Arc::new(backend));
    for (tool, info) in &json_input.tool_info {
        builder = builder.tool_info(tool, info);
    }
    if let Some(root) = &json_input.generator_root {
        builder = builder.generator(Arc::new(DirectoryGenerator::new(
            "generate-char",
            "chars",
            root,
            "main.mjs",
        )));
    }
    let pipeline = builder.build().map_err(|e| {
        sink::emit_error(&e, None);
        io::Error::new(io::ErrorKind::InvalidInput, e)
    })?;

    let request = json_input.to_request();
    debug!(
        "running reply for {} (detail level {}, max passes {:?})",
        request.char_id,
        pipeline.config().detail_level,
        pipeline.config().max_passes
    );

    let mut preview_sink = sink::JsonPreviewSink::new();
    let mut reply = ReplyResult::default();
    match pipeline
        .get_reply_into(&request, &mut reply, &mut preview_sink, CancellationToken::new())
        .await
    {
        Ok(passes) => {
            debug!("reply finished after {} pass(es)", passes);
            sink::emit_reply(&reply);
            Ok(())
        }
        Err(e) => {
            sink::emit_error(&e, Some(&reply));
            Err(io::Error::other(e))
        }
    }
}
