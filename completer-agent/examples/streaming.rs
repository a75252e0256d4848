//! Stream inline completions from a scripted backend.
//!
//! Run with: cargo run --example streaming

use anyhow::Result;
use completer_agent::{connect, ScriptedBackend, ScriptedModel, TracingNotifier};
use completer_protocol::{CompleterSettings, CompletionKind, WorkerEnv};
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let backend = Arc::new(ScriptedBackend::new().with_model(
        "demo/starcoder-tiny",
        ScriptedModel::completing_with(["return", " a", " +", " b"])
            .with_step_delay(Duration::from_millis(150)),
    ));
    let settings = CompleterSettings {
        code_model: Some("demo/starcoder-tiny".to_string()),
        ..Default::default()
    };

    let handle = connect(
        backend,
        WorkerEnv::default(),
        settings,
        Arc::new(TracingNotifier),
    )?;

    let prefix = "def add(a, b):\n    ";
    println!("prefix: {:?}", prefix);

    let candidates = handle.requester.fetch(CompletionKind::Code, prefix).await?;
    println!("requested {} candidates", candidates.len());

    let mut stream = Box::pin(handle.requester.stream(candidates[0].id));
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        // Each chunk carries the whole continuation so far.
        print!("\r  candidate 0: {:?}", chunk.text);
        std::io::stdout().flush()?;
        if chunk.done {
            println!();
        }
    }

    // The stream holds a requester handle; release it before shutdown so
    // the action channel can close.
    drop(stream);
    handle.shutdown().await;
    Ok(())
}
