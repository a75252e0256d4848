//! Streaming, cancellable inline text completion.
//!
//! Two cooperating halves mirror a foreground/background split: the
//! [`CompletionRequester`] accepts fetches and exposes lazy per-candidate
//! streams, while the generator task drives an inference pipeline and
//! posts incremental output back. The only state they share by reference
//! is a single atomic generation counter; everything else crosses an
//! ordered message channel.
//!
//! ```no_run
//! use std::sync::Arc;
//! use completer_agent::{connect, ScriptedBackend, ScriptedModel, TracingNotifier};
//! use completer_protocol::{CompleterSettings, CompletionKind, WorkerEnv};
//! use futures::StreamExt;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(
//!     ScriptedBackend::new().with_model("demo", ScriptedModel::completing_with(["print()"])),
//! );
//! let settings = CompleterSettings {
//!     code_model: Some("demo".to_string()),
//!     ..Default::default()
//! };
//! let handle = connect(
//!     backend,
//!     WorkerEnv::default(),
//!     settings,
//!     Arc::new(TracingNotifier),
//! )?;
//!
//! let candidates = handle
//!     .requester
//!     .fetch(CompletionKind::Code, "def main():\n    ")
//!     .await?;
//! let mut stream = Box::pin(handle.requester.stream(candidates[0].id));
//! while let Some(chunk) = stream.next().await {
//!     println!("{:?}", chunk?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod generator;
pub mod notifications;
pub mod pipeline;
pub mod registry;
pub mod requester;

pub use error::{FetchError, LoadError, PipelineError, StreamError};
pub use generator::{spawn_generator, GeneratorHandle};
pub use notifications::{
    format_file_size, CompletionNotifier, LoadingNotification, TracingNotifier,
};
pub use pipeline::{
    LoadProgress, PipelineBackend, ProgressCallback, ScriptedBackend, ScriptedModel, StepCallback,
    StepControl, TextGenerationPipeline,
};
pub use registry::{PipelineLease, PipelineRegistry};
pub use requester::{CandidatePlaceholder, CompletionChunk, CompletionRequester, WeakRequester};

use completer_protocol::{CompleterSettings, SettingsError, WorkerEnv};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A wired-up requester/generator pair.
///
/// Dropping the handle closes the action channel; the generator task then
/// drains and exits, followed by the dispatch task.
pub struct CompleterHandle {
    pub requester: CompletionRequester,
    worker: JoinHandle<()>,
    dispatch: JoinHandle<()>,
}

impl CompleterHandle {
    /// Tear down both background tasks and wait for them to finish.
    ///
    /// Outstanding `stream` instances and requester clones each hold the
    /// action channel open; drop them first or this will wait for them.
    pub async fn shutdown(self) {
        let CompleterHandle {
            requester,
            worker,
            dispatch,
        } = self;
        drop(requester);
        let _ = worker.await;
        let _ = dispatch.await;
    }
}

/// Spawn a generator over `backend` and wire a requester to it, including
/// the startup handshake and a dispatch task pumping worker messages into
/// the requester.
pub fn connect(
    backend: Arc<dyn PipelineBackend>,
    env: WorkerEnv,
    settings: CompleterSettings,
    notifier: Arc<dyn CompletionNotifier>,
) -> Result<CompleterHandle, SettingsError> {
    let GeneratorHandle {
        incoming,
        mut outgoing,
        task: worker,
    } = spawn_generator(backend);

    let requester = CompletionRequester::new(incoming, env, settings, notifier)?;
    // The dispatch loop only holds a weak handle; once the caller drops
    // the requester, the action channel closes, the worker drains and
    // exits, and this loop ends with it.
    let dispatch = {
        let weak = requester.downgrade();
        tokio::spawn(async move {
            while let Some(message) = outgoing.recv().await {
                let Some(requester) = weak.upgrade() else {
                    break;
                };
                requester.on_message(message);
            }
        })
    };

    Ok(CompleterHandle {
        requester,
        worker,
        dispatch,
    })
}
