//! Pipeline abstraction for the generation worker.
//!
//! The actual inference engine is an external collaborator: this module
//! only defines the seam it plugs into. A backend loads pipelines (with
//! progress reporting); a pipeline turns a text prefix into N candidate
//! continuations, invoking a callback at every decoding step so the worker
//! can stream partial output and abort superseded work.
//!
//! The [`scripted`] backend plays back deterministic fixtures, keeping
//! tests fast and model-free.

use crate::error::{LoadError, PipelineError};
use async_trait::async_trait;
use completer_protocol::{SamplingSettings, WorkerEnv};
use std::sync::Arc;

pub mod scripted;

pub use scripted::{ScriptedBackend, ScriptedModel};

/// Verdict returned by the per-step callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepControl {
    Continue,
    /// Unwind the generation call promptly with
    /// [`PipelineError::Interrupted`] so resources are released; the
    /// pipeline must not invoke the callback again afterwards.
    Interrupt,
}

/// Callback invoked after each decoding step with the full decoded text of
/// every candidate so far, prefix included. Index order matches the
/// candidate order of the request.
pub type StepCallback<'a> = &'a mut (dyn FnMut(&[String]) -> StepControl + Send);

/// Loading-progress events reported by a backend while it fetches and
/// initializes model files.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadProgress {
    Initiate { file: String },
    Progress { file: String, loaded: u64, total: u64 },
    Done { file: String },
}

/// Progress sink handed to [`PipelineBackend::load`]; cheap to clone into
/// the load task.
pub type ProgressCallback = Arc<dyn Fn(LoadProgress) + Send + Sync>;

/// A loaded inference pipeline bound to one model identifier.
#[async_trait]
pub trait TextGenerationPipeline: Send + Sync {
    /// Generate `sampling.generate_n` candidate continuations of `prefix`.
    ///
    /// Candidates are decoded in lockstep; after every step `on_step`
    /// receives the decoded text so far for all candidates.
    async fn generate(
        &self,
        prefix: &str,
        sampling: &SamplingSettings,
        on_step: StepCallback<'_>,
    ) -> Result<Vec<String>, PipelineError>;

    /// Release the underlying resources. Further `generate` calls fail.
    async fn dispose(&self);
}

impl std::fmt::Debug for dyn TextGenerationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn TextGenerationPipeline")
    }
}

/// Creates pipelines for model identifiers.
#[async_trait]
pub trait PipelineBackend: Send + Sync + 'static {
    async fn load(
        &self,
        model: &str,
        env: &WorkerEnv,
        on_progress: ProgressCallback,
    ) -> Result<Arc<dyn TextGenerationPipeline>, LoadError>;
}
