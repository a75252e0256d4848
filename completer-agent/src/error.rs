//! Error types for the completer agent.

use completer_protocol::{CompleterError, CompletionKind, ErrorCategory};
use thiserror::Error;

/// Errors raised while loading a pipeline.
///
/// Clone is required: the registry hands the same load future to every
/// concurrent caller, so a failure is observed by all of them.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoadError {
    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Network error while fetching model files: {0}")]
    Network(String),

    #[error("Model loading failed: {0}")]
    LoadingFailed(String),

    #[error("Model was disposed")]
    Disposed,
}

impl CompleterError for LoadError {
    fn category(&self) -> ErrorCategory {
        match self {
            LoadError::NotFound(_) => ErrorCategory::User,
            LoadError::Network(_) => ErrorCategory::External,
            LoadError::LoadingFailed(_) => ErrorCategory::System,
            LoadError::Disposed => ErrorCategory::User,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            LoadError::NotFound(_) => "LOAD_NOT_FOUND",
            LoadError::Network(_) => "LOAD_NETWORK",
            LoadError::LoadingFailed(_) => "LOAD_FAILED",
            LoadError::Disposed => "LOAD_DISPOSED",
        }
    }
}

/// Errors raised by a pipeline while generating.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// The step callback asked the pipeline to unwind. Never surfaced to
    /// the end user as an error.
    #[error("Generation interrupted")]
    Interrupted,

    #[error("Generation failed: {0}")]
    Failed(String),
}

impl CompleterError for PipelineError {
    fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::Interrupted => ErrorCategory::User,
            PipelineError::Failed(_) => ErrorCategory::System,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            PipelineError::Interrupted => "PIPELINE_INTERRUPTED",
            PipelineError::Failed(_) => "PIPELINE_FAILED",
        }
    }
}

/// Errors returned by [`CompletionRequester::fetch`](crate::CompletionRequester::fetch).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("No model configured for {0:?} completions")]
    SlotDisabled(CompletionKind),

    /// A newer fetch arrived while this one was debouncing or waiting on
    /// readiness, or the slot was reconfigured away; expected steady
    /// state while the user types.
    #[error("Fetch superseded by a newer request")]
    Superseded,

    #[error("Worker channel closed")]
    WorkerGone,

    #[error("Invalid settings: {0}")]
    Settings(#[from] completer_protocol::SettingsError),
}

impl CompleterError for FetchError {
    fn category(&self) -> ErrorCategory {
        match self {
            FetchError::SlotDisabled(_) => ErrorCategory::User,
            FetchError::Superseded => ErrorCategory::User,
            FetchError::WorkerGone => ErrorCategory::System,
            FetchError::Settings(_) => ErrorCategory::User,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            FetchError::SlotDisabled(_) => "FETCH_SLOT_DISABLED",
            FetchError::Superseded => "FETCH_SUPERSEDED",
            FetchError::WorkerGone => "FETCH_WORKER_GONE",
            FetchError::Settings(_) => "FETCH_SETTINGS",
        }
    }
}

/// Terminal failures observed by a `stream(id)` consumer.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StreamError {
    /// The request was superseded and its generation abandoned.
    #[error("Candidate interrupted: {0}")]
    Interrupted(String),

    /// The worker reported a generation exception for this candidate.
    #[error("Generation failed: {0}")]
    Failed(String),

    /// No pending stream for this id: never fetched, already consumed, or
    /// cleaned up after a terminal message was drained.
    #[error("Unknown candidate: {0}")]
    UnknownCandidate(String),
}

impl CompleterError for StreamError {
    fn category(&self) -> ErrorCategory {
        match self {
            StreamError::Interrupted(_) => ErrorCategory::User,
            StreamError::Failed(_) => ErrorCategory::System,
            StreamError::UnknownCandidate(_) => ErrorCategory::Internal,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            StreamError::Interrupted(_) => "STREAM_INTERRUPTED",
            StreamError::Failed(_) => "STREAM_FAILED",
            StreamError::UnknownCandidate(_) => "STREAM_UNKNOWN_CANDIDATE",
        }
    }
}
