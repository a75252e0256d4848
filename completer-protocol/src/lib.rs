//! # Completer Protocol
//!
//! Shared types for the inline completer workspace: the message contract
//! between the completion requester and the generation worker, the shared
//! cancellation counter, and the validated settings surface.

pub mod epoch;
pub mod error;
pub mod ids;
pub mod messages;
pub mod settings;

// Re-export main types for convenience
pub use epoch::GenerationCounter;
pub use error::{CompleterError, ErrorCategory, ProtocolError};
pub use ids::CandidateId;
pub use messages::{decode_client, decode_worker, ClientMessage, WorkerMessage};
pub use settings::{
    CompleterSettings, CompletionKind, SamplingSettings, SettingsError, ValidatedConfig, WorkerEnv,
};
