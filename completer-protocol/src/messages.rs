//! The message contract between the completion requester and the worker.
//!
//! Both directions are tagged unions: client messages carry an `action`
//! discriminant, worker messages a `status` discriminant. Decoding an
//! unknown discriminant is a [`ProtocolError`], not a silent drop.

use crate::epoch::GenerationCounter;
use crate::error::ProtocolError;
use crate::ids::CandidateId;
use crate::settings::{SamplingSettings, WorkerEnv};
use serde::{Deserialize, Serialize};

/// Messages sent from the requester to the generation worker.
///
/// Submission order is preserved; the worker processes one message at a
/// time, though generation work it spawns interleaves at step boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Process-wide environment options, applied before the first load.
    #[serde(rename_all = "camelCase")]
    Configure {
        #[serde(flatten)]
        env: WorkerEnv,
    },

    /// Bind the shared cancellation counter. Must be processed before any
    /// `generate` is accepted. The counter is in-process shared memory and
    /// never crosses a serialization boundary.
    #[serde(rename_all = "camelCase")]
    InitializeBuffer {
        #[serde(skip)]
        buffer: GenerationCounter,
    },

    /// Eagerly pre-warm a model.
    #[serde(rename_all = "camelCase")]
    InitializeModel { model: String },

    /// Eagerly release a model.
    #[serde(rename_all = "camelCase")]
    DisposeModel { model: String },

    /// Run one generation batch.
    #[serde(rename_all = "camelCase")]
    Generate {
        model: String,
        /// One id per requested candidate, ordered; length equals
        /// `sampling.generate_n`.
        id_tokens: Vec<CandidateId>,
        /// The (already truncated) source prefix.
        text: String,
        #[serde(flatten)]
        sampling: SamplingSettings,
        /// Snapshot of the cancellation counter at submission time.
        epoch: u64,
    },
}

/// Messages posted by the generation worker.
///
/// Per candidate id the order is: zero or more `update`, then exactly one
/// of `complete` / `interrupted`. Nothing follows a terminal message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum WorkerMessage {
    /// Handshake posted once when the worker task starts.
    WorkerStarted,

    /// A model file download has begun.
    #[serde(rename_all = "camelCase")]
    Initiate { model: String, file: String },

    /// Download progress for one model file.
    #[serde(rename_all = "camelCase")]
    Progress {
        model: String,
        file: String,
        loaded: u64,
        total: u64,
        progress: f32,
    },

    /// One model file finished downloading.
    #[serde(rename_all = "camelCase")]
    Done { model: String, file: String },

    /// The model's pipeline is loaded and can generate.
    #[serde(rename_all = "camelCase")]
    Ready { model: String },

    /// Incremental output for one candidate: the whole continuation so far
    /// with the prefix stripped. Each update replaces the previous one.
    #[serde(rename_all = "camelCase")]
    Update { id_token: CandidateId, output: String },

    /// Terminal output for one candidate: the full continuation,
    /// prefix-stripped. Authoritative over any earlier update.
    #[serde(rename_all = "camelCase")]
    Complete { id_token: CandidateId, output: String },

    /// The batch was superseded mid-run; terminal for every named candidate.
    #[serde(rename_all = "camelCase")]
    Interrupted {
        id_tokens: Vec<CandidateId>,
        error: String,
    },

    /// The batch failed for any other reason; terminal for every named
    /// candidate, never retried.
    #[serde(rename_all = "camelCase")]
    Exception {
        id_tokens: Vec<CandidateId>,
        error: String,
    },
}

const CLIENT_ACTIONS: &[&str] = &[
    "configure",
    "initializeBuffer",
    "initializeModel",
    "disposeModel",
    "generate",
];

const WORKER_STATUSES: &[&str] = &[
    "worker-started",
    "initiate",
    "progress",
    "done",
    "ready",
    "update",
    "complete",
    "interrupted",
    "exception",
];

fn discriminant(value: &serde_json::Value, key: &str) -> Result<String, ProtocolError> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::Malformed(format!("missing `{}` discriminant", key)))
}

/// Decode a client message from a dynamic payload.
pub fn decode_client(value: serde_json::Value) -> Result<ClientMessage, ProtocolError> {
    let action = discriminant(&value, "action")?;
    if !CLIENT_ACTIONS.contains(&action.as_str()) {
        return Err(ProtocolError::UnknownAction(action));
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Decode a worker message from a dynamic payload.
pub fn decode_worker(value: serde_json::Value) -> Result<WorkerMessage, ProtocolError> {
    let status = discriminant(&value, "status")?;
    if !WORKER_STATUSES.contains(&status.as_str()) {
        return Err(ProtocolError::UnknownStatus(status));
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
