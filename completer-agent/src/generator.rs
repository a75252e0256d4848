//! Worker-side coordinator.
//!
//! The generator runs as a background task consuming [`ClientMessage`]s in
//! submission order and posting [`WorkerMessage`]s back. Message handling
//! never blocks the queue: loads, disposals, and generation batches run as
//! spawned tasks, interleaving with dispatch at step boundaries.
//!
//! Failures never cross the channel as panics or errors; every worker-side
//! failure becomes a posted message (or a log line when the contract says
//! to emit nothing).

use crate::error::PipelineError;
use crate::pipeline::{LoadProgress, PipelineBackend, ProgressCallback, StepControl};
use crate::registry::PipelineRegistry;
use completer_protocol::{
    CandidateId, ClientMessage, GenerationCounter, SamplingSettings, WorkerMessage,
};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handle to a running generator task.
pub struct GeneratorHandle {
    /// Action messages consumed by the worker, in submission order.
    pub incoming: UnboundedSender<ClientMessage>,
    /// Status messages posted by the worker.
    pub outgoing: UnboundedReceiver<WorkerMessage>,
    pub task: JoinHandle<()>,
}

/// Spawn the generator task over `backend`.
///
/// The first posted message is always `worker-started`; the task exits
/// when the incoming channel closes.
pub fn spawn_generator(backend: Arc<dyn PipelineBackend>) -> GeneratorHandle {
    let (incoming_tx, mut incoming_rx) = mpsc::unbounded_channel();
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        let mut generator = Generator {
            registry: Arc::new(PipelineRegistry::new(backend)),
            outgoing: outgoing_tx,
            counter: None,
        };
        generator.post(WorkerMessage::WorkerStarted);
        info!("generation worker started");

        while let Some(message) = incoming_rx.recv().await {
            generator.handle_message(message);
        }
        debug!("generation worker shutting down");
    });

    GeneratorHandle {
        incoming: incoming_tx,
        outgoing: outgoing_rx,
        task,
    }
}

struct Generator {
    registry: Arc<PipelineRegistry>,
    outgoing: UnboundedSender<WorkerMessage>,
    counter: Option<GenerationCounter>,
}

impl Generator {
    fn post(&self, message: WorkerMessage) {
        if self.outgoing.send(message).is_err() {
            warn!("requester side is gone, dropping worker message");
        }
    }

    fn handle_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Configure { env } => {
                debug!("applying worker environment options");
                self.registry.set_env(env);
            }
            ClientMessage::InitializeBuffer { buffer } => {
                debug!("cancellation counter bound at epoch {}", buffer.read());
                self.counter = Some(buffer);
            }
            ClientMessage::InitializeModel { model } => {
                let registry = self.registry.clone();
                let outgoing = self.outgoing.clone();
                tokio::spawn(async move {
                    let progress = progress_relay(model.clone(), outgoing.clone());
                    match registry.get_or_create(&model, progress).await {
                        Ok(lease) if lease.freshly_loaded => {
                            let _ = outgoing.send(WorkerMessage::Ready { model });
                        }
                        Ok(_) => debug!("initializeModel for {}: already resident", model),
                        // The requester's readiness gate for this model stays
                        // closed; no retry until it is reconfigured.
                        Err(e) => error!("initializeModel for {} failed: {}", model, e),
                    }
                });
            }
            ClientMessage::DisposeModel { model } => {
                let registry = self.registry.clone();
                tokio::spawn(async move {
                    registry.dispose(&model).await;
                });
            }
            ClientMessage::Generate {
                model,
                id_tokens,
                text,
                sampling,
                epoch,
            } => {
                // Precondition: generation requires the shared counter.
                // Fatal to this request only; nothing is emitted.
                let Some(counter) = self.counter.clone() else {
                    error!("generate received before initializeBuffer, dropping request");
                    return;
                };
                let registry = self.registry.clone();
                let outgoing = self.outgoing.clone();
                tokio::spawn(run_generate(
                    registry, outgoing, counter, model, id_tokens, text, sampling, epoch,
                ));
            }
        }
    }
}

/// Map backend loading progress onto wire messages for `model`.
fn progress_relay(model: String, outgoing: UnboundedSender<WorkerMessage>) -> ProgressCallback {
    Arc::new(move |event| {
        let message = match event {
            LoadProgress::Initiate { file } => WorkerMessage::Initiate {
                model: model.clone(),
                file,
            },
            LoadProgress::Progress {
                file,
                loaded,
                total,
            } => WorkerMessage::Progress {
                model: model.clone(),
                file,
                loaded,
                total,
                progress: if total == 0 {
                    0.0
                } else {
                    (loaded as f32 / total as f32) * 100.0
                },
            },
            LoadProgress::Done { file } => WorkerMessage::Done {
                model: model.clone(),
                file,
            },
        };
        let _ = outgoing.send(message);
    })
}

/// Strip the first `prefix_chars` characters; fragments on the wire carry
/// the continuation only. Char-based so a multi-byte prefix boundary never
/// splits a code point.
fn strip_prefix_chars(full: &str, prefix_chars: usize) -> String {
    full.chars().skip(prefix_chars).collect()
}

#[allow(clippy::too_many_arguments)]
async fn run_generate(
    registry: Arc<PipelineRegistry>,
    outgoing: UnboundedSender<WorkerMessage>,
    counter: GenerationCounter,
    model: String,
    id_tokens: Vec<CandidateId>,
    text: String,
    sampling: SamplingSettings,
    epoch: u64,
) {
    let progress = progress_relay(model.clone(), outgoing.clone());
    let lease = match registry.get_or_create(&model, progress).await {
        Ok(lease) => lease,
        Err(e) => {
            let _ = outgoing.send(WorkerMessage::Exception {
                id_tokens,
                error: e.to_string(),
            });
            return;
        }
    };
    if lease.freshly_loaded {
        let _ = outgoing.send(WorkerMessage::Ready {
            model: model.clone(),
        });
    }

    // Superseded before it started: emit nothing.
    if counter.is_stale(epoch) {
        debug!("generate for {} superseded before start, discarding", model);
        return;
    }

    let prefix_chars = text.chars().count();
    let disposed = lease.disposed.clone();
    let step_sender = outgoing.clone();
    let step_ids = id_tokens.clone();

    let mut on_step = move |texts: &[String]| {
        // Checked before any update is posted, so a stale step never
        // delivers fragments for an abandoned request.
        if counter.is_stale(epoch) || disposed.is_cancelled() {
            return StepControl::Interrupt;
        }
        for (id_token, full) in step_ids.iter().zip(texts) {
            let _ = step_sender.send(WorkerMessage::Update {
                id_token: *id_token,
                output: strip_prefix_chars(full, prefix_chars),
            });
        }
        StepControl::Continue
    };

    match lease.pipeline.generate(&text, &sampling, &mut on_step).await {
        Ok(outputs) => {
            for (id_token, full) in id_tokens.iter().zip(&outputs) {
                let _ = outgoing.send(WorkerMessage::Complete {
                    id_token: *id_token,
                    output: strip_prefix_chars(full, prefix_chars),
                });
            }
        }
        Err(PipelineError::Interrupted) => {
            debug!("generate for {} interrupted mid-run", model);
            let _ = outgoing.send(WorkerMessage::Interrupted {
                id_tokens,
                error: "generation superseded by a newer request".to_string(),
            });
        }
        Err(PipelineError::Failed(message)) => {
            warn!("generate for {} failed: {}", model, message);
            let _ = outgoing.send(WorkerMessage::Exception {
                id_tokens,
                error: message,
            });
        }
    }
}
