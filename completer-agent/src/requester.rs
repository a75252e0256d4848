//! Client-side coordinator.
//!
//! The requester hides worker messaging and cancellation bookkeeping from
//! the consumer, which only sees `fetch` (returning placeholder candidates)
//! and `stream` (a lazy pull-based sequence of partial results per
//! candidate). Supersession is the steady state while a user types: each
//! `fetch` bumps the shared cancellation counter, invalidating any earlier
//! in-flight generation so at most the newest request's output is ever
//! surfaced.

use crate::error::{FetchError, StreamError};
use crate::notifications::{CompletionNotifier, LoadingNotification};
use completer_protocol::{
    CandidateId, ClientMessage, CompleterSettings, CompletionKind, GenerationCounter,
    SettingsError, ValidatedConfig, WorkerEnv, WorkerMessage,
};
use futures::Stream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::watch;
use tracing::{debug, warn};

/// One in-flight or streamed partial result.
///
/// `text` is the whole continuation decoded so far, prefix excluded; each
/// chunk replaces the previous one rather than appending to it. The chunk
/// with `done = true` is authoritative and terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionChunk {
    pub text: String,
    pub done: bool,
}

/// Candidate handle returned by [`CompletionRequester::fetch`]: empty and
/// incomplete until its stream is consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePlaceholder {
    pub id: CandidateId,
    pub text: String,
    pub done: bool,
}

type StreamItem = Result<CompletionChunk, StreamError>;

/// Per-candidate mailbox between message dispatch and a `stream` consumer.
///
/// The sender half dies with the candidate's terminal message; the
/// receiver half is taken by the first `stream` call that gets polled.
/// The map entry is dropped once both halves are gone.
struct PendingStream {
    tx: Option<UnboundedSender<StreamItem>>,
    rx: Option<mpsc::UnboundedReceiver<StreamItem>>,
}

impl PendingStream {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Some(tx),
            rx: Some(rx),
        }
    }
}

struct RequesterState {
    settings: CompleterSettings,
    pending: HashMap<CandidateId, PendingStream>,
    /// Readiness gate per model identifier; closed until `ready` arrives.
    gates: HashMap<String, watch::Sender<bool>>,
    loading: HashMap<String, LoadingNotification>,
    /// Serial of the newest `fetch`; older calls in their debounce window
    /// observe a higher value and yield.
    fetch_serial: u64,
}

struct Inner {
    counter: GenerationCounter,
    to_worker: UnboundedSender<ClientMessage>,
    notifier: Arc<dyn CompletionNotifier>,
    state: Mutex<RequesterState>,
}

#[derive(Clone)]
pub struct CompletionRequester {
    inner: Arc<Inner>,
}

/// Non-owning requester handle for the message dispatch loop; upgrading
/// fails once every strong handle is gone, so dispatch does not keep the
/// requester (and with it the action channel) alive.
#[derive(Clone)]
pub struct WeakRequester {
    inner: std::sync::Weak<Inner>,
}

impl WeakRequester {
    pub fn upgrade(&self) -> Option<CompletionRequester> {
        self.inner.upgrade().map(|inner| CompletionRequester { inner })
    }
}

impl CompletionRequester {
    /// Create the requester and perform the startup handshake: environment
    /// options, cancellation counter binding, and a pre-warm for every
    /// configured model slot.
    pub fn new(
        to_worker: UnboundedSender<ClientMessage>,
        env: WorkerEnv,
        settings: CompleterSettings,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;
        let counter = GenerationCounter::new();

        let _ = to_worker.send(ClientMessage::Configure { env });
        let _ = to_worker.send(ClientMessage::InitializeBuffer {
            buffer: counter.clone(),
        });

        let mut gates = HashMap::new();
        for model in [settings.code_model.clone(), settings.text_model.clone()]
            .into_iter()
            .flatten()
        {
            if gates.contains_key(&model) {
                continue;
            }
            gates.insert(model.clone(), watch::Sender::new(false));
            let _ = to_worker.send(ClientMessage::InitializeModel { model });
        }

        Ok(Self {
            inner: Arc::new(Inner {
                counter,
                to_worker,
                notifier,
                state: Mutex::new(RequesterState {
                    settings,
                    pending: HashMap::new(),
                    gates,
                    loading: HashMap::new(),
                    fetch_serial: 0,
                }),
            }),
        })
    }

    /// Shared handle to the cancellation counter.
    pub fn counter(&self) -> GenerationCounter {
        self.inner.counter.clone()
    }

    pub fn downgrade(&self) -> WeakRequester {
        WeakRequester {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Request completions for `text` of content type `kind`.
    ///
    /// Suspends behind the configured debounce delay (newest call wins)
    /// and until the slot's model is ready, then bumps the cancellation
    /// counter, truncates `text` to the trailing context window, posts one
    /// generation batch, and returns immediately with empty placeholders.
    /// Safe to call again before a previous call's results arrive.
    pub async fn fetch(
        &self,
        kind: CompletionKind,
        text: &str,
    ) -> Result<Vec<CandidatePlaceholder>, FetchError> {
        let (serial, model, sampling, debounce, window, mut gate) = {
            let mut state = self.inner.state.lock().unwrap();
            state.fetch_serial += 1;
            let serial = state.fetch_serial;

            let settings = state.settings.clone();
            settings.validate().map_err(FetchError::Settings)?;
            let model = settings
                .slot(kind)
                .ok_or(FetchError::SlotDisabled(kind))?
                .to_string();

            // A fetch against a never-initialized model pre-warms it so
            // the gate eventually opens.
            let gate = match state.gates.get(&model) {
                Some(gate) => gate.subscribe(),
                None => {
                    let gate = watch::Sender::new(false);
                    let rx = gate.subscribe();
                    state.gates.insert(model.clone(), gate);
                    let _ = self.inner.to_worker.send(ClientMessage::InitializeModel {
                        model: model.clone(),
                    });
                    rx
                }
            };

            (
                serial,
                model,
                settings.sampling.clone(),
                settings.debounce(),
                settings.max_context_window,
                gate,
            )
        };

        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
            if self.inner.state.lock().unwrap().fetch_serial != serial {
                return Err(FetchError::Superseded);
            }
        }

        // The gate sender only drops when `configure` switches the slot
        // away from this model, which obsoletes the waiting request.
        gate.wait_for(|ready| *ready)
            .await
            .map_err(|_| FetchError::Superseded)?;
        if self.inner.state.lock().unwrap().fetch_serial != serial {
            return Err(FetchError::Superseded);
        }

        // Invalidate any earlier in-flight generation and stamp the
        // request with the bump's own value: concurrent fetches each get
        // a distinct epoch, so all but the newest go stale.
        let epoch = self.inner.counter.bump();

        let truncated = trailing_window(text, window);
        let id_tokens: Vec<CandidateId> = (0..sampling.generate_n)
            .map(|_| CandidateId::new())
            .collect();
        {
            let mut state = self.inner.state.lock().unwrap();
            for id in &id_tokens {
                state.pending.insert(*id, PendingStream::new());
            }
        }

        debug!(
            "posting generate for {} ({} candidates, epoch {})",
            model,
            id_tokens.len(),
            epoch
        );
        self.inner
            .to_worker
            .send(ClientMessage::Generate {
                model,
                id_tokens: id_tokens.clone(),
                text: truncated,
                sampling,
                epoch,
            })
            .map_err(|_| FetchError::WorkerGone)?;

        Ok(id_tokens
            .into_iter()
            .map(|id| CandidatePlaceholder {
                id,
                text: String::new(),
                done: false,
            })
            .collect())
    }

    /// Lazy sequence of partial results for one candidate.
    ///
    /// Nothing happens until the first poll; creating and discarding the
    /// stream without polling leaves the candidate untouched. The first
    /// polled stream claims the candidate's mailbox; later calls for the
    /// same id fail with [`StreamError::UnknownCandidate`]. The sequence
    /// ends after the chunk with `done = true`, or with an error when the
    /// candidate was interrupted or failed.
    pub fn stream(&self, id: CandidateId) -> impl Stream<Item = StreamItem> {
        let inner = self.inner.clone();
        async_stream::stream! {
            let rx = {
                let mut state = inner.state.lock().unwrap();
                let (rx, remove) = match state.pending.get_mut(&id) {
                    Some(entry) => {
                        let rx = entry.rx.take();
                        // Terminal already delivered: the mailbox holds
                        // everything this stream will yield.
                        let remove = rx.is_some() && entry.tx.is_none();
                        (rx, remove)
                    }
                    None => (None, false),
                };
                if remove {
                    state.pending.remove(&id);
                }
                rx
            };
            let Some(mut rx) = rx else {
                yield Err(StreamError::UnknownCandidate(id.to_string()));
                return;
            };
            while let Some(item) = rx.recv().await {
                let done = item.as_ref().map(|chunk| chunk.done).unwrap_or(true);
                yield item;
                if done {
                    return;
                }
            }
        }
    }

    /// Apply new settings.
    ///
    /// Switching a model slot disposes the old identifier (when no other
    /// slot still uses it), pre-warms the new one, and closes the new
    /// model's readiness gate until it reports ready.
    pub fn configure(&self, settings: CompleterSettings) -> Result<(), SettingsError> {
        settings.validate()?;
        let mut messages = Vec::new();
        {
            let mut state = self.inner.state.lock().unwrap();
            for kind in [CompletionKind::Code, CompletionKind::Text] {
                let old = state.settings.slot(kind).map(str::to_string);
                let new = settings.slot(kind).map(str::to_string);
                if old == new {
                    continue;
                }
                if let Some(old_model) = old {
                    let still_used = settings.code_model.as_deref() == Some(old_model.as_str())
                        || settings.text_model.as_deref() == Some(old_model.as_str());
                    let already_disposing = messages.iter().any(|m| {
                        matches!(m, ClientMessage::DisposeModel { model } if *model == old_model)
                    });
                    if !still_used && !already_disposing {
                        state.gates.remove(&old_model);
                        state.loading.remove(&old_model);
                        messages.push(ClientMessage::DisposeModel { model: old_model });
                    }
                }
                if let Some(new_model) = new {
                    state
                        .gates
                        .entry(new_model.clone())
                        .or_insert_with(|| watch::Sender::new(false));
                    messages.push(ClientMessage::InitializeModel { model: new_model });
                }
            }
            state.settings = settings;
        }
        for message in messages {
            let _ = self.inner.to_worker.send(message);
        }
        Ok(())
    }

    /// Dispatch one worker message.
    pub fn on_message(&self, message: WorkerMessage) {
        match message {
            WorkerMessage::WorkerStarted => debug!("generation worker reported started"),
            WorkerMessage::Initiate { model, file } => {
                self.inner
                    .state
                    .lock()
                    .unwrap()
                    .loading
                    .entry(model.clone())
                    .or_default();
                self.inner.notifier.loading_started(&model, &file);
            }
            WorkerMessage::Progress {
                model,
                file,
                loaded,
                total,
                ..
            } => {
                let percent = self
                    .inner
                    .state
                    .lock()
                    .unwrap()
                    .loading
                    .entry(model.clone())
                    .or_default()
                    .observe(&file, loaded, total);
                self.inner
                    .notifier
                    .loading_progress(&model, &file, loaded, total, percent);
            }
            WorkerMessage::Done { model, file } => {
                self.inner.notifier.loading_done(&model, &file);
            }
            WorkerMessage::Ready { model } => {
                let known = {
                    let mut state = self.inner.state.lock().unwrap();
                    state.loading.remove(&model);
                    match state.gates.get(&model) {
                        Some(gate) => {
                            // Flush any waiter stamped against a stale
                            // epoch. Bumped before the gate opens so a
                            // fetch released by it always stamps a
                            // fresher epoch than this one.
                            if !*gate.borrow() {
                                self.inner.counter.bump();
                            }
                            gate.send_replace(true);
                            true
                        }
                        None => false,
                    }
                };
                if known {
                    self.inner.notifier.model_ready(&model);
                } else {
                    warn!("ready for unconfigured model {}, dropping", model);
                }
            }
            WorkerMessage::Update { id_token, output } => {
                self.deliver(
                    id_token,
                    Ok(CompletionChunk {
                        text: output,
                        done: false,
                    }),
                    false,
                );
            }
            WorkerMessage::Complete { id_token, output } => {
                self.deliver(
                    id_token,
                    Ok(CompletionChunk {
                        text: output,
                        done: true,
                    }),
                    true,
                );
            }
            WorkerMessage::Interrupted { id_tokens, error } => {
                for id in id_tokens {
                    self.deliver(id, Err(StreamError::Interrupted(error.clone())), true);
                }
            }
            WorkerMessage::Exception { id_tokens, error } => {
                self.inner.notifier.generation_failed(&error);
                for id in id_tokens {
                    self.deliver(id, Err(StreamError::Failed(error.clone())), true);
                }
            }
        }
    }

    fn deliver(&self, id: CandidateId, item: StreamItem, terminal: bool) {
        let mut state = self.inner.state.lock().unwrap();
        let Some(entry) = state.pending.get_mut(&id) else {
            warn!("message for unknown candidate {}, dropping", id);
            return;
        };
        let Some(tx) = entry.tx.as_ref() else {
            warn!("message for candidate {} after its terminal, dropping", id);
            return;
        };
        let _ = tx.send(item);
        if terminal {
            entry.tx = None;
            if entry.rx.is_none() {
                state.pending.remove(&id);
            }
        }
    }
}

/// Keep the trailing `window` characters of `text`; the most recent input
/// immediately preceding the cursor is the relevant context.
fn trailing_window(text: &str, window: usize) -> String {
    let len = text.chars().count();
    if len <= window {
        text.to_string()
    } else {
        text.chars().skip(len - window).collect()
    }
}
