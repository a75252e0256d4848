//! Pipeline registry: at most one loaded pipeline per model identifier.
//!
//! Loads are single-flight: the first caller for a model kicks off the
//! load, concurrent callers await the same shared future. A failed load is
//! observed by every waiter and the entry is removed so the next call
//! retries. Disposing an entry cancels its dispose token, which an
//! in-flight generation observes at its next step boundary.

use crate::error::LoadError;
use crate::pipeline::{PipelineBackend, ProgressCallback, TextGenerationPipeline};
use completer_protocol::WorkerEnv;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type SharedPipeline = Arc<dyn TextGenerationPipeline>;
type LoadFuture = Shared<BoxFuture<'static, Result<SharedPipeline, LoadError>>>;

struct Entry {
    handle: LoadFuture,
    disposed: CancellationToken,
}

/// A resolved pipeline plus the token that is cancelled when the model is
/// disposed while the lease is still in use.
#[derive(Debug)]
pub struct PipelineLease {
    pub pipeline: SharedPipeline,
    pub disposed: CancellationToken,
    /// True when this call triggered the load (as opposed to reusing an
    /// existing or in-flight entry); the caller posting `ready` uses this
    /// to report it exactly once.
    pub freshly_loaded: bool,
}

pub struct PipelineRegistry {
    backend: Arc<dyn PipelineBackend>,
    env: Mutex<WorkerEnv>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl PipelineRegistry {
    pub fn new(backend: Arc<dyn PipelineBackend>) -> Self {
        Self {
            backend,
            env: Mutex::new(WorkerEnv::default()),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the process-wide environment options. Applies to loads
    /// started after this call; already-loaded pipelines are unaffected.
    pub fn set_env(&self, env: WorkerEnv) {
        *self.env.lock().unwrap() = env;
    }

    /// Resolve the pipeline for `model`, loading it lazily.
    ///
    /// `on_progress` only fires when this call triggers the load; callers
    /// joining an in-flight load share its progress reporting instead.
    pub async fn get_or_create(
        &self,
        model: &str,
        on_progress: ProgressCallback,
    ) -> Result<PipelineLease, LoadError> {
        let (handle, disposed, freshly_loaded) = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get(model) {
                Some(entry) => (entry.handle.clone(), entry.disposed.clone(), false),
                None => {
                    debug!("starting pipeline load for {}", model);
                    let backend = self.backend.clone();
                    let env = self.env.lock().unwrap().clone();
                    let model_owned = model.to_string();
                    let handle: LoadFuture = async move {
                        backend.load(&model_owned, &env, on_progress).await
                    }
                    .boxed()
                    .shared();
                    let entry = Entry {
                        handle: handle.clone(),
                        disposed: CancellationToken::new(),
                    };
                    let disposed = entry.disposed.clone();
                    entries.insert(model.to_string(), entry);
                    (handle, disposed, true)
                }
            }
        };

        match handle.clone().await {
            Ok(pipeline) => Ok(PipelineLease {
                pipeline,
                disposed,
                freshly_loaded,
            }),
            Err(error) => {
                warn!("pipeline load for {} failed: {}", model, error);
                // Remove the failed entry so the next caller retries, but
                // only if it is still ours - a concurrent dispose/retry may
                // have replaced it already.
                let mut entries = self.entries.lock().unwrap();
                if let Some(entry) = entries.get(model) {
                    if entry.handle.ptr_eq(&handle) {
                        entries.remove(model);
                    }
                }
                Err(error)
            }
        }
    }

    /// Release the pipeline for `model`, if present. Returns whether an
    /// entry existed. An in-flight generation against the disposed model
    /// observes the cancelled token and aborts as an interruption.
    pub async fn dispose(&self, model: &str) -> bool {
        let entry = self.entries.lock().unwrap().remove(model);
        let Some(entry) = entry else {
            debug!("dispose for {}: no entry", model);
            return false;
        };

        entry.disposed.cancel();
        // Await readiness so resources exist before we release them; a
        // failed load has nothing left to dispose.
        if let Ok(pipeline) = entry.handle.await {
            pipeline.dispose().await;
        }
        info!("disposed pipeline for {}", model);
        true
    }

    /// True when an entry (loading or ready) exists for `model`.
    pub fn contains(&self, model: &str) -> bool {
        self.entries.lock().unwrap().contains_key(model)
    }
}
