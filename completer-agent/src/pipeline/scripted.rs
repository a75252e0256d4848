//! Deterministic playback backend.
//!
//! Real inference is slow and needs model downloads; a scripted backend
//! replays fixed token sequences instead, with optional per-step delays so
//! tests can interleave cancellation with generation. It also powers the
//! `streaming` example.

use super::{
    LoadProgress, PipelineBackend, ProgressCallback, StepCallback, StepControl,
    TextGenerationPipeline,
};
use crate::error::{LoadError, PipelineError};
use async_trait::async_trait;
use completer_protocol::{SamplingSettings, WorkerEnv};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Script for one model identifier.
#[derive(Debug, Clone)]
pub struct ScriptedModel {
    /// Files "downloaded" during load, as (name, total bytes).
    pub files: Vec<(String, u64)>,
    /// Tokens appended to every candidate, one per step.
    pub tokens: Vec<String>,
    /// Pause before each step; gives cancellation a window to land.
    pub step_delay: Duration,
    /// Pause before the load resolves.
    pub load_delay: Duration,
    /// When set, the load fails with this message.
    pub load_failure: Option<String>,
    /// When set, `generate` fails with this message before the first step.
    pub generate_failure: Option<String>,
}

impl ScriptedModel {
    pub fn completing_with<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            files: vec![("model.onnx".to_string(), 4096)],
            tokens: tokens.into_iter().map(Into::into).collect(),
            step_delay: Duration::ZERO,
            load_delay: Duration::ZERO,
            load_failure: None,
            generate_failure: None,
        }
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn failing_load(message: impl Into<String>) -> Self {
        Self {
            load_failure: Some(message.into()),
            ..Self::completing_with(Vec::<String>::new())
        }
    }

    pub fn failing_generate(mut self, message: impl Into<String>) -> Self {
        self.generate_failure = Some(message.into());
        self
    }
}

/// Backend replaying [`ScriptedModel`] fixtures.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    models: HashMap<String, ScriptedModel>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>, script: ScriptedModel) -> Self {
        self.models.insert(model.into(), script);
        self
    }
}

#[async_trait]
impl PipelineBackend for ScriptedBackend {
    async fn load(
        &self,
        model: &str,
        _env: &WorkerEnv,
        on_progress: ProgressCallback,
    ) -> Result<Arc<dyn TextGenerationPipeline>, LoadError> {
        let script = self
            .models
            .get(model)
            .ok_or_else(|| LoadError::NotFound(model.to_string()))?
            .clone();

        if !script.load_delay.is_zero() {
            tokio::time::sleep(script.load_delay).await;
        }
        if let Some(message) = &script.load_failure {
            return Err(LoadError::LoadingFailed(message.clone()));
        }

        for (file, total) in &script.files {
            on_progress(LoadProgress::Initiate { file: file.clone() });
            on_progress(LoadProgress::Progress {
                file: file.clone(),
                loaded: total / 2,
                total: *total,
            });
            on_progress(LoadProgress::Progress {
                file: file.clone(),
                loaded: *total,
                total: *total,
            });
            on_progress(LoadProgress::Done { file: file.clone() });
        }

        debug!("scripted pipeline loaded for {}", model);
        Ok(Arc::new(ScriptedPipeline {
            model: model.to_string(),
            script,
            disposed: AtomicBool::new(false),
        }))
    }
}

struct ScriptedPipeline {
    model: String,
    script: ScriptedModel,
    disposed: AtomicBool,
}

#[async_trait]
impl TextGenerationPipeline for ScriptedPipeline {
    async fn generate(
        &self,
        prefix: &str,
        sampling: &SamplingSettings,
        on_step: StepCallback<'_>,
    ) -> Result<Vec<String>, PipelineError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(PipelineError::Failed(format!(
                "pipeline for {} was disposed",
                self.model
            )));
        }
        if let Some(message) = &self.script.generate_failure {
            return Err(PipelineError::Failed(message.clone()));
        }

        let candidates = sampling.generate_n as usize;
        let steps = self.script.tokens.len().min(sampling.max_new_tokens as usize);
        let mut texts = vec![prefix.to_string(); candidates];

        for token in self.script.tokens.iter().take(steps) {
            if !self.script.step_delay.is_zero() {
                tokio::time::sleep(self.script.step_delay).await;
            }
            for text in &mut texts {
                text.push_str(token);
            }
            if on_step(&texts) == StepControl::Interrupt {
                return Err(PipelineError::Interrupted);
            }
        }

        Ok(texts)
    }

    async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        debug!("scripted pipeline for {} disposed", self.model);
    }
}
