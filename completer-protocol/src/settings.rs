//! Validated settings for the completer: sampling parameters, worker
//! environment options, and the two content-type model slots.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

/// Trait for configuration types that can be validated and have defaults.
pub trait ValidatedConfig:
    Send + Sync + Clone + Debug + Serialize + for<'de> Deserialize<'de>
{
    type Error: std::error::Error + Send + Sync + 'static;

    /// Validate the configuration, returning an error if invalid.
    fn validate(&self) -> Result<(), Self::Error>;

    /// Merge this configuration with defaults, preferring this config's values.
    fn merge_with_defaults(self, defaults: Self) -> Self;

    /// Get a description of what this configuration controls.
    fn description() -> &'static str;
}

/// Errors raised by settings validation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SettingsError {
    #[error("temperature must be within [0, 1], got {0}")]
    Temperature(f32),

    #[error("topK must be within [0, 50], got {0}")]
    TopK(u32),

    #[error("maxNewTokens must be within [1, 512], got {0}")]
    MaxNewTokens(u32),

    #[error("generateN must be at least 1")]
    GenerateN,

    #[error("repetitionPenalty must be positive, got {0}")]
    RepetitionPenalty(f32),

    #[error("diversityPenalty must not be negative, got {0}")]
    DiversityPenalty(f32),

    #[error("maxContextWindow must be at least 1 character")]
    MaxContextWindow,
}

impl crate::error::CompleterError for SettingsError {
    fn category(&self) -> crate::error::ErrorCategory {
        crate::error::ErrorCategory::User
    }

    fn error_code(&self) -> &'static str {
        match self {
            SettingsError::Temperature(_) => "SETTINGS_TEMPERATURE",
            SettingsError::TopK(_) => "SETTINGS_TOP_K",
            SettingsError::MaxNewTokens(_) => "SETTINGS_MAX_NEW_TOKENS",
            SettingsError::GenerateN => "SETTINGS_GENERATE_N",
            SettingsError::RepetitionPenalty(_) => "SETTINGS_REPETITION_PENALTY",
            SettingsError::DiversityPenalty(_) => "SETTINGS_DIVERSITY_PENALTY",
            SettingsError::MaxContextWindow => "SETTINGS_CONTEXT_WINDOW",
        }
    }
}

/// Sampling parameters for one generation batch.
///
/// `generate_n` doubles as the number of returned sequences and the beam
/// count, matching the pipeline contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingSettings {
    pub temperature: f32,
    pub top_k: u32,
    pub do_sample: bool,
    pub max_new_tokens: u32,
    pub repetition_penalty: f32,
    pub diversity_penalty: f32,
    pub generate_n: u32,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            top_k: 5,
            do_sample: false,
            max_new_tokens: 20,
            repetition_penalty: 1.0,
            diversity_penalty: 1.0,
            generate_n: 2,
        }
    }
}

impl SamplingSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(SettingsError::Temperature(self.temperature));
        }
        if self.top_k > 50 {
            return Err(SettingsError::TopK(self.top_k));
        }
        if !(1..=512).contains(&self.max_new_tokens) {
            return Err(SettingsError::MaxNewTokens(self.max_new_tokens));
        }
        if self.generate_n == 0 {
            return Err(SettingsError::GenerateN);
        }
        if self.repetition_penalty <= 0.0 {
            return Err(SettingsError::RepetitionPenalty(self.repetition_penalty));
        }
        if self.diversity_penalty < 0.0 {
            return Err(SettingsError::DiversityPenalty(self.diversity_penalty));
        }
        Ok(())
    }
}

/// Process-wide worker environment: model source policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerEnv {
    pub allow_local_models: bool,
    pub allow_remote_models: bool,
    pub remote_host: String,
    pub local_model_path: String,
}

impl Default for WorkerEnv {
    fn default() -> Self {
        Self {
            allow_local_models: false,
            allow_remote_models: true,
            remote_host: "https://huggingface.co/".to_string(),
            local_model_path: String::new(),
        }
    }
}

/// Which content type a completion request is for; each kind has its own
/// model slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompletionKind {
    Code,
    Text,
}

/// Serde mapping for model slots: the string `"none"` disables a slot.
mod model_slot {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(slot: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        match slot {
            Some(model) => s.serialize_str(model),
            None => s.serialize_str("none"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let value = String::deserialize(d)?;
        Ok(if value == "none" { None } else { Some(value) })
    }
}

/// The full consumer-facing configuration surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleterSettings {
    /// Model for code completions; `"none"` disables the slot.
    #[serde(with = "model_slot")]
    pub code_model: Option<String>,
    /// Model for prose completions; `"none"` disables the slot.
    #[serde(with = "model_slot")]
    pub text_model: Option<String>,
    #[serde(flatten)]
    pub sampling: SamplingSettings,
    /// Delay coalescing rapid successive fetches into the newest one.
    pub debounce_ms: u64,
    /// Trailing character window kept from the source prefix.
    pub max_context_window: usize,
}

impl Default for CompleterSettings {
    fn default() -> Self {
        Self {
            code_model: Some("Xenova/tiny_starcoder_py".to_string()),
            text_model: None,
            sampling: SamplingSettings::default(),
            debounce_ms: 0,
            max_context_window: 512,
        }
    }
}

impl CompleterSettings {
    /// The model configured for `kind`, or `None` when the slot is disabled.
    pub fn slot(&self, kind: CompletionKind) -> Option<&str> {
        match kind {
            CompletionKind::Code => self.code_model.as_deref(),
            CompletionKind::Text => self.text_model.as_deref(),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl ValidatedConfig for CompleterSettings {
    type Error = SettingsError;

    fn validate(&self) -> Result<(), SettingsError> {
        self.sampling.validate()?;
        if self.max_context_window == 0 {
            return Err(SettingsError::MaxContextWindow);
        }
        Ok(())
    }

    fn merge_with_defaults(self, defaults: Self) -> Self {
        Self {
            code_model: self.code_model.or(defaults.code_model),
            text_model: self.text_model.or(defaults.text_model),
            sampling: self.sampling,
            debounce_ms: self.debounce_ms,
            max_context_window: if self.max_context_window != 0 {
                self.max_context_window
            } else {
                defaults.max_context_window
            },
        }
    }

    fn description() -> &'static str {
        "Model slots, sampling parameters, and request coalescing for the inline completer"
    }
}
