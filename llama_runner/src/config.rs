use std::path::PathBuf;

use crate::device::DevicePreference;

/// Load-time settings for one GGUF model.
#[derive(Debug, Clone)]
pub struct LlamaConfig {
    pub model_path: Option<PathBuf>,
    pub context_size: u32,
    pub batch_size: u32,
    pub threads: i32,
    pub device: DevicePreference,
}

impl LlamaConfig {
    pub fn new() -> Self {
        Self {
            model_path: None,
            context_size: 4096,
            batch_size: 512,
            threads: 4,
            device: DevicePreference::Auto,
        }
    }

    pub fn with_model_path(mut self, model_path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(model_path.into());
        self
    }

    pub fn with_device(mut self, device: DevicePreference) -> Self {
        self.device = device;
        self
    }
}

impl Default for LlamaConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Sampling settings supplied by the caller for each generation.
///
/// A temperature of `0.0` selects greedy decoding, which is what exact-match
/// benchmarking wants; anything above samples with `top_p` and `seed`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub seed: u32,
}

impl GenerationParams {
    pub fn greedy(max_tokens: u32) -> Self {
        Self {
            max_tokens,
            ..Self::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn is_greedy(&self) -> bool {
        self.temperature <= 0.0
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.0,
            top_p: 0.95,
            seed: 1337,
        }
    }
}
