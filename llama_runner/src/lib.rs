use std::time::Duration;

pub mod config;
pub mod device;
pub mod runner;

pub use config::{GenerationParams, LlamaConfig};
pub use device::{Device, DevicePreference};
pub use runner::LlamaRunner;

/// Text produced by one blocking generation call.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub text: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub duration: Duration,
}

/// Anything that turns a prompt into text.
///
/// Implementations only read model state, so one loaded model can serve any
/// number of agents in turn.
pub trait Generator {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> anyhow::Result<Generation>;
}
