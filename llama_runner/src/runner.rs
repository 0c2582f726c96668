use anyhow::{bail, Context, Result};
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;
use std::num::NonZeroU32;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, Level};

use crate::config::{GenerationParams, LlamaConfig};
use crate::device::Device;
use crate::{Generation, Generator};

/// llama.cpp may only be initialised once per process, so every runner shares one backend.
fn shared_backend() -> Result<&'static LlamaBackend> {
    static BACKEND: OnceLock<LlamaBackend> = OnceLock::new();
    if let Some(backend) = BACKEND.get() {
        return Ok(backend);
    }

    let mut backend = LlamaBackend::init().context("Failed to initialize LlamaBackend")?;
    if !tracing::enabled!(Level::DEBUG) {
        backend.void_logs();
    }
    Ok(BACKEND.get_or_init(|| backend))
}

/// A blocking llama.cpp runner owning one loaded model.
///
/// Every call to [`LlamaRunner::generate`] builds a fresh context, so prompts
/// never see each other's KV cache and the model itself is only read.
pub struct LlamaRunner {
    pub config: LlamaConfig,
    backend: Option<&'static LlamaBackend>,
    model: Option<LlamaModel>,
    device: Option<Device>,
}

impl LlamaRunner {
    pub fn new(config: LlamaConfig) -> Self {
        Self {
            config,
            backend: None,
            model: None,
            device: None,
        }
    }

    /// Load the model from `self.config.model_path` onto the preferred device.
    pub fn load_model(&mut self) -> Result<Device> {
        let model_path = self
            .config
            .model_path
            .as_ref()
            .context("Model path is not set")?;

        let backend = shared_backend()?;
        let device = self.config.device.resolve(backend.supports_gpu_offload())?;
        info!("Loading model from {} on {}", model_path.display(), device);

        let model_params = LlamaModelParams::default().with_n_gpu_layers(device.gpu_layers());
        let model = LlamaModel::load_from_file(backend, model_path, &model_params)
            .with_context(|| format!("Unable to load model {}", model_path.display()))?;

        self.backend = Some(backend);
        self.model = Some(model);
        self.device = Some(device);

        info!("Model loaded successfully!");
        Ok(device)
    }

    pub fn is_model_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn device(&self) -> Option<Device> {
        self.device
    }

    /// Drop the model weights. Safe to call when nothing is loaded.
    pub fn unload(&mut self) {
        if self.model.take().is_some() {
            info!("Model unloaded");
        }
        self.device = None;
    }

    fn build_sampler(params: &GenerationParams) -> LlamaSampler {
        if params.is_greedy() {
            return LlamaSampler::greedy();
        }
        LlamaSampler::chain_simple([
            LlamaSampler::top_p(params.top_p, 1),
            LlamaSampler::temp(params.temperature),
            LlamaSampler::dist(params.seed),
        ])
    }

    /// Blocking generation of at most `params.max_tokens` tokens after `prompt`.
    pub fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Generation> {
        let (model, backend) = match (self.model.as_ref(), self.backend) {
            (Some(model), Some(backend)) => (model, backend),
            _ => bail!("Model not loaded; call load_model() first."),
        };

        let started = Instant::now();
        let tokens_list = model
            .str_to_token(prompt, AddBos::Always)
            .context("Failed to tokenize prompt")?;
        if tokens_list.is_empty() {
            bail!("Prompt produced no tokens");
        }

        let n_ctx = self.config.context_size;
        let prompt_tokens = tokens_list.len();
        if prompt_tokens >= n_ctx as usize {
            bail!("Prompt is too long; {prompt_tokens} tokens for a context of {n_ctx}");
        }

        let n_batch = self.config.batch_size.clamp(1, n_ctx);
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(n_ctx))
            .with_n_batch(n_batch)
            .with_n_threads(self.config.threads)
            .with_n_threads_batch(self.config.threads);
        let mut ctx = model
            .new_context(backend, ctx_params)
            .context("Unable to create the llama_context")?;

        // decode the prompt in batch-sized chunks
        let mut batch = LlamaBatch::new(n_batch as usize, 1);
        let mut position = 0_i32;
        let mut last_logits_index = 0_i32;
        for chunk in tokens_list.chunks(n_batch as usize) {
            batch.clear();
            for (idx, token) in chunk.iter().enumerate() {
                let is_last = position as usize + idx + 1 == prompt_tokens;
                if is_last {
                    last_logits_index = idx as i32;
                }
                batch.add(*token, position + idx as i32, &[0], is_last)?;
            }
            ctx.decode(&mut batch).context("Failed to decode prompt tokens")?;
            position += chunk.len() as i32;
        }

        let mut sampler = Self::build_sampler(params);
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut text = String::new();
        let mut completion_tokens = 0_u32;
        let mut logits_index = last_logits_index;

        while completion_tokens < params.max_tokens && (position as u32) < n_ctx {
            let token = sampler.sample(&ctx, logits_index);
            sampler.accept(token);

            // end if EOG
            if model.is_eog_token(token) {
                break;
            }

            let piece = model
                .token_to_piece(token, &mut decoder, false, None)
                .context("Failed to convert token to text")?;
            text.push_str(&piece);
            completion_tokens += 1;

            batch.clear();
            batch.add(token, position, &[0], true)?;
            position += 1;
            logits_index = 0;

            ctx.decode(&mut batch).context("Failed to decode next token")?;
        }

        let duration = started.elapsed();
        debug!(
            "Decoded {} tokens in {:.2}s, speed {:.2} t/s",
            completion_tokens,
            duration.as_secs_f32(),
            tokens_per_second(completion_tokens, duration)
        );

        Ok(Generation {
            text,
            prompt_tokens,
            completion_tokens: completion_tokens as usize,
            duration,
        })
    }
}

impl Generator for LlamaRunner {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Generation> {
        LlamaRunner::generate(self, prompt, params)
    }
}

fn tokens_per_second(tokens: u32, duration: Duration) -> f32 {
    let secs = duration.as_secs_f32();
    if secs > 0.0 {
        tokens as f32 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_without_model_fails() {
        let runner = LlamaRunner::new(LlamaConfig::new());
        let err = runner
            .generate("hello", &GenerationParams::default())
            .unwrap_err();
        assert!(err.to_string().contains("Model not loaded"));
    }

    #[test]
    fn load_without_path_fails() {
        let mut runner = LlamaRunner::new(LlamaConfig::new());
        let err = runner.load_model().unwrap_err();
        assert!(err.to_string().contains("Model path is not set"));
        assert!(!runner.is_model_loaded());
    }

    #[test]
    fn unload_is_idempotent() {
        let mut runner = LlamaRunner::new(LlamaConfig::new());
        runner.unload();
        runner.unload();
        assert!(runner.device().is_none());
    }

    #[test]
    fn throughput_handles_zero_duration() {
        assert_eq!(tokens_per_second(10, Duration::ZERO), 0.0);
        assert_eq!(tokens_per_second(10, Duration::from_secs(2)), 5.0);
    }
}
