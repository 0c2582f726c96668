use std::path::{Path, PathBuf};

use llama_runner::{Device, DevicePreference, Generator, LlamaConfig, LlamaRunner};
use tracing::{info, instrument};

use crate::error::BenchError;
use crate::hub::ModelHub;

pub trait SessionState {}

pub struct Unloaded;
pub struct Downloaded {
    model_path: PathBuf,
}
pub struct Ready {
    generator: Box<dyn Generator>,
    device: Device,
}

impl SessionState for Unloaded {}
impl SessionState for Downloaded {}
impl SessionState for Ready {}

/// Turns a weights file into a generator on some device.
pub trait ModelLoader {
    fn load(&self, path: &Path, device: DevicePreference) -> Result<(Box<dyn Generator>, Device), BenchError>;
}

/// Loads GGUF files with llama.cpp.
pub struct LlamaLoader {
    config: LlamaConfig,
}

impl LlamaLoader {
    pub fn new(config: LlamaConfig) -> Self {
        Self { config }
    }
}

impl ModelLoader for LlamaLoader {
    fn load(&self, path: &Path, device: DevicePreference) -> Result<(Box<dyn Generator>, Device), BenchError> {
        let config = self
            .config
            .clone()
            .with_model_path(path)
            .with_device(device);
        let mut runner = LlamaRunner::new(config);
        let device = runner.load_model().map_err(|e| BenchError::Load {
            model: path.display().to_string(),
            message: format!("{e:#}"),
        })?;
        Ok((Box::new(runner), device))
    }
}

/// One model's lifecycle: unloaded, downloaded, ready.
pub struct ModelSession<S: SessionState> {
    model_id: String,
    state: S,
}

impl<S: SessionState> ModelSession<S> {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Release whatever the session holds.
    pub fn cleanup(self) -> ModelSession<Unloaded> {
        ModelSession {
            model_id: self.model_id,
            state: Unloaded,
        }
    }
}

impl ModelSession<Unloaded> {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            state: Unloaded,
        }
    }

    #[instrument(skip_all, fields(model = %self.model_id))]
    pub fn download(self, hub: &dyn ModelHub) -> Result<ModelSession<Downloaded>, BenchError> {
        let model_path = hub.download(&self.model_id)?;
        info!("Model available at {}", model_path.display());
        Ok(ModelSession {
            model_id: self.model_id,
            state: Downloaded { model_path },
        })
    }
}

impl ModelSession<Downloaded> {
    pub fn model_path(&self) -> &Path {
        &self.state.model_path
    }

    #[instrument(skip_all, fields(model = %self.model_id, device = %device))]
    pub fn load_inference_engine(
        self,
        loader: &dyn ModelLoader,
        device: DevicePreference,
    ) -> Result<ModelSession<Ready>, BenchError> {
        let (generator, device) = loader.load(&self.state.model_path, device)?;
        info!("Loaded on {}", device);
        Ok(ModelSession {
            model_id: self.model_id,
            state: Ready { generator, device },
        })
    }
}

impl ModelSession<Ready> {
    pub fn generator(&self) -> &dyn Generator {
        self.state.generator.as_ref()
    }

    pub fn device(&self) -> Device {
        self.state.device
    }
}
