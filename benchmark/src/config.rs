use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::BenchError;
use crate::instructions::{Instruction, InstructionRegistry};

/// Per-model choice of instruction for each agent role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nlq_instruction_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_instruction_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ambiguity_instruction_key: Option<String>,
}

impl InstructionOverrides {
    pub fn nlq_key(&self) -> Option<&str> {
        self.nlq_instruction_key.as_deref()
    }

    pub fn sql_key(&self) -> Option<&str> {
        self.sql_instruction_key.as_deref()
    }

    pub fn ambiguity_key(&self) -> Option<&str> {
        self.ambiguity_instruction_key.as_deref()
    }

    /// Fail early on keys the registry does not know.
    pub fn validate(&self, registry: &InstructionRegistry) -> Result<(), BenchError> {
        [self.nlq_key(), self.sql_key(), self.ambiguity_key()]
            .into_iter()
            .flatten()
            .try_for_each(|key| registry.resolve(key).map(|_| ()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub model_id: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(flatten)]
    pub instructions: InstructionOverrides,
}

impl ModelEntry {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            enabled: true,
            instructions: InstructionOverrides::default(),
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

/// Sampling overrides; unset fields keep the agent defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOverrides {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub seed: Option<u32>,
}

/// Optional JSON run configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub models: Vec<ModelEntry>,
    #[serde(default)]
    pub tasks: Option<Vec<String>>,
    #[serde(default)]
    pub test_data_dir: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub generation: GenerationOverrides,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, BenchError> {
        let content = fs::read_to_string(path)
            .map_err(|e| BenchError::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| BenchError::Config(format!("invalid run config {}: {e}", path.display())))
    }

    pub fn enabled_models(&self) -> impl Iterator<Item = &ModelEntry> {
        self.models.iter().filter(|entry| entry.enabled)
    }

    /// Add the configured instructions to `registry` under `custom_<name>`.
    pub fn register_instructions(&self, registry: &mut InstructionRegistry) -> Vec<String> {
        self.instructions
            .iter()
            .map(|instruction| {
                registry.add_custom(
                    &instruction.name,
                    &instruction.system_prompt,
                    &instruction.user_prompt_template,
                    &instruction.description,
                )
            })
            .collect()
    }
}
