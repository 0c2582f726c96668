use std::fmt;
use std::str::FromStr;

use crate::instructions::RenderedPrompt;

const ASSISTANT_HEADER: &str = "<|start_header_id|>assistant<|end_header_id|>";

/// Format a header for LLM prompts using the Llama 3 chat format
pub fn format_header(header_name: &str, content: &str) -> String {
    format!("<|start_header_id|>{}<|end_header_id|>{}<|eot_id|>", header_name, content)
}

/// How the system and user halves of an instruction are joined into one prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PromptFormat {
    #[default]
    Plain,
    Llama3,
}

impl PromptFormat {
    pub fn assemble(self, prompt: &RenderedPrompt) -> String {
        match self {
            PromptFormat::Plain if prompt.system.is_empty() => prompt.user.clone(),
            PromptFormat::Plain => format!("{}\n\n{}", prompt.system, prompt.user),
            PromptFormat::Llama3 => format!(
                "{}{}{}",
                format_header("system", &prompt.system),
                format_header("user", &prompt.user),
                ASSISTANT_HEADER
            ),
        }
    }
}

impl FromStr for PromptFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" => Ok(PromptFormat::Plain),
            "llama3" | "llama-3" => Ok(PromptFormat::Llama3),
            other => Err(format!("unknown prompt format '{other}' (expected plain or llama3)")),
        }
    }
}

impl fmt::Display for PromptFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptFormat::Plain => write!(f, "plain"),
            PromptFormat::Llama3 => write!(f, "llama3"),
        }
    }
}

/// Drop an echoed assistant header from the start of a completion.
pub fn strip_assistant_header(response: &str) -> &str {
    response
        .trim_start()
        .strip_prefix(ASSISTANT_HEADER)
        .unwrap_or(response)
}

/// File-name safe form of a model id: `org/repo:file.gguf` -> `org_repo_file.gguf`.
pub fn sanitize_model_id(model_id: &str) -> String {
    model_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
