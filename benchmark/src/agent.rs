use anyhow::{Context, Result};
use llama_runner::{GenerationParams, Generator};
use tracing::debug;

use crate::error::BenchError;
use crate::instructions::{self, Instruction};
use crate::pipeline::PipelineResult;
use crate::registry::AgentContext;
use crate::util::{strip_assistant_header, PromptFormat};

/// One input string in, one answer string out.
///
/// Backend failures propagate; the runner isolates them per test case.
pub trait Agent {
    fn name(&self) -> &str;

    /// Called once before the first test case.
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn execute(&self, input: &str) -> Result<String> {
        self.execute_with_context(input, "")
    }

    fn execute_with_context(&self, input: &str, context: &str) -> Result<String>;

    /// Like [`Agent::execute`], but keeps any intermediate stage record.
    fn execute_traced(&self, input: &str) -> Result<Execution> {
        Ok(Execution {
            output: self.execute(input)?,
            stages: None,
        })
    }

    /// Called once after the last test case.
    fn teardown(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub output: String,
    pub stages: Option<PipelineResult>,
}

/// How the answer is cut out of a raw completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    Text,
    Sql,
    AmbiguityLabel,
}

impl Extraction {
    pub fn apply(self, raw: &str) -> String {
        match self {
            Extraction::Text => clean_text(raw),
            Extraction::Sql => extract_sql(raw),
            Extraction::AmbiguityLabel => classify_ambiguity(raw).to_string(),
        }
    }
}

const SQL_MARKERS: [&str; 4] = ["SQL Query:", "SQL:", "Query:", "Answer:"];
const TEXT_MARKERS: [&str; 2] = ["Summary:", "Refined Query:"];

fn strip_marker<'a>(text: &'a str, markers: &[&str]) -> &'a str {
    for marker in markers {
        if text.len() >= marker.len()
            && text.is_char_boundary(marker.len())
            && text[..marker.len()].eq_ignore_ascii_case(marker)
        {
            return text[marker.len()..].trim_start();
        }
    }
    text
}

/// First SQL statement of a completion, without fences, markers or `;`.
pub fn extract_sql(raw: &str) -> String {
    let mut text = strip_assistant_header(raw).trim();
    if let Some(rest) = text.strip_prefix("```") {
        // drop the fence language tag
        text = match rest.split_once('\n') {
            Some((_, body)) => body,
            None => rest,
        };
    }
    let text = strip_marker(text.trim_start(), &SQL_MARKERS);
    let text = text.split("```").next().unwrap_or_default();
    let text = text.split("\n\n").next().unwrap_or_default();
    let text = text.split(';').next().unwrap_or_default();
    text.trim().to_string()
}

/// Three-way ambiguity verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbiguityLabel {
    Ambiguous,
    Clear,
    Unknown,
}

impl std::fmt::Display for AmbiguityLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AmbiguityLabel::Ambiguous => write!(f, "Ambiguous"),
            AmbiguityLabel::Clear => write!(f, "Clear"),
            AmbiguityLabel::Unknown => write!(f, "Unknown"),
        }
    }
}

pub fn classify_ambiguity(raw: &str) -> AmbiguityLabel {
    let text = raw.to_lowercase();
    if text.contains("not ambiguous") || text.contains("unambiguous") {
        AmbiguityLabel::Clear
    } else if text.contains("ambiguous") {
        AmbiguityLabel::Ambiguous
    } else if text.split(|c: char| !c.is_alphabetic()).any(|word| word == "clear") {
        AmbiguityLabel::Clear
    } else {
        AmbiguityLabel::Unknown
    }
}

pub fn clean_text(raw: &str) -> String {
    let text = strip_assistant_header(raw).trim();
    strip_marker(text, &TEXT_MARKERS).trim().to_string()
}

/// An agent that renders one instruction, generates, and extracts the answer.
pub struct PromptAgent<'g> {
    name: String,
    generator: &'g dyn Generator,
    instruction: Instruction,
    format: PromptFormat,
    params: GenerationParams,
    extraction: Extraction,
    context: String,
}

impl<'g> PromptAgent<'g> {
    pub fn new(
        name: impl Into<String>,
        generator: &'g dyn Generator,
        instruction: Instruction,
        format: PromptFormat,
        params: GenerationParams,
        extraction: Extraction,
    ) -> Self {
        Self {
            name: name.into(),
            generator,
            instruction,
            format,
            params,
            extraction,
            context: String::new(),
        }
    }

    /// Context used when the caller supplies none.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    fn from_context(
        name: &str,
        ctx: &AgentContext<'g>,
        instruction_key: &str,
        default_max_tokens: u32,
        extraction: Extraction,
    ) -> Result<Self, BenchError> {
        let instruction = ctx.instructions.resolve(instruction_key)?.clone();
        Ok(Self::new(
            name,
            ctx.generator,
            instruction,
            ctx.format,
            ctx.params_for(default_max_tokens),
            extraction,
        ))
    }

    pub fn nl_to_sql(ctx: &AgentContext<'g>) -> Result<Self, BenchError> {
        let key = ctx.overrides.sql_key().unwrap_or(instructions::NL_TO_SQL);
        Ok(Self::from_context("nl_to_sql", ctx, key, 256, Extraction::Sql)?.with_context(ctx.schema_context))
    }

    pub fn ambiguity(ctx: &AgentContext<'g>) -> Result<Self, BenchError> {
        let key = ctx
            .overrides
            .ambiguity_key()
            .unwrap_or(instructions::AMBIGUITY_DETECTION);
        Self::from_context("ambiguity_detection", ctx, key, 256, Extraction::AmbiguityLabel)
    }

    pub fn summarization(ctx: &AgentContext<'g>) -> Result<Self, BenchError> {
        Self::from_context("summarization", ctx, instructions::SUMMARIZATION, 128, Extraction::Text)
    }

    pub fn nlq_refinement(ctx: &AgentContext<'g>) -> Result<Self, BenchError> {
        let key = ctx.overrides.nlq_key().unwrap_or(instructions::NLQ_REFINEMENT);
        Self::from_context("nlq_refinement", ctx, key, 256, Extraction::Text)
    }

    pub fn sql_generation(ctx: &AgentContext<'g>) -> Result<Self, BenchError> {
        let key = ctx.overrides.sql_key().unwrap_or(instructions::SQL_GENERATION);
        Self::from_context("sql_generation", ctx, key, 200, Extraction::Sql)
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    pub fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn build_prompt(&self, input: &str, context: &str) -> String {
        let rendered = self.instruction.render(input, context);
        self.format.assemble(&rendered)
    }
}

impl Agent for PromptAgent<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, input: &str) -> Result<String> {
        self.execute_with_context(input, &self.context)
    }

    fn execute_with_context(&self, input: &str, context: &str) -> Result<String> {
        let prompt = self.build_prompt(input, context);
        let generation = self
            .generator
            .generate(&prompt, &self.params)
            .with_context(|| format!("{} generation failed", self.name))?;
        debug!(
            agent = %self.name,
            completion_tokens = generation.completion_tokens,
            "generated in {:.2}s",
            generation.duration.as_secs_f64()
        );
        Ok(self.extraction.apply(&generation.text))
    }
}
