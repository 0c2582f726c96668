//! Task names and the agents that serve them.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use llama_runner::{GenerationParams, Generator};

use crate::agent::{Agent, PromptAgent};
use crate::config::InstructionOverrides;
use crate::error::BenchError;
use crate::instructions::{self, InstructionRegistry};
use crate::pipeline::NlqSqlPipeline;
use crate::util::PromptFormat;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Task {
    NlToSql,
    AmbiguityIntent,
    Summarization,
    NlqSqlPipeline,
    Custom(String),
}

static BUILTINS: [Task; 4] = [
    Task::NlToSql,
    Task::AmbiguityIntent,
    Task::Summarization,
    Task::NlqSqlPipeline,
];

impl Task {
    pub fn builtins() -> &'static [Task] {
        &BUILTINS
    }

    pub fn from_builtin(name: &str) -> Option<Task> {
        match name {
            "nl_to_sql" => Some(Task::NlToSql),
            "ambiguity_intent" => Some(Task::AmbiguityIntent),
            "summarization" => Some(Task::Summarization),
            "nlq_sql_pipeline" => Some(Task::NlqSqlPipeline),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Task::NlToSql => "nl_to_sql",
            Task::AmbiguityIntent => "ambiguity_intent",
            Task::Summarization => "summarization",
            Task::NlqSqlPipeline => "nlq_sql_pipeline",
            Task::Custom(name) => name,
        }
    }

    /// Test-data file of this task inside `test_data_dir`.
    pub fn test_data_file(&self, test_data_dir: &Path) -> PathBuf {
        let file = match self {
            // the pipeline is scored against the single-step SQL set
            Task::NlqSqlPipeline => "nl_to_sql".to_string(),
            other => other.name().to_string(),
        };
        test_data_dir.join(format!("{file}.csv"))
    }

    /// Instruction key used per agent role, after model overrides.
    /// Custom tasks choose their own prompts and report none.
    pub fn instruction_keys(&self, overrides: &InstructionOverrides) -> BTreeMap<String, String> {
        let sql = overrides.sql_key();
        let roles = match self {
            Task::NlToSql => vec![("sql", sql.unwrap_or(instructions::NL_TO_SQL))],
            Task::AmbiguityIntent => vec![(
                "ambiguity",
                overrides.ambiguity_key().unwrap_or(instructions::AMBIGUITY_DETECTION),
            )],
            Task::Summarization => vec![("summarization", instructions::SUMMARIZATION)],
            Task::NlqSqlPipeline => vec![
                ("nlq", overrides.nlq_key().unwrap_or(instructions::NLQ_REFINEMENT)),
                ("sql", sql.unwrap_or(instructions::SQL_GENERATION)),
            ],
            Task::Custom(_) => Vec::new(),
        };
        roles
            .into_iter()
            .map(|(role, key)| (role.to_string(), key.to_string()))
            .collect()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything an agent constructor may draw on.
pub struct AgentContext<'g> {
    pub generator: &'g dyn Generator,
    pub instructions: &'g InstructionRegistry,
    pub overrides: &'g InstructionOverrides,
    pub schema_context: &'g str,
    pub params: GenerationParams,
    /// Overrides every agent's own `max_tokens` default.
    pub max_tokens: Option<u32>,
    pub format: PromptFormat,
}

impl AgentContext<'_> {
    pub fn params_for(&self, default_max_tokens: u32) -> GenerationParams {
        self.params
            .clone()
            .with_max_tokens(self.max_tokens.unwrap_or(default_max_tokens))
    }
}

pub type AgentConstructor = for<'g> fn(&AgentContext<'g>) -> anyhow::Result<Box<dyn Agent + 'g>>;

/// Constructors for tasks beyond the built-in set.
#[derive(Default)]
pub struct AgentRegistry {
    custom: BTreeMap<String, AgentConstructor>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom task. Built-in names cannot be replaced.
    pub fn register(&mut self, name: impl Into<String>, constructor: AgentConstructor) -> Result<(), BenchError> {
        let name = name.into();
        if Task::from_builtin(&name).is_some() {
            return Err(BenchError::Config(format!("'{name}' is a built-in task")));
        }
        self.custom.insert(name, constructor);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Task, BenchError> {
        if let Some(task) = Task::from_builtin(name) {
            return Ok(task);
        }
        if self.custom.contains_key(name) {
            return Ok(Task::Custom(name.to_string()));
        }
        Err(BenchError::UnknownTask(name.to_string()))
    }

    /// Built-ins first, then custom tasks by name.
    pub fn registered_tasks(&self) -> Vec<Task> {
        Task::builtins()
            .iter()
            .cloned()
            .chain(self.custom.keys().cloned().map(Task::Custom))
            .collect()
    }

    pub fn build<'g>(&self, task: &Task, ctx: &AgentContext<'g>) -> anyhow::Result<Box<dyn Agent + 'g>> {
        let agent: Box<dyn Agent + 'g> = match task {
            Task::NlToSql => Box::new(PromptAgent::nl_to_sql(ctx)?),
            Task::AmbiguityIntent => Box::new(PromptAgent::ambiguity(ctx)?),
            Task::Summarization => Box::new(PromptAgent::summarization(ctx)?),
            Task::NlqSqlPipeline => Box::new(
                NlqSqlPipeline::new(
                    Box::new(PromptAgent::nlq_refinement(ctx)?),
                    Box::new(PromptAgent::sql_generation(ctx)?),
                )
                .with_context(ctx.schema_context),
            ),
            Task::Custom(name) => {
                let constructor = self
                    .custom
                    .get(name)
                    .ok_or_else(|| BenchError::UnknownTask(name.clone()))?;
                constructor(ctx)?
            }
        };
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llama_runner::Generation;

    struct Silent;

    impl Generator for Silent {
        fn generate(&self, _: &str, _: &GenerationParams) -> anyhow::Result<Generation> {
            Ok(Generation::default())
        }
    }

    struct Upper;

    impl Agent for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn execute_with_context(&self, input: &str, _: &str) -> anyhow::Result<String> {
            Ok(input.to_uppercase())
        }
    }

    fn upper<'g>(_: &AgentContext<'g>) -> anyhow::Result<Box<dyn Agent + 'g>> {
        Ok(Box::new(Upper))
    }

    #[test]
    fn builtin_names_round_trip() {
        for task in Task::builtins() {
            assert_eq!(Task::from_builtin(task.name()).as_ref(), Some(task));
        }
    }

    #[test]
    fn instruction_keys_follow_overrides() {
        let overrides = InstructionOverrides {
            sql_instruction_key: Some("custom_terse_sql".into()),
            ..InstructionOverrides::default()
        };

        let pipeline = Task::NlqSqlPipeline.instruction_keys(&overrides);
        assert_eq!(pipeline["nlq"], instructions::NLQ_REFINEMENT);
        assert_eq!(pipeline["sql"], "custom_terse_sql");

        let defaults = InstructionOverrides::default();
        assert_eq!(Task::NlqSqlPipeline.instruction_keys(&defaults)["sql"], instructions::SQL_GENERATION);
        assert_eq!(Task::AmbiguityIntent.instruction_keys(&defaults)["ambiguity"], instructions::AMBIGUITY_DETECTION);
        assert!(Task::Custom("echo".into()).instruction_keys(&defaults).is_empty());
    }

    #[test]
    fn pipeline_reads_sql_test_data() {
        let dir = Path::new("test_data");
        assert_eq!(Task::NlqSqlPipeline.test_data_file(dir), dir.join("nl_to_sql.csv"));
        assert_eq!(Task::Custom("echo".into()).test_data_file(dir), dir.join("echo.csv"));
    }

    #[test]
    fn unknown_names_are_config_errors() {
        let registry = AgentRegistry::new();
        assert!(matches!(registry.resolve("translate"), Err(BenchError::UnknownTask(_))));
    }

    #[test]
    fn custom_tasks_are_resolved_and_built() {
        let mut registry = AgentRegistry::new();
        registry.register("shout", upper).unwrap();
        assert!(registry.register("nl_to_sql", upper).is_err());

        let task = registry.resolve("shout").unwrap();
        assert_eq!(task, Task::Custom("shout".into()));
        assert_eq!(registry.registered_tasks().len(), 5);

        let instructions = InstructionRegistry::new();
        let overrides = InstructionOverrides::default();
        let ctx = AgentContext {
            generator: &Silent,
            instructions: &instructions,
            overrides: &overrides,
            schema_context: "",
            params: GenerationParams::default(),
            max_tokens: None,
            format: PromptFormat::Plain,
        };
        let agent = registry.build(&task, &ctx).unwrap();
        assert_eq!(agent.execute("hi").unwrap(), "HI");

        let pipeline = registry.build(&Task::NlqSqlPipeline, &ctx).unwrap();
        assert_eq!(pipeline.name(), "nlq_sql_pipeline");
    }

    #[test]
    fn max_tokens_override_wins() {
        let instructions = InstructionRegistry::new();
        let overrides = InstructionOverrides::default();
        let mut ctx = AgentContext {
            generator: &Silent,
            instructions: &instructions,
            overrides: &overrides,
            schema_context: "",
            params: GenerationParams::default(),
            max_tokens: None,
            format: PromptFormat::Plain,
        };
        assert_eq!(ctx.params_for(128).max_tokens, 128);
        ctx.max_tokens = Some(32);
        assert_eq!(ctx.params_for(128).max_tokens, 32);
    }
}
