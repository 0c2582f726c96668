use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use llama_runner::{DevicePreference, GenerationParams};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::agent::{classify_ambiguity, Agent, AmbiguityLabel};
use crate::config::{InstructionOverrides, ModelEntry};
use crate::dataset::{load_test_cases, TestCase};
use crate::error::{BenchError, ErrorKind};
use crate::hub::ModelHub;
use crate::instructions::InstructionRegistry;
use crate::progress::ProgressTracker;
use crate::registry::{AgentContext, AgentRegistry, Task};
use crate::report::{partial_match, token_overlap, AgentResult, BenchmarkReport, ExactMatch, Scorer};
use crate::schema_context::SCHEMA_CONTEXT;
use crate::session::{Downloaded, ModelLoader, ModelSession, Ready};
use crate::util::PromptFormat;
use crate::writer::ResultWriter;

/// Knobs shared by every model and task of one run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub test_data_dir: PathBuf,
    pub device: DevicePreference,
    pub generation: GenerationParams,
    /// Replaces every agent's default `max_tokens` when set.
    pub max_tokens: Option<u32>,
    pub prompt_format: PromptFormat,
    pub schema_context: String,
    pub show_progress: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            test_data_dir: PathBuf::from("test_data"),
            device: DevicePreference::Auto,
            generation: GenerationParams::default(),
            max_tokens: None,
            prompt_format: PromptFormat::Plain,
            schema_context: SCHEMA_CONTEXT.to_string(),
            show_progress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairStatus {
    Completed {
        report_path: PathBuf,
        total: usize,
        passed: usize,
        failed: usize,
        avg_time_per_query: f64,
    },
    Failed {
        kind: ErrorKind,
        error: String,
    },
}

/// What happened to one model/task pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairOutcome {
    pub model_id: String,
    pub task: String,
    pub elapsed_time: f64,
    #[serde(flatten)]
    pub status: PairStatus,
}

impl PairOutcome {
    fn completed(report: &BenchmarkReport, report_path: PathBuf, elapsed: Duration) -> Self {
        Self {
            model_id: report.model_id.clone(),
            task: report.task.clone(),
            elapsed_time: elapsed.as_secs_f64(),
            status: PairStatus::Completed {
                report_path,
                total: report.total,
                passed: report.passed,
                failed: report.failed,
                avg_time_per_query: report.avg_time_per_query,
            },
        }
    }

    fn failed(model_id: &str, task: &str, err: &BenchError, elapsed: Duration) -> Self {
        Self {
            model_id: model_id.to_string(),
            task: task.to_string(),
            elapsed_time: elapsed.as_secs_f64(),
            status: PairStatus::Failed {
                kind: err.kind(),
                error: err.to_string(),
            },
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, PairStatus::Completed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub total_time: f64,
    pub models: usize,
    pub completed: usize,
    pub failed: usize,
    pub pairs: Vec<PairOutcome>,
    #[serde(skip)]
    pub summary_path: Option<PathBuf>,
}

impl RunSummary {
    fn new(started_at: DateTime<Utc>, elapsed: Duration, models: usize, pairs: Vec<PairOutcome>) -> Self {
        let completed = pairs.iter().filter(|pair| pair.is_completed()).count();
        Self {
            started_at,
            total_time: elapsed.as_secs_f64(),
            models,
            completed,
            failed: pairs.len() - completed,
            pairs,
            summary_path: None,
        }
    }

    /// Every pair ran to completion, whatever its pass rate.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Drives models through download, load and every selected task.
pub struct BenchmarkRunner<'r> {
    hub: Box<dyn ModelHub + 'r>,
    loader: Box<dyn ModelLoader + 'r>,
    registry: &'r AgentRegistry,
    instructions: &'r InstructionRegistry,
    scorer: Box<dyn Scorer + 'r>,
    writer: ResultWriter,
    settings: RunSettings,
}

impl<'r> BenchmarkRunner<'r> {
    pub fn new(
        hub: Box<dyn ModelHub + 'r>,
        loader: Box<dyn ModelLoader + 'r>,
        registry: &'r AgentRegistry,
        instructions: &'r InstructionRegistry,
        writer: ResultWriter,
        settings: RunSettings,
    ) -> Self {
        Self {
            hub,
            loader,
            registry,
            instructions,
            scorer: Box::new(ExactMatch::default()),
            writer,
            settings,
        }
    }

    pub fn with_scorer(mut self, scorer: Box<dyn Scorer + 'r>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn download(&self, model_id: &str) -> Result<ModelSession<Downloaded>, BenchError> {
        ModelSession::new(model_id).download(self.hub.as_ref())
    }

    pub fn load_inference_engine(&self, session: ModelSession<Downloaded>) -> Result<ModelSession<Ready>, BenchError> {
        session.load_inference_engine(self.loader.as_ref(), self.settings.device)
    }

    /// Build the agent for `task_name` on top of a loaded model.
    pub fn create_agent<'g>(
        &'g self,
        task_name: &str,
        session: &'g ModelSession<Ready>,
        overrides: &'g InstructionOverrides,
    ) -> Result<Box<dyn Agent + 'g>, BenchError> {
        let task = self.registry.resolve(task_name)?;
        let ctx = AgentContext {
            generator: session.generator(),
            instructions: self.instructions,
            overrides,
            schema_context: &self.settings.schema_context,
            params: self.settings.generation.clone(),
            max_tokens: self.settings.max_tokens,
            format: self.settings.prompt_format,
        };
        self.registry.build(&task, &ctx).map_err(|err| match err.downcast::<BenchError>() {
            Ok(bench) => bench,
            Err(other) => BenchError::Agent {
                agent: task_name.to_string(),
                message: format!("{other:#}"),
            },
        })
    }

    /// Run every case in order; a failing case is recorded and iteration continues.
    pub fn run_tests(&self, agent: &dyn Agent, cases: &[TestCase], model_id: &str, task: &str) -> BenchmarkReport {
        let mut report = BenchmarkReport::new(model_id, task, self.scorer.name());
        let mut progress = ProgressTracker::new(cases.len(), self.settings.show_progress);
        let tally_labels = task == Task::AmbiguityIntent.name();

        for (idx, case) in cases.iter().enumerate() {
            let start = Instant::now();
            let outcome = agent.execute_traced(&case.input);
            let elapsed_time = start.elapsed().as_secs_f64();

            let result = match outcome {
                Ok(execution) => AgentResult {
                    passed: self.scorer.passed(&execution.output, &case.expected_output),
                    similarity: token_overlap(&execution.output, &case.expected_output),
                    partial_match: partial_match(&execution.output, &case.expected_output),
                    input: case.input.clone(),
                    expected: case.expected_output.clone(),
                    output: execution.output,
                    elapsed_time,
                    error: None,
                    stages: execution.stages,
                },
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!("Case {} of {} failed: {}", idx + 1, task, message);
                    AgentResult {
                        input: case.input.clone(),
                        expected: case.expected_output.clone(),
                        output: format!("ERROR: {message}"),
                        elapsed_time,
                        passed: false,
                        error: Some(message),
                        similarity: 0.0,
                        partial_match: false,
                        stages: None,
                    }
                }
            };
            progress.record(result.passed);
            if tally_labels {
                let label = match result.error {
                    Some(_) => AmbiguityLabel::Unknown,
                    None => classify_ambiguity(&result.output),
                };
                report.count_label(label.to_string());
            }
            report.push(result);
        }

        progress.finish();
        report.finalize();
        info!(
            "{} on {}: {}/{} passed ({:.1}%), {:.2}s per query",
            task,
            model_id,
            report.passed,
            report.total,
            report.pass_rate() * 100.0,
            report.avg_time_per_query
        );
        report
    }

    #[instrument(skip_all, fields(model = %session.model_id(), task = %task_name))]
    pub fn run_task(
        &self,
        session: &ModelSession<Ready>,
        entry: &ModelEntry,
        task_name: &str,
    ) -> Result<(BenchmarkReport, PathBuf), BenchError> {
        let task = self.registry.resolve(task_name)?;
        let cases = load_test_cases(&task.test_data_file(&self.settings.test_data_dir))?;
        info!("Running {} test cases", cases.len());

        let mut agent = self.create_agent(task_name, session, &entry.instructions)?;
        agent.setup().map_err(|err| BenchError::Agent {
            agent: agent.name().to_string(),
            message: format!("setup failed: {err:#}"),
        })?;

        let mut report = self.run_tests(agent.as_ref(), &cases, session.model_id(), task.name());
        report.instruction_keys = task.instruction_keys(&entry.instructions);

        if let Err(err) = agent.teardown() {
            warn!("Teardown of {} failed: {:#}", agent.name(), err);
        }
        let path = self.writer.write_report(&report)?;
        Ok((report, path))
    }

    /// All pairs for one model. Only a serialization failure is returned as `Err`.
    #[instrument(skip_all, fields(model = %entry.model_id))]
    pub fn run_model(&self, entry: &ModelEntry, tasks: &[String]) -> Result<Vec<PairOutcome>, BenchError> {
        let start = Instant::now();
        let session = match self
            .download(&entry.model_id)
            .and_then(|session| self.load_inference_engine(session))
        {
            Ok(session) => session,
            Err(err) => {
                error!("Skipping {}: {}", entry.model_id, err);
                return Ok(tasks
                    .iter()
                    .map(|task| PairOutcome::failed(&entry.model_id, task, &err, start.elapsed()))
                    .collect());
            }
        };

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            let pair_start = Instant::now();
            match self.run_task(&session, entry, task) {
                Ok((report, path)) => outcomes.push(PairOutcome::completed(&report, path, pair_start.elapsed())),
                Err(err) if err.is_fatal() => {
                    session.cleanup();
                    return Err(err);
                }
                Err(err) => {
                    error!("{} failed for {}: {}", task, entry.model_id, err);
                    outcomes.push(PairOutcome::failed(&entry.model_id, task, &err, pair_start.elapsed()));
                }
            }
        }

        session.cleanup();
        info!("Released {} after {:.2}s", entry.model_id, start.elapsed().as_secs_f64());
        Ok(outcomes)
    }

    /// Task names for this run, each once, in request order. Without a
    /// selection, every registered task that has test data.
    pub fn plan_tasks(&self, requested: Option<&[String]>) -> Vec<String> {
        if let Some(requested) = requested {
            let mut seen = HashSet::new();
            return requested
                .iter()
                .filter(|task| {
                    let first = seen.insert(task.as_str());
                    if !first {
                        warn!("Ignoring repeated task {}", task);
                    }
                    first
                })
                .cloned()
                .collect();
        }
        self.registry
            .registered_tasks()
            .into_iter()
            .filter(|task| {
                let path = task.test_data_file(&self.settings.test_data_dir);
                let present = path.is_file();
                if !present {
                    warn!("Skipping {}: no test data at {}", task, path.display());
                }
                present
            })
            .map(|task| task.name().to_string())
            .collect()
    }

    pub fn run(&self, models: &[ModelEntry], tasks: Option<&[String]>) -> Result<RunSummary, BenchError> {
        let started_at = Utc::now();
        let start = Instant::now();
        let tasks = self.plan_tasks(tasks);
        info!("Benchmarking {} model(s) on {} task(s)", models.len(), tasks.len());

        let mut pairs = Vec::new();
        for entry in models {
            pairs.extend(self.run_model(entry, &tasks)?);
        }

        let mut summary = RunSummary::new(started_at, start.elapsed(), models.len(), pairs);
        summary.summary_path = Some(self.writer.write_summary(&summary, started_at)?);
        info!("{} pair(s) completed, {} failed", summary.completed, summary.failed);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::Path;

    use llama_runner::{Device, Generation, Generator};

    struct NoHub;

    impl ModelHub for NoHub {
        fn download(&self, model_id: &str) -> Result<PathBuf, BenchError> {
            Ok(PathBuf::from(model_id))
        }
    }

    struct NoLoader;

    impl ModelLoader for NoLoader {
        fn load(&self, _: &Path, _: DevicePreference) -> Result<(Box<dyn Generator>, Device), BenchError> {
            struct Mute;
            impl Generator for Mute {
                fn generate(&self, _: &str, _: &GenerationParams) -> anyhow::Result<Generation> {
                    Ok(Generation::default())
                }
            }
            Ok((Box::new(Mute), Device::Cpu))
        }
    }

    /// Answers by lookup; unknown inputs raise.
    struct Lookup {
        seen: RefCell<Vec<String>>,
    }

    impl Agent for Lookup {
        fn name(&self) -> &str {
            "lookup"
        }

        fn execute_with_context(&self, input: &str, _: &str) -> anyhow::Result<String> {
            self.seen.borrow_mut().push(input.to_string());
            match input {
                "Count orders" => Ok("SELECT COUNT(*) FROM orders".to_string()),
                "List customers" => Ok("select * from customers".to_string()),
                other => anyhow::bail!("no answer for '{other}'"),
            }
        }
    }

    fn runner<'r>(registry: &'r AgentRegistry, instructions: &'r InstructionRegistry, dir: &Path) -> BenchmarkRunner<'r> {
        BenchmarkRunner::new(
            Box::new(NoHub),
            Box::new(NoLoader),
            registry,
            instructions,
            ResultWriter::new(dir.join("results")),
            RunSettings {
                test_data_dir: dir.join("test_data"),
                show_progress: false,
                ..RunSettings::default()
            },
        )
    }

    #[test]
    fn failing_cases_are_isolated_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::new();
        let instructions = InstructionRegistry::new();
        let runner = runner(&registry, &instructions, dir.path());
        let agent = Lookup {
            seen: RefCell::new(Vec::new()),
        };
        let cases = vec![
            TestCase::new("Count orders", "SELECT COUNT(*) FROM orders"),
            TestCase::new("bad row", ""),
            TestCase::new("List customers", "SELECT * FROM customers"),
        ];

        let report = runner.run_tests(&agent, &cases, "org/model", "nl_to_sql");

        assert_eq!(report.total, 3);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.errors, 1);
        assert!(report.results[1].output.starts_with("ERROR:"));
        assert!(report.results[1].error.as_deref().unwrap().contains("bad row"));
        // case matters
        assert!(!report.results[2].passed);
        assert_eq!(*agent.seen.borrow(), vec!["Count orders", "bad row", "List customers"]);
    }

    #[test]
    fn plan_skips_tasks_without_test_data() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("test_data")).unwrap();
        std::fs::write(dir.path().join("test_data/nl_to_sql.csv"), "input,expected_output\n").unwrap();
        let registry = AgentRegistry::new();
        let instructions = InstructionRegistry::new();
        let runner = runner(&registry, &instructions, dir.path());

        assert_eq!(runner.plan_tasks(None), vec!["nl_to_sql", "nlq_sql_pipeline"]);
        let requested = vec!["bogus".to_string()];
        assert_eq!(runner.plan_tasks(Some(requested.as_slice())), requested);
    }

    #[test]
    fn repeated_tasks_are_planned_once_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::new();
        let instructions = InstructionRegistry::new();
        let runner = runner(&registry, &instructions, dir.path());

        let requested: Vec<String> = ["summarization", "nl_to_sql", "summarization", "nl_to_sql"]
            .iter()
            .map(|task| task.to_string())
            .collect();

        assert_eq!(
            runner.plan_tasks(Some(requested.as_slice())),
            vec!["summarization", "nl_to_sql"]
        );
    }

    /// Replies with a fixed classification per input.
    struct Classifier;

    impl Agent for Classifier {
        fn name(&self) -> &str {
            "classifier"
        }

        fn execute_with_context(&self, input: &str, _: &str) -> anyhow::Result<String> {
            match input {
                "Show volume" | "Show sales" => Ok("Ambiguous".to_string()),
                "Count orders today" => Ok("Clear".to_string()),
                other => anyhow::bail!("ambiguous failure on '{other}'"),
            }
        }
    }

    #[test]
    fn ambiguity_reports_count_labels() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::new();
        let instructions = InstructionRegistry::new();
        let runner = runner(&registry, &instructions, dir.path());
        let cases = vec![
            TestCase::new("Show volume", "Ambiguous"),
            TestCase::new("Count orders today", "Clear"),
            TestCase::new("Show sales", "Clear"),
            TestCase::new("???", "Ambiguous"),
        ];

        let report = runner.run_tests(&Classifier, &cases, "org/model", "ambiguity_intent");

        assert_eq!(report.label_counts["Ambiguous"], 2);
        assert_eq!(report.label_counts["Clear"], 1);
        assert_eq!(report.label_counts["Unknown"], 1);
        assert_eq!(report.passed, 2);

        let sql = runner.run_tests(&Classifier, &cases, "org/model", "nl_to_sql");
        assert!(sql.label_counts.is_empty());
    }

    #[test]
    fn report_records_resolved_instruction_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("test_data")).unwrap();
        std::fs::write(dir.path().join("test_data/nl_to_sql.csv"), "input,expected_output\nCount orders,\n").unwrap();
        let registry = AgentRegistry::new();
        let mut instructions = InstructionRegistry::new();
        let key = instructions.add_custom("terse_sql", "", "{input}", "");
        let runner = runner(&registry, &instructions, dir.path());
        let mut entry = ModelEntry::new("org/model");
        entry.instructions.sql_instruction_key = Some(key.clone());

        let session = runner
            .load_inference_engine(runner.download(&entry.model_id).unwrap())
            .unwrap();
        let (report, path) = runner.run_task(&session, &entry, "nlq_sql_pipeline").unwrap();

        assert_eq!(report.instruction_keys["nlq"], "nlq_refinement");
        assert_eq!(report.instruction_keys["sql"], key);
        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["instruction_keys"]["sql"], "custom_terse_sql");
    }

    #[test]
    fn unknown_task_fails_only_its_pair() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("test_data")).unwrap();
        std::fs::write(dir.path().join("test_data/summarization.csv"), "input,expected_output\n").unwrap();
        let registry = AgentRegistry::new();
        let instructions = InstructionRegistry::new();
        let runner = runner(&registry, &instructions, dir.path());

        let outcomes = runner
            .run_model(
                &ModelEntry::new("org/model"),
                &["bogus".to_string(), "summarization".to_string()],
            )
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(matches!(
            outcomes[0].status,
            PairStatus::Failed { kind: ErrorKind::Config, .. }
        ));
        assert!(outcomes[1].is_completed());
    }

    #[test]
    fn summary_serializes_status_inline() {
        let outcome = PairOutcome::failed(
            "org/model",
            "nl_to_sql",
            &BenchError::Download {
                model: "org/model".into(),
                message: "offline".into(),
            },
            Duration::from_millis(5),
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "resource");
        assert_eq!(json["task"], "nl_to_sql");
    }
}
