use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use llama_runner::{DevicePreference, GenerationParams, LlamaConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use llm_bench::config::RunConfig;
use llm_bench::dataset::load_model_list;
use llm_bench::schema_context::load_schema_context;
use llm_bench::util::PromptFormat;
use llm_bench::{
    AgentRegistry, BenchmarkRunner, HfModelHub, InstructionRegistry, LlamaLoader, ModelEntry, ResultWriter,
    RunSettings,
};

#[derive(Debug, Parser)]
#[command(name = "llm-bench", version, about = "Benchmark local GGUF models on NL-to-SQL and ambiguity test sets")]
struct Cli {
    /// Benchmark only this model instead of the model list
    #[arg(long)]
    model: Option<String>,

    /// Comma separated task names
    #[arg(long, value_delimiter = ',')]
    tasks: Option<Vec<String>>,

    #[arg(long, default_value = "models.txt")]
    models_file: PathBuf,

    /// JSON run configuration
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    test_data_dir: Option<PathBuf>,

    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Model cache directory
    #[arg(long, env = "LLM_BENCH_MODELS_DIR", default_value = "./models")]
    models_dir: PathBuf,

    /// File replacing the built-in schema context
    #[arg(long)]
    schema_context: Option<PathBuf>,

    #[arg(long, default_value = "auto")]
    device: DevicePreference,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long)]
    top_p: Option<f32>,

    #[arg(long)]
    max_tokens: Option<u32>,

    #[arg(long)]
    seed: Option<u32>,

    #[arg(long, default_value_t = 4096)]
    ctx_size: u32,

    #[arg(long, default_value_t = 4)]
    threads: i32,

    #[arg(long, default_value = "plain")]
    prompt_format: PromptFormat,

    #[arg(long)]
    no_progress: bool,

    #[arg(long)]
    list_tasks: bool,

    #[arg(long)]
    list_instructions: bool,
}

impl Cli {
    fn generation(&self, config: &RunConfig) -> GenerationParams {
        let defaults = GenerationParams::default();
        let generation = &config.generation;
        GenerationParams {
            max_tokens: defaults.max_tokens,
            temperature: self.temperature.or(generation.temperature).unwrap_or(defaults.temperature),
            top_p: self.top_p.or(generation.top_p).unwrap_or(defaults.top_p),
            seed: self.seed.or(generation.seed).unwrap_or(defaults.seed),
        }
    }

    /// `--model` wins over the config file, which wins over the model list.
    fn models(&self, config: &RunConfig) -> Result<Vec<ModelEntry>> {
        if let Some(model_id) = &self.model {
            let entry = config
                .models
                .iter()
                .find(|entry| &entry.model_id == model_id)
                .cloned()
                .unwrap_or_else(|| ModelEntry::new(model_id.clone()));
            return Ok(vec![entry]);
        }
        if !config.models.is_empty() {
            return Ok(config.enabled_models().cloned().collect());
        }
        let ids = load_model_list(&self.models_file)?;
        Ok(ids.into_iter().map(ModelEntry::new).collect())
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<ExitCode> {
    init_logging();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };

    let mut instructions = InstructionRegistry::new();
    for key in config.register_instructions(&mut instructions) {
        info!("Registered instruction {}", key);
    }
    let registry = AgentRegistry::new();

    if cli.list_tasks || cli.list_instructions {
        if cli.list_tasks {
            for task in registry.registered_tasks() {
                println!("{task}");
            }
        }
        if cli.list_instructions {
            for (key, description) in instructions.list() {
                println!("{key:<24} {description}");
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let models = cli.models(&config)?;
    if models.is_empty() {
        bail!("no models to benchmark; pass --model or fill {}", cli.models_file.display());
    }
    for entry in &models {
        if let Err(err) = entry.instructions.validate(&instructions) {
            warn!("{}: {}", entry.model_id, err);
        }
    }

    let test_data_dir = cli
        .test_data_dir
        .clone()
        .or_else(|| config.test_data_dir.clone())
        .unwrap_or_else(|| PathBuf::from("test_data"));
    let results_dir = cli
        .results_dir
        .clone()
        .or_else(|| config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("results"));
    let tasks = cli.tasks.clone().or_else(|| config.tasks.clone());

    let settings = RunSettings {
        test_data_dir,
        device: cli.device,
        generation: cli.generation(&config),
        max_tokens: cli.max_tokens.or(config.generation.max_tokens),
        prompt_format: cli.prompt_format,
        schema_context: load_schema_context(cli.schema_context.as_deref())?,
        show_progress: !cli.no_progress,
    };

    let mut llama_config = LlamaConfig::new().with_device(cli.device);
    llama_config.context_size = cli.ctx_size;
    llama_config.threads = cli.threads;

    info!("Model cache: {}", cli.models_dir.display());
    let runner = BenchmarkRunner::new(
        Box::new(HfModelHub::from_env(&cli.models_dir).with_progress(settings.show_progress)),
        Box::new(LlamaLoader::new(llama_config)),
        &registry,
        &instructions,
        ResultWriter::new(results_dir),
        settings,
    );

    let summary = runner
        .run(&models, tasks.as_deref())
        .context("benchmark run aborted")?;

    if summary.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("{} of {} pair(s) failed", summary.failed, summary.pairs.len());
        Ok(ExitCode::FAILURE)
    }
}
