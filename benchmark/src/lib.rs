pub mod agent;
pub mod config;
pub mod dataset;
pub mod error;
pub mod hub;
pub mod instructions;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod report;
pub mod runner;
pub mod schema_context;
pub mod session;
pub mod util;
pub mod writer;

pub use agent::{Agent, Execution, PromptAgent};
pub use config::{InstructionOverrides, ModelEntry, RunConfig};
pub use dataset::TestCase;
pub use error::{BenchError, ErrorKind};
pub use hub::{HfModelHub, ModelHub};
pub use instructions::{Instruction, InstructionRegistry};
pub use pipeline::{NlqSqlPipeline, PipelineResult};
pub use registry::{AgentContext, AgentRegistry, Task};
pub use report::{AgentResult, BenchmarkReport, ExactMatch, Scorer};
pub use runner::{BenchmarkRunner, PairOutcome, PairStatus, RunSettings, RunSummary};
pub use session::{LlamaLoader, ModelLoader, ModelSession};
pub use writer::ResultWriter;
