use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::{Agent, Execution};

/// Seconds spent in each pipeline stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    pub nlq_time: f64,
    pub sql_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub original_query: String,
    pub refined_query: String,
    pub sql: String,
    pub stage_timings: StageTimings,
    pub total_time: f64,
}

/// Query refinement followed by SQL generation.
///
/// The refined query is handed to the SQL stage as is, even when empty.
pub struct NlqSqlPipeline<'a> {
    refiner: Box<dyn Agent + 'a>,
    sql_agent: Box<dyn Agent + 'a>,
    context: String,
}

impl<'a> NlqSqlPipeline<'a> {
    pub fn new(refiner: Box<dyn Agent + 'a>, sql_agent: Box<dyn Agent + 'a>) -> Self {
        Self {
            refiner,
            sql_agent,
            context: String::new(),
        }
    }

    /// Context shared by both stages when [`Agent::execute`] is used.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn run(&self, user_query: &str, context: &str) -> Result<PipelineResult> {
        let start = Instant::now();
        let refined_query = self
            .refiner
            .execute_with_context(user_query, context)
            .with_context(|| format!("{} stage failed", self.refiner.name()))?;
        let nlq_time = start.elapsed().as_secs_f64();
        debug!("Refined query: {}", refined_query);

        let start = Instant::now();
        let sql = self
            .sql_agent
            .execute_with_context(&refined_query, context)
            .with_context(|| format!("{} stage failed", self.sql_agent.name()))?;
        let sql_time = start.elapsed().as_secs_f64();

        Ok(PipelineResult {
            original_query: user_query.to_string(),
            refined_query,
            sql,
            stage_timings: StageTimings { nlq_time, sql_time },
            total_time: nlq_time + sql_time,
        })
    }
}

impl Agent for NlqSqlPipeline<'_> {
    fn name(&self) -> &str {
        "nlq_sql_pipeline"
    }

    fn setup(&mut self) -> Result<()> {
        self.refiner.setup()?;
        self.sql_agent.setup()
    }

    fn execute(&self, input: &str) -> Result<String> {
        self.execute_with_context(input, &self.context)
    }

    fn execute_with_context(&self, input: &str, context: &str) -> Result<String> {
        Ok(self.run(input, context)?.sql)
    }

    fn execute_traced(&self, input: &str) -> Result<Execution> {
        let result = self.run(input, &self.context)?;
        Ok(Execution {
            output: result.sql.clone(),
            stages: Some(result),
        })
    }

    fn teardown(&mut self) -> Result<()> {
        let refiner = self.refiner.teardown();
        let sql_agent = self.sql_agent.teardown();
        refiner.and(sql_agent)
    }
}
