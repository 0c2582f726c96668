use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::BenchError;
use crate::report::BenchmarkReport;
use crate::util::sanitize_model_id;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Writes reports and run summaries as pretty JSON into one directory.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    output_dir: PathBuf,
}

impl ResultWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `<task>_<model>_<timestamp>.json`
    pub fn report_path(&self, report: &BenchmarkReport) -> PathBuf {
        self.output_dir.join(format!(
            "{}_{}_{}.json",
            report.task,
            sanitize_model_id(&report.model_id),
            report.timestamp.format(TIMESTAMP_FORMAT)
        ))
    }

    pub fn write_report(&self, report: &BenchmarkReport) -> Result<PathBuf, BenchError> {
        let path = self.report_path(report);
        self.write_json(&path, report)?;
        info!("Report written to {}", path.display());
        Ok(path)
    }

    pub fn write_summary<T: Serialize>(&self, summary: &T, timestamp: DateTime<Utc>) -> Result<PathBuf, BenchError> {
        let path = self
            .output_dir
            .join(format!("run_summary_{}.json", timestamp.format(TIMESTAMP_FORMAT)));
        self.write_json(&path, summary)?;
        info!("Run summary written to {}", path.display());
        Ok(path)
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), BenchError> {
        fs::create_dir_all(&self.output_dir).map_err(|e| BenchError::serialization(&self.output_dir, e))?;
        let file = File::create(path).map_err(|e| BenchError::serialization(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value).map_err(|e| BenchError::serialization(path, e))?;
        writer.flush().map_err(|e| BenchError::serialization(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lands_under_task_and_model_name() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(dir.path().join("results"));
        let mut report = BenchmarkReport::new("org/model:q4.gguf", "nl_to_sql", "exact_match_trimmed");
        report.finalize();

        let path = writer.write_report(&report).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("nl_to_sql_org_model_q4.gguf_"), "{name}");
        let parsed: BenchmarkReport = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.model_id, "org/model:q4.gguf");
        assert_eq!(parsed.total, 0);
    }

    #[test]
    fn unwritable_directory_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "not a directory").unwrap();
        let writer = ResultWriter::new(blocker.join("results"));

        let err = writer.write_summary(&serde_json::json!({}), Utc::now()).unwrap_err();

        assert!(err.is_fatal());
    }
}
