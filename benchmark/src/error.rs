use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures the runner has to classify: a configuration error sinks one
/// model/task pair, a resource error sinks one model, a serialization error
/// sinks the whole run.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("unknown task '{0}'")]
    UnknownTask(String),

    #[error("unknown instruction '{0}'")]
    UnknownInstruction(String),

    #[error("test data not found: {}", .0.display())]
    MissingTestData(PathBuf),

    #[error("malformed test data in {}: {message}", path.display())]
    MalformedTestData { path: PathBuf, message: String },

    #[error("agent '{agent}' failed: {message}")]
    Agent { agent: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("download failed for {model}: {message}")]
    Download { model: String, message: String },

    #[error("failed to load {model}: {message}")]
    Load { model: String, message: String },

    #[error("failed to write {}: {message}", path.display())]
    Serialization { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Resource,
    Serialization,
}

impl BenchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BenchError::UnknownTask(_)
            | BenchError::UnknownInstruction(_)
            | BenchError::MissingTestData(_)
            | BenchError::MalformedTestData { .. }
            | BenchError::Agent { .. }
            | BenchError::Config(_) => ErrorKind::Config,
            BenchError::Download { .. } | BenchError::Load { .. } => ErrorKind::Resource,
            BenchError::Serialization { .. } => ErrorKind::Serialization,
        }
    }

    /// Whether the whole run has to stop.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Serialization
    }

    pub(crate) fn serialization(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        BenchError::Serialization {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert_eq!(BenchError::UnknownTask("x".into()).kind(), ErrorKind::Config);
        let download = BenchError::Download {
            model: "org/model".into(),
            message: "offline".into(),
        };
        assert_eq!(download.kind(), ErrorKind::Resource);
        assert!(!download.is_fatal());
        assert!(BenchError::serialization("results", "read-only").is_fatal());
    }

    #[test]
    fn messages_name_the_subject() {
        let err = BenchError::MissingTestData(PathBuf::from("test_data/nl_to_sql.csv"));
        assert_eq!(err.to_string(), "test data not found: test_data/nl_to_sql.csv");
    }
}
