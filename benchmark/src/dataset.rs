use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BenchError;

const INPUT_COLUMN: &str = "input";
const EXPECTED_COLUMN: &str = "expected_output";

/// One row of a task's test data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
        }
    }
}

/// Column positions resolved from the header row.
struct Columns {
    input: usize,
    expected: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord, path: &Path) -> Result<Self, BenchError> {
        let position = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').trim().eq_ignore_ascii_case(name))
        };
        let input = position(INPUT_COLUMN).ok_or_else(|| BenchError::MalformedTestData {
            path: path.to_path_buf(),
            message: format!("missing required column '{INPUT_COLUMN}'"),
        })?;
        Ok(Self {
            input,
            expected: position(EXPECTED_COLUMN),
        })
    }

    fn parse_record(&self, record: &csv::StringRecord, row: usize, path: &Path) -> Result<TestCase, BenchError> {
        let input = record.get(self.input).ok_or_else(|| BenchError::MalformedTestData {
            path: path.to_path_buf(),
            message: format!("row {row} has no '{INPUT_COLUMN}' field"),
        })?;
        let expected = self
            .expected
            .and_then(|idx| record.get(idx))
            .unwrap_or_default();
        Ok(TestCase::new(input, expected))
    }
}

fn is_blank(record: &csv::StringRecord) -> bool {
    record.iter().all(|field| field.trim().is_empty())
}

/// Read test cases from any reader; `origin` only names the source in errors.
pub fn read_test_cases<R: Read>(reader: R, delimiter: u8, origin: &Path) -> Result<Vec<TestCase>, BenchError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| BenchError::MalformedTestData {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?
        .clone();
    let columns = Columns::from_headers(&headers, origin)?;

    let mut cases = Vec::new();
    for (idx, result) in csv_reader.records().enumerate() {
        // header is line 1
        let row = idx + 2;
        let record = result.map_err(|e| BenchError::MalformedTestData {
            path: origin.to_path_buf(),
            message: format!("row {row}: {e}"),
        })?;
        if is_blank(&record) {
            continue;
        }
        cases.push(columns.parse_record(&record, row, origin)?);
    }
    Ok(cases)
}

/// Load a task's test cases, preserving file order. `.tsv` files are tab separated.
pub fn load_test_cases(path: &Path) -> Result<Vec<TestCase>, BenchError> {
    if !path.is_file() {
        return Err(BenchError::MissingTestData(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|e| BenchError::MalformedTestData {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let delimiter = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    };
    let cases = read_test_cases(BufReader::new(file), delimiter, path)?;
    debug!("Loaded {} test cases from {}", cases.len(), path.display());
    Ok(cases)
}

/// Model identifiers, one per line; blank lines and `#` comments are skipped.
pub fn parse_model_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn load_model_list(path: &Path) -> Result<Vec<String>, BenchError> {
    let content = fs::read_to_string(path)
        .map_err(|e| BenchError::Config(format!("cannot read model list {}: {e}", path.display())))?;
    Ok(parse_model_list(&content))
}
