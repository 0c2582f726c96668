use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineResult;

/// Outcome of running one test case through an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub input: String,
    pub expected: String,
    pub output: String,
    /// Seconds spent inside the agent.
    pub elapsed_time: f64,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub similarity: f64,
    /// The expected answer appears somewhere in the output.
    #[serde(default)]
    pub partial_match: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<PipelineResult>,
}

/// Decides whether an output counts as a pass.
pub trait Scorer {
    fn name(&self) -> &str;
    fn passed(&self, output: &str, expected: &str) -> bool;
}

/// Case-sensitive string equality, optionally ignoring surrounding whitespace.
#[derive(Debug, Clone, Copy)]
pub struct ExactMatch {
    pub trim: bool,
}

impl Default for ExactMatch {
    fn default() -> Self {
        Self { trim: true }
    }
}

impl Scorer for ExactMatch {
    fn name(&self) -> &str {
        if self.trim {
            "exact_match_trimmed"
        } else {
            "exact_match"
        }
    }

    fn passed(&self, output: &str, expected: &str) -> bool {
        if self.trim {
            output.trim() == expected.trim()
        } else {
            output == expected
        }
    }
}

/// Share of the expected answer's distinct lowercase tokens present in the output.
///
/// Reported next to the pass/fail verdict; it never affects it.
pub fn token_overlap(output: &str, expected: &str) -> f64 {
    let tokens = |text: &str| -> HashSet<String> {
        text.split_whitespace().map(str::to_lowercase).collect()
    };
    let expected_tokens = tokens(expected);
    let output_tokens = tokens(output);
    if expected_tokens.is_empty() || output_tokens.is_empty() {
        return if expected_tokens == output_tokens { 1.0 } else { 0.0 };
    }
    let shared = expected_tokens.intersection(&output_tokens).count();
    shared as f64 / expected_tokens.len() as f64
}

/// Substring containment of the trimmed expected answer. An empty expectation never matches.
pub fn partial_match(output: &str, expected: &str) -> bool {
    let expected = expected.trim();
    !expected.is_empty() && output.contains(expected)
}

/// Aggregate of one model on one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub model_id: String,
    pub task: String,
    pub timestamp: DateTime<Utc>,
    pub scorer: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    /// Outputs containing the expected answer, passed or not.
    #[serde(default)]
    pub partial_matches: usize,
    /// Sum of per-case agent time in seconds.
    pub total_time: f64,
    pub avg_time_per_query: f64,
    pub avg_similarity: f64,
    /// Agent role to the instruction key it rendered.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instruction_keys: BTreeMap<String, String>,
    /// Outputs per ambiguity label, for classification tasks.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_counts: BTreeMap<String, usize>,
    pub results: Vec<AgentResult>,
}

impl BenchmarkReport {
    pub fn new(model_id: impl Into<String>, task: impl Into<String>, scorer: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            task: task.into(),
            timestamp: Utc::now(),
            scorer: scorer.into(),
            total: 0,
            passed: 0,
            failed: 0,
            errors: 0,
            partial_matches: 0,
            total_time: 0.0,
            avg_time_per_query: 0.0,
            avg_similarity: 0.0,
            instruction_keys: BTreeMap::new(),
            label_counts: BTreeMap::new(),
            results: Vec::new(),
        }
    }

    pub fn push(&mut self, result: AgentResult) {
        self.total += 1;
        if result.passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        if result.error.is_some() {
            self.errors += 1;
        }
        if result.partial_match {
            self.partial_matches += 1;
        }
        self.total_time += result.elapsed_time;
        self.results.push(result);
    }

    pub fn count_label(&mut self, label: impl Into<String>) {
        *self.label_counts.entry(label.into()).or_insert(0) += 1;
    }

    /// Recompute the averages; an empty report keeps them at zero.
    pub fn finalize(&mut self) {
        if self.total == 0 {
            self.avg_time_per_query = 0.0;
            self.avg_similarity = 0.0;
            return;
        }
        self.avg_time_per_query = self.total_time / self.total as f64;
        let similarity: f64 = self.results.iter().map(|r| r.similarity).sum();
        self.avg_similarity = similarity / self.total as f64;
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(passed: bool, elapsed_time: f64, error: Option<&str>) -> AgentResult {
        AgentResult {
            input: "q".into(),
            expected: "e".into(),
            output: "o".into(),
            elapsed_time,
            passed,
            error: error.map(str::to_string),
            similarity: if passed { 1.0 } else { 0.0 },
            partial_match: passed,
            stages: None,
        }
    }

    #[test]
    fn exact_match_trims_but_keeps_case() {
        let scorer = ExactMatch::default();
        assert!(scorer.passed("  SELECT 1\n", "SELECT 1"));
        assert!(!scorer.passed("select 1", "SELECT 1"));
        assert!(!ExactMatch { trim: false }.passed("SELECT 1 ", "SELECT 1"));
    }

    #[test]
    fn overlap_counts_expected_tokens() {
        assert_eq!(token_overlap("SELECT count(*) FROM orders", "select count(*) from orders"), 1.0);
        assert_eq!(token_overlap("SELECT 1", "SELECT 2"), 0.5);
        assert_eq!(token_overlap("", ""), 1.0);
        assert_eq!(token_overlap("something", ""), 0.0);
    }

    #[test]
    fn counts_and_averages() {
        let mut report = BenchmarkReport::new("org/model", "nl_to_sql", "exact_match_trimmed");
        report.push(result(true, 1.0, None));
        report.push(result(false, 3.0, Some("boom")));
        report.push(AgentResult {
            output: "Answer: e, probably".into(),
            partial_match: true,
            ..result(false, 2.0, None)
        });
        report.finalize();

        assert_eq!(report.total, 3);
        assert_eq!(report.passed, 1);
        assert_eq!(report.passed + report.failed, report.total);
        assert_eq!(report.errors, 1);
        // informational only: the partial match still failed
        assert_eq!(report.partial_matches, 2);
        assert!(!report.results[2].passed);
        assert_eq!(report.total_time, 6.0);
        assert_eq!(report.avg_time_per_query, 2.0);
        assert_eq!(report.avg_similarity, 1.0 / 3.0);
        assert_eq!(report.pass_rate(), 1.0 / 3.0);
    }

    #[test]
    fn partial_match_needs_a_nonempty_expectation() {
        assert!(partial_match("SELECT 1; -- done", " SELECT 1 "));
        assert!(!partial_match("SELECT 2", "SELECT 1"));
        assert!(!partial_match("anything", "  "));
    }

    #[test]
    fn keys_and_labels_are_serialized() {
        let mut report = BenchmarkReport::new("org/model", "ambiguity_intent", "exact_match_trimmed");
        report.instruction_keys.insert("ambiguity".into(), "ambiguity_detection".into());
        report.count_label("Ambiguous");
        report.count_label("Clear");
        report.count_label("Ambiguous");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["instruction_keys"]["ambiguity"], "ambiguity_detection");
        assert_eq!(json["label_counts"]["Ambiguous"], 2);
        assert_eq!(json["label_counts"]["Clear"], 1);

        let plain = serde_json::to_value(BenchmarkReport::new("m", "nl_to_sql", "s")).unwrap();
        assert!(plain.get("label_counts").is_none());
        assert_eq!(plain["partial_matches"], 0);
    }

    #[test]
    fn empty_report_has_zero_average() {
        let mut report = BenchmarkReport::new("m", "t", "s");
        report.finalize();
        assert_eq!(report.total, 0);
        assert_eq!(report.avg_time_per_query, 0.0);
    }

    #[test]
    fn error_field_is_omitted_when_absent() {
        let json = serde_json::to_value(result(true, 0.5, None)).unwrap();
        assert!(json.get("error").is_none());
        assert!(json.get("stages").is_none());
        assert_eq!(json["elapsed_time"], 0.5);
    }
}
