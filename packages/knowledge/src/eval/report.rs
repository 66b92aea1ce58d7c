//! Evaluation reports, baselines, and regression detection.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// Per-query evaluation detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEvaluation {
    pub query_id: String,
    pub query: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub ndcg: f64,
    pub mrr: f64,
    pub retrieved_sources: Vec<String>,
    pub expected_sources: Vec<String>,
    pub negative_violations: Vec<String>,
}

/// Aggregate report across a dataset.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EvaluationReport {
    pub queries_evaluated: usize,
    pub average_precision: f64,
    pub average_recall: f64,
    pub average_f1: f64,
    pub average_ndcg: f64,
    pub average_mrr: f64,
    /// Ids of queries that returned a forbidden source.
    pub negative_source_violations: Vec<String>,
    pub query_results: Vec<QueryEvaluation>,
}

/// Verdict of comparing a run against a stored baseline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RegressionInfo {
    pub detected: bool,
    pub baseline_f1: f64,
    pub current_f1: f64,
    pub delta: f64,
}

/// A regression is an F1 drop larger than `threshold`.
pub fn detect_regression(baseline_f1: f64, current_f1: f64, threshold: f64) -> RegressionInfo {
    let delta = current_f1 - baseline_f1;
    let detected = delta < -threshold;
    if detected {
        warn!(
            baseline_f1,
            current_f1, delta, "regression detected against baseline"
        );
    } else {
        info!(baseline_f1, current_f1, delta, "no regression against baseline");
    }
    RegressionInfo {
        detected,
        baseline_f1,
        current_f1,
        delta,
    }
}

#[derive(Serialize, Deserialize)]
struct ReportFile {
    dataset: String,
    summary: Summary,
    #[serde(skip_serializing_if = "Option::is_none")]
    regression: Option<RegressionInfo>,
    queries: Vec<QueryEvaluation>,
}

#[derive(Serialize, Deserialize)]
struct Summary {
    queries_evaluated: usize,
    average_precision: f64,
    average_recall: f64,
    average_f1: f64,
    average_ndcg: f64,
    average_mrr: f64,
    negative_source_violations: Vec<String>,
}

/// Read the baseline F1 out of a previously written JSON report.
pub fn load_baseline_f1(path: &Path) -> Result<f64> {
    let raw = std::fs::read_to_string(path)?;
    let report: ReportFile = serde_json::from_str(&raw)?;
    Ok(report.summary.average_f1)
}

/// Write the JSON report (also the baseline format).
pub fn write_json_report(
    report: &EvaluationReport,
    regression: Option<RegressionInfo>,
    path: &Path,
    dataset: &str,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = ReportFile {
        dataset: dataset.to_string(),
        summary: Summary {
            queries_evaluated: report.queries_evaluated,
            average_precision: report.average_precision,
            average_recall: report.average_recall,
            average_f1: report.average_f1,
            average_ndcg: report.average_ndcg,
            average_mrr: report.average_mrr,
            negative_source_violations: report.negative_source_violations.clone(),
        },
        regression,
        queries: report.query_results.clone(),
    };
    std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
    info!(path = %path.display(), "evaluation report written");
    Ok(())
}

/// Write the human-readable Markdown report.
pub fn write_markdown_report(
    report: &EvaluationReport,
    regression: Option<RegressionInfo>,
    path: &Path,
    dataset: &str,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut out = String::new();
    out.push_str("# Retrieval evaluation report\n\n");
    out.push_str(&format!("Dataset: `{dataset}`\n\n"));
    out.push_str("## Summary\n\n");
    out.push_str("| Metric | Value |\n|---|---|\n");
    out.push_str(&format!("| Queries | {} |\n", report.queries_evaluated));
    out.push_str(&format!("| Precision | {:.3} |\n", report.average_precision));
    out.push_str(&format!("| Recall | {:.3} |\n", report.average_recall));
    out.push_str(&format!("| F1 | {:.3} |\n", report.average_f1));
    out.push_str(&format!("| NDCG | {:.3} |\n", report.average_ndcg));
    out.push_str(&format!("| MRR | {:.3} |\n", report.average_mrr));

    if !report.negative_source_violations.is_empty() {
        out.push_str(&format!(
            "\n⚠ Negative-source violations in: {}\n",
            report.negative_source_violations.join(", ")
        ));
    }

    if let Some(r) = regression {
        out.push_str("\n## Baseline comparison\n\n");
        let verdict = if r.detected {
            "REGRESSION DETECTED"
        } else {
            "no regression"
        };
        out.push_str(&format!(
            "{verdict} (baseline F1: {:.3} -> current F1: {:.3}, delta: {:+.3})\n",
            r.baseline_f1, r.current_f1, r.delta
        ));
    }

    out.push_str("\n## Queries\n\n");
    out.push_str("| Id | P | R | F1 | NDCG | MRR | Violations |\n|---|---|---|---|---|---|---|\n");
    for q in &report.query_results {
        out.push_str(&format!(
            "| {} | {:.3} | {:.3} | {:.3} | {:.3} | {:.3} | {} |\n",
            q.query_id,
            q.precision,
            q.recall,
            q.f1,
            q.ndcg,
            q.mrr,
            if q.negative_violations.is_empty() {
                "-".to_string()
            } else {
                q.negative_violations.join(", ")
            }
        ));
    }

    std::fs::write(path, out)?;
    info!(path = %path.display(), "markdown report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> EvaluationReport {
        EvaluationReport {
            queries_evaluated: 1,
            average_precision: 0.8,
            average_recall: 0.9,
            average_f1: 0.85,
            average_ndcg: 0.95,
            average_mrr: 1.0,
            negative_source_violations: Vec::new(),
            query_results: vec![QueryEvaluation {
                query_id: "q1".to_string(),
                query: "test".to_string(),
                precision: 0.8,
                recall: 0.9,
                f1: 0.85,
                ndcg: 0.95,
                mrr: 1.0,
                retrieved_sources: vec!["https://ex.com/a".to_string()],
                expected_sources: vec!["https://ex.com/a".to_string()],
                negative_violations: Vec::new(),
            }],
        }
    }

    #[test]
    fn test_regression_detection_threshold() {
        assert!(detect_regression(0.9, 0.7, 0.1).detected);
        assert!(!detect_regression(0.9, 0.85, 0.1).detected);
        assert!(!detect_regression(0.9, 0.95, 0.1).detected);
        // A drop of exactly the threshold is not a regression.
        assert!(!detect_regression(0.9, 0.8, 0.1).detected);
    }

    #[test]
    fn test_json_report_round_trips_baseline_f1() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("report.json");

        write_json_report(&sample_report(), None, &path, "dataset.json").unwrap();
        let baseline_f1 = load_baseline_f1(&path).unwrap();
        assert!((baseline_f1 - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_markdown_report_contains_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("report.md");

        let regression = Some(detect_regression(0.9, 0.5, 0.1));
        write_markdown_report(&sample_report(), regression, &path, "dataset.json").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("REGRESSION DETECTED"));
        assert!(content.contains("| q1 |"));
    }
}
