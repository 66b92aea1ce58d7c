//! Retrieval evaluation harness: metrics, dataset replay, regression
//! detection against a stored baseline.

pub mod dataset;
pub mod metrics;
pub mod report;
pub mod runner;

pub use dataset::{load_evaluation_dataset, EvaluationQuery};
pub use metrics::{
    calculate_mrr, calculate_ndcg, calculate_precision_recall, check_negative_sources,
    PrecisionRecall,
};
pub use report::{
    detect_regression, load_baseline_f1, write_json_report, write_markdown_report,
    EvaluationReport, QueryEvaluation, RegressionInfo,
};
pub use runner::evaluate_retrieval;
