//! The `evaluate` subcommand.

use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{error, info};

use knowledge::eval::{
    detect_regression, evaluate_retrieval, load_baseline_f1, load_evaluation_dataset,
    write_json_report, write_markdown_report, RegressionInfo,
};

use crate::setup::{build_service, ServiceOptions};
use crate::EvaluateArgs;

pub async fn run(args: EvaluateArgs) -> Result<ExitCode> {
    let service = build_service(
        &args.retrieval,
        ServiceOptions {
            threshold: args.threshold,
            hybrid: args.hybrid,
            vector_weight: args.vector_weight,
            min_combined_score: args.min_combined_score,
            n_results: args.n_results,
        },
    )?;

    let queries = load_evaluation_dataset(&args.dataset)
        .with_context(|| format!("failed to load dataset {}", args.dataset.display()))?;
    info!(queries = queries.len(), dataset = %args.dataset.display(), "running evaluation");

    let report = evaluate_retrieval(&service, &queries, args.n_results).await;

    let regression: Option<RegressionInfo> = match &args.baseline_file {
        Some(path) if path.exists() => {
            let baseline_f1 = load_baseline_f1(path)
                .with_context(|| format!("failed to load baseline {}", path.display()))?;
            Some(detect_regression(
                baseline_f1,
                report.average_f1,
                args.regression_threshold,
            ))
        }
        Some(path) => {
            info!(path = %path.display(), "baseline file not found, skipping comparison");
            None
        }
        None => None,
    };

    let dataset_label = args.dataset.display().to_string();
    let json_path = args.output_dir.join("evaluation_report.json");
    let md_path = args.output_dir.join("evaluation_report.md");
    write_json_report(&report, regression, &json_path, &dataset_label)?;
    write_markdown_report(&report, regression, &md_path, &dataset_label)?;

    if args.save_baseline {
        let baseline_path = args.output_dir.join("baseline.json");
        write_json_report(&report, None, &baseline_path, &dataset_label)?;
        info!(path = %baseline_path.display(), "baseline saved");
    }

    println!(
        "queries: {}  precision: {:.3}  recall: {:.3}  f1: {:.3}  ndcg: {:.3}  mrr: {:.3}",
        report.queries_evaluated,
        report.average_precision,
        report.average_recall,
        report.average_f1,
        report.average_ndcg,
        report.average_mrr
    );
    if !report.negative_source_violations.is_empty() {
        println!(
            "negative-source violations: {}",
            report.negative_source_violations.join(", ")
        );
    }

    if args.fail_on_regression {
        if let Some(r) = regression {
            if r.detected {
                error!("exiting with code 1 due to regression");
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
