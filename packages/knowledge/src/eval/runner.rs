//! Evaluation runner: replay a labeled dataset against a service.

use tracing::{debug, info, warn};

use crate::crawl::PageSource;
use crate::embedding::EmbeddingProvider;
use crate::eval::dataset::EvaluationQuery;
use crate::eval::metrics::{
    calculate_mrr, calculate_ndcg, calculate_precision_recall, check_negative_sources,
};
use crate::eval::report::{EvaluationReport, QueryEvaluation};
use crate::service::KnowledgeService;

/// Run every query through `retrieve` and aggregate metrics by arithmetic
/// mean. Per-query retrieval errors degrade to an empty result instead of
/// aborting the run.
pub async fn evaluate_retrieval<E, P>(
    service: &KnowledgeService<E, P>,
    queries: &[EvaluationQuery],
    n_results: usize,
) -> EvaluationReport
where
    E: EmbeddingProvider,
    P: PageSource,
{
    if queries.is_empty() {
        warn!("no queries in evaluation dataset");
        return EvaluationReport::default();
    }

    let mut query_results = Vec::with_capacity(queries.len());
    let mut violations: Vec<String> = Vec::new();
    let mut totals = (0.0, 0.0, 0.0, 0.0, 0.0);

    for query in queries {
        let retrieved = match service.retrieve(&query.query, n_results).await {
            Ok(result) => result.sources,
            Err(e) => {
                warn!(query_id = %query.id, error = %e, "query evaluation failed");
                Vec::new()
            }
        };

        let pr = calculate_precision_recall(&retrieved, &query.expected_sources);
        let ndcg = calculate_ndcg(&retrieved, &query.expected_sources, None);
        let mrr = calculate_mrr(&retrieved, &query.expected_sources);
        let negative = check_negative_sources(&retrieved, &query.negative_sources);

        if !negative.is_empty() {
            warn!(query_id = %query.id, violations = ?negative, "negative source violations");
            violations.push(query.id.clone());
        }

        debug!(
            query_id = %query.id,
            precision = pr.precision,
            recall = pr.recall,
            f1 = pr.f1,
            ndcg,
            mrr,
            "query evaluated"
        );

        totals.0 += pr.precision;
        totals.1 += pr.recall;
        totals.2 += pr.f1;
        totals.3 += ndcg;
        totals.4 += mrr;

        query_results.push(QueryEvaluation {
            query_id: query.id.clone(),
            query: query.query.clone(),
            precision: pr.precision,
            recall: pr.recall,
            f1: pr.f1,
            ndcg,
            mrr,
            retrieved_sources: retrieved,
            expected_sources: query.expected_sources.clone(),
            negative_violations: negative,
        });
    }

    let n = queries.len() as f64;
    let report = EvaluationReport {
        queries_evaluated: queries.len(),
        average_precision: totals.0 / n,
        average_recall: totals.1 / n,
        average_f1: totals.2 / n,
        average_ndcg: totals.3 / n,
        average_mrr: totals.4 / n,
        negative_source_violations: violations,
        query_results,
    };

    info!(
        queries = report.queries_evaluated,
        avg_precision = report.average_precision,
        avg_recall = report.average_recall,
        avg_f1 = report.average_f1,
        avg_ndcg = report.average_ndcg,
        avg_mrr = report.average_mrr,
        "evaluation complete"
    );
    report
}
