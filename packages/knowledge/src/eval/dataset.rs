//! Labeled evaluation dataset loading.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One labeled query.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EvaluationQuery {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub query: String,

    /// Sources a good retriever must return.
    #[serde(default)]
    pub expected_sources: Vec<String>,

    /// Sources that must never be returned for this query.
    #[serde(default)]
    pub negative_sources: Vec<String>,

    #[serde(default)]
    pub expected_keywords: Vec<String>,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub notes: String,
}

#[derive(Deserialize)]
struct DatasetFile {
    #[serde(default)]
    queries: Vec<EvaluationQuery>,
}

/// Load queries from a dataset JSON file (`{"queries": [...]}`).
pub fn load_evaluation_dataset(path: &Path) -> Result<Vec<EvaluationQuery>> {
    let raw = std::fs::read_to_string(path)?;
    let dataset: DatasetFile = serde_json::from_str(&raw)?;
    Ok(dataset.queries)
}
