//! The `init-test-db` subcommand: seed both indexes from fixture
//! documents without any network access.

use std::process::ExitCode;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use knowledge::CrawledPage;

use crate::setup::{build_service, ServiceOptions};
use crate::InitTestDbArgs;

#[derive(Deserialize)]
struct FixtureFile {
    #[serde(default)]
    documents: Vec<FixtureDocument>,
}

#[derive(Deserialize)]
struct FixtureDocument {
    url: String,
    #[serde(default)]
    title: String,
    text: String,
}

pub async fn init_test_db(args: InitTestDbArgs) -> Result<ExitCode> {
    let raw = std::fs::read_to_string(&args.fixture)
        .with_context(|| format!("failed to read fixture {}", args.fixture.display()))?;
    let fixture: FixtureFile = serde_json::from_str(&raw).context("invalid fixture JSON")?;

    let service = build_service(&args.retrieval, ServiceOptions::default())?;

    let mut total_chunks = 0usize;
    for document in &fixture.documents {
        let page = CrawledPage::new(&document.url, &document.title, &document.text);
        let chunks = service
            .ingest_crawled(&page)
            .await
            .with_context(|| format!("failed to ingest fixture document {}", document.url))?;
        total_chunks += chunks;
    }

    info!(
        documents = fixture.documents.len(),
        chunks = total_chunks,
        vector_dir = %args.retrieval.persist_dir.display(),
        bm25_dir = %args.retrieval.bm25_persist_dir.display(),
        "test indexes initialized"
    );
    println!(
        "initialized {} documents into {} chunks",
        fixture.documents.len(),
        total_chunks
    );
    Ok(ExitCode::SUCCESS)
}
