use chrono::Utc;
use serde::Serialize;

use crate::config::{ConfigError, RunConfig};
use crate::providers::Registry;
use crate::runner::{RunController, RunSummary};
use crate::scraper::{OfflineSource, PageSource, ScraperError, WebScraper};
use crate::store::{DatasetStore, StoreError, StoreReport};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Dataset error: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to set up HTTP client: {0}")]
    Scraper(#[from] ScraperError),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub store: StoreReport,
}

/// One run against `registry`, reading pages from `source`.
///
/// Full runs hand the records to the change detector and may persist them.
/// Light and test runs only compare against the prior dataset.
pub async fn execute<S: PageSource>(
    config: RunConfig,
    registry: &Registry,
    source: &S,
) -> Result<RunReport, PipelineError> {
    let config = config.validate()?;
    let summary = RunController::new(&config, registry, source).run().await?;

    let store = DatasetStore::new(config.dataset_path());
    let report = if config.mode.persists() {
        store.commit(summary.records.clone(), config.force_update, Utc::now())?
    } else {
        log::info!(
            "mode={} outcome=not_persisted records={}",
            config.mode,
            summary.total_records
        );
        store.preview(&summary.records)?
    };

    Ok(RunReport {
        summary,
        store: report,
    })
}

/// Runs the built-in providers for the configured category. Test mode reads
/// saved pages and never opens a connection.
pub async fn run(config: RunConfig) -> Result<RunReport, PipelineError> {
    let registry = Registry::builtin(config.category)?;

    if config.mode.uses_network() {
        let source = WebScraper::with_timeout(config.provider_timeout)?;
        execute(config, &registry, &source).await
    } else {
        let source = OfflineSource::new(config.fixtures_dir.clone());
        execute(config, &registry, &source).await
    }
}
