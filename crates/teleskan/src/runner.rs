//! The aggregator: drives every scoped provider through fetch, parse and
//! normalization, isolates their failures and assembles the run's records.
//!
//! Providers run through a bounded pool (`concurrency = 1` is strictly
//! sequential). Each provider has its own timeout and the whole collection
//! a run deadline; whatever has not reported by the deadline is cancelled
//! and the run continues with what finished.

use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::{ConfigError, RunConfig};
use crate::normalize::Normalizer;
use crate::parser::ParseError;
use crate::providers::{Registry, RegistryEntry};
use crate::scraper::PageSource;
use crate::types::{Category, PlanRecord, RawPlan, RunMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    /// `provider_index` scoped providers have reported so far.
    Running { provider_index: usize },
    Completed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderStatus {
    Ok,
    /// Reachable but nothing survived extraction and normalization.
    ZeroYield,
    Failed { reason: String },
    TimedOut,
    /// Still pending when the run deadline passed.
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderReport {
    pub provider: String,
    #[serde(flatten)]
    pub status: ProviderStatus,
    pub raw_plans: usize,
    pub accepted: usize,
    pub rejected: usize,
}

impl ProviderReport {
    pub fn succeeded(&self) -> bool {
        self.accepted > 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub category: Category,
    pub mode: RunMode,
    #[serde(skip)]
    pub records: Vec<PlanRecord>,
    pub total_records: usize,
    pub providers_attempted: usize,
    /// Providers with at least one accepted record.
    pub providers_succeeded: usize,
    /// Providers that ended the run without a record, failures included.
    pub providers_with_zero_yield: usize,
    /// Failed, timed out or cancelled providers.
    pub providers_failed: usize,
    pub duplicates_dropped: usize,
    pub providers: Vec<ProviderReport>,
}

/// What one provider's pages produced before normalization.
#[derive(Debug, Default)]
pub struct Extraction {
    pub plans: Vec<RawPlan>,
    pub errors: Vec<String>,
}

enum Outcome {
    Finished(Extraction),
    TimedOut,
}

/// Fetches and parses every page of one provider, one attempt per URL.
///
/// Errors never escape: each failed page is logged and noted in
/// [`Extraction::errors`], and the pages that did parse still count.
pub async fn extract_provider<S: PageSource>(entry: &RegistryEntry, source: &S) -> Extraction {
    let mut extraction = Extraction::default();

    for url in entry.extractor.urls() {
        let html = match source.fetch_html(url).await {
            Ok(html) => html,
            Err(e) => {
                log::warn!(
                    "provider={} url={} outcome=fetch_failed error=\"{}\"",
                    entry.name,
                    url,
                    e
                );
                extraction.errors.push(e.to_string());
                continue;
            }
        };

        match entry.extractor.parse(&html, url) {
            Ok(plans) => {
                log::debug!("provider={} url={} raw_plans={}", entry.name, url, plans.len());
                extraction.plans.extend(plans);
            }
            Err(e @ ParseError::NoPlanMarkup(_)) => {
                log::warn!(
                    "provider={} url={} outcome=structure_changed error=\"{}\"",
                    entry.name,
                    url,
                    e
                );
                extraction.errors.push(e.to_string());
            }
            Err(e) => {
                log::warn!(
                    "provider={} url={} outcome=parse_failed error=\"{}\"",
                    entry.name,
                    url,
                    e
                );
                extraction.errors.push(e.to_string());
            }
        }
    }

    extraction
}

pub struct RunController<'a, S: PageSource> {
    registry: &'a Registry,
    source: &'a S,
    normalizer: Normalizer,
    mode: RunMode,
    only: Option<String>,
    concurrency: usize,
    provider_timeout: Duration,
    run_timeout: Duration,
    state: RunState,
}

impl<'a, S: PageSource> RunController<'a, S> {
    pub fn new(config: &RunConfig, registry: &'a Registry, source: &'a S) -> Self {
        Self {
            registry,
            source,
            normalizer: Normalizer::new(config.category),
            mode: config.mode,
            only: config.provider.clone(),
            concurrency: config.concurrency.max(1),
            provider_timeout: config.provider_timeout,
            run_timeout: config.run_timeout,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Runs every scoped provider and returns the assembled records.
    ///
    /// # Errors
    ///
    /// Only configuration problems abort a run: a registry built for a
    /// different category or a provider filter naming no enabled entry.
    /// Provider failures are recorded in the summary instead.
    pub async fn run(&mut self) -> Result<RunSummary, ConfigError> {
        let registry = self.registry;
        let category = self.normalizer.category();

        if registry.category() != category {
            self.state = RunState::Aborted;
            return Err(ConfigError::RegistryMismatch {
                expected: category,
                found: registry.category(),
            });
        }

        let scoped = match registry.scoped(self.mode, self.only.as_deref()) {
            Ok(scoped) => scoped,
            Err(e) => {
                log::error!("outcome=aborted error=\"{}\"", e);
                self.state = RunState::Aborted;
                return Err(e);
            }
        };

        log::info!(
            "category={} mode={} providers={} concurrency={}",
            category,
            self.mode,
            scoped.len(),
            self.concurrency
        );
        self.state = RunState::Running { provider_index: 0 };

        let outcomes = self.collect(&scoped).await;
        let summary = self.assemble(&scoped, outcomes);

        log::info!(
            "category={} outcome=completed records={} attempted={} succeeded={} zero_yield={} failed={}",
            category,
            summary.total_records,
            summary.providers_attempted,
            summary.providers_succeeded,
            summary.providers_with_zero_yield,
            summary.providers_failed
        );
        self.state = RunState::Completed;
        Ok(summary)
    }

    /// One slot per scoped provider; `None` means cancelled at the deadline.
    async fn collect(&mut self, scoped: &[&RegistryEntry]) -> Vec<Option<Outcome>> {
        let source = self.source;
        let provider_timeout = self.provider_timeout;
        let deadline = Instant::now() + self.run_timeout;

        let mut outcomes: Vec<Option<Outcome>> = scoped.iter().map(|_| None).collect();
        let mut pending = stream::iter(scoped.iter().enumerate())
            .map(|(index, entry)| async move {
                log::info!("provider={} outcome=started", entry.name);
                let outcome =
                    match tokio::time::timeout(provider_timeout, extract_provider(entry, source))
                        .await
                    {
                        Ok(extraction) => Outcome::Finished(extraction),
                        Err(_) => Outcome::TimedOut,
                    };
                (index, outcome)
            })
            .buffer_unordered(self.concurrency);

        let mut reported = 0;
        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((index, outcome))) => {
                    outcomes[index] = Some(outcome);
                    reported += 1;
                    self.state = RunState::Running {
                        provider_index: reported,
                    };
                }
                Ok(None) => break,
                Err(_) => {
                    log::warn!(
                        "outcome=run_deadline timeout_secs={} pending={}",
                        self.run_timeout.as_secs(),
                        scoped.len() - reported
                    );
                    break;
                }
            }
        }

        outcomes
    }

    fn assemble(&self, scoped: &[&RegistryEntry], outcomes: Vec<Option<Outcome>>) -> RunSummary {
        let mut records = Vec::new();
        let mut reports = Vec::with_capacity(scoped.len());

        for (entry, outcome) in scoped.iter().zip(outcomes) {
            let report = match outcome {
                Some(Outcome::Finished(extraction)) => {
                    let accepted = self.normalizer.normalize_all(&extraction.plans, &entry.name);
                    let report = ProviderReport {
                        provider: entry.name.clone(),
                        status: if !accepted.is_empty() {
                            ProviderStatus::Ok
                        } else if !extraction.errors.is_empty() {
                            ProviderStatus::Failed {
                                reason: extraction.errors.join("; "),
                            }
                        } else {
                            ProviderStatus::ZeroYield
                        },
                        raw_plans: extraction.plans.len(),
                        accepted: accepted.len(),
                        rejected: extraction.plans.len() - accepted.len(),
                    };
                    records.extend(accepted);
                    report
                }
                Some(Outcome::TimedOut) => {
                    log::warn!(
                        "provider={} outcome=timeout records=0 timeout_secs={}",
                        entry.name,
                        self.provider_timeout.as_secs()
                    );
                    empty_report(&entry.name, ProviderStatus::TimedOut)
                }
                None => {
                    log::warn!("provider={} outcome=cancelled records=0", entry.name);
                    empty_report(&entry.name, ProviderStatus::Cancelled)
                }
            };

            match &report.status {
                ProviderStatus::Ok => log::info!(
                    "provider={} outcome=ok records={} rejected={}",
                    report.provider,
                    report.accepted,
                    report.rejected
                ),
                ProviderStatus::ZeroYield => log::warn!(
                    "provider={} outcome=low_yield records=0 raw_plans={}",
                    report.provider,
                    report.raw_plans
                ),
                ProviderStatus::Failed { reason } => log::warn!(
                    "provider={} outcome=failed records=0 reason=\"{}\"",
                    report.provider,
                    reason
                ),
                ProviderStatus::TimedOut | ProviderStatus::Cancelled => {}
            }
            reports.push(report);
        }

        let (records, duplicates_dropped) = finalize_records(records);

        let succeeded = reports.iter().filter(|r| r.succeeded()).count();
        let failed = reports
            .iter()
            .filter(|r| {
                matches!(
                    r.status,
                    ProviderStatus::Failed { .. }
                        | ProviderStatus::TimedOut
                        | ProviderStatus::Cancelled
                )
            })
            .count();

        RunSummary {
            category: self.normalizer.category(),
            mode: self.mode,
            total_records: records.len(),
            records,
            providers_attempted: reports.len(),
            providers_succeeded: succeeded,
            providers_with_zero_yield: reports.len() - succeeded,
            providers_failed: failed,
            duplicates_dropped,
            providers: reports,
        }
    }
}

fn empty_report(provider: &str, status: ProviderStatus) -> ProviderReport {
    ProviderReport {
        provider: provider.to_string(),
        status,
        raw_plans: 0,
        accepted: 0,
        rejected: 0,
    }
}

/// Collapses exact duplicates, orders by the stable sort key and numbers
/// the records from 1. Returns the records and how many were dropped.
pub(crate) fn finalize_records(records: Vec<PlanRecord>) -> (Vec<PlanRecord>, usize) {
    let total = records.len();
    let mut unique: Vec<PlanRecord> = Vec::with_capacity(total);
    for record in records {
        if !unique.iter().any(|u| u.same_content(&record)) {
            unique.push(record);
        }
    }
    let dropped = total - unique.len();
    if dropped > 0 {
        log::info!("outcome=deduplicated dropped={}", dropped);
    }

    unique.sort_by(|a, b| a.sort_cmp(b));
    for (i, record) in unique.iter_mut().enumerate() {
        record.id = i as u32 + 1;
    }
    (unique, dropped)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::providers::FiberCardExtractor;
    use crate::scraper::ScraperError;

    /// Serves canned pages by URL; unknown URLs fail like an HTTP 500.
    struct FakeSource {
        pages: HashMap<String, String>,
        delays: HashMap<String, Duration>,
    }

    impl FakeSource {
        fn new(pages: &[(&str, &str)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(u, h)| (u.to_string(), h.to_string()))
                    .collect(),
                delays: HashMap::new(),
            }
        }

        fn delayed(mut self, url: &str, delay: Duration) -> Self {
            self.delays.insert(url.to_string(), delay);
            self
        }
    }

    impl PageSource for FakeSource {
        async fn fetch_html(&self, url: &str) -> Result<String, ScraperError> {
            if let Some(delay) = self.delays.get(url) {
                tokio::time::sleep(*delay).await;
            }
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| ScraperError::EmptyBody(url.to_string()))
        }
    }

    fn card(speed: &str, price: &str) -> String {
        let tier = speed.split_whitespace().next().unwrap_or_default();
        format!(
            r#"<div class="plan-card"><h3 class="plan-title">Fiber {tier}</h3><p>{speed}</p><p>{price}</p><p>6 mdr</p></div>"#
        )
    }

    fn entry(name: &str, url: &str) -> RegistryEntry {
        RegistryEntry::new(
            name,
            FiberCardExtractor::new(name, url, "plan").expect("valid extractor"),
        )
    }

    fn config() -> RunConfig {
        RunConfig::new(Category::Fiber, RunMode::Full, ".")
    }

    #[tokio::test]
    async fn test_disabled_provider_is_never_counted() {
        let registry = Registry::new(
            Category::Fiber,
            vec![
                entry("A", "https://a.example/fiber"),
                entry("B", "https://b.example/fiber").disabled(),
            ],
        )
        .unwrap();
        let source = FakeSource::new(&[
            ("https://a.example/fiber", card("1000 Mbit/s", "299 kr").as_str()),
            ("https://b.example/fiber", card("500 Mbit/s", "199 kr").as_str()),
        ]);

        let mut controller = RunController::new(&config(), &registry, &source);
        assert_eq!(controller.state(), RunState::Idle);
        let summary = controller.run().await.expect("run should complete");

        assert_eq!(controller.state(), RunState::Completed);
        assert_eq!(summary.providers_attempted, 1);
        assert_eq!(summary.records.len(), 1);
        let record = &summary.records[0];
        assert_eq!(record.id, 1);
        assert_eq!(record.provider, "A");
        assert_eq!(record.plan_name, "Fiber 1000");
        assert_eq!(record.price, 299);
        assert_eq!(record.speed_mbit, Some(1000));
        assert_eq!(record.contract_months, 6);
    }

    #[tokio::test]
    async fn test_failing_provider_is_isolated() {
        let registry = Registry::new(
            Category::Fiber,
            vec![
                entry("A", "https://a.example/fiber"),
                entry("Broken", "https://broken.example/fiber"),
                entry("C", "https://c.example/fiber"),
            ],
        )
        .unwrap();
        let source = FakeSource::new(&[
            ("https://a.example/fiber", card("1000 Mbit/s", "299 kr").as_str()),
            ("https://c.example/fiber", card("100 Mbit/s", "149 kr").as_str()),
        ]);

        let summary = RunController::new(&config(), &registry, &source)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.providers_attempted, 3);
        assert_eq!(summary.providers_succeeded, 2);
        assert_eq!(summary.providers_failed, 1);
        assert_eq!(summary.providers_with_zero_yield, 1);
        assert!(matches!(
            summary.providers[1].status,
            ProviderStatus::Failed { .. }
        ));
        let providers: Vec<&str> = summary.records.iter().map(|r| r.provider.as_str()).collect();
        assert_eq!(providers, vec!["A", "C"]);
    }

    #[tokio::test]
    async fn test_slow_provider_times_out_without_stopping_the_run() {
        let registry = Registry::new(
            Category::Fiber,
            vec![
                entry("A", "https://a.example/fiber"),
                entry("C", "https://c.example/fiber"),
            ],
        )
        .unwrap();
        let source = FakeSource::new(&[
            ("https://a.example/fiber", card("1000 Mbit/s", "299 kr").as_str()),
            ("https://c.example/fiber", card("100 Mbit/s", "149 kr").as_str()),
        ])
        .delayed("https://c.example/fiber", Duration::from_secs(5));

        let mut config = config();
        config.provider_timeout = Duration::from_millis(50);

        let summary = RunController::new(&config, &registry, &source)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.records.len(), 1);
        assert_eq!(summary.providers[1].status, ProviderStatus::TimedOut);
        assert_eq!(summary.providers_failed, 1);
    }

    #[tokio::test]
    async fn test_run_deadline_cancels_pending_providers() {
        let registry = Registry::new(
            Category::Fiber,
            vec![
                entry("A", "https://a.example/fiber"),
                entry("Slow", "https://slow.example/fiber"),
                entry("Never", "https://never.example/fiber"),
            ],
        )
        .unwrap();
        let source = FakeSource::new(&[
            ("https://a.example/fiber", card("1000 Mbit/s", "299 kr").as_str()),
            ("https://slow.example/fiber", card("100 Mbit/s", "149 kr").as_str()),
            ("https://never.example/fiber", card("50 Mbit/s", "99 kr").as_str()),
        ])
        .delayed("https://slow.example/fiber", Duration::from_secs(5));

        let mut config = config();
        config.run_timeout = Duration::from_millis(100);

        let summary = RunController::new(&config, &registry, &source)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.records.len(), 1);
        assert_eq!(summary.providers[1].status, ProviderStatus::Cancelled);
        assert_eq!(summary.providers[2].status, ProviderStatus::Cancelled);
        assert_eq!(summary.providers_attempted, 3);
    }

    #[tokio::test]
    async fn test_concurrent_run_assigns_the_same_ids() {
        let registry = Registry::new(
            Category::Fiber,
            vec![
                entry("B", "https://b.example/fiber"),
                entry("A", "https://a.example/fiber"),
            ],
        )
        .unwrap();
        let source = FakeSource::new(&[
            ("https://a.example/fiber", card("1000 Mbit/s", "299 kr").as_str()),
            ("https://b.example/fiber", card("100 Mbit/s", "149 kr").as_str()),
        ])
        .delayed("https://b.example/fiber", Duration::from_millis(30));

        let sequential = RunController::new(&config(), &registry, &source)
            .run()
            .await
            .unwrap();
        let mut parallel_config = config();
        parallel_config.concurrency = 4;
        let parallel = RunController::new(&parallel_config, &registry, &source)
            .run()
            .await
            .unwrap();

        assert_eq!(sequential.records, parallel.records);
        assert_eq!(sequential.records[0].provider, "A");
        assert_eq!(sequential.records[0].id, 1);
    }

    #[tokio::test]
    async fn test_unknown_provider_filter_aborts() {
        let registry =
            Registry::new(Category::Fiber, vec![entry("A", "https://a.example/fiber")]).unwrap();
        let source = FakeSource::new(&[]);
        let mut config = config();
        config.provider = Some("Nobody".to_string());

        let mut controller = RunController::new(&config, &registry, &source);
        let result = controller.run().await;
        assert!(matches!(result, Err(ConfigError::UnknownProvider(..))));
        assert_eq!(controller.state(), RunState::Aborted);
    }

    #[tokio::test]
    async fn test_zero_plans_is_low_yield_not_failure() {
        let registry =
            Registry::new(Category::Fiber, vec![entry("A", "https://a.example/fiber")]).unwrap();
        let source = FakeSource::new(&[(
            "https://a.example/fiber",
            r#"<div class="plan-card">Kontakt os for pris</div>"#,
        )]);

        let summary = RunController::new(&config(), &registry, &source)
            .run()
            .await
            .unwrap();
        assert_eq!(summary.providers[0].status, ProviderStatus::ZeroYield);
        assert_eq!(summary.providers_failed, 0);
        assert_eq!(summary.providers_with_zero_yield, 1);
    }

    #[test]
    fn test_finalize_records_dedups_and_numbers() {
        let record = |provider: &str, price: u32| PlanRecord {
            id: 0,
            provider: provider.to_string(),
            category: Category::Fiber,
            plan_name: format!("{provider} Fiber 1000"),
            price,
            speed_mbit: Some(1000),
            data_gb: None,
            channel_count: None,
            contract_months: 0,
            promotion: None,
            features: Vec::new(),
            rating: None,
            url: None,
            details: Default::default(),
        };

        let (records, dropped) =
            finalize_records(vec![record("Waoo", 379), record("Hiper", 299), record("Waoo", 379)]);
        assert_eq!(dropped, 1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].provider, "Hiper");
        assert_eq!(records[0].id, 1);
        assert_eq!(records[1].id, 2);
    }
}
