//! Change detection against the persisted dataset and the atomic writer.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Dataset, PlanRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("Failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("Failed to serialize dataset: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// No prior dataset existed.
    Bootstrapped,
    Updated,
    /// Unchanged content rewritten on request.
    Forced,
    Unchanged,
    /// Zero plans collected while the prior dataset had some.
    SkippedEmpty,
    /// Light and test runs only report.
    NotPersisted,
}

impl std::fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WriteOutcome::Bootstrapped => "bootstrapped",
            WriteOutcome::Updated => "updated",
            WriteOutcome::Forced => "forced",
            WriteOutcome::Unchanged => "unchanged",
            WriteOutcome::SkippedEmpty => "skipped_empty",
            WriteOutcome::NotPersisted => "not_persisted",
        };
        write!(f, "{}", s)
    }
}

impl WriteOutcome {
    pub fn written(&self) -> bool {
        matches!(
            self,
            WriteOutcome::Bootstrapped | WriteOutcome::Updated | WriteOutcome::Forced
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceChange {
    pub plan: String,
    pub old: u32,
    pub new: u32,
}

/// Differences between two plan sets, paired by provider, plan name and
/// quantity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeReport {
    pub new: Vec<String>,
    pub removed: Vec<String>,
    pub price_changes: Vec<PriceChange>,
    pub promotion_changes: Vec<String>,
    pub updated: Vec<String>,
}

impl ChangeReport {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty()
            && self.removed.is_empty()
            && self.price_changes.is_empty()
            && self.promotion_changes.is_empty()
            && self.updated.is_empty()
    }
}

impl std::fmt::Display for ChangeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "no changes");
        }
        write!(
            f,
            "{} new, {} removed, {} price changes, {} promotion changes, {} updated",
            self.new.len(),
            self.removed.len(),
            self.price_changes.len(),
            self.promotion_changes.len(),
            self.updated.len()
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreReport {
    pub path: PathBuf,
    pub outcome: WriteOutcome,
    /// Content differs from the prior dataset, or there was none.
    pub changed: bool,
    pub changes: ChangeReport,
}

// Prior files are read leniently so a schema tweak never blocks a run.
#[derive(Debug, Deserialize)]
struct PriorDataset {
    #[serde(default)]
    plans: Vec<PlanRecord>,
}

/// Whether `current` holds different plans than `prior`.
///
/// Ids, order, `last_updated` and the derived counts are ignored.
pub fn content_differs(prior: &[PlanRecord], current: &[PlanRecord]) -> bool {
    if prior.len() != current.len() {
        return true;
    }
    let mut remaining: Vec<&PlanRecord> = prior.iter().collect();
    for record in current {
        match remaining.iter().position(|p| p.same_content(record)) {
            Some(i) => {
                remaining.swap_remove(i);
            }
            None => return true,
        }
    }
    false
}

fn label(record: &PlanRecord) -> String {
    format!("{} {}", record.provider, record.plan_name)
}

pub fn detect_changes(prior: &[PlanRecord], current: &[PlanRecord]) -> ChangeReport {
    let before: BTreeMap<_, _> = prior.iter().map(|r| (r.natural_key(), r)).collect();
    let after: BTreeMap<_, _> = current.iter().map(|r| (r.natural_key(), r)).collect();

    let mut report = ChangeReport::default();
    for (key, record) in &after {
        let Some(old) = before.get(key) else {
            report.new.push(label(record));
            continue;
        };
        if old.price != record.price {
            report.price_changes.push(PriceChange {
                plan: label(record),
                old: old.price,
                new: record.price,
            });
        } else if old.promotion != record.promotion {
            report.promotion_changes.push(label(record));
        } else if !old.same_content(record) {
            report.updated.push(label(record));
        }
    }
    report.removed = before
        .iter()
        .filter(|(key, _)| !after.contains_key(*key))
        .map(|(_, record)| label(record))
        .collect();
    report
}

/// The persisted dataset for one category.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    path: PathBuf,
}

impl DatasetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Plans of the prior dataset, or `None` when there is none or it
    /// cannot be parsed.
    pub fn load(&self) -> Result<Option<Vec<PlanRecord>>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        match serde_json::from_str::<PriorDataset>(&content) {
            Ok(prior) => Ok(Some(prior.plans)),
            Err(e) => {
                log::warn!(
                    "path={} outcome=prior_unreadable error=\"{}\"; treating as absent",
                    self.path.display(),
                    e
                );
                Ok(None)
            }
        }
    }

    /// Compares `records` with the prior dataset without writing anything.
    pub fn preview(&self, records: &[PlanRecord]) -> Result<StoreReport, StoreError> {
        let prior = self.load()?;
        let (changed, changes) = compare(prior.as_deref(), records);
        Ok(StoreReport {
            path: self.path.clone(),
            outcome: WriteOutcome::NotPersisted,
            changed,
            changes,
        })
    }

    /// Persists `records` when they differ from the prior dataset (or
    /// `force` is set), stamping `now` as `last_updated`.
    ///
    /// # Errors
    ///
    /// A failed write leaves the prior file in place.
    pub fn commit(
        &self,
        records: Vec<PlanRecord>,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<StoreReport, StoreError> {
        let prior = self.load()?;
        let (changed, changes) = compare(prior.as_deref(), &records);

        let outcome = match &prior {
            Some(prior) if records.is_empty() && !prior.is_empty() => {
                log::warn!(
                    "path={} outcome=skipped_empty prior_plans={}; keeping prior dataset",
                    self.path.display(),
                    prior.len()
                );
                WriteOutcome::SkippedEmpty
            }
            None => WriteOutcome::Bootstrapped,
            Some(_) if changed => WriteOutcome::Updated,
            Some(_) if force => WriteOutcome::Forced,
            Some(_) => WriteOutcome::Unchanged,
        };

        if outcome.written() {
            let dataset = Dataset::new(records, now);
            self.write_atomic(&dataset)?;
            log::info!(
                "path={} outcome={} plans={} changes=\"{}\"",
                self.path.display(),
                outcome,
                dataset.total_plans,
                changes
            );
        } else {
            log::info!("path={} outcome={}", self.path.display(), outcome);
        }

        Ok(StoreReport {
            path: self.path.clone(),
            outcome,
            changed,
            changes,
        })
    }

    /// Writes to a temp file beside the target, syncs it and renames it over
    /// the target.
    pub fn write_atomic(&self, dataset: &Dataset) -> Result<(), StoreError> {
        let mut json = serde_json::to_string_pretty(dataset)?;
        json.push('\n');

        let temp_path = self.temp_path();
        let write_err = |source| StoreError::Write {
            path: temp_path.clone(),
            source,
        };

        let result = File::create(&temp_path)
            .and_then(|mut file| {
                file.write_all(json.as_bytes())?;
                file.sync_all()
            })
            .map_err(write_err)
            .and_then(|()| {
                fs::rename(&temp_path, &self.path).map_err(|source| StoreError::Write {
                    path: self.path.clone(),
                    source,
                })
            });

        if result.is_err()
            && temp_path.is_file()
            && let Err(e) = fs::remove_file(&temp_path)
        {
            log::warn!(
                "path={} outcome=temp_file_left error=\"{}\"",
                temp_path.display(),
                e
            );
        }
        result
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset.json".to_string());
        self.path
            .with_file_name(format!(".{}.tmp-{}", name, std::process::id()))
    }
}

fn compare(prior: Option<&[PlanRecord]>, records: &[PlanRecord]) -> (bool, ChangeReport) {
    match prior {
        Some(prior) => (content_differs(prior, records), detect_changes(prior, records)),
        None => (true, detect_changes(&[], records)),
    }
}
