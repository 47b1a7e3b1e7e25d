//! Provider extractors and the registry that lists them.
//!
//! Every provider is an [`Extractor`]: it names the page(s) to fetch and turns
//! their HTML into [`RawPlan`]s. The run controller is written once against
//! the trait; adding a provider means adding a registry entry.

mod fiber;
mod mobile;
mod tv;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Selector};

use crate::config::ConfigError;
use crate::parser::{ParseError, elem_text, find_promotion, normalize_whitespace, text_fragments};
use crate::types::{Category, RawPlan, RunMode};

pub use fiber::FiberCardExtractor;
pub use mobile::MobileCardExtractor;
pub use tv::TvPackageExtractor;

static RE_PROMO_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)campaign|promo|kampagne|offer-badge").expect("invalid regex: promo class")
});

pub trait Extractor: Send + Sync + std::fmt::Debug {
    fn category(&self) -> Category;

    /// Pages fetched for this provider, one attempt each per run.
    fn urls(&self) -> &[String];

    /// Extracts the offerings on one fetched page.
    ///
    /// Returns [`ParseError::NoPlanMarkup`] when none of the expected
    /// containers exist, and an empty list when containers exist but none
    /// carries a usable plan.
    fn parse(&self, html: &str, url: &str) -> Result<Vec<RawPlan>, ParseError>;
}

#[derive(Debug)]
pub struct RegistryEntry {
    pub name: String,
    pub extractor: Box<dyn Extractor>,
    pub enabled: bool,
    /// Part of the quick light-mode subset.
    pub light: bool,
}

impl RegistryEntry {
    pub fn new(name: impl Into<String>, extractor: impl Extractor + 'static) -> Self {
        Self {
            name: name.into(),
            extractor: Box::new(extractor),
            enabled: true,
            light: false,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn light(mut self) -> Self {
        self.light = true;
        self
    }
}

/// Immutable provider list for one category, built at start-up and handed
/// to the run controller.
#[derive(Debug)]
pub struct Registry {
    category: Category,
    entries: Vec<RegistryEntry>,
}

impl Registry {
    pub fn new(category: Category, entries: Vec<RegistryEntry>) -> Result<Self, ConfigError> {
        let mut seen: Vec<String> = Vec::with_capacity(entries.len());
        for entry in &entries {
            let key = entry.name.trim().to_lowercase();
            if key.is_empty() {
                return Err(ConfigError::EmptyProviderName);
            }
            if seen.contains(&key) {
                return Err(ConfigError::DuplicateProvider(entry.name.clone()));
            }
            if entry.extractor.category() != category {
                return Err(ConfigError::CategoryMismatch {
                    provider: entry.name.clone(),
                    expected: category,
                    found: entry.extractor.category(),
                });
            }
            seen.push(key);
        }
        Ok(Self { category, entries })
    }

    /// The providers shipped with the crate.
    pub fn builtin(category: Category) -> Result<Self, ConfigError> {
        let entries = match category {
            Category::Fiber => fiber::registry()?,
            Category::Mobile => mobile::registry()?,
            Category::Tv => tv::registry()?,
        };
        Self::new(category, entries)
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn enabled(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter().filter(|e| e.enabled)
    }

    /// Entries that take part in a run, in registry order.
    ///
    /// Disabled entries never take part. Light mode keeps only entries
    /// flagged `light`. `only` narrows any mode to one enabled provider.
    pub fn scoped(
        &self,
        mode: RunMode,
        only: Option<&str>,
    ) -> Result<Vec<&RegistryEntry>, ConfigError> {
        if let Some(name) = only {
            let entry = self
                .enabled()
                .find(|e| e.name.eq_ignore_ascii_case(name.trim()))
                .ok_or_else(|| ConfigError::UnknownProvider(name.to_string(), self.category))?;
            return Ok(vec![entry]);
        }

        let mut scoped = Vec::new();
        for entry in &self.entries {
            if !entry.enabled {
                log::info!("Skipping {} (disabled)", entry.name);
                continue;
            }
            if mode == RunMode::Light && !entry.light {
                log::info!("Skipping {} in light mode", entry.name);
                continue;
            }
            scoped.push(entry);
        }
        Ok(scoped)
    }
}

pub(crate) fn selector(provider: &str, css: &str) -> Result<Selector, ConfigError> {
    Selector::parse(css).map_err(|e| ConfigError::InvalidSelector {
        provider: provider.to_string(),
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn class_pattern(provider: &str, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(&format!("(?i){pattern}")).map_err(|source| ConfigError::InvalidClassPattern {
        provider: provider.to_string(),
        pattern: pattern.to_string(),
        source,
    })
}

pub(crate) fn first_text(element: ElementRef, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .map(|e| normalize_whitespace(&elem_text(e)))
        .find(|t| !t.is_empty())
}

/// A campaign badge if the markup has one, otherwise the first fragment
/// that reads like a campaign.
pub(crate) fn promotion_in(element: ElementRef) -> Option<String> {
    element
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .find(|e| {
            e.value()
                .attr("class")
                .is_some_and(|c| RE_PROMO_CLASS.is_match(c))
        })
        .map(|e| normalize_whitespace(&elem_text(e)))
        .filter(|t| !t.is_empty())
        .or_else(|| find_promotion(&text_fragments(element)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fiber(url: &str) -> FiberCardExtractor {
        FiberCardExtractor::new("Test", url, "plan|card").expect("valid extractor")
    }

    #[test]
    fn test_builtin_registries_are_valid() {
        for category in [Category::Fiber, Category::Mobile, Category::Tv] {
            let registry = Registry::builtin(category).expect("builtin registry should build");
            assert!(registry.enabled().count() > 0);
            assert!(
                registry.entries().iter().any(|e| e.light),
                "{category} needs a light subset"
            );
        }
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let result = Registry::new(
            Category::Fiber,
            vec![
                RegistryEntry::new("Hiper", fiber("https://a.example")),
                RegistryEntry::new("hiper", fiber("https://b.example")),
            ],
        );
        assert!(matches!(result, Err(ConfigError::DuplicateProvider(_))));
    }

    #[test]
    fn test_category_mismatch_is_rejected() {
        let result = Registry::new(
            Category::Tv,
            vec![RegistryEntry::new("Hiper", fiber("https://a.example"))],
        );
        assert!(matches!(result, Err(ConfigError::CategoryMismatch { .. })));
    }

    #[test]
    fn test_scoped_skips_disabled_and_respects_light() {
        let registry = Registry::new(
            Category::Fiber,
            vec![
                RegistryEntry::new("A", fiber("https://a.example")).light(),
                RegistryEntry::new("B", fiber("https://b.example")).disabled(),
                RegistryEntry::new("C", fiber("https://c.example")),
            ],
        )
        .unwrap();

        let names = |entries: Vec<&RegistryEntry>| {
            entries.iter().map(|e| e.name.clone()).collect::<Vec<_>>()
        };

        assert_eq!(names(registry.scoped(RunMode::Full, None).unwrap()), vec!["A", "C"]);
        assert_eq!(names(registry.scoped(RunMode::Light, None).unwrap()), vec!["A"]);
        assert_eq!(names(registry.scoped(RunMode::Test, Some("c")).unwrap()), vec!["C"]);
        assert!(matches!(
            registry.scoped(RunMode::Full, Some("B")),
            Err(ConfigError::UnknownProvider(..))
        ));
    }

    #[test]
    fn test_invalid_selector_is_a_config_error() {
        assert!(matches!(
            selector("Test", "div[[["),
            Err(ConfigError::InvalidSelector { .. })
        ));
        assert!(matches!(
            class_pattern("Test", "plan(("),
            Err(ConfigError::InvalidClassPattern { .. })
        ));
    }
}
