use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::{Extractor, RegistryEntry, first_text, promotion_in, selector};
use crate::config::ConfigError;
use crate::parser::{ParseError, block_text, find_channels, find_contract};
use crate::types::{Category, RawPlan};

static RE_SPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)sport").expect("invalid regex: sport"));
static RE_BASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)basis|grund").expect("invalid regex: basis"));
static RE_ALL_INCLUSIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)total|komplet").expect("invalid regex: all inclusive"));

const CONTAINERS: &str = "div.package-card, div.tv-package, div.subscription-card";

#[derive(Debug)]
pub struct TvPackageExtractor {
    urls: Vec<String>,
    cards: Selector,
    names: Selector,
    prices: Selector,
    channels: Selector,
    contract: Option<String>,
}

impl TvPackageExtractor {
    pub fn new(provider: &str, url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            urls: vec![url.to_string()],
            cards: selector(provider, CONTAINERS)?,
            names: selector(provider, "h3, h4, .package-name, .tv-package-name")?,
            prices: selector(provider, ".price, .monthly-price, .cost")?,
            channels: selector(provider, ".channels, .kanaler, .channel-count")?,
            contract: None,
        })
    }

    pub fn with_contract(mut self, contract: &str) -> Self {
        self.contract = Some(contract.to_string());
        self
    }

    fn plan_from_card(&self, card: ElementRef, url: &str) -> RawPlan {
        let text = block_text(card);
        let plan_name = first_text(card, &self.names);

        let mut plan = RawPlan {
            price: first_text(card, &self.prices),
            quantity: first_text(card, &self.channels).or_else(|| find_channels(&text)),
            contract: find_contract(&text).or_else(|| self.contract.clone()),
            promotion: promotion_in(card),
            url: Some(url.to_string()),
            ..RawPlan::default()
        };
        plan.details.tv_category =
            Some(tv_category(plan_name.as_deref().unwrap_or(&text)).to_string());
        plan.plan_name = plan_name;
        plan
    }
}

/// Coarse package grouping from its name.
fn tv_category(name: &str) -> &'static str {
    if RE_SPORT.is_match(name) {
        "Sport"
    } else if RE_BASIS.is_match(name) {
        "Basis"
    } else if RE_ALL_INCLUSIVE.is_match(name) {
        "All Inclusive"
    } else {
        "Film & Serier"
    }
}

impl Extractor for TvPackageExtractor {
    fn category(&self) -> Category {
        Category::Tv
    }

    fn urls(&self) -> &[String] {
        &self.urls
    }

    fn parse(&self, html: &str, url: &str) -> Result<Vec<RawPlan>, ParseError> {
        if html.trim().is_empty() {
            return Err(ParseError::EmptyDocument);
        }
        let document = Html::parse_document(html);
        let cards: Vec<ElementRef> = document.select(&self.cards).collect();
        if cards.is_empty() {
            return Err(ParseError::NoPlanMarkup(CONTAINERS.to_string()));
        }
        Ok(cards
            .into_iter()
            .map(|card| self.plan_from_card(card, url))
            .collect())
    }
}

pub(super) fn registry() -> Result<Vec<RegistryEntry>, ConfigError> {
    Ok(vec![
        RegistryEntry::new(
            "YouSee",
            TvPackageExtractor::new("YouSee", "https://www.yousee.dk/tv/pakker")?,
        )
        .light(),
        RegistryEntry::new(
            "Waoo",
            TvPackageExtractor::new("Waoo", "https://www.waoo.dk/tv/pakker")?
                .with_contract("12 mdr"),
        )
        .light(),
        RegistryEntry::new(
            "Stofa",
            TvPackageExtractor::new("Stofa", "https://www.stofa.dk/tv/pakker")?,
        )
        .light(),
        RegistryEntry::new(
            "Norlys",
            TvPackageExtractor::new("Norlys", "https://www.norlys.dk/tv/pakker")?,
        ),
        RegistryEntry::new(
            "Allente",
            TvPackageExtractor::new("Allente", "https://www.allente.dk/tv/pakker")?,
        ),
        RegistryEntry::new(
            "Altibox",
            TvPackageExtractor::new("Altibox", "https://www.altibox.dk/tv/pakker")?,
        ),
        RegistryEntry::new(
            "Ewii",
            TvPackageExtractor::new("Ewii", "https://www.ewii.dk/tv/pakker")?,
        ),
    ])
}
