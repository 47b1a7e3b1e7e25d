use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::{Extractor, RegistryEntry, class_pattern, promotion_in, selector};
use crate::config::ConfigError;
use crate::parser::{
    ParseError, block_text, elem_text, find_contract, find_price, find_speed,
    normalize_whitespace,
};
use crate::types::{Category, RawPlan};

/// Plan cards on a fiber landing page.
///
/// Candidate cards are `div`/`section` elements whose class matches the
/// provider's pattern. Wrappers around several plans also match, so only
/// the innermost candidates carrying both a speed and a price are read.
#[derive(Debug)]
pub struct FiberCardExtractor {
    urls: Vec<String>,
    card_class: Regex,
    blocks: Selector,
    names: Selector,
    name_class: Regex,
    tables: Selector,
    rows: Selector,
    cells: Selector,
    contract: Option<String>,
    promotion: Option<String>,
    features: Vec<String>,
    rating: Option<f32>,
    table_fallback: Option<Vec<String>>,
}

impl FiberCardExtractor {
    pub fn new(provider: &str, url: &str, card_class: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            urls: vec![url.to_string()],
            card_class: class_pattern(provider, card_class)?,
            blocks: selector(provider, "div[class], section[class]")?,
            names: selector(provider, "h2[class], h3[class], h4[class], span[class]")?,
            name_class: class_pattern(provider, "title|name|plan")?,
            tables: selector(provider, "table")?,
            rows: selector(provider, "tr")?,
            cells: selector(provider, "td, th")?,
            contract: None,
            promotion: None,
            features: Vec::new(),
            rating: None,
            table_fallback: None,
        })
    }

    /// Binding used when a card does not state one, e.g. `"24 mdr"`.
    pub fn with_contract(mut self, contract: &str) -> Self {
        self.contract = Some(contract.to_string());
        self
    }

    /// Standing campaign used when a card does not advertise one.
    pub fn with_promotion(mut self, promotion: &str) -> Self {
        self.promotion = Some(promotion.to_string());
        self
    }

    pub fn with_features(mut self, features: &[&str]) -> Self {
        self.features = features.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_rating(mut self, rating: f32) -> Self {
        self.rating = Some(rating);
        self
    }

    /// Reads pricing tables (speed, price, binding columns) when no card
    /// yields a plan. The first row of every table is skipped as its header,
    /// so a table without one loses its first plan.
    pub fn with_table_fallback(mut self, features: &[&str]) -> Self {
        self.table_fallback = Some(features.iter().map(|f| f.to_string()).collect());
        self
    }

    fn is_card(&self, element: &ElementRef) -> bool {
        element
            .value()
            .attr("class")
            .is_some_and(|c| self.card_class.is_match(c))
    }

    fn plan_name(&self, card: ElementRef) -> Option<String> {
        card.select(&self.names)
            .find(|e| {
                e.value()
                    .attr("class")
                    .is_some_and(|c| self.name_class.is_match(c))
            })
            .map(|e| normalize_whitespace(&elem_text(e)))
            .filter(|n| !n.is_empty())
    }

    fn plan_from_card(&self, card: ElementRef, text: &str, url: &str) -> RawPlan {
        RawPlan {
            plan_name: self.plan_name(card),
            price: find_price(text),
            quantity: find_speed(text),
            contract: find_contract(text).or_else(|| self.contract.clone()),
            promotion: promotion_in(card).or_else(|| self.promotion.clone()),
            features: self.features.clone(),
            rating: self.rating,
            url: Some(url.to_string()),
            ..RawPlan::default()
        }
    }

    fn plans_from_tables(&self, document: &Html, features: &[String], url: &str) -> Vec<RawPlan> {
        let mut plans = Vec::new();
        for table in document.select(&self.tables) {
            for row in table.select(&self.rows).skip(1) {
                let cells: Vec<String> = row
                    .select(&self.cells)
                    .map(|c| normalize_whitespace(&elem_text(c)))
                    .collect();
                if cells.len() < 3 {
                    continue;
                }
                plans.push(RawPlan {
                    quantity: Some(cells[0].clone()),
                    price: Some(cells[1].clone()),
                    contract: Some(cells[2].clone())
                        .filter(|c| !c.is_empty())
                        .or_else(|| self.contract.clone()),
                    features: features.to_vec(),
                    rating: self.rating,
                    url: Some(url.to_string()),
                    ..RawPlan::default()
                });
            }
        }
        plans
    }
}

impl Extractor for FiberCardExtractor {
    fn category(&self) -> Category {
        Category::Fiber
    }

    fn urls(&self) -> &[String] {
        &self.urls
    }

    fn parse(&self, html: &str, url: &str) -> Result<Vec<RawPlan>, ParseError> {
        if html.trim().is_empty() {
            return Err(ParseError::EmptyDocument);
        }
        let document = Html::parse_document(html);

        let candidates: Vec<ElementRef> = document
            .select(&self.blocks)
            .filter(|e| self.is_card(e))
            .collect();

        let usable: Vec<(ElementRef, String)> = candidates
            .iter()
            .filter_map(|card| {
                let text = block_text(*card);
                (find_speed(&text).is_some() && find_price(&text).is_some())
                    .then_some((*card, text))
            })
            .collect();

        let mut plans: Vec<RawPlan> = usable
            .iter()
            .filter(|(card, _)| {
                !usable.iter().any(|(other, _)| {
                    **other != **card && other.ancestors().any(|a| a == **card)
                })
            })
            .map(|(card, text)| self.plan_from_card(*card, text, url))
            .collect();

        let mut saw_table = false;
        if plans.is_empty()
            && let Some(features) = &self.table_fallback
        {
            saw_table = document.select(&self.tables).next().is_some();
            plans = self.plans_from_tables(&document, features, url);
        }

        if candidates.is_empty() && !saw_table {
            return Err(ParseError::NoPlanMarkup(self.card_class.as_str().to_string()));
        }
        Ok(plans)
    }
}

pub(super) fn registry() -> Result<Vec<RegistryEntry>, ConfigError> {
    Ok(vec![
        RegistryEntry::new(
            "Hiper",
            FiberCardExtractor::new(
                "Hiper",
                "https://www.hiper.dk/internet/fiber-internet",
                "plan|package|price|card",
            )?
            .with_features(&["Gratis installation", "24/7 support"])
            .with_rating(4.0)
            .with_table_fallback(&["Gratis installation"]),
        )
        .light(),
        RegistryEntry::new(
            "YouSee",
            FiberCardExtractor::new(
                "YouSee",
                "https://www.yousee.dk/privat/internet/fiber",
                "plan|package|price|card|product",
            )?
            .with_features(&["Gratis installation", "YouSee TV tilgængelig"])
            .with_rating(4.2)
            .with_contract("12 mdr")
            .with_table_fallback(&["Gratis installation"]),
        )
        .light(),
        RegistryEntry::new(
            "Stofa",
            FiberCardExtractor::new(
                "Stofa",
                "https://www.stofa.dk/privat/internet/fiber",
                "plan|package|price|card|product",
            )?
            .with_features(&["Gratis installation", "Premium router"])
            .with_rating(4.3),
        )
        .light(),
        RegistryEntry::new(
            "Waoo",
            FiberCardExtractor::new(
                "Waoo",
                "https://www.waoo.dk/internet/fiber",
                "plan|package|price|card",
            )?
            .with_contract("24 mdr")
            .with_promotion("Gratis modem og installation")
            .with_features(&["Gratis installation", "Waoo TV tilgængelig"])
            .with_rating(4.5),
        )
        .light(),
        RegistryEntry::new(
            "Energi Fyn",
            FiberCardExtractor::new(
                "Energi Fyn",
                "https://www.energi-fyn.dk/internet/fiber",
                "plan|package|price|card",
            )?
            .with_contract("12 mdr")
            .with_promotion("Gratis installation")
            .with_features(&["Gratis installation", "Lokalt selskab"])
            .with_rating(4.1),
        ),
        RegistryEntry::new(
            "Fastspeed",
            FiberCardExtractor::new(
                "Fastspeed",
                "https://www.fastspeed.dk/internet/fiber",
                "plan|package|price|card|product|offer",
            )?
            .with_contract("12 mdr")
            .with_promotion("Gratis installation")
            .with_features(&["Gratis installation", "24/7 support", "Hurtig oprettelse"])
            .with_rating(4.2)
            .with_table_fallback(&["Gratis installation"]),
        ),
        RegistryEntry::new(
            "Ewii Fiber",
            FiberCardExtractor::new(
                "Ewii Fiber",
                "https://www.ewii.dk/privat/internet/fiber",
                "plan|package|price|card|product|offer",
            )?
            .with_contract("12 mdr")
            .with_promotion("Gratis installation")
            .with_features(&["Gratis installation", "24/7 support", "Lokalt selskab"])
            .with_rating(4.3)
            .with_table_fallback(&["Gratis installation"]),
        ),
        RegistryEntry::new(
            "Hiper Pro",
            FiberCardExtractor::new(
                "Hiper Pro",
                "https://www.hiper.dk/erhverv/internet/fiber",
                "plan|package|price|card|product|offer|business",
            )?
            .with_contract("24 mdr")
            .with_promotion("Gratis installation og setup")
            .with_features(&[
                "Gratis installation",
                "24/7 business support",
                "SLA garanti",
                "Dedicated support",
            ])
            .with_rating(4.4)
            .with_table_fallback(&["Business support", "SLA garanti"]),
        ),
        // Coverage is too patchy to compare on price; kept for when it widens.
        RegistryEntry::new(
            "Altibox",
            FiberCardExtractor::new(
                "Altibox",
                "https://www.altibox.dk/internet/fiber",
                "plan|package|price|card",
            )?
            .with_contract("12 mdr"),
        )
        .disabled(),
    ])
}
