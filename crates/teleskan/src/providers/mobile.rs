use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::{Extractor, RegistryEntry, first_text, promotion_in, selector};
use crate::config::ConfigError;
use crate::parser::{ParseError, block_text, find_contract, find_data};
use crate::types::{Category, RawPlan};

static RE_EU_ROAMING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\beu\b|europa").expect("invalid regex: eu roaming"));
static RE_FAMILY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)familie|rabat").expect("invalid regex: family"));

const CONTAINERS: &str = "div.plan-card, div.subscription-card, div.mobile-plan";

/// Subscription cards on a mobile plan page.
#[derive(Debug)]
pub struct MobileCardExtractor {
    urls: Vec<String>,
    cards: Selector,
    names: Selector,
    prices: Selector,
    data: Selector,
    family_discount: Option<String>,
}

impl MobileCardExtractor {
    pub fn new(provider: &str, url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            urls: vec![url.to_string()],
            cards: selector(provider, CONTAINERS)?,
            names: selector(provider, "h3, h4, .plan-name, .subscription-name")?,
            prices: selector(provider, ".price, .monthly-price, .cost")?,
            data: selector(provider, ".data, .gb, .data-amount")?,
            family_discount: None,
        })
    }

    /// Family offer recorded for cards that mention one.
    pub fn with_family_discount(mut self, offer: &str) -> Self {
        self.family_discount = Some(offer.to_string());
        self
    }

    fn plan_from_card(&self, card: ElementRef, url: &str) -> RawPlan {
        let text = block_text(card);

        let mut plan = RawPlan {
            plan_name: first_text(card, &self.names),
            price: first_text(card, &self.prices),
            quantity: first_text(card, &self.data).or_else(|| find_data(&text)),
            contract: find_contract(&text),
            promotion: promotion_in(card),
            url: Some(url.to_string()),
            ..RawPlan::default()
        };

        plan.details.roaming_eu = Some(RE_EU_ROAMING.is_match(&text));
        plan.details.family_discount = Some(match &self.family_discount {
            Some(offer) if RE_FAMILY.is_match(&text) => offer.clone(),
            _ => "Nej".to_string(),
        });
        plan
    }
}

impl Extractor for MobileCardExtractor {
    fn category(&self) -> Category {
        Category::Mobile
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
            MobileCardExtractor::new("YouSee", "https://www.yousee.dk/mobil/abonnementer")?
                .with_family_discount("Ja, -40 kr. pr. ekstra linje"),
        )
        .light(),
        RegistryEntry::new(
            "Oister",
            MobileCardExtractor::new("Oister", "https://www.oister.dk/mobil/abonnementer")?,
        )
        .light(),
        RegistryEntry::new(
            "Greentel",
            MobileCardExtractor::new("Greentel", "https://www.greentel.dk/mobil/abonnementer")?
                .with_family_discount("Ja, 2. simkort til halv pris"),
        ),
        RegistryEntry::new(
            "Lycamobile",
            MobileCardExtractor::new("Lycamobile", "https://www.lycamobile.dk/dk/mobile-plans")?,
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://www.yousee.dk/mobil/abonnementer";

    #[test]
    fn test_parse_subscription_cards() {
        let html = r#"
            <div class="plans">
                <div class="subscription-card">
                    <h3>Fri Tale + 50 GB</h3>
                    <span class="data">50 GB</span>
                    <span class="price">149 kr/md</span>
                    <p>Inkl. 20 GB i EU. Familierabat på ekstra linjer.</p>
                    <p>6 mdr. binding</p>
                </div>
                <div class="plan-card">
                    <h4>Fri data</h4>
                    <p>Ubegrænset data og tale</p>
                    <span class="monthly-price">249 kr/md</span>
                    <span class="promo">Første måned gratis</span>
                </div>
            </div>
        "#;

        let extractor = MobileCardExtractor::new("YouSee", URL)
            .unwrap()
            .with_family_discount("Ja, -40 kr. pr. ekstra linje");
        let plans = extractor.parse(html, URL).expect("should parse");
        assert_eq!(plans.len(), 2);

        let first = &plans[0];
        assert_eq!(first.plan_name.as_deref(), Some("Fri Tale + 50 GB"));
        assert_eq!(first.quantity.as_deref(), Some("50 GB"));
        assert_eq!(first.price.as_deref(), Some("149 kr/md"));
        assert_eq!(first.contract.as_deref(), Some("6 mdr"));
        assert_eq!(first.details.roaming_eu, Some(true));
        assert_eq!(
            first.details.family_discount.as_deref(),
            Some("Ja, -40 kr. pr. ekstra linje")
        );

        let second = &plans[1];
        assert_eq!(second.quantity.as_deref(), Some("Fri data"));
        assert_eq!(second.contract, None);
        assert_eq!(second.promotion.as_deref(), Some("Første måned gratis"));
        assert_eq!(second.details.roaming_eu, Some(false));
        assert_eq!(second.details.family_discount.as_deref(), Some("Nej"));
    }

    #[test]
    fn test_adjacent_elements_are_read_separately() {
        let html = concat!(
            r#"<div class="plan-card"><h3>Tale 5</h3><p>50 GB</p>"#,
            r#"<span class="price">99 kr/md</span><p>Pakke 2</p><p>6 mdr. binding</p></div>"#,
        );

        let plans = MobileCardExtractor::new("Oister", URL)
            .unwrap()
            .parse(html, URL)
            .unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].plan_name.as_deref(), Some("Tale 5"));
        assert_eq!(plans[0].quantity.as_deref(), Some("50 GB"));
        assert_eq!(plans[0].contract.as_deref(), Some("6 mdr"));
    }

    #[test]
    fn test_page_without_cards_is_reported() {
        let extractor = MobileCardExtractor::new("Oister", URL).unwrap();
        let err = extractor
            .parse("<html><body><h1>Abonnementer</h1></body></html>", URL)
            .unwrap_err();
        assert!(matches!(err, ParseError::NoPlanMarkup(_)));
    }
}
