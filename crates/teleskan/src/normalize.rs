//! Conversion of scraped [`RawPlan`]s into canonical [`PlanRecord`]s.
//!
//! Normalization is pure: the same raw plan and provider always produce the
//! same record. Ids are left at 0 and assigned by the run controller once
//! every provider has reported.

use crate::parser::{
    normalize_whitespace, parse_channel_count, parse_contract_months, parse_data_gb,
    parse_price_dkk, parse_speed_mbit,
};
use crate::types::{Category, PlanRecord, RawPlan, UNLIMITED_DATA_GB};

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("missing provider name")]
    MissingProvider,
    #[error("missing or unreadable price: {0:?}")]
    InvalidPrice(Option<String>),
    #[error("missing or unreadable {label}: {value:?}")]
    InvalidQuantity {
        label: &'static str,
        value: Option<String>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    category: Category,
}

impl Normalizer {
    pub fn new(category: Category) -> Self {
        Self { category }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Normalizes one raw plan scraped for `provider`.
    ///
    /// # Errors
    ///
    /// Rejects the plan when the provider, the price or the category's
    /// quantity is missing or not a positive number.
    pub fn normalize(&self, raw: &RawPlan, provider: &str) -> Result<PlanRecord, NormalizeError> {
        // The registry name wins so records always point at a known entry.
        let provider = Some(normalize_whitespace(provider))
            .filter(|p| !p.is_empty())
            .or_else(|| {
                raw.provider
                    .as_deref()
                    .map(normalize_whitespace)
                    .filter(|p| !p.is_empty())
            })
            .ok_or(NormalizeError::MissingProvider)?;

        let price = raw
            .price
            .as_deref()
            .and_then(parse_price_dkk)
            .ok_or_else(|| NormalizeError::InvalidPrice(raw.price.clone()))?;

        let quantity = raw
            .quantity
            .as_deref()
            .and_then(|q| match self.category {
                Category::Fiber => parse_speed_mbit(q),
                Category::Mobile => parse_data_gb(q),
                Category::Tv => parse_channel_count(q),
            })
            .ok_or_else(|| NormalizeError::InvalidQuantity {
                label: self.category.quantity_label(),
                value: raw.quantity.clone(),
            })?;

        let contract_months = raw
            .contract
            .as_deref()
            .map(parse_contract_months)
            .unwrap_or(0);

        let promotion = raw
            .promotion
            .as_deref()
            .map(normalize_whitespace)
            .filter(|p| !p.is_empty());

        let features = raw
            .features
            .iter()
            .map(|f| normalize_whitespace(f))
            .filter(|f| !f.is_empty())
            .collect();

        let rating = match raw.rating {
            Some(r) if (0.0..=5.0).contains(&r) => Some(r),
            Some(r) => {
                log::warn!("provider={} outcome=rating_dropped rating={}", provider, r);
                None
            }
            None => None,
        };

        let plan_name = raw
            .plan_name
            .as_deref()
            .map(normalize_whitespace)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.default_plan_name(&provider, quantity));

        let (speed_mbit, data_gb, channel_count) = match self.category {
            Category::Fiber => (Some(quantity), None, None),
            Category::Mobile => (None, Some(quantity), None),
            Category::Tv => (None, None, Some(quantity)),
        };

        Ok(PlanRecord {
            id: 0,
            provider,
            category: self.category,
            plan_name,
            price,
            speed_mbit,
            data_gb,
            channel_count,
            contract_months,
            promotion,
            features,
            rating,
            url: raw.url.clone().filter(|u| !u.trim().is_empty()),
            details: raw.details.clone(),
        })
    }

    /// Normalizes a provider's batch, dropping rejects with a warning that
    /// carries the raw input.
    pub fn normalize_all(&self, raws: &[RawPlan], provider: &str) -> Vec<PlanRecord> {
        raws.iter()
            .filter_map(|raw| match self.normalize(raw, provider) {
                Ok(record) => Some(record),
                Err(e) => {
                    log::warn!(
                        "provider={} outcome=rejected reason=\"{}\" raw={:?}",
                        provider,
                        e,
                        raw
                    );
                    None
                }
            })
            .collect()
    }

    fn default_plan_name(&self, provider: &str, quantity: u32) -> String {
        match self.category {
            Category::Fiber => format!("{} Fiber {}", provider, quantity),
            Category::Mobile if quantity == UNLIMITED_DATA_GB => format!("{} Fri data", provider),
            Category::Mobile => format!("{} {} GB", provider, quantity),
            Category::Tv => format!("{} {} kanaler", provider, quantity),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, Once};

    use super::*;

    struct CapturedLog(Mutex<Vec<String>>);

    impl log::Log for CapturedLog {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            metadata.level() <= log::Level::Warn
        }

        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                self.0.lock().unwrap().push(record.args().to_string());
            }
        }

        fn flush(&self) {}
    }

    static WARNINGS: CapturedLog = CapturedLog(Mutex::new(Vec::new()));

    fn capture_warnings() {
        static INSTALL: Once = Once::new();
        INSTALL.call_once(|| {
            log::set_logger(&WARNINGS).expect("no other logger installed");
            log::set_max_level(log::LevelFilter::Warn);
        });
    }

    /// Warnings logged since capture started, by any test in this binary.
    fn warnings_containing(needle: &str) -> Vec<String> {
        WARNINGS
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.contains(needle))
            .cloned()
            .collect()
    }

    fn fiber_raw() -> RawPlan {
        RawPlan {
            price: Some("299,- kr/md".to_string()),
            quantity: Some("1.000 Mbit/s".to_string()),
            contract: Some("6 mdr".to_string()),
            promotion: Some("  Gratis   installation ".to_string()),
            features: vec!["24/7 support".to_string(), " ".to_string()],
            rating: Some(4.0),
            ..RawPlan::default()
        }
    }

    #[test]
    fn test_normalize_fiber_plan() {
        let record = Normalizer::new(Category::Fiber)
            .normalize(&fiber_raw(), "Hiper")
            .expect("should normalize");

        assert_eq!(record.provider, "Hiper");
        assert_eq!(record.price, 299);
        assert_eq!(record.speed_mbit, Some(1000));
        assert_eq!(record.data_gb, None);
        assert_eq!(record.contract_months, 6);
        assert_eq!(record.promotion.as_deref(), Some("Gratis installation"));
        assert_eq!(record.features, vec!["24/7 support"]);
        assert_eq!(record.plan_name, "Hiper Fiber 1000");
        assert_eq!(record.id, 0);
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let normalizer = Normalizer::new(Category::Fiber);
        let a = normalizer.normalize(&fiber_raw(), "Hiper").unwrap();
        let b = normalizer.normalize(&fiber_raw(), "Hiper").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_price_is_rejected() {
        let raw = RawPlan {
            price: None,
            ..fiber_raw()
        };
        let err = Normalizer::new(Category::Fiber)
            .normalize(&raw, "Hiper")
            .unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidPrice(None)));
    }

    #[test]
    fn test_missing_quantity_is_rejected() {
        let raw = RawPlan {
            quantity: Some("lynhurtig".to_string()),
            ..fiber_raw()
        };
        let err = Normalizer::new(Category::Fiber)
            .normalize(&raw, "Hiper")
            .unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidQuantity { label: "speed", .. }));
    }

    #[test]
    fn test_missing_provider_is_rejected() {
        let err = Normalizer::new(Category::Fiber)
            .normalize(&fiber_raw(), "  ")
            .unwrap_err();
        assert!(matches!(err, NormalizeError::MissingProvider));
    }

    #[test]
    fn test_normalize_all_drops_exactly_the_malformed_plans() {
        let raws = vec![
            fiber_raw(),
            RawPlan {
                price: None,
                ..fiber_raw()
            },
            RawPlan {
                quantity: None,
                ..fiber_raw()
            },
        ];
        capture_warnings();
        let records = Normalizer::new(Category::Fiber).normalize_all(&raws, "Kviknet");
        assert_eq!(records.len(), 1);

        let rejected = warnings_containing("provider=Kviknet outcome=rejected");
        assert_eq!(rejected.len(), 2);
        assert!(rejected[0].contains("missing or unreadable price"));
        assert!(rejected[1].contains("missing or unreadable speed"));
    }

    #[test]
    fn test_out_of_range_rating_is_dropped() {
        let raw = RawPlan {
            rating: Some(7.5),
            ..fiber_raw()
        };
        let record = Normalizer::new(Category::Fiber).normalize(&raw, "Hiper").unwrap();
        assert_eq!(record.rating, None);
    }

    #[test]
    fn test_mobile_unlimited_data_and_default_name() {
        let raw = RawPlan {
            price: Some("179 kr".to_string()),
            quantity: Some("Fri data".to_string()),
            contract: Some("Ingen binding".to_string()),
            ..RawPlan::default()
        };
        let record = Normalizer::new(Category::Mobile).normalize(&raw, "Oister").unwrap();
        assert_eq!(record.data_gb, Some(UNLIMITED_DATA_GB));
        assert_eq!(record.speed_mbit, None);
        assert_eq!(record.contract_months, 0);
        assert_eq!(record.plan_name, "Oister Fri data");
        assert_eq!(record.promotion, None);
    }

    #[test]
    fn test_tv_channels_and_extras() {
        let mut raw = RawPlan {
            plan_name: Some("Sportspakken".to_string()),
            price: Some("499 kr/md".to_string()),
            quantity: Some("55 kanaler".to_string()),
            contract: Some("12 måneder".to_string()),
            ..RawPlan::default()
        };
        raw.details.tv_category = Some("Sport".to_string());

        let record = Normalizer::new(Category::Tv).normalize(&raw, "Waoo").unwrap();
        assert_eq!(record.channel_count, Some(55));
        assert_eq!(record.quantity(), Some(55));
        assert_eq!(record.details.tv_category.as_deref(), Some("Sport"));
    }

    #[test]
    fn test_registry_name_wins_over_scraped_provider() {
        let raw = RawPlan {
            provider: Some("hiper.dk".to_string()),
            ..fiber_raw()
        };
        let normalizer = Normalizer::new(Category::Fiber);
        assert_eq!(normalizer.normalize(&raw, "Hiper").unwrap().provider, "Hiper");
        assert_eq!(normalizer.normalize(&raw, "").unwrap().provider, "hiper.dk");
    }
}
