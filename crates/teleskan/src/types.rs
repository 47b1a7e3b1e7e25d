use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel the frontend uses for plans without a data cap.
pub const UNLIMITED_DATA_GB: u32 = 999;

#[derive(Debug, thiserror::Error)]
#[error("Invalid category '{0}'. Accepted values: 'fiber', 'mobile', 'mobil', 'tv'")]
pub struct CategoryParseError(String);

#[derive(Debug, thiserror::Error)]
#[error("Invalid run mode '{0}'. Accepted values: 'full', 'light', 'test'")]
pub struct RunModeParseError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Fiber,
    Mobile,
    Tv,
}

impl Category {
    /// Name of the dataset file the frontend fetches for this category.
    pub fn file_name(&self) -> &'static str {
        match self {
            Category::Fiber => "fiber.json",
            Category::Mobile => "mobil.json",
            Category::Tv => "tv.json",
        }
    }

    pub fn quantity_label(&self) -> &'static str {
        match self {
            Category::Fiber => "speed",
            Category::Mobile => "data",
            Category::Tv => "channel count",
        }
    }
}

impl FromStr for Category {
    type Err = CategoryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fiber" => Ok(Category::Fiber),
            "mobile" | "mobil" => Ok(Category::Mobile),
            "tv" => Ok(Category::Tv),
            _ => Err(CategoryParseError(s.to_string())),
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Fiber => write!(f, "fiber"),
            Category::Mobile => write!(f, "mobile"),
            Category::Tv => write!(f, "tv"),
        }
    }
}

/// Run variant. Decides provider scope, whether the network is used and
/// whether the dataset may be persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Full,
    Light,
    Test,
}

impl RunMode {
    pub fn persists(&self) -> bool {
        matches!(self, RunMode::Full)
    }

    pub fn uses_network(&self) -> bool {
        !matches!(self, RunMode::Test)
    }
}

impl FromStr for RunMode {
    type Err = RunModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(RunMode::Full),
            "light" => Ok(RunMode::Light),
            "test" => Ok(RunMode::Test),
            _ => Err(RunModeParseError(s.to_string())),
        }
    }
}

impl Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Full => write!(f, "full"),
            RunMode::Light => write!(f, "light"),
            RunMode::Test => write!(f, "test"),
        }
    }
}

/// Category-specific attributes some extractors add to a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanDetails {
    /// Whether the plan mentions EU roaming. Mobile only.
    #[serde(rename = "roaming_EU", default, skip_serializing_if = "Option::is_none")]
    pub roaming_eu: Option<bool>,
    /// Family offer text, or "Nej". Mobile only.
    #[serde(rename = "familierabat", default, skip_serializing_if = "Option::is_none")]
    pub family_discount: Option<String>,
    /// Package grouping such as "Sport" or "Basis". TV only.
    #[serde(rename = "kategori", default, skip_serializing_if = "Option::is_none")]
    pub tv_category: Option<String>,
}

/// Unnormalized values scraped for one offering. Everything is text as it
/// appeared in the markup; the normalizer owns interpretation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPlan {
    pub provider: Option<String>,
    pub plan_name: Option<String>,
    pub price: Option<String>,
    /// Speed, data allowance or channel count depending on the category.
    pub quantity: Option<String>,
    pub contract: Option<String>,
    pub promotion: Option<String>,
    pub features: Vec<String>,
    pub rating: Option<f32>,
    pub url: Option<String>,
    pub details: PlanDetails,
}

/// One normalized offering.
///
/// Stored under the Danish keys the comparison frontend reads, e.g.
/// `udbyder`, `pris_mdr` and `hastighed_mbit`; TV package names are
/// written as `pakke_navn`, all other names as `plan_navn`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "StoredPlan", from = "StoredPlan")]
pub struct PlanRecord {
    pub id: u32,
    pub provider: String,
    pub category: Category,
    pub plan_name: String,
    pub price: u32,
    pub speed_mbit: Option<u32>,
    pub data_gb: Option<u32>,
    pub channel_count: Option<u32>,
    pub contract_months: u32,
    pub promotion: Option<String>,
    pub features: Vec<String>,
    pub rating: Option<f32>,
    pub url: Option<String>,
    pub details: PlanDetails,
}

#[derive(Serialize, Deserialize)]
struct StoredPlan {
    id: u32,
    udbyder: String,
    category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    plan_navn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pakke_navn: Option<String>,
    pris_mdr: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hastighed_mbit: Option<u32>,
    #[serde(rename = "data_GB", default, skip_serializing_if = "Option::is_none")]
    data_gb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kanaler: Option<u32>,
    bindingstid_mdr: u32,
    kampagne: Option<String>,
    #[serde(default)]
    features: Vec<String>,
    #[serde(default)]
    rating: Option<f32>,
    #[serde(default)]
    cta_url: Option<String>,
    #[serde(flatten)]
    details: PlanDetails,
}

impl From<PlanRecord> for StoredPlan {
    fn from(record: PlanRecord) -> Self {
        let (plan_navn, pakke_navn) = match record.category {
            Category::Tv => (None, Some(record.plan_name)),
            _ => (Some(record.plan_name), None),
        };
        Self {
            id: record.id,
            udbyder: record.provider,
            category: record.category,
            plan_navn,
            pakke_navn,
            pris_mdr: record.price,
            hastighed_mbit: record.speed_mbit,
            data_gb: record.data_gb,
            kanaler: record.channel_count,
            bindingstid_mdr: record.contract_months,
            kampagne: record.promotion,
            features: record.features,
            rating: record.rating,
            cta_url: record.url,
            details: record.details,
        }
    }
}

impl From<StoredPlan> for PlanRecord {
    fn from(stored: StoredPlan) -> Self {
        Self {
            id: stored.id,
            provider: stored.udbyder,
            category: stored.category,
            plan_name: stored.plan_navn.or(stored.pakke_navn).unwrap_or_default(),
            price: stored.pris_mdr,
            speed_mbit: stored.hastighed_mbit,
            data_gb: stored.data_gb,
            channel_count: stored.kanaler,
            contract_months: stored.bindingstid_mdr,
            promotion: stored.kampagne,
            features: stored.features,
            rating: stored.rating,
            url: stored.cta_url,
            details: stored.details,
        }
    }
}

impl PlanRecord {
    /// The category-specific quantity: Mbit/s, GB or channels.
    pub fn quantity(&self) -> Option<u32> {
        match self.category {
            Category::Fiber => self.speed_mbit,
            Category::Mobile => self.data_gb,
            Category::Tv => self.channel_count,
        }
    }

    /// Field-by-field equality ignoring the run-local `id`.
    pub fn same_content(&self, other: &PlanRecord) -> bool {
        self.provider == other.provider
            && self.category == other.category
            && self.plan_name == other.plan_name
            && self.price == other.price
            && self.speed_mbit == other.speed_mbit
            && self.data_gb == other.data_gb
            && self.channel_count == other.channel_count
            && self.contract_months == other.contract_months
            && self.promotion == other.promotion
            && self.features == other.features
            && self.rating == other.rating
            && self.url == other.url
            && self.details == other.details
    }

    /// Identity used to pair records across runs in the change summary.
    pub fn natural_key(&self) -> (String, String, Option<u32>) {
        (
            self.provider.clone(),
            self.plan_name.clone(),
            self.quantity(),
        )
    }

    pub(crate) fn sort_cmp(&self, other: &PlanRecord) -> std::cmp::Ordering {
        (
            &self.provider,
            &self.plan_name,
            self.quantity(),
            self.price,
            self.contract_months,
            &self.promotion,
        )
            .cmp(&(
                &other.provider,
                &other.plan_name,
                other.quantity(),
                other.price,
                other.contract_months,
                &other.promotion,
            ))
    }
}

impl Display for PlanRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let quantity = match self.category {
            Category::Fiber => format!("{} Mbit/s", self.speed_mbit.unwrap_or_default()),
            Category::Mobile => match self.data_gb {
                Some(UNLIMITED_DATA_GB) => "fri data".to_string(),
                other => format!("{} GB", other.unwrap_or_default()),
            },
            Category::Tv => format!("{} kanaler", self.channel_count.unwrap_or_default()),
        };
        write!(
            f,
            "[{}] {} | {} | {} kr/md, {} mdr binding",
            self.provider, self.plan_name, quantity, self.price, self.contract_months
        )?;
        if let Some(promotion) = &self.promotion {
            write!(f, " ({})", promotion)?;
        }
        Ok(())
    }
}

/// The persisted artifact, one per category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub last_updated: DateTime<Utc>,
    pub total_plans: usize,
    pub providers: Vec<String>,
    pub plans: Vec<PlanRecord>,
}

impl Dataset {
    pub fn new(plans: Vec<PlanRecord>, last_updated: DateTime<Utc>) -> Self {
        let mut providers: Vec<String> = plans.iter().map(|p| p.provider.clone()).collect();
        providers.sort();
        providers.dedup();

        Self {
            last_updated,
            total_plans: plans.len(),
            providers,
            plans,
        }
    }
}
