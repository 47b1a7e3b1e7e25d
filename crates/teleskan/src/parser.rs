use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

use crate::types::UNLIMITED_DATA_GB;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("No plan markup matched '{0}'; the page layout may have changed")]
    NoPlanMarkup(String),
    #[error("Page body is empty")]
    EmptyDocument,
}

// A number as printed on Danish pages: "1.000", "299", "199,50", "2.5".
const NUMBER: &str = r"\d{1,3}(?:\.\d{3})+(?:,\d+)?|\d+(?:[.,]\d+)?";

static RE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(NUMBER).expect("invalid regex: number"));
static RE_THOUSANDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,3}(?:\.\d{3})+(?:,\d+)?$").expect("invalid regex: thousands")
});
static RE_SPEED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)({NUMBER})\s*(gbit|gb|mbit|mb)(?:/s|ps)?\b"))
        .expect("invalid regex: speed")
});
static RE_PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,3}(?:\.\d{3})+|\d+)(?:,(?:\d{1,2}|-))?\s*(?:kr\.?|dkk)")
        .expect("invalid regex: price")
});
static RE_CONTRACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*(måneder|måned|mdr|år)").expect("invalid regex: contract")
});
static RE_NO_BINDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(ingen|uden)\s+binding").expect("invalid regex: no binding")
});
static RE_DATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)({NUMBER})\s*(tb|gb|mb)\b")).expect("invalid regex: data")
});
static RE_UNLIMITED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(ubegrænset|fri data|unlimited|fri forbrug)").expect("invalid regex: unlimited")
});
static RE_CHANNELS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*(?:tv-)?(kanaler|kanal|channels)").expect("invalid regex: channels")
});
static RE_PROMOTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(gratis|rabat|tilbud|kampagne|halv pris)").expect("invalid regex: promotion")
});

pub(crate) fn elem_text(element: ElementRef) -> String {
    element.text().collect::<String>()
}

pub(crate) fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text nodes of an element, whitespace-collapsed, empties dropped.
pub(crate) fn text_fragments(element: ElementRef) -> Vec<String> {
    element
        .text()
        .map(normalize_whitespace)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Text of a container whose children are separate fields; adjacent
/// elements are kept apart by a space.
pub(crate) fn block_text(element: ElementRef) -> String {
    text_fragments(element).join(" ")
}

pub(crate) fn parse_danish_number(token: &str) -> Option<f64> {
    let token = token.trim();
    let cleaned = if RE_THOUSANDS.is_match(token) {
        token.replace('.', "").replace(',', ".")
    } else {
        token.replace(',', ".")
    };
    cleaned.parse().ok()
}

fn first_number(text: &str) -> Option<f64> {
    RE_NUMBER
        .find(text)
        .and_then(|m| parse_danish_number(m.as_str()))
}

fn positive(value: f64) -> Option<u32> {
    let value = value.floor();
    (value >= 1.0 && value <= u32::MAX as f64).then_some(value as u32)
}

/// "1.000 Mbit/s" -> 1000, "1 Gbit/s" -> 1000, "2 GB" -> 2000. A bare
/// number is read as Mbit/s.
pub fn parse_speed_mbit(text: &str) -> Option<u32> {
    if let Some(caps) = RE_SPEED.captures(text) {
        let value = parse_danish_number(&caps[1])?;
        let factor = if caps[2].to_lowercase().starts_with('g') {
            1000.0
        } else {
            1.0
        };
        return positive(value * factor);
    }
    first_number(text).and_then(positive)
}

/// "299,- kr/md" -> 299, "1.299 kr" -> 1299, "199,50" -> 199.
pub fn parse_price_dkk(text: &str) -> Option<u32> {
    if let Some(caps) = RE_PRICE.captures(text) {
        return parse_danish_number(&caps[1]).and_then(positive);
    }
    first_number(text).and_then(positive)
}

/// Contract length in months; 0 when there is no binding or nothing to read.
pub fn parse_contract_months(text: &str) -> u32 {
    if RE_NO_BINDING.is_match(text) {
        return 0;
    }
    if let Some(caps) = RE_CONTRACT.captures(text) {
        let n: u32 = caps[1].parse().unwrap_or(0);
        return if caps[2].to_lowercase() == "år" {
            n.saturating_mul(12)
        } else {
            n
        };
    }
    RE_NUMBER
        .find(text)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Data allowance in whole GB; unlimited plans map to [`UNLIMITED_DATA_GB`].
pub fn parse_data_gb(text: &str) -> Option<u32> {
    if RE_UNLIMITED.is_match(text) {
        return Some(UNLIMITED_DATA_GB);
    }
    if let Some(caps) = RE_DATA.captures(text) {
        let value = parse_danish_number(&caps[1])?;
        let gb = match caps[2].to_lowercase().as_str() {
            "tb" => value * 1000.0,
            "mb" => value / 1000.0,
            _ => value,
        };
        return positive(gb);
    }
    first_number(text).and_then(positive)
}

pub fn parse_channel_count(text: &str) -> Option<u32> {
    if let Some(caps) = RE_CHANNELS.captures(text) {
        return caps[1].parse().ok().filter(|n| *n > 0);
    }
    RE_NUMBER
        .find(text)
        .and_then(|m| m.as_str().parse().ok())
        .filter(|n| *n > 0)
}

pub(crate) fn find_speed(text: &str) -> Option<String> {
    RE_SPEED.find(text).map(|m| m.as_str().to_string())
}

pub(crate) fn find_price(text: &str) -> Option<String> {
    RE_PRICE.find(text).map(|m| m.as_str().to_string())
}

pub(crate) fn find_contract(text: &str) -> Option<String> {
    RE_NO_BINDING
        .find(text)
        .or_else(|| RE_CONTRACT.find(text))
        .map(|m| m.as_str().to_string())
}

pub(crate) fn find_data(text: &str) -> Option<String> {
    RE_UNLIMITED
        .find(text)
        .or_else(|| RE_DATA.find(text))
        .map(|m| m.as_str().to_string())
}

pub(crate) fn find_channels(text: &str) -> Option<String> {
    RE_CHANNELS.find(text).map(|m| m.as_str().to_string())
}

/// First fragment that reads like a campaign, copied verbatim.
pub(crate) fn find_promotion(fragments: &[String]) -> Option<String> {
    fragments
        .iter()
        .find(|f| RE_PROMOTION.is_match(f))
        .cloned()
}
