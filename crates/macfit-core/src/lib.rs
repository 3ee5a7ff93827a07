//! Core configuration model shared by extraction, matching, and the JSON boundary.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "macfit-core";

/// Serialized form of [`Chip::UnknownMSeries`].
pub const UNKNOWN_M_SERIES: &str = "M-Series (Unknown)";

/// Serialized form of [`Chip::NotFound`].
pub const NO_CHIP: &str = "N/A";

/// Closed set of product families a capture can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "MacBook")]
    MacBook,
    #[serde(rename = "Desktop")]
    DesktopMac,
    #[serde(rename = "iPhone")]
    IPhone,
    #[serde(rename = "Mac")]
    Mac,
}

impl Category {
    /// Mac-family categories are expected to carry an Apple-silicon chip token.
    pub fn expects_apple_silicon(self) -> bool {
        matches!(self, Self::MacBook | Self::DesktopMac | Self::Mac)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MacBook => "MacBook",
            Self::DesktopMac => "Desktop",
            Self::IPhone => "iPhone",
            Self::Mac => "Mac",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chip identifier with a distinguished "present but unidentified" state.
///
/// `UnknownMSeries` means the page is a Mac page but no `M<n>` token was found;
/// `NotFound` means no chip information exists at all. Both serialize to fixed
/// strings so the persisted record never carries a null chip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Chip {
    Identified(String),
    UnknownMSeries,
    #[default]
    NotFound,
}

impl Chip {
    /// Normalizes a matched token: upper-cased with all whitespace removed
    /// (`"m3 pro"` becomes `"M3PRO"`).
    pub fn identified(token: &str) -> Self {
        let normalized = token
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();
        if normalized.is_empty() {
            Self::NotFound
        } else {
            Self::Identified(normalized)
        }
    }

    pub fn is_present(&self) -> bool {
        !matches!(self, Self::NotFound)
    }

    /// The normalized token, only for identified chips.
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Identified(token) => Some(token),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Identified(token) => token,
            Self::UnknownMSeries => UNKNOWN_M_SERIES,
            Self::NotFound => NO_CHIP,
        }
    }
}

impl From<String> for Chip {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        match trimmed {
            UNKNOWN_M_SERIES => Self::UnknownMSeries,
            "" | NO_CHIP => Self::NotFound,
            _ => Self::identified(trimmed),
        }
    }
}

impl From<Chip> for String {
    fn from(value: Chip) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecField {
    Chip,
    CpuCores,
    GpuCores,
    RamGb,
    StorageGb,
    DisplaySize,
    Color,
    Price,
}

/// Provenance pointer: which extraction rule populated a field, and from what text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub field: SpecField,
    pub rule_id: String,
    pub snippet: String,
}

/// Extractor output handed to the validator.
///
/// Unmatched numeric fields stay at 0 ("not determined"), the chip at its
/// default state. Only fields that were actually matched have an [`Evidence`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialRecord {
    pub base_name: String,
    pub category: Category,
    pub chip: Chip,
    pub cpu_cores: u32,
    pub gpu_cores: u32,
    pub ram_gb: u32,
    pub storage_gb: u32,
    pub display_size: Option<String>,
    pub color: Option<String>,
    pub source_ref: String,
    pub evidence: Vec<Evidence>,
}

impl PartialRecord {
    pub fn empty(base_name: impl Into<String>, category: Category, source_ref: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
            category,
            chip: Chip::NotFound,
            cpu_cores: 0,
            gpu_cores: 0,
            ram_gb: 0,
            storage_gb: 0,
            display_size: None,
            color: None,
            source_ref: source_ref.into(),
            evidence: Vec::new(),
        }
    }

    pub fn evidence_for(&self, field: SpecField) -> Option<&Evidence> {
        self.evidence.iter().find(|e| e.field == field)
    }
}

/// A validated configuration. Base fields are frozen once the validator emits it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    pub name: String,
    #[serde(default)]
    pub base_name: String,
    #[serde(alias = "type")]
    pub category: Category,
    pub chip: Chip,
    pub cpu_cores: u32,
    pub gpu_cores: u32,
    pub ram_gb: u32,
    pub storage_gb: u32,
    #[serde(alias = "price_inr")]
    pub price: u64,
    #[serde(alias = "source_url")]
    pub source_ref: String,
}

/// Display name for a configuration.
///
/// iPhones read `<base> (<storage>GB)`; Mac-family records read
/// `<base> <chip> (<ram>GB RAM, <storage>GB SSD)` with unknown parts omitted.
pub fn display_name(base_name: &str, category: Category, chip: &Chip, ram_gb: u32, storage_gb: u32) -> String {
    if category == Category::IPhone {
        return if storage_gb > 0 {
            format!("{base_name} ({storage_gb}GB)")
        } else {
            base_name.to_string()
        };
    }

    let mut name = base_name.to_string();
    if let Some(token) = chip.token() {
        name.push(' ');
        name.push_str(token);
    }
    let mut parts = Vec::new();
    if ram_gb > 0 {
        parts.push(format!("{ram_gb}GB RAM"));
    }
    if storage_gb > 0 {
        parts.push(format!("{storage_gb}GB SSD"));
    }
    if !parts.is_empty() {
        name.push_str(&format!(" ({})", parts.join(", ")));
    }
    name
}

/// A record plus its advisory value score; the base record is untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    #[serde(flatten)]
    pub record: ConfigurationRecord,
    pub value_score: f64,
}

/// Ordered collection of validated records, in first-capture order.
///
/// Appending does not check identity; ingestion goes through the deduplicator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    records: Vec<ConfigurationRecord>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps records that are already deduplicated (e.g. a loaded snapshot).
    pub fn from_records(records: Vec<ConfigurationRecord>) -> Self {
        Self { records }
    }

    pub fn push(&mut self, record: ConfigurationRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[ConfigurationRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConfigurationRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<ConfigurationRecord> {
        self.records
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a ConfigurationRecord;
    type IntoIter = std::slice::Iter<'a, ConfigurationRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Point-in-time catalog in its persisted two-field shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    /// Unix seconds (fractional) at which the snapshot was produced.
    pub timestamp: f64,
    pub products: Catalog,
}

impl CatalogSnapshot {
    pub fn new(products: Catalog, taken_at: DateTime<Utc>) -> Self {
        let timestamp =
            taken_at.timestamp() as f64 + f64::from(taken_at.timestamp_subsec_nanos()) / 1_000_000_000.0;
        Self { timestamp, products }
    }

    pub fn empty() -> Self {
        Self {
            timestamp: 0.0,
            products: Catalog::new(),
        }
    }

    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        if !self.timestamp.is_finite() || self.timestamp <= 0.0 {
            return None;
        }
        let secs = self.timestamp.trunc() as i64;
        let nanos = (self.timestamp.fract() * 1_000_000_000.0).round() as u32;
        Utc.timestamp_opt(secs, nanos.min(999_999_999)).single()
    }
}

/// Why a partial record never made it into the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    #[error("no positive price found in candidate text")]
    MissingPrice,
    #[error("storage size not determined")]
    MissingStorage,
    #[error("no chip information found")]
    MissingChip,
}

impl RejectReason {
    pub fn code(self) -> &'static str {
        match self {
            Self::MissingPrice => "missing_price",
            Self::MissingStorage => "missing_storage",
            Self::MissingChip => "missing_chip",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(price: u64) -> ConfigurationRecord {
        ConfigurationRecord {
            name: "Mac mini M4 (16GB RAM, 256GB SSD)".into(),
            base_name: "Mac mini".into(),
            category: Category::DesktopMac,
            chip: Chip::identified("M4"),
            cpu_cores: 10,
            gpu_cores: 10,
            ram_gb: 16,
            storage_gb: 256,
            price,
            source_ref: "https://www.apple.com/in/shop/buy-mac/mac-mini".into(),
        }
    }

    #[test]
    fn chip_tokens_are_upper_cased_without_whitespace() {
        assert_eq!(Chip::identified("m3 pro"), Chip::Identified("M3PRO".into()));
        assert_eq!(Chip::identified("M4  Max").as_str(), "M4MAX");
        assert_eq!(Chip::identified("  "), Chip::NotFound);
    }

    #[test]
    fn loaded_chips_normalize_like_extracted_ones() {
        let loaded: Chip = serde_json::from_str("\"M3 Pro\"").unwrap();
        assert_eq!(loaded, Chip::identified("m3 pro"));
        assert_eq!(loaded.as_str(), "M3PRO");
    }

    #[test]
    fn chip_sentinel_is_distinct_from_absence() {
        assert!(Chip::UnknownMSeries.is_present());
        assert!(!Chip::NotFound.is_present());
        assert_eq!(Chip::UnknownMSeries.token(), None);

        let json = serde_json::to_string(&Chip::UnknownMSeries).unwrap();
        assert_eq!(json, "\"M-Series (Unknown)\"");
        let back: Chip = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Chip::UnknownMSeries);
        let absent: Chip = serde_json::from_str("\"N/A\"").unwrap();
        assert_eq!(absent, Chip::NotFound);
    }

    #[test]
    fn record_serializes_to_flat_field_set() {
        let value = serde_json::to_value(record(59_900)).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj["category"], "Desktop");
        assert_eq!(obj["chip"], "M4");
        assert_eq!(obj["price"], 59_900);
        assert!(obj.values().all(|v| !v.is_object() && !v.is_array()));
    }

    #[test]
    fn record_loads_legacy_field_names() {
        let legacy = r#"{
            "name": "iPhone 16 Pro (256GB)",
            "base_name": "iPhone 16 Pro",
            "type": "iPhone",
            "chip": "N/A",
            "cpu_cores": 0,
            "gpu_cores": 0,
            "ram_gb": 0,
            "storage_gb": 256,
            "price_inr": 129900,
            "source_url": "https://www.apple.com/in/shop/buy-iphone/iphone-16-pro/x"
        }"#;
        let rec: ConfigurationRecord = serde_json::from_str(legacy).unwrap();
        assert_eq!(rec.category, Category::IPhone);
        assert_eq!(rec.price, 129_900);
        assert_eq!(rec.chip, Chip::NotFound);
    }

    #[test]
    fn display_names_follow_category() {
        assert_eq!(
            display_name("Mac mini", Category::DesktopMac, &Chip::identified("m4 pro"), 24, 512),
            "Mac mini M4PRO (24GB RAM, 512GB SSD)"
        );
        assert_eq!(
            display_name("iMac", Category::DesktopMac, &Chip::UnknownMSeries, 0, 256),
            "iMac (256GB SSD)"
        );
        assert_eq!(
            display_name("iPhone 16 Pro", Category::IPhone, &Chip::NotFound, 0, 1024),
            "iPhone 16 Pro (1024GB)"
        );
    }

    #[test]
    fn snapshot_keeps_two_field_shape() {
        let taken_at = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).single().unwrap();
        let snapshot = CatalogSnapshot::new(Catalog::from_records(vec![record(59_900)]), taken_at);
        let value = serde_json::to_value(&snapshot).unwrap();
        let keys = value.as_object().unwrap().keys().cloned().collect::<Vec<_>>();
        assert_eq!(keys, vec!["products".to_string(), "timestamp".to_string()]);
        assert!(value["products"].is_array());
        assert_eq!(snapshot.taken_at(), Some(taken_at));
        assert_eq!(CatalogSnapshot::empty().taken_at(), None);
    }

    #[test]
    fn reject_reason_codes_are_stable() {
        assert_eq!(RejectReason::MissingPrice.code(), "missing_price");
        let json = serde_json::to_string(&RejectReason::MissingStorage).unwrap();
        assert_eq!(json, "\"missing_storage\"");
    }
}
