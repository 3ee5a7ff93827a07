//! Advisory value score: weighted specs per unit of price.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use macfit_core::{Catalog, ConfigurationRecord, ScoredRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerUnitWeights {
    pub cpu_core: f64,
    pub gpu_core: f64,
    pub ram_gb: f64,
    pub storage_gb: f64,
}

/// Weight table loaded from `rules/scoring.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default)]
    pub version: u32,
    /// Base score per chip generation token (`M1`, `M2`, ...).
    pub chip_tiers: BTreeMap<String, f64>,
    pub per_unit: PerUnitWeights,
    pub scale: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            version: 1,
            chip_tiers: [("M1", 100.0), ("M2", 200.0), ("M3", 300.0), ("M4", 400.0)]
                .into_iter()
                .map(|(token, weight)| (token.to_string(), weight))
                .collect(),
            per_unit: PerUnitWeights {
                cpu_core: 5.0,
                gpu_core: 15.0,
                ram_gb: 40.0,
                storage_gb: 0.5,
            },
            scale: 10_000.0,
        }
    }
}

impl ScoringWeights {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing scoring weights")
    }

    /// Defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("loading {}", path.display()))
    }

    /// Longest tier token that prefixes the chip token without splitting a
    /// generation number (`M1` does not match `M10`). Unknown chips weigh 0.
    pub fn chip_tier_weight(&self, record: &ConfigurationRecord) -> f64 {
        let Some(token) = record.chip.token() else {
            return 0.0;
        };
        let token = token.to_ascii_uppercase();
        self.chip_tiers
            .iter()
            .filter(|(tier, _)| {
                let tier = tier.to_ascii_uppercase();
                token.starts_with(&tier)
                    && !token[tier.len()..].starts_with(|c: char| c.is_ascii_digit())
            })
            .max_by_key(|(tier, _)| tier.len())
            .map(|(_, weight)| *weight)
            .unwrap_or(0.0)
    }

    pub fn score(&self, record: &ConfigurationRecord) -> f64 {
        if record.price == 0 {
            return 0.0;
        }
        let w = &self.per_unit;
        let specs = self.chip_tier_weight(record)
            + f64::from(record.cpu_cores) * w.cpu_core
            + f64::from(record.gpu_cores) * w.gpu_core
            + f64::from(record.ram_gb) * w.ram_gb
            + f64::from(record.storage_gb) * w.storage_gb;
        (specs / record.price as f64 * self.scale).max(0.0)
    }

    pub fn annotate(&self, record: &ConfigurationRecord) -> ScoredRecord {
        ScoredRecord {
            record: record.clone(),
            value_score: self.score(record),
        }
    }

    /// Every record, cheapest first, with its score attached.
    pub fn price_ordered_listing(&self, catalog: &Catalog) -> Vec<ScoredRecord> {
        let mut listing = catalog.iter().map(|r| self.annotate(r)).collect::<Vec<_>>();
        listing.sort_by_key(|scored| scored.record.price);
        listing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use macfit_core::{Category, Chip};

    fn record(chip: Chip, price: u64) -> ConfigurationRecord {
        ConfigurationRecord {
            name: "Mac mini".into(),
            base_name: "Mac mini".into(),
            category: Category::DesktopMac,
            chip,
            cpu_cores: 10,
            gpu_cores: 10,
            ram_gb: 16,
            storage_gb: 256,
            price,
            source_ref: "mac-mini".into(),
        }
    }

    #[test]
    fn default_weights_score_a_base_mac_mini() {
        let weights = ScoringWeights::default();
        // 400 + 50 + 150 + 640 + 128 = 1368 spec points
        let score = weights.score(&record(Chip::identified("M4"), 59_900));
        assert!((score - 1368.0 / 59_900.0 * 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn chip_tiers_match_generation_prefixes() {
        let weights = ScoringWeights::default();
        assert_eq!(weights.chip_tier_weight(&record(Chip::identified("M4 Pro"), 1)), 400.0);
        assert_eq!(weights.chip_tier_weight(&record(Chip::identified("M2ULTRA"), 1)), 200.0);
        assert_eq!(weights.chip_tier_weight(&record(Chip::identified("M10"), 1)), 0.0);
        assert_eq!(weights.chip_tier_weight(&record(Chip::UnknownMSeries, 1)), 0.0);
        assert_eq!(weights.chip_tier_weight(&record(Chip::NotFound, 1)), 0.0);
    }

    #[test]
    fn weights_load_from_yaml() {
        let yaml = r#"
version: 2
chip_tiers:
  M3: 30
  M4: 40
per_unit:
  cpu_core: 1
  gpu_core: 1
  ram_gb: 1
  storage_gb: 0
scale: 1
"#;
        let weights = ScoringWeights::from_yaml(yaml).unwrap();
        assert_eq!(weights.version, 2);
        let score = weights.score(&record(Chip::identified("M4"), 2));
        assert_eq!(score, (40.0 + 10.0 + 10.0 + 16.0) / 2.0);
    }

    #[test]
    fn listing_is_price_ascending_and_leaves_records_unchanged() {
        let weights = ScoringWeights::default();
        let catalog = Catalog::from_records(vec![
            record(Chip::identified("M4"), 79_900),
            record(Chip::identified("M4"), 59_900),
        ]);
        let listing = weights.price_ordered_listing(&catalog);
        assert_eq!(listing[0].record.price, 59_900);
        assert_eq!(listing[1].record, catalog.records()[0]);
        assert!(listing.iter().all(|s| s.value_score > 0.0));
    }
}
