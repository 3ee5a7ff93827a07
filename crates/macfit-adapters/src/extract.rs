//! Free text (or a structured locator) to a typed partial record.

use macfit_core::{Category, Chip, Evidence, PartialRecord, SpecField};
use tracing::trace;

use crate::locator::parse_locator;
use crate::rules::{RuleChain, SpecRules};
use crate::Capture;

#[derive(Debug, Clone, Default)]
pub struct SpecExtractor {
    rules: SpecRules,
}

impl SpecExtractor {
    pub fn new(rules: SpecRules) -> Self {
        Self { rules }
    }

    /// Never fails: every field that no rule matches keeps its zero/sentinel default.
    pub fn extract(&self, capture: &Capture) -> PartialRecord {
        match capture.locator.as_deref() {
            Some(locator) => self.extract_locator(locator, capture),
            None => self.extract_text(&capture.fragment, capture),
        }
    }

    fn extract_text(&self, text: &str, capture: &Capture) -> PartialRecord {
        let mut partial = PartialRecord::empty(&capture.base_name, capture.category, &capture.source_ref);

        partial.cpu_cores = apply_chain(&self.rules.cpu_cores, text, SpecField::CpuCores, &mut partial.evidence);
        partial.gpu_cores = apply_chain(&self.rules.gpu_cores, text, SpecField::GpuCores, &mut partial.evidence);
        partial.ram_gb = apply_chain(&self.rules.ram_gb, text, SpecField::RamGb, &mut partial.evidence);
        partial.storage_gb =
            apply_chain(&self.rules.storage_gb, text, SpecField::StorageGb, &mut partial.evidence);
        partial.chip = self.extract_chip(text, capture.category, &mut partial.evidence);
        partial
    }

    fn extract_chip(&self, text: &str, category: Category, evidence: &mut Vec<Evidence>) -> Chip {
        if let Some(m) = self.rules.chip.find(text) {
            evidence.push(Evidence {
                field: SpecField::Chip,
                rule_id: "chip.m_series".to_string(),
                snippet: m.as_str().to_string(),
            });
            return Chip::identified(m.as_str());
        }
        trace!(field = "chip", %category, "extraction gap");
        if category.expects_apple_silicon() {
            Chip::UnknownMSeries
        } else {
            Chip::NotFound
        }
    }

    fn extract_locator(&self, locator: &str, capture: &Capture) -> PartialRecord {
        let Some(specs) = parse_locator(locator) else {
            trace!(locator, "locator has no model/config segments");
            let mut partial = PartialRecord::empty(&capture.base_name, capture.category, &capture.source_ref);
            if capture.category.expects_apple_silicon() {
                partial.chip = Chip::UnknownMSeries;
            }
            return partial;
        };

        let mut partial = PartialRecord::empty(specs.base_name(), capture.category, &capture.source_ref);
        if capture.category.expects_apple_silicon() {
            partial.chip = Chip::UnknownMSeries;
        }
        partial.storage_gb = specs.storage_gb;
        if let Some(token) = &specs.storage_token {
            partial.evidence.push(Evidence {
                field: SpecField::StorageGb,
                rule_id: "locator.storage".to_string(),
                snippet: token.clone(),
            });
        } else {
            trace!(field = "storage_gb", locator, "extraction gap");
        }
        if let Some(size) = &specs.display_size {
            partial.evidence.push(Evidence {
                field: SpecField::DisplaySize,
                rule_id: "locator.display_size".to_string(),
                snippet: size.clone(),
            });
        }
        if let Some(color) = &specs.color {
            partial.evidence.push(Evidence {
                field: SpecField::Color,
                rule_id: "locator.color".to_string(),
                snippet: color.clone(),
            });
        }
        partial.display_size = specs.display_size;
        partial.color = specs.color;
        partial
    }
}

fn apply_chain(chain: &RuleChain, text: &str, field: SpecField, evidence: &mut Vec<Evidence>) -> u32 {
    match chain.first_match(text) {
        Some(hit) => {
            evidence.push(Evidence {
                field,
                rule_id: hit.rule_id.to_string(),
                snippet: hit.snippet,
            });
            hit.value
        }
        None => {
            trace!(?field, "extraction gap");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac_capture(text: &str) -> Capture {
        Capture::from_text(text, Category::MacBook, "https://www.apple.com/in/shop/buy-mac/macbook-air/13-inch")
            .with_base_name("13-inch MacBook Air")
    }

    #[test]
    fn extracts_all_fields_from_a_mac_fragment() {
        let extractor = SpecExtractor::default();
        let partial = extractor.extract(&mac_capture(
            "Apple M3 Pro chip with 11-Core CPU, 14-Core GPU 18GB unified memory 512GB SSD storage ₹1,99,900.00",
        ));
        assert_eq!(partial.chip, Chip::Identified("M3PRO".into()));
        assert_eq!(partial.cpu_cores, 11);
        assert_eq!(partial.gpu_cores, 14);
        assert_eq!(partial.ram_gb, 18);
        assert_eq!(partial.storage_gb, 512);
        assert_eq!(partial.base_name, "13-inch MacBook Air");
        assert_eq!(
            partial.evidence_for(SpecField::StorageGb).map(|e| e.rule_id.as_str()),
            Some("storage.gb")
        );
    }

    #[test]
    fn terabyte_storage_is_reported_in_gigabytes() {
        let extractor = SpecExtractor::default();
        let tb = extractor.extract(&mac_capture("M4 Max 1TB SSD Storage 36GB unified memory"));
        assert_eq!(tb.storage_gb, 1024);
        let gb = extractor.extract(&mac_capture("M4 512GB SSD"));
        assert_eq!(gb.storage_gb, 512);
    }

    #[test]
    fn unmatched_fields_keep_defaults_and_mac_chip_gets_sentinel() {
        let extractor = SpecExtractor::default();
        let partial = extractor.extract(&mac_capture("Space Black, 256GB SSD"));
        assert_eq!(partial.chip, Chip::UnknownMSeries);
        assert_eq!(partial.cpu_cores, 0);
        assert_eq!(partial.gpu_cores, 0);
        assert_eq!(partial.ram_gb, 0);
        assert!(partial.evidence_for(SpecField::Chip).is_none());

        let phone = extractor.extract(&Capture::from_text("256GB storage", Category::IPhone, "ref"));
        assert_eq!(phone.chip, Chip::NotFound);
    }

    #[test]
    fn locator_path_reads_identity_from_the_path() {
        let extractor = SpecExtractor::default();
        let capture = Capture::from_locator(
            "https://www.apple.com/in/shop/buy-iphone/iphone-16-pro/6.9%22-display-512gb-white-titanium",
            Category::IPhone,
            vec!["₹1,64,900.00".to_string()],
        );
        let partial = extractor.extract(&capture);
        assert_eq!(partial.base_name, "iPhone 16 Pro Max");
        assert_eq!(partial.storage_gb, 512);
        assert_eq!(partial.display_size.as_deref(), Some("6.9"));
        assert_eq!(partial.color.as_deref(), Some("white titanium"));
        assert_eq!(partial.chip, Chip::NotFound);
        assert_eq!(partial.ram_gb, 0);
    }
}
