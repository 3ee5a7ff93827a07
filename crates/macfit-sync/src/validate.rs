//! Per-category completeness rules turning partial records into catalog records.

use macfit_adapters::price::discover_price;
use macfit_core::{display_name, Category, ConfigurationRecord, PartialRecord, RejectReason, SpecField};
use serde::Serialize;

const MAC_REQUIRED: [SpecField; 3] = [SpecField::Price, SpecField::StorageGb, SpecField::Chip];
const IPHONE_REQUIRED: [SpecField; 2] = [SpecField::Price, SpecField::StorageGb];

/// Fields that must be determined before a record of `category` is usable.
/// Price always comes first: it has no fallback.
pub fn required_fields(category: Category) -> &'static [SpecField] {
    if category.expects_apple_silicon() {
        &MAC_REQUIRED
    } else {
        &IPHONE_REQUIRED
    }
}

/// A dropped partial record, kept for the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub reason: RejectReason,
    pub base_name: String,
    pub category: Category,
    pub source_ref: String,
}

impl Rejection {
    pub fn new(partial: &PartialRecord, reason: RejectReason) -> Self {
        Self {
            reason,
            base_name: partial.base_name.clone(),
            category: partial.category,
            source_ref: partial.source_ref.clone(),
        }
    }
}

/// Discovers the price among `price_texts` and checks the category's
/// required fields. The sentinel chip counts as present.
pub fn validate<S: AsRef<str>>(
    partial: &PartialRecord,
    price_texts: &[S],
) -> Result<ConfigurationRecord, RejectReason> {
    let mut price = 0;
    for field in required_fields(partial.category) {
        match field {
            SpecField::Price => {
                price = discover_price(price_texts)
                    .map(|m| m.price)
                    .ok_or(RejectReason::MissingPrice)?;
            }
            SpecField::StorageGb if partial.storage_gb == 0 => return Err(RejectReason::MissingStorage),
            SpecField::Chip if !partial.chip.is_present() => return Err(RejectReason::MissingChip),
            _ => {}
        }
    }

    Ok(ConfigurationRecord {
        name: display_name(
            &partial.base_name,
            partial.category,
            &partial.chip,
            partial.ram_gb,
            partial.storage_gb,
        ),
        base_name: partial.base_name.clone(),
        category: partial.category,
        chip: partial.chip.clone(),
        cpu_cores: partial.cpu_cores,
        gpu_cores: partial.gpu_cores,
        ram_gb: partial.ram_gb,
        storage_gb: partial.storage_gb,
        price,
        source_ref: partial.source_ref.clone(),
    })
}
