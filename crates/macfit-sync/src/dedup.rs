//! Exact-identity deduplication with first-seen order.

use std::collections::HashSet;

use macfit_core::{Catalog, Category, Chip, ConfigurationRecord};

/// Every field except the derived display name. `source_ref` is part of the
/// key, so equal specs captured from different pages stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub category: Category,
    pub chip: Chip,
    pub cpu_cores: u32,
    pub gpu_cores: u32,
    pub ram_gb: u32,
    pub storage_gb: u32,
    pub price: u64,
    pub source_ref: String,
}

impl IdentityKey {
    pub fn of(record: &ConfigurationRecord) -> Self {
        Self {
            category: record.category,
            chip: record.chip.clone(),
            cpu_cores: record.cpu_cores,
            gpu_cores: record.gpu_cores,
            ram_gb: record.ram_gb,
            storage_gb: record.storage_gb,
            price: record.price,
            source_ref: record.source_ref.clone(),
        }
    }
}

/// Returns a new catalog with `record` appended unless an identical
/// configuration is already present. `catalog` is left untouched.
pub fn add(catalog: &Catalog, record: ConfigurationRecord) -> Catalog {
    let key = IdentityKey::of(&record);
    let mut next = catalog.clone();
    if !catalog.iter().any(|existing| IdentityKey::of(existing) == key) {
        next.push(record);
    }
    next
}

/// Incremental form of [`add`] for whole ingestion batches.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<IdentityKey>,
    catalog: Catalog,
    duplicates: usize,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the record was new and kept.
    pub fn insert(&mut self, record: ConfigurationRecord) -> bool {
        if self.seen.insert(IdentityKey::of(&record)) {
            self.catalog.push(record);
            true
        } else {
            self.duplicates += 1;
            false
        }
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn finish(self) -> Catalog {
        self.catalog
    }
}

pub fn dedup_records(records: impl IntoIterator<Item = ConfigurationRecord>) -> Catalog {
    let mut dedup = Deduplicator::new();
    for record in records {
        dedup.insert(record);
    }
    dedup.finish()
}
