//! Budget matching over a catalog snapshot.
//!
//! The best match is the most expensive eligible configuration the budget can
//! afford, or the cheapest eligible one when nothing fits. Neighbors always
//! come from the full price-ordered eligible set, so a floor fallback still
//! gets a pricier alternative.

use macfit_core::{Catalog, ConfigurationRecord};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    /// Budget was missing, unparseable, non-finite, or not positive.
    #[error("invalid budget {input:?}: {reason}")]
    InvalidBudget { input: String, reason: &'static str },
}

impl MatchError {
    fn invalid(input: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidBudget {
            input: input.into(),
            reason,
        }
    }
}

/// Decides which records take part in matching at all.
pub trait Eligibility: Send + Sync {
    fn is_eligible(&self, record: &ConfigurationRecord) -> bool;
}

impl<F> Eligibility for F
where
    F: Fn(&ConfigurationRecord) -> bool + Send + Sync,
{
    fn is_eligible(&self, record: &ConfigurationRecord) -> bool {
        self(record)
    }
}

/// Mac-family records with a positive price and some chip, including the
/// unidentified M-series sentinel.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppleSiliconEligibility;

impl Eligibility for AppleSiliconEligibility {
    fn is_eligible(&self, record: &ConfigurationRecord) -> bool {
        record.price > 0 && record.category.expects_apple_silicon() && record.chip.is_present()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    WithinBudget,
    /// Nothing fits; `best` is the cheapest eligible record.
    FloorFallback,
    NoEligibleRecords,
    EmptyCatalog,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetMatch<'c> {
    pub outcome: MatchOutcome,
    pub best: Option<&'c ConfigurationRecord>,
    pub cheaper: Option<&'c ConfigurationRecord>,
    pub pricier: Option<&'c ConfigurationRecord>,
}

impl<'c> BudgetMatch<'c> {
    fn none(outcome: MatchOutcome) -> Self {
        Self {
            outcome,
            best: None,
            cheaper: None,
            pricier: None,
        }
    }
}

/// Rejects non-finite and non-positive budgets.
pub fn check_budget(budget: f64) -> Result<f64, MatchError> {
    if !budget.is_finite() {
        return Err(MatchError::invalid(budget.to_string(), "budget must be a finite number"));
    }
    if budget <= 0.0 {
        return Err(MatchError::invalid(budget.to_string(), "budget must be positive"));
    }
    Ok(budget)
}

/// Parses a user-supplied amount. Grouping commas and a leading rupee sign
/// are tolerated (`"₹1,20,000"`).
pub fn parse_budget(input: &str) -> Result<f64, MatchError> {
    let cleaned = input
        .trim()
        .trim_start_matches('₹')
        .chars()
        .filter(|c| *c != ',')
        .collect::<String>();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Err(MatchError::invalid(input, "budget not provided"));
    }
    let budget = cleaned
        .parse::<f64>()
        .map_err(|_| MatchError::invalid(input, "budget is not a number"))?;
    check_budget(budget).map_err(|err| match err {
        MatchError::InvalidBudget { reason, .. } => MatchError::invalid(input, reason),
    })
}

pub struct BudgetMatcher {
    eligibility: Box<dyn Eligibility>,
}

impl Default for BudgetMatcher {
    fn default() -> Self {
        Self::new(AppleSiliconEligibility)
    }
}

impl BudgetMatcher {
    pub fn new(eligibility: impl Eligibility + 'static) -> Self {
        Self {
            eligibility: Box::new(eligibility),
        }
    }

    /// Pure function of `(catalog, budget)`; the catalog is only read.
    pub fn find<'c>(&self, catalog: &'c Catalog, budget: f64) -> Result<BudgetMatch<'c>, MatchError> {
        let budget = check_budget(budget)?;
        if catalog.is_empty() {
            return Ok(BudgetMatch::none(MatchOutcome::EmptyCatalog));
        }

        let mut sorted = catalog
            .iter()
            .filter(|record| self.eligibility.is_eligible(record))
            .collect::<Vec<_>>();
        if sorted.is_empty() {
            return Ok(BudgetMatch::none(MatchOutcome::NoEligibleRecords));
        }
        // Stable: equal prices keep first-seen order.
        sorted.sort_by_key(|record| record.price);

        let within = sorted.partition_point(|record| (record.price as f64) <= budget);
        let (position, outcome) = if within > 0 {
            let top = sorted[within - 1].price;
            let first_at_top = sorted[..within].partition_point(|record| record.price < top);
            (first_at_top, MatchOutcome::WithinBudget)
        } else {
            (0, MatchOutcome::FloorFallback)
        };

        Ok(BudgetMatch {
            outcome,
            best: Some(sorted[position]),
            cheaper: position.checked_sub(1).map(|i| sorted[i]),
            pricier: sorted.get(position + 1).copied(),
        })
    }
}

/// [`BudgetMatcher::find`] with the default eligibility.
pub fn match_budget(catalog: &Catalog, budget: f64) -> Result<BudgetMatch<'_>, MatchError> {
    BudgetMatcher::default().find(catalog, budget)
}
