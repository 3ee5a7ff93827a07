//! Price discovery over candidate text nodes.

use std::sync::LazyLock;

use regex::Regex;

/// Only this many candidate nodes are inspected per capture.
pub const MAX_PRICE_CANDIDATES: usize = 20;

static PRICE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[₹$€£]\s*(\d[\d,]*)").expect("price pattern compiles"));

const INSTALLMENT_MARKERS: [&str; 5] = ["mo.", "/mo", "per month", "monthly", "/month"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceMatch {
    pub price: u64,
    pub candidate_index: usize,
    pub snippet: String,
}

/// True when the text quotes a recurring or installment amount.
pub fn is_installment_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    INSTALLMENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Whole-currency amount from a leading currency-symbol match, ignoring
/// grouping commas and any fractional part.
pub fn parse_price(text: &str) -> Option<(u64, String)> {
    let caps = PRICE_PATTERN.captures(text)?;
    let digits = caps
        .get(1)?
        .as_str()
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>();
    let price = digits.parse::<u64>().ok().filter(|p| *p > 0)?;
    Some((price, caps.get(0)?.as_str().to_string()))
}

/// First candidate (in order) that is not an installment quote and yields a
/// positive amount.
pub fn discover_price<S: AsRef<str>>(candidates: &[S]) -> Option<PriceMatch> {
    candidates
        .iter()
        .take(MAX_PRICE_CANDIDATES)
        .enumerate()
        .filter(|(_, text)| !is_installment_text(text.as_ref()))
        .find_map(|(candidate_index, text)| {
            parse_price(text.as_ref()).map(|(price, snippet)| PriceMatch {
                price,
                candidate_index,
                snippet,
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grouped_amounts_and_drops_paise() {
        assert_eq!(parse_price("From ₹1,19,900.00").map(|p| p.0), Some(119_900));
        assert_eq!(parse_price("₹ 59,900").map(|p| p.0), Some(59_900));
        assert_eq!(parse_price("59,900"), None);
        assert_eq!(parse_price("₹0.00"), None);
    }

    #[test]
    fn skips_installment_candidates() {
        let candidates = ["₹10,825.00/mo. for 12 mo.*", "Buy", "₹1,29,900.00"];
        let hit = discover_price(&candidates).unwrap();
        assert_eq!(hit.price, 129_900);
        assert_eq!(hit.candidate_index, 2);
        assert_eq!(hit.snippet, "₹1,29,900");
    }

    #[test]
    fn no_qualifying_candidate_means_no_price() {
        assert_eq!(discover_price(&["Select a model", "₹5,000/mo."]), None);
        assert_eq!(discover_price::<&str>(&[]), None);
    }

    #[test]
    fn inspects_a_bounded_number_of_candidates() {
        let mut candidates = vec!["filler".to_string(); MAX_PRICE_CANDIDATES];
        candidates.push("₹99,900".to_string());
        assert_eq!(discover_price(&candidates), None);
    }
}
