//! Structured locator parsing for configurations whose identity is encoded in
//! the page path, e.g. `/buy-iphone/iphone-16-pro/6.3%22-display-256gb-black-titanium`.

use std::sync::LazyLock;

use regex::Regex;

static SCREEN_SIZE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^(\d+(?:\.\d+)?)(?:"|in|inch)$"#).expect("screen size pattern compiles"));
static STORAGE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+)(gb|tb)$").expect("storage token pattern compiles"));

/// Display sizes that turn a base model into its large variant.
const LARGE_DISPLAY_SIZES: [&str; 2] = ["6.7", "6.9"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorSpecs {
    pub model_segment: String,
    pub display_size: Option<String>,
    pub storage_gb: u32,
    pub storage_token: Option<String>,
    pub color: Option<String>,
}

impl LocatorSpecs {
    /// `iphone-16-pro` with a 6.9" display reads `iPhone 16 Pro Max`.
    pub fn base_name(&self) -> String {
        let mut name = self
            .model_segment
            .split('-')
            .filter(|part| !part.is_empty())
            .map(title_case)
            .collect::<Vec<_>>()
            .join(" ")
            .replace("Iphone", "iPhone");
        if let Some(size) = self.display_size.as_deref() {
            if LARGE_DISPLAY_SIZES.contains(&size) {
                if name.to_lowercase().contains("pro") {
                    name.push_str(" Max");
                } else {
                    name.push_str(" Plus");
                }
            }
        }
        name
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn decode_segment(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

/// Splits the locator into path segments and maps the known tokens of the
/// last segment. Unrecognized tokens are ignored; `None` only when there are
/// fewer than two path segments to work with.
pub fn parse_locator(locator: &str) -> Option<LocatorSpecs> {
    let path = locator.split(['?', '#']).next().unwrap_or_default();
    let segments = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(decode_segment)
        .collect::<Vec<_>>();
    let [.., model_segment, config_segment] = segments.as_slice() else {
        return None;
    };

    let mut specs = LocatorSpecs {
        model_segment: model_segment.to_ascii_lowercase(),
        display_size: None,
        storage_gb: 0,
        storage_token: None,
        color: None,
    };
    let mut color_words = Vec::new();

    for token in config_segment.split('-').filter(|t| !t.is_empty()) {
        if let Some(caps) = SCREEN_SIZE_TOKEN.captures(token) {
            specs.display_size = Some(caps[1].to_string());
        } else if let Some(caps) = STORAGE_TOKEN.captures(token) {
            let Ok(amount) = caps[1].parse::<u32>() else {
                continue;
            };
            let factor = if caps[2].eq_ignore_ascii_case("tb") { 1024 } else { 1 };
            if let Some(gb) = amount.checked_mul(factor) {
                specs.storage_gb = gb;
                specs.storage_token = Some(token.to_string());
            }
        } else if specs.storage_token.is_some() && token.chars().all(|c| c.is_ascii_alphabetic()) {
            color_words.push(token.to_ascii_lowercase());
        }
    }

    if !color_words.is_empty() {
        specs.color = Some(color_words.join(" "));
    }
    Some(specs)
}
