//! Reduces captured Apple Store pages to [`Capture`] fragments.

use std::collections::HashSet;
use std::sync::LazyLock;

use macfit_core::Category;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, trace};

use crate::price::{parse_price, MAX_PRICE_CANDIDATES};
use crate::{AdapterError, Capture};

/// Tried in order; the first selector that yields any element wins.
pub const PRICE_SELECTORS: [&str; 3] = [
    "span.as-price-currentprice",
    "span.rf-price-label",
    "div.currentprice",
];

static CONTAINER_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)config|product|option|selection|tile|item|group|rf-pdp-option")
        .expect("container class pattern compiles")
});

const CONTAINER_TAGS: [&str; 3] = ["div", "form", "li"];

/// The parent plus six more levels.
const FALLBACK_ANCESTOR_LEVELS: usize = 7;

const CONTAINER_KEY_CHARS: usize = 250;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageClass {
    pub category: Category,
    pub base_name: String,
}

impl PageClass {
    fn new(category: Category, base_name: &str) -> Self {
        Self {
            category,
            base_name: base_name.to_string(),
        }
    }
}

/// Configuration pages whose identity lives in the URL path.
pub fn is_locator_page(url: &str) -> bool {
    url.contains("/shop/buy-iphone/iphone-") && url.split('/').count() > 5
}

/// Category and base display name from the page URL, falling back to the
/// page title. `None` for pages outside the Mac family.
pub fn classify_page(url: &str, title: &str) -> Option<PageClass> {
    let url = url.to_lowercase();
    let title = title.to_lowercase();
    let either = |url_token: &str, title_token: &str| url.contains(url_token) || title.contains(title_token);
    let sized = |inches: &str| {
        url.contains(&format!("{inches}-inch"))
            || title.contains(&format!("{inches}\""))
            || title.contains(&format!("{inches}-inch"))
    };

    let class = if either("imac", "imac") {
        PageClass::new(Category::DesktopMac, "iMac")
    } else if either("mac-mini", "mac mini") {
        PageClass::new(Category::DesktopMac, "Mac mini")
    } else if either("mac-studio", "mac studio") {
        PageClass::new(Category::DesktopMac, "Mac Studio")
    } else if either("mac-pro", "mac pro") {
        PageClass::new(Category::DesktopMac, "Mac Pro")
    } else if either("macbook-pro", "macbook pro") {
        let name = if sized("14") {
            "14-inch MacBook Pro"
        } else if sized("16") {
            "16-inch MacBook Pro"
        } else {
            "MacBook Pro"
        };
        PageClass::new(Category::MacBook, name)
    } else if either("macbook-air", "macbook air") {
        let name = if sized("13") {
            "13-inch MacBook Air"
        } else if sized("15") {
            "15-inch MacBook Air"
        } else {
            "MacBook Air"
        };
        PageClass::new(Category::MacBook, name)
    } else if url.contains("/buy-mac/") {
        PageClass::new(Category::Mac, "Mac")
    } else {
        return None;
    };
    Some(class)
}

pub fn page_title(document: &Html) -> Result<String, AdapterError> {
    let sel = Selector::parse("title").map_err(|e| AdapterError::Message(e.to_string()))?;
    Ok(document
        .select(&sel)
        .next()
        .map(|n| n.text().collect::<String>().trim().to_string())
        .unwrap_or_default())
}

fn text_parts(element: ElementRef<'_>) -> Vec<&str> {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect()
}

fn find_container(price_element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let ancestors = || price_element.ancestors().filter_map(ElementRef::wrap);
    ancestors()
        .find(|el| {
            CONTAINER_TAGS.contains(&el.value().name())
                && el.value().attr("class").is_some_and(|class| CONTAINER_CLASS.is_match(class))
        })
        .or_else(|| ancestors().take(FALLBACK_ANCESTOR_LEVELS).last())
}

/// One capture per distinct configuration container on a Mac buy page.
pub fn mac_captures(html: &str, url: &str, page: &PageClass) -> Result<Vec<Capture>, AdapterError> {
    let document = Html::parse_document(html);

    let mut price_elements = Vec::new();
    for selector in PRICE_SELECTORS {
        let sel = Selector::parse(selector).map_err(|e| AdapterError::Message(e.to_string()))?;
        price_elements.extend(document.select(&sel));
        if !price_elements.is_empty() {
            debug!(selector, count = price_elements.len(), "price elements found");
            break;
        }
    }
    if price_elements.is_empty() {
        debug!(url, "no price elements on page");
        return Ok(Vec::new());
    }

    let mut processed = HashSet::new();
    let mut captures = Vec::new();
    for price_element in price_elements {
        let price_text = text_parts(price_element).concat();
        if parse_price(&price_text).is_none() {
            trace!(price_text = %price_text, "price element without an amount");
            continue;
        }
        let Some(container) = find_container(price_element) else {
            continue;
        };
        let parts = text_parts(container);
        let key = parts.join("|").chars().take(CONTAINER_KEY_CHARS).collect::<String>();
        if !processed.insert(key) {
            trace!(url, "container already processed");
            continue;
        }
        captures.push(Capture {
            fragment: parts.join(" "),
            price_texts: vec![price_text],
            category: page.category,
            base_name: page.base_name.clone(),
            source_ref: url.to_string(),
            locator: None,
        });
    }
    Ok(captures)
}

/// A single capture for a locator page; price candidates are the leading
/// `span`/`div` text nodes in document order.
pub fn locator_capture(html: &str, url: &str) -> Result<Capture, AdapterError> {
    let document = Html::parse_document(html);
    let sel = Selector::parse("span, div").map_err(|e| AdapterError::Message(e.to_string()))?;
    let candidates = document
        .select(&sel)
        .take(MAX_PRICE_CANDIDATES)
        .map(|el| text_parts(el).concat())
        .collect::<Vec<_>>();
    Ok(Capture::from_locator(url, Category::IPhone, candidates))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_url_then_title() {
        let page = classify_page("https://www.apple.com/in/shop/buy-mac/mac-mini", "").unwrap();
        assert_eq!(page, PageClass::new(Category::DesktopMac, "Mac mini"));

        let page = classify_page(
            "https://www.apple.com/in/shop/buy-mac/macbook-pro/16-inch-macbook-pro",
            "",
        )
        .unwrap();
        assert_eq!(page.base_name, "16-inch MacBook Pro");
        assert_eq!(page.category, Category::MacBook);

        let page = classify_page("https://example.test/x", "Buy 15\" MacBook Air - Apple").unwrap();
        assert_eq!(page.base_name, "15-inch MacBook Air");

        let page = classify_page("https://www.apple.com/in/shop/buy-mac/accessories", "").unwrap();
        assert_eq!(page, PageClass::new(Category::Mac, "Mac"));

        assert!(classify_page("https://www.apple.com/in/shop/buy-watch", "Apple Watch").is_none());
    }

    #[test]
    fn locator_pages_need_a_config_segment() {
        assert!(is_locator_page(
            "https://www.apple.com/in/shop/buy-iphone/iphone-16/6.1%22-display-128gb-black"
        ));
        assert!(!is_locator_page("https://www.apple.com/in/shop/buy-mac/imac"));
    }

    #[test]
    fn reduces_price_elements_to_distinct_containers() {
        let html = r#"<html><body>
          <div class="rf-pdp-option">
            <p>Apple M4 chip with 10-core CPU, 10-core GPU</p>
            <p>16GB unified memory</p><p>256GB SSD storage</p>
            <span class="as-price-currentprice">₹59,900.00</span>
          </div>
          <div class="rf-pdp-option">
            <p>Apple M4 chip with 10-core CPU, 10-core GPU</p>
            <p>16GB unified memory</p><p>256GB SSD storage</p>
            <span class="as-price-currentprice">₹59,900.00</span>
          </div>
          <div class="rf-pdp-option">
            <p>Apple M4 Pro chip with 12-core CPU, 16-core GPU</p>
            <p>24GB unified memory</p><p>512GB SSD storage</p>
            <span class="as-price-currentprice">₹1,49,900.00</span>
          </div>
          <span class="rf-price-label">₹1.00</span>
        </body></html>"#;
        let page = PageClass::new(Category::DesktopMac, "Mac mini");
        let captures = mac_captures(html, "https://www.apple.com/in/shop/buy-mac/mac-mini", &page).unwrap();
        assert_eq!(captures.len(), 2);
        assert!(captures[0].fragment.contains("16GB unified memory"));
        assert_eq!(captures[0].price_texts, vec!["₹59,900.00".to_string()]);
        assert!(captures[1].fragment.contains("M4 Pro"));
        assert_eq!(captures[1].base_name, "Mac mini");
    }

    #[test]
    fn locator_capture_collects_leading_text_nodes() {
        let html = r#"<html><body>
          <div><span>iPhone 16</span></div>
          <span>₹6,242.00/mo. for 12 mo.*</span>
          <span>₹79,900.00</span>
        </body></html>"#;
        let url = "https://www.apple.com/in/shop/buy-iphone/iphone-16/6.1%22-display-128gb-black";
        let capture = locator_capture(html, url).unwrap();
        assert_eq!(capture.locator.as_deref(), Some(url));
        assert_eq!(capture.category, Category::IPhone);
        assert!(capture.price_texts.iter().any(|t| t == "₹79,900.00"));
    }
}
