//! Capture bundles, page adapters, and the spec extractor.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use macfit_core::Category;
use scraper::Html;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod extract;
pub mod html;
pub mod locator;
pub mod price;
pub mod rules;

pub use extract::SpecExtractor;
pub use rules::{RuleError, SpecRules};

pub const CRATE_NAME: &str = "macfit-adapters";

/// A text fragment plus everything the extractor and validator need to turn
/// it into a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    pub fragment: String,
    /// Candidate text nodes for price discovery, in page order.
    pub price_texts: Vec<String>,
    pub category: Category,
    pub base_name: String,
    pub source_ref: String,
    /// Set when the configuration's identity is encoded in a structured path.
    pub locator: Option<String>,
}

impl Capture {
    /// Plain `(text, category, source_ref)` input; the text doubles as the
    /// only price candidate.
    pub fn from_text(text: impl Into<String>, category: Category, source_ref: impl Into<String>) -> Self {
        let fragment = text.into();
        Self {
            price_texts: vec![fragment.clone()],
            fragment,
            category,
            base_name: category.as_str().to_string(),
            source_ref: source_ref.into(),
            locator: None,
        }
    }

    pub fn from_locator(locator: impl Into<String>, category: Category, price_texts: Vec<String>) -> Self {
        let locator = locator.into();
        Self {
            fragment: String::new(),
            price_texts,
            category,
            base_name: category.as_str().to_string(),
            source_ref: locator.clone(),
            locator: Some(locator),
        }
    }

    pub fn with_base_name(mut self, base_name: impl Into<String>) -> Self {
        self.base_name = base_name.into();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureBundle {
    pub bundle_id: String,
    pub target_id: String,
    pub captured_from_url: String,
    pub captured_at: DateTime<Utc>,
    pub raw_artifact: RawArtifact,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArtifact {
    pub content_type: String,
    pub path: Option<String>,
    pub inline_text: Option<String>,
}

impl RawArtifact {
    pub fn extension(&self) -> &'static str {
        if self.content_type.contains("html") {
            "html"
        } else if self.content_type.contains("json") {
            "json"
        } else {
            "txt"
        }
    }
}

/// Reads a bundle and inlines its raw artifact from a sibling file when the
/// bundle only carries a relative path.
pub fn load_capture_bundle(path: impl AsRef<Path>) -> Result<CaptureBundle> {
    let path = path.as_ref();
    let mut bundle: CaptureBundle = read_json_file(path)?;
    hydrate_inline_raw_artifact(path, &mut bundle)?;
    Ok(bundle)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn hydrate_inline_raw_artifact(bundle_path: &Path, bundle: &mut CaptureBundle) -> Result<()> {
    if bundle.raw_artifact.inline_text.is_some() {
        return Ok(());
    }
    let Some(rel_path) = &bundle.raw_artifact.path else {
        return Ok(());
    };
    let raw_path = bundle_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(rel_path);
    if !raw_path.exists() {
        return Ok(());
    }
    let raw = fs::read_to_string(&raw_path)
        .with_context(|| format!("reading raw artifact {}", raw_path.display()))?;
    bundle.raw_artifact.inline_text = Some(raw);
    Ok(())
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub trait SourceAdapter: Send + Sync {
    fn adapter_id(&self) -> &'static str;

    fn accepts(&self, url: &str) -> bool;

    fn parse_page(&self, bundle: &CaptureBundle) -> Result<Vec<Capture>, AdapterError>;
}

fn raw_text(bundle: &CaptureBundle) -> Result<&str, AdapterError> {
    bundle.raw_artifact.inline_text.as_deref().ok_or_else(|| {
        AdapterError::Message(format!(
            "bundle {} for target {} has no raw artifact text",
            bundle.bundle_id, bundle.target_id
        ))
    })
}

/// Mac buy pages listing several configurations side by side.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppleMacPageAdapter;

/// Single-configuration iPhone pages addressed by locator.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppleIphoneConfigAdapter;

impl SourceAdapter for AppleMacPageAdapter {
    fn adapter_id(&self) -> &'static str {
        "apple-mac-page"
    }

    fn accepts(&self, url: &str) -> bool {
        !html::is_locator_page(url)
    }

    fn parse_page(&self, bundle: &CaptureBundle) -> Result<Vec<Capture>, AdapterError> {
        if !self.accepts(&bundle.captured_from_url) {
            return Err(AdapterError::Message(format!(
                "url {} is an iPhone configuration page, not a Mac page",
                bundle.captured_from_url
            )));
        }
        let text = raw_text(bundle)?;
        let url = bundle.captured_from_url.as_str();
        let title = html::page_title(&Html::parse_document(text))?;
        let Some(page) = html::classify_page(url, &title) else {
            debug!(url, title = %title, "page is not a known Mac page");
            return Ok(Vec::new());
        };
        debug!(url, base_name = %page.base_name, category = %page.category, "classified page");
        html::mac_captures(text, url, &page)
    }
}

impl SourceAdapter for AppleIphoneConfigAdapter {
    fn adapter_id(&self) -> &'static str {
        "apple-iphone-config"
    }

    fn accepts(&self, url: &str) -> bool {
        html::is_locator_page(url)
    }

    fn parse_page(&self, bundle: &CaptureBundle) -> Result<Vec<Capture>, AdapterError> {
        if !self.accepts(&bundle.captured_from_url) {
            return Err(AdapterError::Message(format!(
                "url {} is not an iPhone configuration page",
                bundle.captured_from_url
            )));
        }
        let text = raw_text(bundle)?;
        Ok(vec![html::locator_capture(text, &bundle.captured_from_url)?])
    }
}

pub fn adapter_for_url(url: &str) -> Box<dyn SourceAdapter> {
    if AppleIphoneConfigAdapter.accepts(url) {
        Box::new(AppleIphoneConfigAdapter)
    } else {
        Box::new(AppleMacPageAdapter)
    }
}
