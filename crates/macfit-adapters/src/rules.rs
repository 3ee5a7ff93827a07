//! Ordered extraction rules. Each spec field owns a chain of patterns tried in
//! priority order; supporting a new text layout means appending a rule.

use std::path::Path;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid pattern for rule {rule_id}: {source}")]
    Pattern {
        rule_id: String,
        #[source]
        source: regex::Error,
    },
    #[error("rule {rule_id} needs a capture group for the numeric value")]
    MissingGroup { rule_id: String },
    #[error("rule {rule_id} has a zero multiplier")]
    ZeroMultiplier { rule_id: String },
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing extraction rules: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// One case-insensitive pattern whose first capture group is a count.
#[derive(Debug, Clone)]
pub struct ExtractionRule {
    id: String,
    pattern: Regex,
    multiplier: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch<'r> {
    pub value: u32,
    pub rule_id: &'r str,
    pub snippet: String,
}

impl ExtractionRule {
    pub fn new(id: impl Into<String>, pattern: &str, multiplier: u32) -> Result<Self, RuleError> {
        let id = id.into();
        if multiplier == 0 {
            return Err(RuleError::ZeroMultiplier { rule_id: id });
        }
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| RuleError::Pattern {
                rule_id: id.clone(),
                source,
            })?;
        if pattern.captures_len() < 2 {
            return Err(RuleError::MissingGroup { rule_id: id });
        }
        Ok(Self {
            id,
            pattern,
            multiplier,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// First match in `text`, scaled by the rule's multiplier (e.g. TB to GB).
    pub fn apply(&self, text: &str) -> Option<RuleMatch<'_>> {
        let caps = self.pattern.captures(text)?;
        let raw: u32 = caps.get(1)?.as_str().parse().ok()?;
        Some(RuleMatch {
            value: raw.checked_mul(self.multiplier)?,
            rule_id: &self.id,
            snippet: caps.get(0)?.as_str().to_string(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleChain {
    rules: Vec<ExtractionRule>,
}

impl RuleChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: ExtractionRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn push(&mut self, rule: ExtractionRule) {
        self.rules.push(rule);
    }

    pub fn rule_ids(&self) -> Vec<&str> {
        self.rules.iter().map(ExtractionRule::id).collect()
    }

    /// Only the first rule that matches contributes; later rules are not consulted.
    pub fn first_match(&self, text: &str) -> Option<RuleMatch<'_>> {
        self.rules.iter().find_map(|rule| rule.apply(text))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    CpuCores,
    GpuCores,
    RamGb,
    StorageGb,
}

#[derive(Debug, Clone, Deserialize)]
struct ExtractionRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct RuleSpec {
    field: RuleField,
    id: String,
    pattern: String,
    #[serde(default = "default_multiplier")]
    multiplier: u32,
}

fn default_multiplier() -> u32 {
    1
}

/// Rule chains for every numeric spec field plus the chip pattern.
#[derive(Debug, Clone)]
pub struct SpecRules {
    pub cpu_cores: RuleChain,
    pub gpu_cores: RuleChain,
    pub ram_gb: RuleChain,
    pub storage_gb: RuleChain,
    pub chip: Regex,
}

static BUILTIN_RULES: LazyLock<SpecRules> =
    LazyLock::new(|| SpecRules::builtin().expect("built-in extraction patterns compile"));

impl Default for SpecRules {
    fn default() -> Self {
        BUILTIN_RULES.clone()
    }
}

impl SpecRules {
    fn builtin() -> Result<Self, RuleError> {
        Ok(Self {
            cpu_cores: RuleChain::new().with_rule(ExtractionRule::new(
                "cpu.cores",
                r"(\d+)[-\s]core\s+cpu",
                1,
            )?),
            gpu_cores: RuleChain::new().with_rule(ExtractionRule::new(
                "gpu.cores",
                r"(\d+)[-\s]core\s+gpu",
                1,
            )?),
            ram_gb: RuleChain::new()
                .with_rule(ExtractionRule::new(
                    "ram.memory",
                    r"(\d+)\s*gb\s*(?:unified\s+)?memory",
                    1,
                )?)
                .with_rule(ExtractionRule::new("ram.ram", r"(\d+)\s*gb\s*ram", 1)?),
            // TB is consulted first so "1TB SSD" can never fall through to a GB reading.
            storage_gb: RuleChain::new()
                .with_rule(ExtractionRule::new(
                    "storage.tb",
                    r"(\d+)\s*tb\s*(?:ssd|storage)",
                    1024,
                )?)
                .with_rule(ExtractionRule::new(
                    "storage.gb",
                    r"(\d+)\s*gb\s*(?:ssd|storage)",
                    1,
                )?),
            chip: RegexBuilder::new(r"\bM\d+(?:\s*(?:Pro|Max|Ultra))?\b")
                .case_insensitive(true)
                .build()
                .map_err(|source| RuleError::Pattern {
                    rule_id: "chip.m_series".to_string(),
                    source,
                })?,
        })
    }

    /// Appends the rules declared in a YAML document after the built-in ones.
    pub fn with_yaml_extensions(mut self, yaml: &str) -> Result<Self, RuleError> {
        let file: ExtractionRulesFile = serde_yaml::from_str(yaml)?;
        for spec in file.rules {
            let rule = ExtractionRule::new(spec.id, &spec.pattern, spec.multiplier)?;
            match spec.field {
                RuleField::CpuCores => self.cpu_cores.push(rule),
                RuleField::GpuCores => self.gpu_cores.push(rule),
                RuleField::RamGb => self.ram_gb.push(rule),
                RuleField::StorageGb => self.storage_gb.push(rule),
            }
        }
        Ok(self)
    }

    /// Built-in rules, extended from `path` when that file exists.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let yaml = std::fs::read_to_string(path).map_err(|source| RuleError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::default().with_yaml_extensions(&yaml)
    }
}
