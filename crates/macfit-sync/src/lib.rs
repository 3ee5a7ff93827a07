//! Ingestion pipeline: capture bundles in, catalog snapshot and run reports out.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Float64Array, RecordBatch, StringArray, UInt32Array, UInt64Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use macfit_adapters::{adapter_for_url, load_capture_bundle, Capture, CaptureBundle, SpecExtractor, SpecRules};
use macfit_core::{Catalog, CatalogSnapshot, ScoredRecord};
use macfit_storage::{ArtifactStore, SnapshotStore};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod dedup;
pub mod matcher;
pub mod score;
pub mod validate;

pub use dedup::{add, dedup_records, Deduplicator, IdentityKey};
pub use matcher::{
    match_budget, parse_budget, AppleSiliconEligibility, BudgetMatch, BudgetMatcher, Eligibility, MatchError,
    MatchOutcome,
};
pub use score::ScoringWeights;
pub use validate::{validate, Rejection};

pub const CRATE_NAME: &str = "macfit-sync";

#[derive(Debug, Clone, Deserialize)]
pub struct TargetRegistry {
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub target_id: String,
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Capture bundle path relative to the workspace root.
    #[serde(default)]
    pub bundle: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl TargetRegistry {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing target registry")
    }

    /// Enabled targets, one per URL, sorted by URL.
    pub fn enabled_targets(&self) -> Vec<TargetConfig> {
        let mut seen = HashSet::new();
        let mut targets = self
            .targets
            .iter()
            .filter(|t| t.enabled)
            .filter(|t| seen.insert(t.url.clone()))
            .cloned()
            .collect::<Vec<_>>();
        targets.sort_by(|a, b| a.url.cmp(&b.url));
        targets
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub workspace_root: PathBuf,
    pub snapshot_path: PathBuf,
    pub artifacts_dir: PathBuf,
    pub reports_dir: PathBuf,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let workspace_root = std::env::var("MACFIT_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        let mut config = Self::for_workspace(workspace_root);
        if let Ok(path) = std::env::var("MACFIT_SNAPSHOT_PATH") {
            config.snapshot_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("MACFIT_ARTIFACTS_DIR") {
            config.artifacts_dir = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("MACFIT_REPORTS_DIR") {
            config.reports_dir = PathBuf::from(path);
        }
        config
    }

    pub fn for_workspace(root: impl Into<PathBuf>) -> Self {
        let workspace_root = root.into();
        Self {
            snapshot_path: workspace_root.join("apple_products.json"),
            artifacts_dir: workspace_root.join("artifacts"),
            reports_dir: workspace_root.join("reports"),
            workspace_root,
        }
    }

    pub fn targets_path(&self) -> PathBuf {
        self.workspace_root.join("targets.yaml")
    }

    pub fn scoring_rules_path(&self) -> PathBuf {
        self.workspace_root.join("rules").join("scoring.yaml")
    }

    pub fn extraction_rules_path(&self) -> PathBuf {
        self.workspace_root.join("rules").join("extraction.yaml")
    }

    fn bundle_path_for(&self, target: &TargetConfig) -> PathBuf {
        match &target.bundle {
            Some(path) => self.workspace_root.join(path),
            None => self
                .workspace_root
                .join("fixtures")
                .join(&target.target_id)
                .join("sample")
                .join("bundle.json"),
        }
    }
}

/// Result of reducing a batch of captures to a catalog.
#[derive(Debug, Clone, Default)]
pub struct CatalogBuild {
    pub catalog: Catalog,
    pub rejections: Vec<Rejection>,
    pub captures: usize,
    pub duplicates: usize,
}

/// Extract, validate, then deduplicate, in capture order.
pub struct CatalogBuilder<'e> {
    extractor: &'e SpecExtractor,
    dedup: Deduplicator,
    rejections: Vec<Rejection>,
    captures: usize,
}

impl<'e> CatalogBuilder<'e> {
    pub fn new(extractor: &'e SpecExtractor) -> Self {
        Self {
            extractor,
            dedup: Deduplicator::new(),
            rejections: Vec::new(),
            captures: 0,
        }
    }

    pub fn ingest(&mut self, capture: &Capture) {
        self.captures += 1;
        let partial = self.extractor.extract(capture);
        match validate(&partial, &capture.price_texts) {
            Ok(record) => {
                debug!(name = %record.name, price = record.price, "record accepted");
                self.dedup.insert(record);
            }
            Err(reason) => {
                warn!(
                    reason = reason.code(),
                    source_ref = %partial.source_ref,
                    base_name = %partial.base_name,
                    "record rejected"
                );
                self.rejections.push(Rejection::new(&partial, reason));
            }
        }
    }

    pub fn finish(self) -> CatalogBuild {
        let duplicates = self.dedup.duplicates();
        CatalogBuild {
            catalog: self.dedup.finish(),
            rejections: self.rejections,
            captures: self.captures,
            duplicates,
        }
    }
}

pub fn build_catalog<'c>(extractor: &SpecExtractor, captures: impl IntoIterator<Item = &'c Capture>) -> CatalogBuild {
    let mut builder = CatalogBuilder::new(extractor);
    for capture in captures {
        builder.ingest(capture);
    }
    builder.finish()
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestRunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: String,
    pub snapshot_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetFailure {
    pub target_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub enabled_targets: usize,
    pub archived_artifacts: usize,
    pub captures: usize,
    pub catalog_records: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub failed_targets: usize,
    pub snapshot_path: String,
    pub reports_dir: String,
    pub parquet_manifest: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

pub struct IngestPipeline {
    config: SyncConfig,
    artifact_store: ArtifactStore,
    snapshot_store: SnapshotStore,
    extractor: SpecExtractor,
    weights: ScoringWeights,
}

impl IngestPipeline {
    /// Loads extraction and scoring rules from the workspace; absent rule
    /// files fall back to the built-in tables.
    pub fn new(config: SyncConfig) -> Result<Self> {
        let rules = SpecRules::load(config.extraction_rules_path())
            .with_context(|| format!("loading {}", config.extraction_rules_path().display()))?;
        let weights = ScoringWeights::load(config.scoring_rules_path())?;
        Ok(Self {
            artifact_store: ArtifactStore::new(config.artifacts_dir.clone()),
            snapshot_store: SnapshotStore::new(config.snapshot_path.clone()),
            extractor: SpecExtractor::new(rules),
            weights,
            config,
        })
    }

    /// One full ingestion cycle. The new snapshot replaces the previous one
    /// wholesale; a target that cannot be read is reported and skipped.
    pub async fn run_once(&self) -> Result<IngestRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let registry = self.load_target_registry().await?;
        let targets = registry.enabled_targets();
        info!(%run_id, targets = targets.len(), "ingest run started");

        let mut archived_artifacts = 0usize;
        let mut failures = Vec::new();
        let mut captures = Vec::new();

        for target in &targets {
            match self.capture_target(target).await {
                Ok((archived, mut page_captures)) => {
                    archived_artifacts += usize::from(archived);
                    debug!(target_id = %target.target_id, captures = page_captures.len(), "target parsed");
                    captures.append(&mut page_captures);
                }
                Err(err) => {
                    warn!(target_id = %target.target_id, error = %format!("{err:#}"), "target skipped");
                    failures.push(TargetFailure {
                        target_id: target.target_id.clone(),
                        error: format!("{err:#}"),
                    });
                }
            }
        }

        let build = build_catalog(&self.extractor, &captures);
        let finished_at = Utc::now();
        let snapshot = CatalogSnapshot::new(build.catalog.clone(), finished_at);
        self.snapshot_store
            .save(&snapshot)
            .await
            .with_context(|| format!("saving snapshot {}", self.snapshot_store.path().display()))?;

        let run = IngestRunRecord {
            run_id,
            started_at,
            finished_at,
            status: (if failures.is_empty() { "completed" } else { "completed_with_failures" }).to_string(),
            snapshot_path: self.snapshot_store.path().display().to_string(),
        };
        let scored = build
            .catalog
            .iter()
            .map(|r| self.weights.annotate(r))
            .collect::<Vec<_>>();
        let reports_dir = self.write_reports(&run, targets.len(), &build, &scored, &failures).await?;
        let manifest_path = self.export_parquet_snapshots(&reports_dir, &scored, &build.rejections).await?;

        info!(
            %run_id,
            records = build.catalog.len(),
            rejected = build.rejections.len(),
            duplicates = build.duplicates,
            "ingest run finished"
        );

        Ok(IngestRunSummary {
            run_id,
            started_at,
            finished_at,
            enabled_targets: targets.len(),
            archived_artifacts,
            captures: build.captures,
            catalog_records: build.catalog.len(),
            duplicates: build.duplicates,
            rejected: build.rejections.len(),
            failed_targets: failures.len(),
            snapshot_path: run.snapshot_path,
            reports_dir: reports_dir.display().to_string(),
            parquet_manifest: manifest_path.display().to_string(),
        })
    }

    async fn load_target_registry(&self) -> Result<TargetRegistry> {
        let path = self.config.targets_path();
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        TargetRegistry::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    async fn capture_target(&self, target: &TargetConfig) -> Result<(bool, Vec<Capture>)> {
        let bundle_path = self.config.bundle_path_for(target);
        let bundle = load_capture_bundle(&bundle_path)?;
        if bundle.captured_from_url != target.url {
            warn!(
                target_id = %target.target_id,
                bundle_url = %bundle.captured_from_url,
                "bundle was captured from a different url than the target"
            );
        }
        let archived = self.archive_raw_artifact(&bundle).await?;
        let adapter = adapter_for_url(&bundle.captured_from_url);
        let captures = adapter
            .parse_page(&bundle)
            .with_context(|| format!("{} parsing {}", adapter.adapter_id(), bundle_path.display()))?;
        Ok((archived, captures))
    }

    async fn archive_raw_artifact(&self, bundle: &CaptureBundle) -> Result<bool> {
        let Some(text) = bundle.raw_artifact.inline_text.as_deref() else {
            warn!(target_id = %bundle.target_id, "bundle has no raw artifact to archive");
            return Ok(false);
        };
        let stored = self
            .artifact_store
            .store_bytes(
                bundle.captured_at,
                &bundle.target_id,
                bundle.raw_artifact.extension(),
                text.as_bytes(),
            )
            .await?;
        debug!(
            path = %stored.relative_path.display(),
            deduplicated = stored.deduplicated,
            "raw artifact archived"
        );
        Ok(true)
    }

    async fn write_reports(
        &self,
        run: &IngestRunRecord,
        enabled_targets: usize,
        build: &CatalogBuild,
        scored: &[ScoredRecord],
        failures: &[TargetFailure],
    ) -> Result<PathBuf> {
        let reports_dir = self.config.reports_dir.join(run.run_id.to_string());
        fs::create_dir_all(&reports_dir)
            .await
            .with_context(|| format!("creating {}", reports_dir.display()))?;

        let mut category_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for record in build.catalog.iter() {
            *category_counts.entry(record.category.as_str()).or_default() += 1;
        }
        let mut reason_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for rejection in &build.rejections {
            *reason_counts.entry(rejection.reason.code()).or_default() += 1;
        }
        let bullet_list = |counts: &BTreeMap<&str, usize>| {
            if counts.is_empty() {
                "- none".to_string()
            } else {
                counts
                    .iter()
                    .map(|(k, v)| format!("- {k}: {v}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };
        let failure_list = if failures.is_empty() {
            "- none".to_string()
        } else {
            failures
                .iter()
                .map(|f| format!("- {}: {}", f.target_id, f.error))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let brief = format!(
            "# Mac Budget Fit Run Brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Enabled targets: {}\n- Captures: {}\n- Catalog records: {}\n- Duplicates collapsed: {}\n- Rejected: {}\n\n## Records by Category\n{}\n\n## Rejections by Reason\n{}\n\n## Failed Targets\n{}\n",
            run.run_id,
            run.started_at,
            run.finished_at,
            enabled_targets,
            build.captures,
            build.catalog.len(),
            build.duplicates,
            build.rejections.len(),
            bullet_list(&category_counts),
            bullet_list(&reason_counts),
            failure_list,
        );
        fs::write(reports_dir.join("run_brief.md"), brief)
            .await
            .context("writing run_brief.md")?;

        let delta_json = serde_json::to_vec_pretty(&serde_json::json!({
            "run": run,
            "records": scored,
            "rejections": build.rejections,
            "failed_targets": failures,
        }))
        .context("serializing catalog delta")?;
        fs::write(reports_dir.join("catalog_delta.json"), delta_json)
            .await
            .context("writing catalog_delta.json")?;

        Ok(reports_dir)
    }

    async fn export_parquet_snapshots(
        &self,
        reports_dir: &Path,
        scored: &[ScoredRecord],
        rejections: &[Rejection],
    ) -> Result<PathBuf> {
        let snapshot_dir = reports_dir.join("snapshots");
        fs::create_dir_all(&snapshot_dir)
            .await
            .with_context(|| format!("creating {}", snapshot_dir.display()))?;

        let catalog_path = snapshot_dir.join("catalog.parquet");
        let rejections_path = snapshot_dir.join("rejections.parquet");
        write_catalog_parquet(&catalog_path, scored)?;
        write_rejections_parquet(&rejections_path, rejections)?;

        let manifest = ParquetManifest {
            schema_version: 1,
            files: vec![
                manifest_entry("catalog", reports_dir, &catalog_path)?,
                manifest_entry("rejections", reports_dir, &rejections_path)?,
            ],
        };

        let manifest_path = snapshot_dir.join("manifest.json");
        let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
        fs::write(&manifest_path, bytes)
            .await
            .with_context(|| format!("writing {}", manifest_path.display()))?;
        Ok(manifest_path)
    }
}

pub async fn run_ingest_once_from_env() -> Result<IngestRunSummary> {
    IngestPipeline::new(SyncConfig::from_env())?.run_once().await
}

/// The persisted snapshot, or an empty one when none is usable yet.
pub async fn load_snapshot_or_empty(config: &SyncConfig) -> Result<CatalogSnapshot> {
    let store = SnapshotStore::new(config.snapshot_path.clone());
    let snapshot = store
        .load()
        .await
        .with_context(|| format!("loading snapshot {}", store.path().display()))?;
    Ok(snapshot.unwrap_or_else(CatalogSnapshot::empty))
}

/// Markdown digest of the most recent `runs` ingestion reports.
pub fn report_recent_runs(runs: usize, reports_root: impl AsRef<Path>) -> Result<String> {
    let reports_root = reports_root.as_ref();
    let mut dirs = std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();

    let mut lines = vec!["# Mac Budget Fit Recent Runs".to_string(), String::new()];
    for dir in dirs.into_iter().take(runs.max(1)) {
        let run_id = dir.file_name().to_string_lossy().to_string();
        let delta_path = dir.path().join("catalog_delta.json");
        let manifest_path = dir.path().join("snapshots").join("manifest.json");

        let delta: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&delta_path).with_context(|| format!("reading {}", delta_path.display()))?,
        )
        .with_context(|| format!("parsing {}", delta_path.display()))?;
        let count = |key: &str| delta.get(key).and_then(|v| v.as_array()).map(|a| a.len()).unwrap_or(0);
        let status = delta
            .get("run")
            .and_then(|v| v.get("status"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        lines.push(format!("## Run `{run_id}`"));
        lines.push(format!("- status: {status}"));
        lines.push(format!("- records: {}", count("records")));
        lines.push(format!("- rejections: {}", count("rejections")));
        lines.push(format!("- delta: `{}`", delta_path.display()));
        if manifest_path.exists() {
            lines.push(format!("- parquet manifest: `{}`", manifest_path.display()));
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_catalog_parquet(path: &Path, scored: &[ScoredRecord]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("name", DataType::Utf8, false),
        ArrowField::new("base_name", DataType::Utf8, false),
        ArrowField::new("category", DataType::Utf8, false),
        ArrowField::new("chip", DataType::Utf8, false),
        ArrowField::new("cpu_cores", DataType::UInt32, false),
        ArrowField::new("gpu_cores", DataType::UInt32, false),
        ArrowField::new("ram_gb", DataType::UInt32, false),
        ArrowField::new("storage_gb", DataType::UInt32, false),
        ArrowField::new("price", DataType::UInt64, false),
        ArrowField::new("source_ref", DataType::Utf8, false),
        ArrowField::new("value_score", DataType::Float64, false),
    ]));

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(string_column(scored, |s| s.record.name.as_str())),
            Arc::new(string_column(scored, |s| s.record.base_name.as_str())),
            Arc::new(string_column(scored, |s| s.record.category.as_str())),
            Arc::new(string_column(scored, |s| s.record.chip.as_str())),
            Arc::new(count_column(scored, |s| s.record.cpu_cores)),
            Arc::new(count_column(scored, |s| s.record.gpu_cores)),
            Arc::new(count_column(scored, |s| s.record.ram_gb)),
            Arc::new(count_column(scored, |s| s.record.storage_gb)),
            Arc::new(UInt64Array::from(scored.iter().map(|s| s.record.price).collect::<Vec<_>>())),
            Arc::new(string_column(scored, |s| s.record.source_ref.as_str())),
            Arc::new(Float64Array::from(scored.iter().map(|s| s.value_score).collect::<Vec<_>>())),
        ],
    )
    .context("building catalog record batch")?;
    write_parquet(path, batch)
}

fn string_column<'a, T>(rows: &'a [T], f: impl Fn(&'a T) -> &'a str) -> StringArray {
    StringArray::from(rows.iter().map(f).collect::<Vec<_>>())
}

fn count_column<T>(rows: &[T], f: impl Fn(&T) -> u32) -> UInt32Array {
    UInt32Array::from(rows.iter().map(f).collect::<Vec<_>>())
}

fn write_rejections_parquet(path: &Path, rejections: &[Rejection]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("reason", DataType::Utf8, false),
        ArrowField::new("base_name", DataType::Utf8, false),
        ArrowField::new("category", DataType::Utf8, false),
        ArrowField::new("source_ref", DataType::Utf8, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(string_column(rejections, |r| r.reason.code())),
            Arc::new(string_column(rejections, |r| r.base_name.as_str())),
            Arc::new(string_column(rejections, |r| r.category.as_str())),
            Arc::new(string_column(rejections, |r| r.source_ref.as_str())),
        ],
    )
    .context("building rejections record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, reports_dir: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let rel = path.strip_prefix(reports_dir).unwrap_or(path).display().to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: hex::encode(hasher.finalize()),
        bytes: bytes.len() as u64,
    })
}
