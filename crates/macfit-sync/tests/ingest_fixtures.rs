use std::path::{Path, PathBuf};

use macfit_core::Category;
use macfit_sync::{load_snapshot_or_empty, match_budget, report_recent_runs, IngestPipeline, MatchOutcome, SyncConfig};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .expect("workspace root")
}

fn bundle(target_id: &str) -> String {
    workspace_root()
        .join("fixtures")
        .join(target_id)
        .join("sample")
        .join("bundle.json")
        .display()
        .to_string()
}

fn write_targets(root: &Path, extra: &str) {
    let yaml = format!(
        r#"targets:
  - target_id: macbook-air-13
    url: https://www.apple.com/in/shop/buy-mac/macbook-air/13-inch
    bundle: {air}
  - target_id: mac-mini
    url: https://www.apple.com/in/shop/buy-mac/mac-mini
    bundle: {mini}
  - target_id: iphone-16-pro-max-256gb
    url: https://www.apple.com/in/shop/buy-iphone/iphone-16-pro/6.9%22-display-256gb-desert-titanium
    bundle: {iphone}
  - target_id: mac-studio
    url: https://www.apple.com/in/shop/buy-mac/mac-studio
    enabled: false
{extra}"#,
        air = bundle("macbook-air-13"),
        mini = bundle("mac-mini"),
        iphone = bundle("iphone-16-pro-max-256gb"),
    );
    std::fs::write(root.join("targets.yaml"), yaml).expect("write targets");
}

#[tokio::test]
async fn fixture_run_publishes_catalog_and_reports() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_targets(tmp.path(), "");
    let config = SyncConfig::for_workspace(tmp.path());
    let pipeline = IngestPipeline::new(config.clone()).expect("pipeline");

    let summary = pipeline.run_once().await.expect("run");
    assert_eq!(summary.enabled_targets, 3);
    assert_eq!(summary.archived_artifacts, 3);
    assert_eq!(summary.captures, 9);
    assert_eq!(summary.catalog_records, 8);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.failed_targets, 0);

    let snapshot = load_snapshot_or_empty(&config).await.expect("snapshot");
    assert_eq!(snapshot.products.len(), 8);
    assert!(snapshot.taken_at().is_some());
    // Targets are ingested in URL order.
    assert_eq!(snapshot.products.records()[0].category, Category::IPhone);

    let m = match_budget(&snapshot.products, 120_000.0).expect("match");
    assert_eq!(m.outcome, MatchOutcome::WithinBudget);
    assert_eq!(m.best.map(|r| r.price), Some(119_900));
    assert_eq!(m.cheaper.map(|r| r.price), Some(99_900));
    assert_eq!(m.pricier.map(|r| r.price), Some(129_900));

    let reports_dir = PathBuf::from(&summary.reports_dir);
    let brief = std::fs::read_to_string(reports_dir.join("run_brief.md")).expect("brief");
    assert!(brief.contains("- missing_storage: 1"));
    assert!(brief.contains("- Catalog records: 8"));
    assert!(reports_dir.join("catalog_delta.json").exists());
    assert!(reports_dir.join("snapshots").join("catalog.parquet").exists());

    let manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&summary.parquet_manifest).expect("manifest")).expect("json");
    let files = manifest["files"].as_array().expect("files");
    assert_eq!(files.len(), 2);
    assert_eq!(files[0]["path"], "snapshots/catalog.parquet");

    let digest = report_recent_runs(5, &config.reports_dir).expect("report");
    assert!(digest.contains(&summary.run_id.to_string()));
    assert!(digest.contains("- records: 8"));
}

#[tokio::test]
async fn unreadable_target_is_skipped_without_failing_the_run() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_targets(
        tmp.path(),
        "  - target_id: imac\n    url: https://www.apple.com/in/shop/buy-mac/imac\n",
    );
    let config = SyncConfig::for_workspace(tmp.path());
    let summary = IngestPipeline::new(config)
        .expect("pipeline")
        .run_once()
        .await
        .expect("run");
    assert_eq!(summary.enabled_targets, 4);
    assert_eq!(summary.failed_targets, 1);
    assert_eq!(summary.catalog_records, 8);

    let brief = std::fs::read_to_string(PathBuf::from(&summary.reports_dir).join("run_brief.md")).expect("brief");
    assert!(brief.contains("- imac: "));
}

#[tokio::test]
async fn missing_snapshot_reads_as_empty() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let snapshot = load_snapshot_or_empty(&SyncConfig::for_workspace(tmp.path()))
        .await
        .expect("snapshot");
    assert!(snapshot.products.is_empty());
}
