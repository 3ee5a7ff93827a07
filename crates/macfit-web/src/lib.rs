//! JSON boundary over the published catalog snapshot.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use macfit_core::{CatalogSnapshot, ConfigurationRecord, ScoredRecord};
use macfit_sync::{
    load_snapshot_or_empty, parse_budget, BudgetMatch, BudgetMatcher, MatchError, MatchOutcome, ScoringWeights,
    SyncConfig,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "macfit-web";

pub const DEFAULT_PORT: u16 = 10001;

const DATA_UNAVAILABLE: &str = "Product data is currently unavailable. Please try again later.";

/// A snapshot together with the publish counter it was installed under.
#[derive(Debug)]
pub struct PublishedSnapshot {
    pub version: u64,
    pub snapshot: CatalogSnapshot,
}

/// Swap-on-write holder. Readers clone the inner `Arc` and keep a consistent
/// snapshot for as long as they need it; `publish` never mutates one in place.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    inner: Arc<RwLock<Arc<PublishedSnapshot>>>,
}

impl SnapshotHandle {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(PublishedSnapshot { version: 1, snapshot }))),
        }
    }

    pub async fn current(&self) -> Arc<PublishedSnapshot> {
        self.inner.read().await.clone()
    }

    /// Installs `snapshot` and returns its version.
    pub async fn publish(&self, snapshot: CatalogSnapshot) -> u64 {
        let mut guard = self.inner.write().await;
        let version = guard.version + 1;
        *guard = Arc::new(PublishedSnapshot { version, snapshot });
        info!(version, products = guard.snapshot.products.len(), "snapshot published");
        version
    }

    /// Re-reads the persisted snapshot and publishes it.
    pub async fn reload(&self, config: &SyncConfig) -> anyhow::Result<u64> {
        let snapshot = load_snapshot_or_empty(config).await?;
        Ok(self.publish(snapshot).await)
    }
}

pub struct AppState {
    pub snapshots: SnapshotHandle,
    pub weights: ScoringWeights,
    pub matcher: BudgetMatcher,
}

impl AppState {
    pub fn new(snapshot: CatalogSnapshot, weights: ScoringWeights) -> Self {
        Self {
            snapshots: SnapshotHandle::new(snapshot),
            weights,
            matcher: BudgetMatcher::default(),
        }
    }

    pub async fn load(config: &SyncConfig) -> anyhow::Result<Self> {
        let snapshot = load_snapshot_or_empty(config).await?;
        let weights = ScoringWeights::load(config.scoring_rules_path())?;
        Ok(Self::new(snapshot, weights))
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/find_value", post(find_value_handler))
        .route("/products", get(products_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct IndexSummary {
    service: &'static str,
    snapshot_version: u64,
    products: usize,
    taken_at: Option<String>,
    scoring_version: u32,
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let published = state.snapshots.current().await;
    Json(IndexSummary {
        service: CRATE_NAME,
        snapshot_version: published.version,
        products: published.snapshot.products.len(),
        taken_at: published.snapshot.taken_at().map(|t| t.to_rfc3339()),
        scoring_version: state.weights.version,
    })
    .into_response()
}

/// Budgets arrive as JSON numbers or as strings such as `"1,20,000"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BudgetInput {
    Amount(f64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct FindValueRequest {
    budget: Option<BudgetInput>,
}

#[derive(Debug, Serialize)]
struct FindValueResponse {
    outcome: MatchOutcome,
    best_match: Option<ScoredRecord>,
    cheaper_alternative: Option<ScoredRecord>,
    expensive_alternative: Option<ScoredRecord>,
}

async fn find_value_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let published = state.snapshots.current().await;
    if published.snapshot.products.is_empty() {
        warn!("find_value with no published products");
        return error_response(StatusCode::SERVICE_UNAVAILABLE, DATA_UNAVAILABLE);
    }

    let budget = match budget_from_body(&body) {
        Ok(budget) => budget,
        Err(err) => {
            debug!(error = %err, "budget rejected");
            return error_response(StatusCode::BAD_REQUEST, budget_error_message(&err));
        }
    };

    match state.matcher.find(&published.snapshot.products, budget) {
        Ok(found) => {
            debug!(budget, outcome = ?found.outcome, "budget matched");
            Json(to_response(&state.weights, &found)).into_response()
        }
        Err(err) => error_response(StatusCode::BAD_REQUEST, budget_error_message(&err)),
    }
}

async fn products_handler(State(state): State<Arc<AppState>>) -> Response {
    let published = state.snapshots.current().await;
    if published.snapshot.products.is_empty() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, DATA_UNAVAILABLE);
    }
    Json(state.weights.price_ordered_listing(&published.snapshot.products)).into_response()
}

fn budget_from_body(body: &[u8]) -> Result<f64, MatchError> {
    let not_provided = || MatchError::InvalidBudget {
        input: String::from_utf8_lossy(body).into_owned(),
        reason: "budget not provided",
    };
    let request: FindValueRequest = serde_json::from_slice(body).map_err(|_| not_provided())?;
    match request.budget {
        None => Err(not_provided()),
        Some(BudgetInput::Text(text)) => parse_budget(&text),
        Some(BudgetInput::Amount(amount)) => macfit_sync::matcher::check_budget(amount),
    }
}

fn budget_error_message(err: &MatchError) -> &'static str {
    match err {
        MatchError::InvalidBudget { reason: "budget not provided", .. } => "Budget not provided",
        MatchError::InvalidBudget { reason: "budget must be positive", .. } => "Budget must be positive",
        MatchError::InvalidBudget { .. } => "Invalid budget amount",
    }
}

fn to_response(weights: &ScoringWeights, found: &BudgetMatch<'_>) -> FindValueResponse {
    let scored = |record: Option<&ConfigurationRecord>| record.map(|r| weights.annotate(r));
    FindValueResponse {
        outcome: found.outcome,
        best_match: scored(found.best),
        cheaper_alternative: scored(found.cheaper),
        expensive_alternative: scored(found.pricier),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use macfit_core::{Catalog, Category, Chip};
    use tower::ServiceExt;

    fn snapshot_of(records: Vec<ConfigurationRecord>) -> CatalogSnapshot {
        CatalogSnapshot {
            timestamp: 1_772_344_800.0,
            products: Catalog::from_records(records),
        }
    }

    fn mac(price: u64, ram_gb: u32) -> ConfigurationRecord {
        ConfigurationRecord {
            name: format!("Mac mini M4 ({ram_gb}GB RAM, 256GB SSD)"),
            base_name: "Mac mini".into(),
            category: Category::DesktopMac,
            chip: Chip::identified("M4"),
            cpu_cores: 10,
            gpu_cores: 10,
            ram_gb,
            storage_gb: 256,
            price,
            source_ref: "https://www.apple.com/in/shop/buy-mac/mac-mini".into(),
        }
    }

    fn state_with(records: Vec<ConfigurationRecord>) -> AppState {
        AppState::new(snapshot_of(records), ScoringWeights::default())
    }

    fn scenario() -> AppState {
        state_with(vec![mac(150_000, 32), mac(80_000, 16), mac(200_000, 64), mac(120_000, 24)])
    }

    async fn post_json(app: Router, body: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/find_value")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn find_value_returns_best_and_neighbors() {
        let (status, body) = post_json(app(scenario()), r#"{"budget": 140000}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "within_budget");
        assert_eq!(body["best_match"]["price"], 120_000);
        assert_eq!(body["cheaper_alternative"]["price"], 80_000);
        assert_eq!(body["expensive_alternative"]["price"], 150_000);
        assert!(body["best_match"]["value_score"].as_f64().unwrap() > 0.0);
        assert_eq!(body["best_match"]["category"], "Desktop");
    }

    #[tokio::test]
    async fn find_value_accepts_string_budgets_and_falls_back_to_cheapest() {
        let (status, body) = post_json(app(scenario()), r#"{"budget": "50,000"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "floor_fallback");
        assert_eq!(body["best_match"]["price"], 80_000);
        assert!(body["cheaper_alternative"].is_null());
        assert_eq!(body["expensive_alternative"]["price"], 120_000);
    }

    #[tokio::test]
    async fn find_value_rejects_bad_budgets() {
        let cases = [
            ("{}", "Budget not provided"),
            ("not json", "Budget not provided"),
            (r#"{"budget": 0}"#, "Budget must be positive"),
            (r#"{"budget": -10}"#, "Budget must be positive"),
            (r#"{"budget": "abc"}"#, "Invalid budget amount"),
        ];
        for (body, message) in cases {
            let (status, json) = post_json(app(scenario()), body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(json["error"], message, "{body}");
        }
    }

    #[tokio::test]
    async fn empty_snapshot_is_service_unavailable() {
        let (status, body) = post_json(app(state_with(vec![])), r#"{"budget": 100000}"#).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], DATA_UNAVAILABLE);

        let (status, _) = get_json(app(state_with(vec![])), "/products").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn products_are_price_ascending() {
        let (status, body) = get_json(app(scenario()), "/products").await;
        assert_eq!(status, StatusCode::OK);
        let prices = body
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["price"].as_u64().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(prices, vec![80_000, 120_000, 150_000, 200_000]);
    }

    #[tokio::test]
    async fn index_reports_snapshot_summary() {
        let (status, body) = get_json(app(scenario()), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["products"], 4);
        assert_eq!(body["snapshot_version"], 1);
        assert!(body["taken_at"].is_string());
    }

    #[tokio::test]
    async fn publish_swaps_without_disturbing_held_snapshots() {
        let handle = SnapshotHandle::new(snapshot_of(vec![mac(80_000, 16)]));
        let held = handle.current().await;
        let version = handle.publish(snapshot_of(vec![mac(80_000, 16), mac(99_000, 24)])).await;
        assert_eq!(version, 2);
        assert_eq!(held.snapshot.products.len(), 1);
        assert_eq!(handle.current().await.snapshot.products.len(), 2);
    }

    #[tokio::test]
    async fn reload_serves_the_newly_persisted_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let config = SyncConfig::for_workspace(tmp.path());
        let state = state_with(vec![mac(80_000, 16)]);
        let handle = state.snapshots.clone();
        let router = app(state);

        let persisted = snapshot_of(vec![mac(80_000, 16), mac(99_000, 24), mac(150_000, 32)]);
        std::fs::write(&config.snapshot_path, serde_json::to_vec(&persisted).unwrap()).unwrap();
        assert_eq!(handle.reload(&config).await.unwrap(), 2);

        let (status, body) = get_json(router, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["snapshot_version"], 2);
        assert_eq!(body["products"], 3);
    }
}
