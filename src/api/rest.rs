// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Configuration management and metrics queries. Every response uses the
// uniform `{ success, data?, error? }` envelope. Write operations require
// `changed_by` and are recorded in the audit trail.
//
// CORS is configured permissively for development; tighten
// `allowed_origins` in production.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;
use crate::config::schema::{schema_for, ParameterValue};
use crate::config::ConfigError;
use crate::market::depth_analyzer::PressureWindow;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Health ──────────────────────────────────────────────────
        .route("/health", get(health))
        // ── Strategy configuration ──────────────────────────────────
        .route("/strategies", get(list_strategies))
        .route("/strategies/cache/refresh", post(refresh_cache))
        .route("/strategies/:id/schema", get(get_schema))
        .route("/strategies/:id/defaults", get(get_defaults))
        .route(
            "/strategies/:id/config",
            get(get_global_config)
                .post(set_global_config)
                .delete(delete_global_config),
        )
        .route(
            "/strategies/:id/config/:symbol",
            get(get_symbol_config)
                .post(set_symbol_config)
                .delete(delete_symbol_config),
        )
        .route("/strategies/:id/audit", get(get_audit))
        // ── Metrics ─────────────────────────────────────────────────
        .route("/metrics/depth/:symbol", get(depth_metrics))
        .route("/metrics/pressure/:symbol", get(pressure_metrics))
        .route("/metrics/summary", get(metrics_summary))
        .route("/metrics/all", get(metrics_all))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Response envelope
// =============================================================================

fn ok<T: serde::Serialize>(data: T) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

fn fail(status: StatusCode, error: serde_json::Value) -> Response {
    (status, Json(json!({ "success": false, "error": error }))).into_response()
}

fn fail_msg(status: StatusCode, message: &str) -> Response {
    fail(status, json!(message))
}

fn config_error(e: ConfigError) -> Response {
    match e {
        ConfigError::Validation(errors) => fail(
            StatusCode::BAD_REQUEST,
            json!({ "message": "validation failed", "details": errors }),
        ),
        ConfigError::Transient(message) => fail(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "message": "document store unavailable", "details": message }),
        ),
        ConfigError::UnknownStrategy(strategy) => fail(
            StatusCode::NOT_FOUND,
            json!({ "message": format!("unknown strategy: {strategy}") }),
        ),
    }
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let metrics = state.metrics.snapshot();
    ok(json!({
        "status": "ok",
        "uptime_seconds": metrics.uptime_seconds,
        "messages_processed": metrics.messages_processed,
        "last_message_age_seconds": metrics.last_message_age_seconds,
        "breakers": state.breaker_snapshots(),
    }))
}

// =============================================================================
// Strategy configuration
// =============================================================================

async fn list_strategies(State(state): State<Arc<AppState>>) -> Response {
    ok(state.config.list_strategies().await)
}

async fn get_schema(Path(id): Path<String>) -> Response {
    match schema_for(&id) {
        Some(schema) => ok(schema),
        None => fail_msg(StatusCode::NOT_FOUND, &format!("unknown strategy: {id}")),
    }
}

async fn get_defaults(Path(id): Path<String>) -> Response {
    match schema_for(&id) {
        Some(schema) => ok(schema.defaults()),
        None => fail_msg(StatusCode::NOT_FOUND, &format!("unknown strategy: {id}")),
    }
}

async fn get_global_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    if schema_for(&id).is_none() {
        return fail_msg(StatusCode::NOT_FOUND, &format!("unknown strategy: {id}"));
    }
    ok(state.config.get(&id, None).await)
}

async fn get_symbol_config(
    State(state): State<Arc<AppState>>,
    Path((id, symbol)): Path<(String, String)>,
) -> Response {
    if schema_for(&id).is_none() {
        return fail_msg(StatusCode::NOT_FOUND, &format!("unknown strategy: {id}"));
    }
    ok(state.config.get(&id, Some(&symbol)).await)
}

/// Body of a configuration write.
#[derive(Debug, Deserialize)]
struct ConfigWriteBody {
    parameters: HashMap<String, ParameterValue>,
    changed_by: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    validate_only: bool,
}

async fn set_global_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ConfigWriteBody>,
) -> Response {
    set_config(&state, &id, None, body).await
}

async fn set_symbol_config(
    State(state): State<Arc<AppState>>,
    Path((id, symbol)): Path<(String, String)>,
    Json(body): Json<ConfigWriteBody>,
) -> Response {
    set_config(&state, &id, Some(symbol), body).await
}

async fn set_config(
    state: &Arc<AppState>,
    id: &str,
    symbol: Option<String>,
    body: ConfigWriteBody,
) -> Response {
    if body.changed_by.trim().is_empty() {
        return fail_msg(StatusCode::BAD_REQUEST, "changed_by is required");
    }

    match state
        .config
        .set(
            id,
            symbol.as_deref(),
            body.parameters,
            &body.changed_by,
            body.reason,
            body.validate_only,
        )
        .await
    {
        Ok(Some(record)) => ok(record),
        Ok(None) => ok(json!({ "validated": true })),
        Err(e) => config_error(e),
    }
}

/// Query string on delete operations: audit attribution.
#[derive(Debug, Deserialize)]
struct DeleteQuery {
    changed_by: Option<String>,
    reason: Option<String>,
}

async fn delete_global_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Response {
    delete_config(&state, &id, None, query).await
}

async fn delete_symbol_config(
    State(state): State<Arc<AppState>>,
    Path((id, symbol)): Path<(String, String)>,
    Query(query): Query<DeleteQuery>,
) -> Response {
    delete_config(&state, &id, Some(symbol), query).await
}

async fn delete_config(
    state: &Arc<AppState>,
    id: &str,
    symbol: Option<String>,
    query: DeleteQuery,
) -> Response {
    let Some(changed_by) = query.changed_by.filter(|s| !s.trim().is_empty()) else {
        return fail_msg(StatusCode::BAD_REQUEST, "changed_by is required");
    };

    match state
        .config
        .delete(id, symbol.as_deref(), &changed_by, query.reason)
        .await
    {
        Ok(deleted) => ok(json!({ "deleted": deleted })),
        Err(e) => config_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    limit: Option<i64>,
    symbol: Option<String>,
}

async fn get_audit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<AuditQuery>,
) -> Response {
    if schema_for(&id).is_none() {
        return fail_msg(StatusCode::NOT_FOUND, &format!("unknown strategy: {id}"));
    }
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    match state
        .config
        .audit(&id, query.symbol.as_deref(), limit)
        .await
    {
        Ok(page) => ok(page),
        Err(e) => config_error(e),
    }
}

async fn refresh_cache(State(state): State<Arc<AppState>>) -> Response {
    state.config.refresh();
    ok(json!({ "refreshed": true }))
}

// =============================================================================
// Metrics
// =============================================================================

async fn depth_metrics(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Response {
    match state.analyzer.current(&symbol.to_uppercase()) {
        Some(metrics) => ok(metrics),
        None => fail_msg(
            StatusCode::NOT_FOUND,
            &format!("no depth metrics for {symbol}"),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct PressureQuery {
    timeframe: Option<String>,
}

async fn pressure_metrics(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<PressureQuery>,
) -> Response {
    let timeframe = query.timeframe.as_deref().unwrap_or("5m");
    let Some(window) = PressureWindow::parse(timeframe) else {
        return fail_msg(
            StatusCode::BAD_REQUEST,
            "timeframe must be one of 1m, 5m, 15m",
        );
    };

    match state
        .analyzer
        .pressure_history(&symbol.to_uppercase(), window)
    {
        Some(history) => ok(history),
        None => fail_msg(
            StatusCode::NOT_FOUND,
            &format!("no pressure history for {symbol}"),
        ),
    }
}

async fn metrics_summary(State(state): State<Arc<AppState>>) -> Response {
    ok(json!({
        "engine": state.metrics.snapshot(),
        "depth": state.analyzer.summary(),
        "breakers": state.breaker_snapshots(),
    }))
}

async fn metrics_all(State(state): State<Arc<AppState>>) -> Response {
    ok(state.analyzer.all())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreaker;
    use crate::config::store::MemoryConfigStore;
    use crate::config::ConfigManager;
    use crate::market::events::{DepthSnapshot, PriceLevel};
    use crate::market::DepthAnalyzer;
    use crate::metrics::EngineMetrics;
    use crate::settings::Settings;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let settings = Settings {
            bus_url: "nats://localhost:4222".into(),
            input_topic: "binance.websocket.data".into(),
            output_topic: "signals.trading".into(),
            queue_group: "realtime-strategies-group".into(),
            mongo_uri: String::new(),
            mongo_database: "aurora_signals".into(),
            bind_addr: "127.0.0.1:0".into(),
            config_cache_ttl: Duration::from_secs(60),
            io_deadline: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(60),
        };
        let config = Arc::new(ConfigManager::new(
            Arc::new(MemoryConfigStore::new()),
            Duration::from_secs(60),
            Duration::from_secs(5),
        ));
        let analyzer = Arc::new(DepthAnalyzer::new());
        analyzer.update(&DepthSnapshot {
            symbol: "BTCUSDT".to_string(),
            last_update_id: 1,
            bids: vec![PriceLevel { price: 50000.0, quantity: 2.0 }],
            asks: vec![PriceLevel { price: 50001.0, quantity: 1.0 }],
            event_time: Utc::now(),
        });
        Arc::new(AppState::new(
            settings,
            config,
            analyzer,
            Arc::new(EngineMetrics::new()),
            vec![Arc::new(CircuitBreaker::with_defaults("publisher"))],
        ))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn post_json(
        app: Router,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn lists_strategies_with_envelope() {
        let app = router(test_state());
        let (status, body) = get_json(app, "/strategies").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn schema_and_defaults_roundtrip() {
        let state = test_state();
        let (status, body) = get_json(router(state.clone()), "/strategies/orderbook_skew/schema").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["strategy"], "orderbook_skew");

        let (status, body) =
            get_json(router(state), "/strategies/orderbook_skew/defaults").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["buy_threshold"], 1.2);
    }

    #[tokio::test]
    async fn unknown_strategy_is_404() {
        let (status, body) = get_json(router(test_state()), "/strategies/nope/schema").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn config_write_persists_and_audits() {
        let state = test_state();

        let (status, body) = post_json(
            router(state.clone()),
            "/strategies/orderbook_skew/config/BTCUSDT",
            json!({
                "parameters": { "buy_threshold": 1.5 },
                "changed_by": "ops",
                "reason": "test override"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["version"], 1);

        let (_, body) = get_json(
            router(state.clone()),
            "/strategies/orderbook_skew/config/BTCUSDT",
        )
        .await;
        assert_eq!(body["data"]["source"], "db-symbol");
        assert_eq!(body["data"]["is_override"], true);
        assert_eq!(body["data"]["parameters"]["buy_threshold"], 1.5);

        let (_, body) = get_json(
            router(state),
            "/strategies/orderbook_skew/audit?limit=10",
        )
        .await;
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["changed_by"], "ops");
        assert_eq!(rows[0]["action"], "create");
    }

    #[tokio::test]
    async fn invalid_parameters_return_details() {
        let (status, body) = post_json(
            router(test_state()),
            "/strategies/orderbook_skew/config",
            json!({
                "parameters": { "buy_threshold": 0.1, "bogus": 1 },
                "changed_by": "ops"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["details"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn write_without_changed_by_is_rejected() {
        let (status, _) = post_json(
            router(test_state()),
            "/strategies/orderbook_skew/config",
            json!({ "parameters": {}, "changed_by": "" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn depth_and_pressure_endpoints_serve_analyzer_state() {
        let state = test_state();

        let (status, body) = get_json(router(state.clone()), "/metrics/depth/btcusdt").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["symbol"], "BTCUSDT");
        assert_eq!(body["data"]["best_bid"], 50000.0);

        let (status, body) = get_json(
            router(state.clone()),
            "/metrics/pressure/BTCUSDT?timeframe=1m",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["timeframe"], "1m");

        let (status, _) = get_json(
            router(state.clone()),
            "/metrics/pressure/BTCUSDT?timeframe=2h",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get_json(router(state), "/metrics/depth/UNSEEN").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn summary_includes_engine_and_breakers() {
        let (status, body) = get_json(router(test_state()), "/metrics/summary").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["engine"]["uptime_seconds"].is_number());
        assert_eq!(body["data"]["depth"]["symbols_tracked"], 1);
        assert_eq!(body["data"]["breakers"][0]["name"], "publisher");
    }

    #[tokio::test]
    async fn cache_refresh_responds() {
        let response = router(test_state())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/strategies/cache/refresh")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
