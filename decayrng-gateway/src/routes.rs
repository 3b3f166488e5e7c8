//! HTTP export surface
//!
//! Every handler takes the engine lock once, briefly, through
//! [`SharedEngine`]; nothing is held across an `.await`.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use decayrng_core::{
    metrics::Metrics,
    protocol::{BoundaryExport, EncodingFormat, EngineStatus, GatewayStatus, HealthStatus, Phase},
    SharedEngine, Symbol,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

/// Symbols older than this are reported as stale
const STALE_AFTER_SECS: u64 = 300;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: SharedEngine,
    pub metrics: Metrics,
    pub max_request_size: usize,
    pub metrics_enabled: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/random", get(serve_random))
        .route("/api/symbols", get(serve_symbols))
        .route("/api/status", get(get_status))
        .route("/api/boundaries", get(get_boundaries))
        .route("/api/recalibrate", post(recalibrate))
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Query parameters for /api/random endpoint
#[derive(Deserialize)]
struct RandomQuery {
    bytes: usize,
    #[serde(default = "default_encoding")]
    encoding: String,
}

fn default_encoding() -> String {
    "hex".to_string()
}

/// Query parameters for /api/symbols endpoint
#[derive(Deserialize)]
struct SymbolsQuery {
    count: usize,
}

#[derive(Serialize)]
struct SymbolsResponse {
    bucket_count: usize,
    symbol_bits: u8,
    symbols: Vec<Symbol>,
}

impl AppState {
    fn check_size(&self, n: usize) -> Result<(), StatusCode> {
        if n == 0 || n > self.max_request_size {
            self.metrics.record_request_failure();
            return Err(StatusCode::BAD_REQUEST);
        }
        Ok(())
    }
}

/// GET /api/random - Serve packed symbol bits as bytes
async fn serve_random(
    State(state): State<AppState>,
    Query(params): Query<RandomQuery>,
) -> Result<Response, StatusCode> {
    let start = Instant::now();

    state.check_size(params.bytes)?;

    let encoding = EncodingFormat::parse(&params.encoding).ok_or_else(|| {
        state.metrics.record_request_failure();
        StatusCode::BAD_REQUEST
    })?;

    let data = state.engine.drain_bytes(params.bytes).ok_or_else(|| {
        state.metrics.record_request_failure();
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    let body = encoding.encode(&data);

    let latency = start.elapsed().as_micros() as u64;
    state.metrics.record_request(params.bytes, 0, latency);

    Ok((
        StatusCode::OK,
        [(hyper::header::CONTENT_TYPE, encoding.mime_type())],
        body,
    )
        .into_response())
}

/// GET /api/symbols - Serve raw bucket indices
async fn serve_symbols(
    State(state): State<AppState>,
    Query(params): Query<SymbolsQuery>,
) -> Result<Json<SymbolsResponse>, StatusCode> {
    let start = Instant::now();

    state.check_size(params.count)?;

    let (symbols, bucket_count, symbol_bits) = state.engine.with(|e| {
        (e.drain(params.count), e.bucket_count(), e.symbol_width())
    });
    let symbols = symbols.ok_or_else(|| {
        state.metrics.record_request_failure();
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    let latency = start.elapsed().as_micros() as u64;
    state.metrics.record_request(0, symbols.len(), latency);

    Ok(Json(SymbolsResponse {
        bucket_count,
        symbol_bits,
        symbols,
    }))
}

/// GET /api/status - System status
async fn get_status(State(state): State<AppState>) -> Json<GatewayStatus> {
    let engine = state.engine.status();
    let connected = state.metrics.capture_connected();
    let (status, warnings) = assess(&engine, connected);

    Json(GatewayStatus {
        status,
        capture_connected: connected,
        uptime_seconds: state.metrics.uptime_seconds(),
        total_requests_served: state.metrics.requests_total(),
        total_bytes_served: state.metrics.bytes_served(),
        requests_per_second: state.metrics.requests_per_second(),
        engine,
        warnings,
    })
}

fn assess(engine: &EngineStatus, capture_connected: bool) -> (HealthStatus, Vec<String>) {
    let mut warnings = Vec::new();

    if !capture_connected {
        warnings.push("Capture link is down".to_string());
    }
    if engine.phase == Phase::Collecting {
        warnings.push(format!(
            "Collecting baseline ({}/{})",
            engine.baseline_len, engine.baseline_capacity
        ));
    }
    if let Some(report) = engine.last_drift_check.as_ref().filter(|r| r.is_drifted()) {
        warnings.push(format!(
            "Last drift check failed (|t| = {:.2} > {:.2})",
            report.t_statistic, report.critical_value
        ));
    }
    if let Some(age) = engine.data_freshness_seconds {
        if age > STALE_AFTER_SECS {
            warnings.push(format!("Oldest queued symbol is {} seconds old", age));
        }
    }

    let status = if engine.queued_symbols == 0 && !capture_connected {
        HealthStatus::Unhealthy
    } else if engine.phase == Phase::Collecting || !capture_connected {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    (status, warnings)
}

/// GET /api/boundaries - Boundary table of the current epoch
async fn get_boundaries(
    State(state): State<AppState>,
) -> Result<Json<BoundaryExport>, StatusCode> {
    state
        .engine
        .boundaries()
        .map(|(epoch, table)| Json(BoundaryExport::new(epoch, &table)))
        .ok_or(StatusCode::NOT_FOUND)
}

/// POST /api/recalibrate - Discard the current epoch
async fn recalibrate(State(state): State<AppState>) -> Json<EngineStatus> {
    state.engine.recalibrate();
    let status = state.engine.status();
    info!("Recalibration requested, now in epoch {}", status.epoch);
    Json(status)
}

/// GET /health - Simple health check
async fn health_check(State(state): State<AppState>) -> StatusCode {
    if state.engine.with(|e| e.queue().is_empty()) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// GET /metrics - Prometheus metrics
async fn get_metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    if !state.metrics_enabled {
        return Err(StatusCode::NOT_FOUND);
    }
    let engine = state.engine.status();
    Ok(state.metrics.prometheus_format(Some(&engine)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use decayrng_core::{Engine, EngineConfig};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    /// State whose engine has 4 two-bit symbols queued
    fn state_with_symbols() -> AppState {
        let mut engine = Engine::new(EngineConfig::new(16, 1_000)).unwrap();
        for _ in 0..16 {
            engine.observe(10.0).unwrap();
        }
        for x in [20.0, 1.0, 8.0, 4.0] {
            engine.observe(x).unwrap();
        }
        AppState {
            engine: SharedEngine::new(engine),
            metrics: Metrics::new(),
            max_request_size: 1024,
            metrics_enabled: true,
        }
    }

    fn empty_state() -> AppState {
        AppState {
            engine: SharedEngine::new(Engine::new(EngineConfig::new(16, 1_000)).unwrap()),
            metrics: Metrics::new(),
            max_request_size: 1024,
            metrics_enabled: false,
        }
    }

    async fn call(state: AppState, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router(state)
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_random_hex() {
        let state = state_with_symbols();
        let (status, body) = call(state.clone(), "GET", "/api/random?bytes=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"c9".to_vec());
        assert_eq!(state.metrics.bytes_served(), 1);

        // queue is drained now
        let (status, _) = call(state, "GET", "/api/random?bytes=1&encoding=binary").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_random_rejects_bad_sizes_and_encodings() {
        let state = state_with_symbols();
        for uri in [
            "/api/random?bytes=0",
            "/api/random?bytes=4096",
            "/api/random?bytes=1&encoding=rot13",
        ] {
            let (status, _) = call(state.clone(), "GET", uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        }
        // nothing was consumed by the refused requests
        assert_eq!(state.engine.status().queued_symbols, 4);
    }

    #[tokio::test]
    async fn test_random_is_all_or_nothing() {
        let state = state_with_symbols();
        let (status, _) = call(state.clone(), "GET", "/api/random?bytes=2").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.engine.status().queued_symbols, 4);
    }

    #[tokio::test]
    async fn test_symbols_json() {
        let state = state_with_symbols();
        let (status, body) = call(state, "GET", "/api/symbols?count=3").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["bucket_count"], 4);
        assert_eq!(json["symbol_bits"], 2);
        assert_eq!(json["symbols"], serde_json::json!([3, 0, 2]));
    }

    #[tokio::test]
    async fn test_boundaries_not_found_while_collecting() {
        let (status, _) = call(empty_state(), "GET", "/api/boundaries").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(state_with_symbols(), "GET", "/api/boundaries").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["bucket_count"], 4);
        assert_eq!(json["boundaries"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_recalibrate_resets_epoch() {
        let state = state_with_symbols();
        let (status, body) = call(state.clone(), "POST", "/api/recalibrate").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["phase"], "collecting");
        assert_eq!(json["epoch"], 1);
        // queued output survives a forced recalibration
        assert_eq!(json["queued_symbols"], 4);
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let (status, _) = call(empty_state(), "GET", "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let state = state_with_symbols();
        let (status, _) = call(state.clone(), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(state, "GET", "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        // symbols queued but no capture link in tests
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["engine"]["phase"], "classifying");
    }

    #[tokio::test]
    async fn test_metrics_toggle() {
        let (status, body) = call(state_with_symbols(), "GET", "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("decayrng_engine_epoch 0"));

        let (status, _) = call(empty_state(), "GET", "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
