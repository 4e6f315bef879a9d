// src/api.rs - HTTP surface for operators and UIs

use crate::actuator::Power;
use crate::alerts::{Alert, AlertId, ResolveOutcome};
use crate::dashboard::DashboardSummary;
use crate::engine::{ContainerStatus, Engine, EngineStats, IngestOutcome};
use crate::error::{MonitorError, Result};
use crate::reading::Reading;
use crate::recall::{Recall, RecallRecommendation, RecallRequest};
use crate::sample::{Sample, SampleId, SampleUpdate};
use crate::verification::Verification;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

pub type SharedEngine = Arc<Engine>;

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        let status = if self.is_conflict() {
            StatusCode::CONFLICT
        } else if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else if self.is_configuration() {
            StatusCode::UNPROCESSABLE_ENTITY
        } else if matches!(self, MonitorError::InvalidReading(_)) {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[derive(Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    stats: EngineStats,
}

#[derive(Deserialize)]
pub struct ReadingRequest {
    temperature: f64,
    humidity: f64,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct IngestResponse {
    state: crate::container::ConditionState,
    transitioned: bool,
    alerts_opened: Vec<Alert>,
    alerts_resolved: Vec<Alert>,
    cooling: Option<Power>,
}

#[derive(Deserialize)]
pub struct CoolingRequest {
    power: Power,
    #[serde(default = "default_operator")]
    operator: String,
}

#[derive(Serialize)]
pub struct CoolingResponse {
    power: Power,
    manual_alert: Option<Alert>,
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    #[serde(default = "default_operator")]
    operator: String,
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    code: Option<String>,
}

fn default_operator() -> String { "operator".to_string() }

pub fn router(engine: SharedEngine) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/containers", get(list_containers))
        .route("/containers/:id", delete(deactivate_container))
        .route("/containers/:id/readings", post(push_reading))
        .route("/containers/:id/cooling", post(set_cooling))
        .route("/alerts", get(list_alerts))
        .route("/alerts/:id/resolve", post(resolve_alert))
        .route("/recalls", get(list_recalls).post(create_recall))
        .route("/recommendations", get(list_recommendations))
        .route("/dashboard", get(dashboard))
        .route("/samples", get(list_samples))
        .route("/samples/:id", patch(update_sample))
        .route("/samples/:id/verify", post(verify_sample))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

/// Serve the API until `shutdown` is cancelled.
pub async fn serve(engine: SharedEngine, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP API listening on {}", addr);
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn health(State(engine): State<SharedEngine>) -> Json<HealthResponse> {
    let stats = engine.stats();
    let status = if stats.running { "healthy" } else { "idle" };
    Json(HealthResponse { status, version: crate::VERSION, stats })
}

async fn list_containers(State(engine): State<SharedEngine>) -> Json<Vec<ContainerStatus>> {
    Json(engine.containers())
}

async fn deactivate_container(
    Path(id): Path<String>,
    State(engine): State<SharedEngine>,
) -> std::result::Result<StatusCode, MonitorError> {
    engine.deactivate_container(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn push_reading(
    Path(id): Path<String>,
    State(engine): State<SharedEngine>,
    Json(req): Json<ReadingRequest>,
) -> std::result::Result<Json<IngestResponse>, MonitorError> {
    let reading = Reading::new(req.temperature, req.humidity, req.timestamp.unwrap_or_else(Utc::now));
    let IngestOutcome { transition, alerts, cooling } = engine.ingest(&id, reading)?;
    let state = engine.container(&id)?.condition();

    let mut opened = alerts.opened;
    opened.extend(alerts.escalated);
    Ok(Json(IngestResponse {
        state,
        transitioned: transition.is_some(),
        alerts_opened: opened,
        alerts_resolved: alerts.resolved,
        cooling,
    }))
}

async fn set_cooling(
    Path(id): Path<String>,
    State(engine): State<SharedEngine>,
    Json(req): Json<CoolingRequest>,
) -> std::result::Result<Json<CoolingResponse>, MonitorError> {
    let manual_alert = engine.set_cooling(&id, req.power, &req.operator)?;
    Ok(Json(CoolingResponse { power: req.power, manual_alert }))
}

async fn list_alerts(State(engine): State<SharedEngine>) -> Json<Vec<Alert>> {
    Json(engine.open_alerts())
}

async fn resolve_alert(
    Path(id): Path<AlertId>,
    State(engine): State<SharedEngine>,
    Json(req): Json<ResolveRequest>,
) -> std::result::Result<Json<ResolveOutcome>, MonitorError> {
    Ok(Json(engine.resolve_alert(&id, &req.operator)?))
}

async fn list_recalls(State(engine): State<SharedEngine>) -> Json<Vec<Recall>> {
    Json(engine.open_recalls())
}

async fn create_recall(
    State(engine): State<SharedEngine>,
    Json(req): Json<RecallRequest>,
) -> std::result::Result<(StatusCode, Json<Recall>), MonitorError> {
    let recall = engine.create_recall(req)?;
    Ok((StatusCode::CREATED, Json(recall)))
}

async fn list_recommendations(State(engine): State<SharedEngine>) -> Json<Vec<RecallRecommendation>> {
    Json(engine.recommendations())
}

async fn dashboard(State(engine): State<SharedEngine>) -> Json<DashboardSummary> {
    Json(engine.dashboard())
}

async fn list_samples(State(engine): State<SharedEngine>) -> Json<Vec<Sample>> {
    Json(engine.samples())
}

async fn verify_sample(
    Path(id): Path<SampleId>,
    State(engine): State<SharedEngine>,
    Json(req): Json<VerifyRequest>,
) -> std::result::Result<Json<Verification>, MonitorError> {
    Ok(Json(engine.verify_sample(id, req.code.as_deref())?))
}

async fn update_sample(
    Path(id): Path<SampleId>,
    State(engine): State<SharedEngine>,
    Json(update): Json<SampleUpdate>,
) -> std::result::Result<Json<Sample>, MonitorError> {
    Ok(Json(engine.update_sample(id, update)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::container::Container;
    use crate::reading::SafeEnvelope;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (SharedEngine, Router) {
        let engine = Engine::new(&Config::default()).unwrap();
        let env = SafeEnvelope::new(20.0, 26.0, 40.0, 70.0).unwrap();
        engine.register_container(Container::new("BOX-001", Some(env))).unwrap();
        let engine = Arc::new(engine);
        (engine.clone(), router(engine))
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_push_reading_and_list_alerts() {
        let (_, app) = app();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/containers/BOX-001/readings",
                serde_json::json!({"temperature": 29.0, "humidity": 50.0}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["state"], "warning");
        assert_eq!(body["alerts_opened"].as_array().unwrap().len(), 1);

        let response = app
            .oneshot(Request::builder().uri("/alerts").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let alerts = body_json(response).await;
        assert_eq!(alerts[0]["kind"], "high_temperature");
    }

    #[tokio::test]
    async fn test_conflict_maps_to_409() {
        let (engine, app) = app();
        let sample = engine.register_sample("B-2024-002", "Ashwagandha", "BOX-001", "HUB-001");

        let response = app
            .oneshot(json_request(
                "PATCH",
                &format!("/samples/{}", sample.id),
                serde_json::json!({"test_result": "Pass"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Conflict: test result requires source verification");
    }

    #[tokio::test]
    async fn test_unknown_container_is_404() {
        let (_, app) = app();
        let response = app
            .oneshot(json_request(
                "POST",
                "/containers/BOX-404/readings",
                serde_json::json!({"temperature": 22.0, "humidity": 50.0}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_recall_and_dashboard() {
        let (_, app) = app();
        let response = app
            .clone()
            .oneshot(json_request("POST", "/recalls", serde_json::json!({"batch_id": "B-2024-001"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(Request::builder().uri("/dashboard").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let summary = body_json(response).await;
        assert_eq!(summary["open_recalls"], 1);
        assert!(summary["banner"].is_null());
    }
}
