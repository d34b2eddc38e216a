//! HTTP endpoints for the fleetguard coordinator

use crate::error::FleetError;
use crate::orchestrator::AutoscaleCoordinator;
use crate::types::{current_timestamp, HeartbeatRequest};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

/// HTTP server for coordinator endpoints
pub struct HttpServer {
    coordinator: Arc<AutoscaleCoordinator>,
}

impl HttpServer {
    /// Create new HTTP server
    pub fn new(coordinator: Arc<AutoscaleCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Create router with all endpoints
    pub fn create_router(&self) -> Router {
        Router::new()
            .route("/heartbeat", post(Self::heartbeat))
            .route("/fleet/primary", get(Self::fleet_primary))
            .route("/fleet/records", get(Self::fleet_records))
            .route("/health", get(Self::health_check))
            .route("/health/live", get(Self::health_live))
            .route("/health/ready", get(Self::health_ready))
            .with_state(Arc::new(self.clone()))
    }

    /// Heartbeat ingestion endpoint
    async fn heartbeat(
        State(server): State<Arc<Self>>,
        Json(request): Json<HeartbeatRequest>,
    ) -> impl IntoResponse {
        match server.coordinator.handle_heartbeat_sync(request).await {
            Ok(response) => (StatusCode::OK, Json(json!(response))),
            Err(FleetError::UnknownVm(vm_id)) => {
                let response = json!({
                    "error": format!("unknown VM: {}", vm_id),
                    "timestamp": chrono::Utc::now().to_rfc3339()
                });
                (StatusCode::NOT_FOUND, Json(response))
            }
            Err(e) => {
                error!("Heartbeat processing failed: {}", e);
                let response = json!({
                    "error": e.to_string(),
                    "timestamp": chrono::Utc::now().to_rfc3339()
                });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(response))
            }
        }
    }

    /// Current primary endpoint
    async fn fleet_primary(State(server): State<Arc<Self>>) -> impl IntoResponse {
        let platform = server.coordinator.platform();
        let record = match platform.get_primary_record().await {
            Ok(record) => record,
            Err(e) => {
                error!("Primary record read failed: {}", e);
                let response = json!({
                    "error": e.to_string(),
                    "timestamp": chrono::Utc::now().to_rfc3339()
                });
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(response));
            }
        };

        match record {
            Some(record) => {
                let vote_state = record.effective_vote_state(current_timestamp());
                let response = json!({
                    "primary": record,
                    "vote_state": vote_state,
                    "timestamp": chrono::Utc::now().to_rfc3339()
                });
                (StatusCode::OK, Json(response))
            }
            None => {
                let response = json!({
                    "primary": null,
                    "timestamp": chrono::Utc::now().to_rfc3339()
                });
                (StatusCode::OK, Json(response))
            }
        }
    }

    /// Health-check record listing endpoint
    async fn fleet_records(State(server): State<Arc<Self>>) -> impl IntoResponse {
        let platform = server.coordinator.platform();
        match platform.list_health_check_records().await {
            Ok(records) => {
                let total = records.len();
                let response = json!({
                    "records": records,
                    "total_records": total,
                    "timestamp": chrono::Utc::now().to_rfc3339()
                });
                (StatusCode::OK, Json(response))
            }
            Err(e) => {
                error!("Health-check record listing failed: {}", e);
                let response = json!({
                    "error": e.to_string(),
                    "timestamp": chrono::Utc::now().to_rfc3339()
                });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(response))
            }
        }
    }

    /// Health check endpoint
    async fn health_check(State(server): State<Arc<Self>>) -> impl IntoResponse {
        // Healthy when the record store answers
        match server.coordinator.platform().get_settings().await {
            Ok(_) => {
                let response = json!({
                    "status": "healthy",
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                    "service": "fleetguard"
                });
                (StatusCode::OK, Json(response))
            }
            Err(e) => {
                error!("Health check failed: {}", e);
                let response = json!({
                    "status": "unhealthy",
                    "error": e.to_string(),
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                    "service": "fleetguard"
                });
                (StatusCode::SERVICE_UNAVAILABLE, Json(response))
            }
        }
    }

    /// Liveness probe endpoint
    async fn health_live(State(_server): State<Arc<Self>>) -> impl IntoResponse {
        let response = json!({
            "status": "alive",
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        (StatusCode::OK, Json(response))
    }

    /// Readiness probe endpoint
    async fn health_ready(State(server): State<Arc<Self>>) -> impl IntoResponse {
        let is_ready = server.coordinator.platform().get_settings().await.is_ok();
        let status_code = if is_ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };

        let response = json!({
            "status": if is_ready { "ready" } else { "not_ready" },
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        (status_code, Json(response))
    }
}

impl Clone for HttpServer {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}
