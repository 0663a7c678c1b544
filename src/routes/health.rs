//! Health check endpoints for Kubernetes probes and monitoring.

use axum::{Json, extract::State, response::IntoResponse};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Detailed health status response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Overall status: "healthy" or "unhealthy"
    pub status: String,
    pub version: String,
    pub subsystems: SubsystemStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubsystemStatus {
    /// Whether IdP metadata can be loaded
    pub idp_metadata: ComponentStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Full health check.
///
/// Loads IdP metadata through the cache, so the first call after startup (or
/// after invalidation) performs the fetch.
#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let start = std::time::Instant::now();
    let result = state.metadata.get(&state.config.saml.idp_metadata).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    let idp_metadata = match &result {
        Ok(metadata) => ComponentStatus {
            healthy: true,
            message: Some(metadata.entity_id().to_string()),
            latency_ms: Some(latency_ms),
        },
        Err(e) => {
            tracing::warn!(kind = e.kind(), error = %e, "IdP metadata health check failed");
            ComponentStatus {
                healthy: false,
                message: Some("IdP metadata unavailable".to_string()),
                latency_ms: Some(latency_ms),
            }
        }
    };

    let healthy = idp_metadata.healthy;
    let health = HealthStatus {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        subsystems: SubsystemStatus { idp_metadata },
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}

/// Kubernetes liveness probe.
///
/// Returns 200 if the service is running.
#[tracing::instrument(name = "health.liveness")]
pub async fn liveness() -> impl IntoResponse {
    StatusCode::OK
}
