//! # HTTP API for the Registry Service
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /hooks/pre-provision` - Pre-provisioning hook, answers
//!   `{"allowProvisioning": bool}`
//! - `POST /cleanup` - Lifecycle cleanup pass, previews unless
//!   `{"dry_run": false}` is sent

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use shared::constants::PRE_PROVISION_HOOK_PATH;
use shared::types::{CleanupReport, PreProvisioningHookRequest, PreProvisioningHookResponse};

use crate::registry::RegistryError;
use crate::AppState;

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(PRE_PROVISION_HOOK_PATH, post(pre_provision))
        .route("/cleanup", post(run_cleanup))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// HANDLERS
// =============================================================================

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": shared::VERSION,
        "thing_type": state.config.thing_type,
    }))
}

/// Pre-provisioning hook
///
/// Always answers 200 with a decision; cleanup failures are logged by the
/// guard and do not change the status code.
async fn pre_provision(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PreProvisioningHookRequest>,
) -> Json<PreProvisioningHookResponse> {
    let decision = state.guard.handle(&request).await;

    info!(
        thing_name = ?decision.thing_name,
        allow = decision.allow,
        cleaned_existing = decision.cleaned_existing,
        failures = decision.failures.len(),
        "Pre-provisioning decision"
    );

    Json(decision.response())
}

#[derive(Debug, Deserialize)]
struct CleanupRequest {
    #[serde(default = "default_dry_run")]
    dry_run: bool,
}

fn default_dry_run() -> bool {
    true
}

/// Run one cleanup pass
async fn run_cleanup(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CleanupRequest>,
) -> Result<Json<CleanupReport>, ApiError> {
    info!(dry_run = request.dry_run, "Cleanup requested");
    let report = state.cleaner.run(request.dry_run).await?;
    Ok(Json(report))
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => ApiError::NotFound(err.to_string()),
            RegistryError::Transport(_) => ApiError::Unavailable(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unavailable(msg) => {
                error!(error = %msg, "Registry unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            ApiError::Internal(msg) => {
                error!(error = %msg, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use shared::config::RegistryServiceConfig;
    use shared::constants::THING_TYPE;
    use shared::types::CertificateStatus;
    use tower::ServiceExt;

    fn app(registry: &Arc<MemoryRegistry>) -> Router {
        let state = AppState::new(RegistryServiceConfig::default(), registry.clone());
        create_router(Arc::new(state))
    }

    async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
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
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let registry = Arc::new(MemoryRegistry::new());
        let response = app(&registry)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_hook_cleans_existing_thing() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.create_thing("edge-ai-ABC123", Some(THING_TYPE)).unwrap();
        let cert = registry.insert_certificate("cert-old", CertificateStatus::Active);
        registry.attach_thing_principal("edge-ai-ABC123", &cert.arn).unwrap();

        let body = r#"{
            "claimCertificateId": "claim-1",
            "certificateId": "cert-new",
            "templateArn": "arn:aws:iot:eu-west-1:123456789012:provisioningtemplate/edge-fleet",
            "parameters": {"ThingName": "edge-ai-ABC123", "SerialNumber": "ABC123"}
        }"#;
        let (status, json) = post_json(app(&registry), PRE_PROVISION_HOOK_PATH, body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["allowProvisioning"], true);
        assert!(!registry.thing_exists("edge-ai-ABC123"));
        assert!(registry.certificate("cert-old").is_none());
    }

    #[tokio::test]
    async fn test_hook_denies_without_thing_name() {
        let registry = Arc::new(MemoryRegistry::new());
        let (status, json) =
            post_json(app(&registry), PRE_PROVISION_HOOK_PATH, r#"{"parameters": {}}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["allowProvisioning"], false);
    }

    #[tokio::test]
    async fn test_cleanup_defaults_to_preview() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.create_thing("edge-ai-ORPHAN", Some(THING_TYPE)).unwrap();
        registry.clear_mutations();

        let (status, json) = post_json(app(&registry), "/cleanup", "{}").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["dry_run"], true);
        assert_eq!(json["orphaned_things"][0], "edge-ai-ORPHAN");
        assert!(registry.mutations().is_empty());

        let (_, json) = post_json(app(&registry), "/cleanup", r#"{"dry_run": false}"#).await;
        assert_eq!(json["deleted_things"][0], "edge-ai-ORPHAN");
        assert!(!registry.thing_exists("edge-ai-ORPHAN"));
    }

    #[tokio::test]
    async fn test_cleanup_registry_unavailable() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.set_unavailable(true);
        let (status, _) = post_json(app(&registry), "/cleanup", "{}").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
