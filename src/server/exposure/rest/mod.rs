//! HTTP endpoints beside the WebSocket gateway
//!
//! Only `/health` lives here: a liveness probe that also reports how many
//! users and connections are live and what the ingestor has seen.

use crate::ingest::IngestSnapshot;
use crate::server::host::NotifierHost;
use axum::extract::State;
use axum::{Json, Router, routing::get};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    users: usize,
    connections: usize,
    ingest: IngestSnapshot,
}

/// REST API exposure
pub struct RestExposure;

impl RestExposure {
    pub fn build_router(host: Arc<NotifierHost>) -> Router {
        Router::new()
            .route("/health", get(Self::health_check))
            .route("/healthz", get(Self::health_check))
            .with_state(host)
    }

    /// Reports `draining` once shutdown has begun
    async fn health_check(State(host): State<Arc<NotifierHost>>) -> Json<HealthResponse> {
        Json(HealthResponse {
            status: if host.gateway.is_accepting() {
                "ok"
            } else {
                "draining"
            },
            service: env!("CARGO_PKG_NAME"),
            users: host.registry.user_count(),
            connections: host.gateway.connection_count(),
            ingest: host.ingest_stats.snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotifierConfig;
    use crate::core::identity::UserIdentity;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn get_health(host: Arc<NotifierHost>) -> Value {
        let response = RestExposure::build_router(host)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_live_connections() {
        let host = Arc::new(NotifierHost::new(NotifierConfig::default(), None).unwrap());
        let user = UserIdentity::new("U1").unwrap();
        let (_a, _ra) = host.gateway.connect(user.clone());
        let (_b, _rb) = host.gateway.connect(user);

        let body = get_health(host).await;

        assert_eq!(body["status"], "ok");
        assert_eq!(body["users"], 1);
        assert_eq!(body["connections"], 2);
        assert_eq!(body["ingest"]["received"], 0);
    }

    #[tokio::test]
    async fn test_health_reports_draining() {
        let host = Arc::new(NotifierHost::new(NotifierConfig::default(), None).unwrap());
        host.gateway.shutdown(std::time::Duration::ZERO).await;

        let body = get_health(host).await;
        assert_eq!(body["status"], "draining");
    }
}
