//! HTTP control surface over the session registry.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::TradeError;
use crate::trading::registry::SessionRegistry;
use crate::trading::types::{SessionStatus, TradeRecord};

impl IntoResponse for TradeError {
    fn into_response(self) -> Response {
        let status = match &self {
            TradeError::Config(_) | TradeError::Credential(_) => StatusCode::BAD_REQUEST,
            TradeError::Connection(_) | TradeError::Protocol(_) => StatusCode::BAD_GATEWAY,
            TradeError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions/:user_id", get(session_status))
        .route("/sessions/:user_id/start", post(start_session))
        .route("/sessions/:user_id/stop", post(stop_session))
        .route("/sessions/:user_id/trades", get(session_trades))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

pub async fn serve_admin(
    registry: Arc<SessionRegistry>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "🛠️ Control surface listening");
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health(State(registry): State<Arc<SessionRegistry>>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "liveSessions": registry.live_sessions() }))
}

async fn start_session(
    State(registry): State<Arc<SessionRegistry>>,
    Path(user_id): Path<String>,
) -> Result<Json<SessionStatus>, TradeError> {
    registry.start(&user_id).await?;
    Ok(Json(registry.status(&user_id).await))
}

async fn stop_session(
    State(registry): State<Arc<SessionRegistry>>,
    Path(user_id): Path<String>,
) -> Json<SessionStatus> {
    registry.stop(&user_id).await;
    Json(registry.status(&user_id).await)
}

async fn session_status(
    State(registry): State<Arc<SessionRegistry>>,
    Path(user_id): Path<String>,
) -> Json<SessionStatus> {
    Json(registry.status(&user_id).await)
}

async fn session_trades(
    State(registry): State<Arc<SessionRegistry>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<TradeRecord>>, TradeError> {
    Ok(Json(registry.trades(&user_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::store::MemoryStore;
    use crate::trading::connection::SessionDeps;
    use crate::trading::testing::FakeVenue;
    use crate::trading::types::{AccountType, TradingSettings};
    use crate::trading::venue::VenueEndpoint;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    type Endpoints = tokio::sync::mpsc::UnboundedReceiver<VenueEndpoint>;

    fn app() -> (Router, Arc<MemoryStore>, Endpoints) {
        let store = Arc::new(MemoryStore::new());
        let (venue, endpoints) = FakeVenue::new();
        let registry = Arc::new(SessionRegistry::new(SessionDeps::new(
            venue.clone(),
            store.clone(),
            EngineConfig::default(),
        )));
        (router(registry), store, endpoints)
    }

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let req = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn start_without_settings_is_bad_request() {
        let (app, _store, _eps) = app();
        let (status, body) = call(&app, "POST", "/sessions/u1/start").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Trading settings not configured"));
    }

    #[tokio::test]
    async fn start_status_stop_roundtrip() {
        let (app, store, _eps) = app();
        store.put_settings("u1", TradingSettings::default());
        store.put_credential("u1", AccountType::Demo, "tok");

        let (status, body) = call(&app, "POST", "/sessions/u1/start").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isActive"], true);
        assert_eq!(body["status"], "RUNNING");
        assert_eq!(body["market"], "R_10");

        let (_, health) = call(&app, "GET", "/health").await;
        assert_eq!(health["liveSessions"], 1);

        let (status, body) = call(&app, "POST", "/sessions/u1/stop").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isActive"], false);
        assert_eq!(body["lastSignal"], "Trading stopped");

        let (_, again) = call(&app, "POST", "/sessions/u1/stop").await;
        assert_eq!(again, body);
    }

    #[tokio::test]
    async fn unknown_user_reports_defaults() {
        let (app, _store, _eps) = app();
        let (status, body) = call(&app, "GET", "/sessions/nobody").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "STOPPED");
        assert_eq!(body["lastSignal"], "Not started");
        assert_eq!(body["currentStake"], 1.0);

        let (status, trades) = call(&app, "GET", "/sessions/nobody/trades").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(trades, serde_json::json!([]));
    }
}
