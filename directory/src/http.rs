//! Axum wiring: one route per service operation (§6), CORS for the browser
//! dashboard, an optional bearer-token gate on the mutating routes, and
//! per-request timeouts — composed as `tower` layers around the router the
//! same way the teacher composes its relay control endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use meshnet_protocol::{
    ErrorResponse, HeartbeatRequest, PeersResponse, RegisterRequest, RegisterResponse,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::service::{DirectoryService, ServiceError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
struct AppState {
    service: DirectoryService,
}

pub fn router(service: DirectoryService, api_key: Option<String>) -> Router {
    let state = AppState { service };

    let mut mutating = Router::new()
        .route("/register", post(register))
        .route("/heartbeat", post(heartbeat));

    if let Some(key) = api_key {
        mutating = mutating.layer(middleware::from_fn_with_state(
            Arc::new(key),
            require_bearer_token,
        ));
    }

    let public = Router::new()
        .route("/peers", get(list_peers))
        .route("/metrics", get(metrics))
        .route("/health", get(health));

    Router::new()
        .merge(mutating)
        .merge(public)
        .with_state(state)
        .layer(cors_layer())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}

/// Gates `/register` and `/heartbeat` behind `Authorization: Bearer <key>`
/// when an API key is configured (§4.3, §9 Authentication).
async fn require_bearer_token(
    State(expected): State<Arc<String>>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected.as_str() => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("unauthorized", "missing or invalid bearer token")),
        )
            .into_response(),
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    match state.service.register(&request) {
        Ok(()) => Json(RegisterResponse {
            success: true,
            message: "registered".to_string(),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(serde::Deserialize)]
struct ListPeersQuery {
    exclude: Option<String>,
}

async fn list_peers(State(state): State<AppState>, Query(params): Query<ListPeersQuery>) -> Response {
    match state.service.list_active(params.exclude.as_deref()) {
        Ok(peers) => Json(PeersResponse {
            count: peers.len(),
            peers,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> Response {
    match state.service.heartbeat(&request.id) {
        Ok(()) => Json(RegisterResponse {
            success: true,
            message: "heartbeat recorded".to_string(),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.service.metrics() {
        Ok(metrics) => Json(metrics).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn health() -> &'static str {
    "OK"
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            ServiceError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            ServiceError::NotFound { .. } => (StatusCode::BAD_REQUEST, "not_found"),
            ServiceError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        };

        if let ServiceError::Storage(ref source) = self {
            tracing::error!(%source, "storage error handling request");
        }

        (status, Json(ErrorResponse::new(error, self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use meshnet_storage::Storage;
    use serde_json::{json, Value};
    use tower::ServiceExt as _;

    fn app() -> Router {
        let service = DirectoryService::new(
            Storage::open_in_memory().unwrap(),
            Duration::from_secs(300),
        );
        router(service, None)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn s1_registration_and_listing() {
        let app = app();

        let register = Request::post("/register")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "id": "A",
                    "wg_public_key": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=",
                    "endpoint_ip": "203.0.113.5",
                    "endpoint_port": 51820
                })
                .to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(register).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let peers = app
            .clone()
            .oneshot(Request::get("/peers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(peers).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["peers"][0]["id"], "A");

        let excluded = app
            .clone()
            .oneshot(Request::get("/peers?exclude=A").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(excluded).await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn s3_heartbeat_for_unknown_id_is_rejected() {
        let app = app();

        let response = app
            .oneshot(
                Request::post("/heartbeat")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"id": "ghost"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("not registered"));
    }

    #[tokio::test]
    async fn s4_bad_public_key_on_register_is_rejected() {
        let app = app();

        let response = app
            .oneshot(
                Request::post("/register")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({
                            "id": "A",
                            "wg_public_key": "not-base64",
                            "endpoint_ip": "203.0.113.5",
                            "endpoint_port": 51820
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn s6_metrics_reflect_registered_peers() {
        let app = app();

        for id in ["A", "B", "C"] {
            let response = app
                .clone()
                .oneshot(
                    Request::post("/register")
                        .header("content-type", "application/json")
                        .body(Body::from(
                            json!({
                                "id": id,
                                "wg_public_key": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=",
                                "endpoint_ip": "203.0.113.5",
                                "endpoint_port": 51820
                            })
                            .to_string(),
                        ))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert!(body["total_peers"].as_u64().unwrap() >= 3);
        assert_eq!(body["active_peers"], 3);
    }

    #[tokio::test]
    async fn wrong_method_on_registered_route_is_rejected() {
        let app = app();

        let response = app
            .oneshot(Request::get("/register").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
