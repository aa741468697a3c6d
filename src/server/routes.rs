use std::sync::Arc;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    engine::AskEngine,
    error::{EngineError, ErrorKind},
    types::{AskRequest, ErrorResponse},
};

/// Engine error carried to the wire as `{ "error": ... }`
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        Self(error)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Client => StatusCode::BAD_REQUEST,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Cross-origin callers may POST from anywhere
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

pub fn create_router(engine: Arc<AskEngine>) -> Router {
    let route_path = engine.config().server.route_path.clone();

    Router::new()
        .route(&route_path, post(ask))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(engine)
}

async fn ask(
    State(engine): State<Arc<AskEngine>>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|rejection| EngineError::validation(rejection.body_text()))?;
    let response = engine.ask(request).await?;
    Ok((StatusCode::OK, Json(response)).into_response())
}

async fn health(State(engine): State<Arc<AskEngine>>) -> Response {
    let report = engine.health();
    let status = if engine.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn metrics(State(engine): State<Arc<AskEngine>>) -> Response {
    Json(engine.metrics().await).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::EngineConfig;
    use crate::error::Result;
    use crate::model::{test_support::CountingLoader, ChatTemplate, GenerationEngine};
    use crate::types::EngineOutput;

    struct FourEngine;

    #[async_trait::async_trait]
    impl GenerationEngine for FourEngine {
        async fn generate(&self, _prompt: &[u32], _max_new_tokens: usize) -> Result<EngineOutput> {
            Ok(EngineOutput::Tokens(vec![3]))
        }
    }

    struct BrokenEngine;

    #[async_trait::async_trait]
    impl GenerationEngine for BrokenEngine {
        async fn generate(&self, _prompt: &[u32], _max_new_tokens: usize) -> Result<EngineOutput> {
            Err(EngineError::Inference {
                message: "Model forward pass failed".to_string(),
                source: None,
            })
        }
    }

    fn engine_with(engine: Arc<dyn GenerationEngine>) -> Arc<AskEngine> {
        let loader = CountingLoader::new(engine, &[("hello", 1), ("4", 3)]);
        let mut config = EngineConfig::default();
        config.generation.chat_template = ChatTemplate::Plain;

        Arc::new(
            AskEngine::builder()
                .with_config(config)
                .with_loader(Arc::new(loader))
                .build()
                .unwrap(),
        )
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/qwen/ask")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_ask_success() {
        let engine = engine_with(Arc::new(FourEngine));
        engine.initialize().await.unwrap();

        let (status, body) = send(create_router(engine), post_json(r#"{"message": "What is 2+2?"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "4" }));
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let engine = engine_with(Arc::new(FourEngine));
        engine.initialize().await.unwrap();

        for payload in [r#"{}"#, r#"{"message": ""}"#, r#"{"message": "   "}"#, r#"{"message": 5}"#, "not json"] {
            let (status, body) = send(create_router(engine.clone()), post_json(payload)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "payload {payload}");
            assert!(body["error"].is_string());
        }

        // Missing or non-JSON content type is a bad request too, not 415
        for content_type in [None, Some("text/plain")] {
            let mut request = Request::builder().method(Method::POST).uri("/qwen/ask");
            if let Some(content_type) = content_type {
                request = request.header(header::CONTENT_TYPE, content_type);
            }
            let request = request.body(Body::from(r#"{"message": "hello"}"#)).unwrap();

            let (status, body) = send(create_router(engine.clone()), request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "content type {content_type:?}");
            assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"));
        }
    }

    #[tokio::test]
    async fn test_not_ready_is_unavailable() {
        let engine = engine_with(Arc::new(FourEngine));

        let (status, body) = send(create_router(engine.clone()), post_json(r#"{"message": "hello"}"#)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, json!({ "error": "Model is not ready (uninitialized)" }));

        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(create_router(engine), request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "uninitialized");
    }

    #[tokio::test]
    async fn test_engine_failure_is_internal_error() {
        let engine = engine_with(Arc::new(BrokenEngine));
        engine.initialize().await.unwrap();

        let (status, body) = send(create_router(engine), post_json(r#"{"message": "hello"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "Inference failed: Model forward pass failed" }));
    }

    #[tokio::test]
    async fn test_health_and_metrics_when_ready() {
        let engine = engine_with(Arc::new(FourEngine));
        engine.initialize().await.unwrap();

        send(create_router(engine.clone()), post_json(r#"{"message": "hello"}"#)).await;

        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(create_router(engine.clone()), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["queue"]["completed"], 1);

        let request = Request::get("/metrics").body(Body::empty()).unwrap();
        let (status, body) = send(create_router(engine), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["succeeded"], 1);
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let engine = engine_with(Arc::new(FourEngine));
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/qwen/ask")
            .header(header::ORIGIN, "https://example.com")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let response = create_router(engine).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let methods = headers[header::ACCESS_CONTROL_ALLOW_METHODS].to_str().unwrap();
        assert!(methods.contains("POST"));
        assert!(!methods.contains("GET"));
    }
}
