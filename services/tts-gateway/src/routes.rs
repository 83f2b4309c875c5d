//! HTTP routes
//!
//! Thin glue over the orchestrator: parse and validate the request, hand it
//! to `Orchestrator::execute`, and turn the outcome into a response.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, MatchedPath, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use key_pool::Orchestrator;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::LimitsConfig;
use crate::error::ApiError;
use crate::validation::{TtsRequest, validate};

/// Languages the upstream model speaks.
const LANGUAGES: &[(&str, &str)] = &[
    ("en-us", "English (US)"),
    ("fr-fr", "French"),
    ("de", "German"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("cmn", "Mandarin Chinese"),
];

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub limits: Arc<LimitsConfig>,
    pub body_limit_bytes: usize,
    pub prometheus: PrometheusHandle,
}

/// Build the router with all routes, the body limit, and the concurrency cap.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    let body_limit = state.body_limit_bytes;
    Router::new()
        .route("/api/tts/synthesize", post(synthesize_handler))
        .route("/api/tts/languages", get(languages_handler))
        .route("/api/tts/api-status", get(api_status_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn(track_metrics))
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Count and time every request that matched a route.
async fn track_metrics(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    crate::metrics::record_request(
        &route,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

/// Header echoing the request id on every synthesis response, failed or not.
const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

async fn synthesize_handler(
    State(state): State<AppState>,
    payload: Result<Json<TtsRequest>, JsonRejection>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let header_value = HeaderValue::from_str(&request_id);

    let mut response = match synthesize(&state, payload, request_id).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };
    if let Ok(value) = header_value {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[instrument(skip_all, fields(request_id = %request_id))]
async fn synthesize(
    state: &AppState,
    payload: Result<Json<TtsRequest>, JsonRejection>,
    request_id: String,
) -> Result<Response, ApiError> {
    let Json(payload) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "rejected request body");
        body_rejection(&rejection, state.body_limit_bytes)
    })?;

    let request = validate(payload, &state.limits).map_err(ApiError::BadRequest)?;
    let mime_type = request
        .mime_type
        .clone()
        .unwrap_or_else(|| state.limits.default_mime_type.clone());
    info!(
        text_len = request.text.chars().count(),
        language = request.language_iso_code.as_deref().unwrap_or_default(),
        "synthesis requested"
    );

    let audio = state.orchestrator.execute(request).await?;
    info!(bytes = audio.len(), "synthesis complete");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime_type),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"speech.mp3\"".to_string(),
            ),
        ],
        audio,
    )
        .into_response())
}

/// Map a JSON extractor rejection to the response the client sees.
fn body_rejection(rejection: &JsonRejection, body_limit_bytes: usize) -> ApiError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(format!(
            "File size too large. Maximum size is {}MB.",
            body_limit_bytes / (1024 * 1024)
        ))
    } else {
        ApiError::BadRequest("Invalid JSON format. Please check your request body.".to_string())
    }
}

#[derive(Serialize)]
struct Language {
    code: &'static str,
    name: &'static str,
}

async fn languages_handler() -> impl IntoResponse {
    let languages: Vec<Language> = LANGUAGES
        .iter()
        .map(|&(code, name)| Language { code, name })
        .collect();
    Json(serde_json::json!({ "success": true, "languages": languages }))
}

/// Per-key usage and availability, with keys shown only as previews.
async fn api_status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.orchestrator.pool().status().await;
    Json(serde_json::json!({ "success": true, "data": status }))
}

/// Liveness plus pool counts. Always 200 while the process serves requests;
/// pool state is reported in the body.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pool = state.orchestrator.pool().health().await;
    Json(serde_json::json!({ "status": "ok", "pool": pool }))
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn not_found_handler() -> ApiError {
    ApiError::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use bytes::Bytes;
    use key_pool::{KeyPool, PoolConfig, RetryPolicy};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use synthesis::{SynthesisFailure, SynthesisRequest, SynthesisResult, Synthesizer};
    use tower::ServiceExt;

    /// Returns queued outcomes in order, then audio once the queue is empty.
    /// Records each key and request it was called with.
    struct FakeSynthesizer {
        outcomes: Mutex<Vec<SynthesisResult>>,
        calls: Mutex<Vec<(String, SynthesisRequest)>>,
    }

    impl FakeSynthesizer {
        fn new(outcomes: Vec<SynthesisResult>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into_iter().rev().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, SynthesisRequest)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Synthesizer for FakeSynthesizer {
        fn id(&self) -> &str {
            "fake"
        }

        fn synthesize<'a>(
            &'a self,
            api_key: &'a str,
            request: &'a SynthesisRequest,
        ) -> Pin<Box<dyn Future<Output = SynthesisResult> + Send + 'a>> {
            Box::pin(async move {
                self.calls
                    .lock()
                    .unwrap()
                    .push((api_key.to_string(), request.clone()));
                self.outcomes
                    .lock()
                    .unwrap()
                    .pop()
                    .unwrap_or_else(|| Ok(Bytes::from_static(b"ID3-audio")))
            })
        }
    }

    fn test_prometheus_handle() -> PrometheusHandle {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle()
    }

    fn test_state(keys: &[&str], synthesizer: Arc<FakeSynthesizer>) -> AppState {
        let pool = KeyPool::new(
            keys.iter().map(|k| k.to_string()).collect(),
            PoolConfig::default(),
        )
        .unwrap();
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
        };
        AppState {
            orchestrator: Arc::new(Orchestrator::new(Arc::new(pool), synthesizer, policy)),
            limits: Arc::new(LimitsConfig::default()),
            body_limit_bytes: 15 * 1024 * 1024,
            prometheus: test_prometheus_handle(),
        }
    }

    fn synthesize_request(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .uri("/api/tts/synthesize")
            .method("POST")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn synthesize_returns_audio_with_headers() {
        let fake = FakeSynthesizer::new(vec![]);
        let app = build_router(test_state(&["key-aaaa"], fake.clone()), 1000);

        let response = app
            .oneshot(synthesize_request(r#"{"text":"hello world"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mp3");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"speech.mp3\""
        );
        let request_id = response.headers()["x-request-id"].to_str().unwrap();
        assert!(request_id.starts_with("req_"), "got: {request_id}");
        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        assert_eq!(&body[..], b"ID3-audio");

        let calls = fake.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "key-aaaa");
        assert_eq!(calls[0].1.language_iso_code.as_deref(), Some("en-us"));
        assert_eq!(calls[0].1.speaking_rate, Some(15.0));
    }

    #[tokio::test]
    async fn synthesize_uses_requested_mime_type() {
        let fake = FakeSynthesizer::new(vec![]);
        let app = build_router(test_state(&["key-aaaa"], fake), 1000);

        let response = app
            .oneshot(synthesize_request(
                r#"{"text":"hi","mime_type":"audio/wav"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");
    }

    #[tokio::test]
    async fn synthesize_rotates_past_rate_limited_key() {
        let fake = FakeSynthesizer::new(vec![Err(SynthesisFailure::http(429, "slow down"))]);
        let app = build_router(test_state(&["key-aaaa", "key-bbbb"], fake.clone()), 1000);

        let response = app
            .oneshot(synthesize_request(r#"{"text":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let keys: Vec<String> = fake.calls().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["key-aaaa", "key-bbbb"]);
    }

    #[tokio::test]
    async fn validation_failure_is_400_and_skips_upstream() {
        let fake = FakeSynthesizer::new(vec![]);
        let app = build_router(test_state(&["key-aaaa"], fake.clone()), 1000);

        let response = app
            .oneshot(synthesize_request(r#"{"text":"hi","speaking_rate":99}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Speaking rate must be between 5 and 35");
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_requests_carry_request_id() {
        let fake = FakeSynthesizer::new(vec![Err(SynthesisFailure::http(
            401,
            "Invalid API key",
        ))]);
        let app = build_router(test_state(&["key-aaaa"], fake), 1000);

        for body in [r#"{"text":""}"#, r#"{"text": "#, r#"{"text":"hi"}"#] {
            let response = app
                .clone()
                .oneshot(synthesize_request(body))
                .await
                .unwrap();
            assert!(!response.status().is_success(), "body {body}");
            let request_id = response
                .headers()
                .get("x-request-id")
                .unwrap_or_else(|| panic!("missing x-request-id for {body}"))
                .to_str()
                .unwrap();
            assert!(request_id.starts_with("req_"), "got: {request_id}");
        }
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let fake = FakeSynthesizer::new(vec![]);
        let app = build_router(test_state(&["key-aaaa"], fake), 1000);

        let response = app
            .oneshot(synthesize_request(r#"{"text": "#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(
            json["message"],
            "Invalid JSON format. Please check your request body."
        );
    }

    #[tokio::test]
    async fn oversized_body_is_413() {
        let fake = FakeSynthesizer::new(vec![]);
        let mut state = test_state(&["key-aaaa"], fake.clone());
        state.body_limit_bytes = 1024 * 1024;
        let app = build_router(state, 1000);

        let text = "a".repeat(1024 * 1024 + 1);
        let body = serde_json::json!({ "text": text }).to_string();
        let response = app.oneshot(synthesize_request(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let json = json_body(response).await;
        assert_eq!(json["message"], "File size too large. Maximum size is 1MB.");
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn fatal_upstream_failure_is_500_with_cause() {
        let fake = FakeSynthesizer::new(vec![Err(SynthesisFailure::http(
            401,
            "Invalid API key",
        ))]);
        let app = build_router(test_state(&["key-aaaa"], fake.clone()), 1000);

        let response = app
            .oneshot(synthesize_request(r#"{"text":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_body(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["cause"], "fatal");
        assert_eq!(
            json["message"],
            "failed to synthesize speech: Invalid API key (status: 401)"
        );
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_pool_is_503() {
        let fake = FakeSynthesizer::new(vec![]);
        let state = test_state(&["key-aaaa"], fake.clone());
        let pool = state.orchestrator.pool().clone();
        for _ in 0..3 {
            pool.record_error("key-aaaa").await;
        }
        let app = build_router(state, 1000);

        let response = app
            .oneshot(synthesize_request(r#"{"text":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = json_body(response).await;
        assert_eq!(json["cause"], "no_key_available");
        assert!(fake.calls().is_empty());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn languages_lists_six_entries() {
        let app = build_router(test_state(&["key-aaaa"], FakeSynthesizer::new(vec![])), 1000);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/tts/languages")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["success"], true);
        let languages = json["languages"].as_array().unwrap();
        assert_eq!(languages.len(), 6);
        assert_eq!(languages[0]["code"], "en-us");
        assert_eq!(languages[5]["name"], "Mandarin Chinese");
    }

    #[tokio::test]
    async fn api_status_shows_previews_only() {
        let fake = FakeSynthesizer::new(vec![]);
        let state = test_state(&["secret-key-1234", "secret-key-5678"], fake);
        state
            .orchestrator
            .pool()
            .record_success("secret-key-1234")
            .await;
        let app = build_router(state, 1000);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/tts/api-status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("secret-key"), "full key leaked: {text}");

        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        let data = json["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["keyPreview"], "...1234");
        assert_eq!(data[0]["dailyUsage"], 1);
        assert_eq!(data[1]["keyPreview"], "...5678");
        assert_eq!(data[1]["dailyUsage"], 0);
    }

    #[tokio::test]
    async fn health_reports_pool_counts() {
        let app = build_router(
            test_state(&["key-aaaa", "key-bbbb"], FakeSynthesizer::new(vec![])),
            1000,
        );

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["pool"]["keys_total"], 2);
        assert_eq!(json["pool"]["keys_usable"], 2);
        assert_eq!(json["pool"]["status"], "healthy");
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() {
        let app = build_router(test_state(&["key-aaaa"], FakeSynthesizer::new(vec![])), 1000);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/tts/voices")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = json_body(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Route not found");
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_format() {
        let app = build_router(test_state(&["key-aaaa"], FakeSynthesizer::new(vec![])), 1000);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"), "got: {content_type}");
    }

    #[tokio::test]
    async fn concurrency_limit_queues_excess_requests() {
        let fake = FakeSynthesizer::new(vec![]);
        let app = build_router(test_state(&["key-aaaa", "key-bbbb"], fake.clone()), 1);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::new();
        let url = format!("http://{addr}/api/tts/synthesize");
        let send = |text: &'static str| {
            client
                .post(&url)
                .header("content-type", "application/json")
                .body(format!(r#"{{"text":"{text}"}}"#))
                .send()
        };

        let (r1, r2) = tokio::join!(send("one"), send("two"));
        assert!(r1.unwrap().status().is_success());
        assert!(r2.unwrap().status().is_success());
        assert_eq!(fake.calls().len(), 2);
    }
}
