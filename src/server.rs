use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use tokio::task;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    client::Client,
    error::ServiceError,
    request::{
        DecodeRequest, DecodeResult, Request, RequestResult, TokenizationRequest,
        TokenizationResult,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub text: Arc<dyn Client>,
    pub images: Option<Arc<dyn Client>>,
}

pub fn build_router(text: Arc<dyn Client>, images: Option<Arc<dyn Client>>) -> Router {
    let state = AppState { text, images };

    Router::new()
        .route("/health", get(health))
        .route("/v1/request", post(make_text_request))
        .route("/v1/images", post(make_image_request))
        .route("/v1/tokenize", post(tokenize))
        .route("/v1/decode", post(decode))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

// Clients block on model inference or HTTP calls.
async fn run_blocking(
    client: Arc<dyn Client>,
    request: Request,
) -> Result<RequestResult, ServiceError> {
    task::spawn_blocking(move || client.make_request(&request))
        .await
        .map_err(|err| ServiceError::Backend(format!("request task failed: {err}")))
}

async fn make_text_request(
    State(state): State<AppState>,
    Json(request): Json<Request>,
) -> Result<Json<RequestResult>, ServiceError> {
    let result = run_blocking(state.text.clone(), request).await?;
    if !result.success {
        info!(error = ?result.error, "request completed without success");
    }
    Ok(Json(result))
}

async fn make_image_request(
    State(state): State<AppState>,
    Json(request): Json<Request>,
) -> Result<Json<RequestResult>, ServiceError> {
    let client = state.images.clone().ok_or_else(|| {
        ServiceError::Unsupported("image generation is not configured".to_string())
    })?;
    Ok(Json(run_blocking(client, request).await?))
}

async fn tokenize(
    State(state): State<AppState>,
    Json(request): Json<TokenizationRequest>,
) -> Result<Json<TokenizationResult>, ServiceError> {
    Ok(Json(state.text.tokenize(&request)?))
}

async fn decode(
    State(state): State<AppState>,
    Json(request): Json<DecodeRequest>,
) -> Result<Json<DecodeResult>, ServiceError> {
    Ok(Json(state.text.decode(&request)?))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{self, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::request::{Completion, Token};

    struct Echo;

    impl Client for Echo {
        fn make_request(&self, request: &Request) -> RequestResult {
            RequestResult {
                success: true,
                cached: false,
                request_time: Some(0.0),
                request_datetime: None,
                completions: vec![Completion::from_tokens(
                    request.prompt.clone(),
                    vec![Token {
                        text: request.prompt.clone(),
                        logprob: -0.5,
                    }],
                )],
                embedding: Vec::new(),
                error: None,
                error_flags: None,
            }
        }
    }

    fn router() -> Router {
        build_router(Arc::new(Echo), None)
    }

    fn post_json(uri: &str, body: &str) -> http::Request<Body> {
        http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = router()
            .oneshot(http::Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn request_is_forwarded_to_client() {
        let response = router()
            .oneshot(post_json("/v1/request", r#"{"model": "huggingface/gpt2", "prompt": "hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let result: RequestResult = serde_json::from_slice(&body).unwrap();
        assert!(result.success);
        assert_eq!(result.completions[0].text, "hi");
        assert_eq!(result.completions[0].logprob, -0.5);
    }

    #[tokio::test]
    async fn tokenize_is_not_implemented() {
        let response = router()
            .oneshot(post_json("/v1/tokenize", r#"{"text": "hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn images_need_a_configured_client() {
        let response = router()
            .oneshot(post_json("/v1/images", r#"{"model": "openai/dall-e-2", "prompt": "fox"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
