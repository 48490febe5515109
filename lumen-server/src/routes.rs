use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use lumen_core::PredictError;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::codec;
use crate::error::ApiError;
use crate::schema::{HealthResponse, PredictionInput, PredictionRequest, PredictionResponse};
use crate::state::AppState;

/// Request bodies carry base images inline as data URIs.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health-check", get(health_check))
        .route("/predictions", post(create_prediction))
        .route("/predictions/{prediction_id}", put(put_prediction))
        .route("/shutdown", post(shutdown))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Json<Value> {
    Json(json!({
        "docs_url": null,
        "openapi_url": null,
        "shutdown_url": "/shutdown",
        "healthcheck_url": "/health-check",
        "predictions_url": "/predictions",
    }))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(state.health())
}

async fn create_prediction(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let Json(body) = payload?;
    let id = body
        .id
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    run_prediction(state, id, body.input).await.map(Json)
}

async fn put_prediction(
    State(state): State<Arc<AppState>>,
    Path(prediction_id): Path<String>,
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let Json(body) = payload?;
    if let Some(id) = &body.id {
        if *id != prediction_id {
            return Err(ApiError::InvalidInput(format!(
                "prediction id {id} does not match {prediction_id} in the path"
            )));
        }
    }
    run_prediction(state, prediction_id, body.input)
        .await
        .map(Json)
}

async fn shutdown(State(state): State<Arc<AppState>>) -> Json<Value> {
    info!("shutdown requested");
    state.shutdown().set();
    Json(json!({}))
}

/// Runs one prediction to completion. Pipeline failures come back as a
/// `failed` prediction rather than an error status.
async fn run_prediction(
    state: Arc<AppState>,
    id: String,
    input: PredictionInput,
) -> Result<PredictionResponse, ApiError> {
    let created_at = Utc::now();
    let predictor = state.predictor()?;
    let permit = state.try_acquire_worker()?;

    let init_image = match input.image.as_deref() {
        Some(source) => Some(codec::load_input_image(state.http(), source).await?),
        None => None,
    };

    info!(prediction_id = %id, "starting prediction");
    let mut response = PredictionResponse::processing(id, input.clone(), created_at);
    let request = input.generation;
    let result = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        predictor.predict(&request, init_image.as_ref())
    })
    .await
    .map_err(|e| ApiError::Internal(format!("prediction task failed: {e}")))?;

    match result {
        Ok(prediction) => {
            let file_name = state.output_name(&prediction);
            match state
                .outputs()
                .publish(state.http(), &prediction.image, &file_name)
                .await
            {
                Ok(output) => response.succeed(output, &prediction),
                Err(e) => {
                    error!(prediction_id = %response.id, "failed to publish output: {:#}", e);
                    response.fail(format!("failed to publish output: {e:#}"));
                }
            }
        }
        Err(PredictError::Request(e)) => return Err(ApiError::InvalidInput(e.to_string())),
        Err(e) => {
            error!(prediction_id = %response.id, "prediction failed: {}", e);
            response.fail(e.to_string());
        }
    }
    info!(prediction_id = %response.id, status = %response.status, "prediction finished");
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::OutputSink;
    use crate::shutdown::ShutdownEvent;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
    };
    use base64::{prelude::BASE64_STANDARD, Engine};
    use lumen_core::testing::SolidColorModel;
    use lumen_core::Predictor;
    use tower::ServiceExt;

    fn app_state() -> Arc<AppState> {
        Arc::new(AppState::new(
            1,
            ShutdownEvent::new(),
            OutputSink::Inline,
            reqwest::Client::new(),
        ))
    }

    fn ready(model: SolidColorModel) -> (Arc<AppState>, Arc<SolidColorModel>) {
        let state = app_state();
        let model = Arc::new(model);
        state.finish_setup(Ok(Predictor::new(model.clone())));
        (state, model)
    }

    async fn send(
        state: Arc<AppState>,
        method: Method,
        uri: &str,
        body: Value,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn get_json(state: Arc<AppState>, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn decode_output(output: &Value) -> image::DynamicImage {
        let uri = output.as_str().unwrap();
        let payload = uri.strip_prefix("data:image/png;base64,").unwrap();
        image::load_from_memory(&BASE64_STANDARD.decode(payload).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn index_lists_the_endpoints() {
        let (status, body) = get_json(app_state(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["predictions_url"], "/predictions");
    }

    #[tokio::test]
    async fn health_reports_starting_then_ready() {
        let state = app_state();
        let (_, body) = get_json(state.clone(), "/health-check").await;
        assert_eq!(body["status"], "STARTING");

        state.finish_setup(Ok(Predictor::new(Arc::new(SolidColorModel::new()))));
        let (_, body) = get_json(state, "/health-check").await;
        assert_eq!(body["status"], "READY");
        assert_eq!(body["setup"]["status"], "succeeded");
    }

    #[tokio::test]
    async fn predictions_before_setup_are_unavailable() {
        let (status, body) = send(
            app_state(),
            Method::POST,
            "/predictions",
            json!({"input": {"prompt": "fern"}}),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["detail"].as_str().unwrap().contains("Setup"));
    }

    #[tokio::test]
    async fn text_to_image_returns_a_data_uri() {
        let (state, model) = ready(SolidColorModel::new());
        let (status, body) = send(
            state,
            Method::POST,
            "/predictions",
            json!({"input": {"prompt": "fern", "width": 64, "height": 32, "seed": 5}}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "succeeded");
        assert!(body["error"].is_null());
        assert!(!body["id"].as_str().unwrap().is_empty());
        assert!(body["logs"].as_str().unwrap().contains("Using seed: 5"));
        let image = decode_output(&body["output"]);
        assert_eq!((image.width(), image.height()), (64, 32));

        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].request.seed, 5);
        assert!(!calls[0].with_init_image);
    }

    #[tokio::test]
    async fn image_input_switches_to_image_to_image() {
        let (state, model) = ready(SolidColorModel::new());
        let base = image::DynamicImage::ImageRgb8(image::RgbImage::new(16, 16));
        let uri = codec::png_data_uri(&codec::encode_png(&base).unwrap());

        let (status, body) = send(
            state,
            Method::PUT,
            "/predictions/abc123",
            json!({"id": "abc123", "input": {"prompt": "fern", "image": uri, "strength": 0.5}}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "abc123");
        assert_eq!(body["status"], "succeeded");
        assert!(body["logs"].as_str().unwrap().contains("img2img"));
        let calls = model.calls();
        assert!(calls[0].with_init_image);
        assert_eq!(calls[0].request.strength, 0.5);
    }

    #[tokio::test]
    async fn mismatched_ids_are_rejected() {
        let (state, _) = ready(SolidColorModel::new());
        let (status, _) = send(
            state,
            Method::PUT,
            "/predictions/abc",
            json!({"id": "xyz", "input": {"prompt": "fern"}}),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn invalid_parameters_are_unprocessable() {
        let (state, model) = ready(SolidColorModel::new());
        let (status, body) = send(
            state,
            Method::POST,
            "/predictions",
            json!({"input": {"prompt": "fern", "width": 500}}),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].as_str().unwrap().contains("500"));
        assert!(model.calls().is_empty());
    }

    #[tokio::test]
    async fn undecodable_image_is_unprocessable() {
        let (state, _) = ready(SolidColorModel::new());
        let (status, _) = send(
            state,
            Method::POST,
            "/predictions",
            json!({"input": {"prompt": "fern", "image": "data:image/png;base64,AAAA"}}),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn pipeline_failure_is_a_failed_prediction() {
        let (state, _) = ready(SolidColorModel::new().failing());
        let (status, body) = send(
            state,
            Method::POST,
            "/predictions",
            json!({"input": {"prompt": "fern"}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "failed");
        assert!(body["error"].as_str().unwrap().contains("pipeline exploded"));
        assert!(body["output"].is_null());
    }

    #[tokio::test]
    async fn second_prediction_while_busy_conflicts() {
        let (state, _) = ready(SolidColorModel::new());
        let _held = state.try_acquire_worker().unwrap();
        let (status, body) = send(
            state,
            Method::POST,
            "/predictions",
            json!({"input": {"prompt": "fern"}}),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["detail"], "Already running a prediction");
    }

    #[tokio::test]
    async fn unparseable_bodies_get_a_json_detail() {
        let (state, model) = ready(SolidColorModel::new());
        let (status, body) = send(
            state.clone(),
            Method::POST,
            "/predictions",
            json!({"input": {"width": 64}}),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].as_str().unwrap().contains("prompt"), "{body}");

        let (status, body) = send(
            state,
            Method::PUT,
            "/predictions/abc",
            json!({"input": {"prompt": "fern", "steps": "many"}}),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].is_string());
        assert!(model.calls().is_empty());
    }

    #[tokio::test]
    async fn large_inline_images_reach_the_decoder() {
        let (state, _) = ready(SolidColorModel::new());
        let image = format!(
            "data:image/png;base64,{}",
            BASE64_STANDARD.encode(vec![7u8; 3 * 1024 * 1024])
        );
        let (status, body) = send(
            state,
            Method::POST,
            "/predictions",
            json!({"input": {"prompt": "fern", "image": image}}),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].as_str().unwrap().contains("decode"), "{body}");
    }

    #[tokio::test]
    async fn cors_mirrors_the_origin_with_credentials() {
        let request = Request::builder()
            .uri("/health-check")
            .header(header::ORIGIN, "https://studio.example")
            .body(Body::empty())
            .unwrap();
        let response = router(app_state()).oneshot(request).await.unwrap();
        let headers = response.headers();
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://studio.example"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[tokio::test]
    async fn shutdown_sets_the_event() {
        let state = app_state();
        let (status, body) = send(state.clone(), Method::POST, "/shutdown", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));
        assert!(state.shutdown().is_set());
    }
}
