use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Router,
};
use futures::{Stream, StreamExt};
use serde_json::json;
use std::sync::PoisonError;
use tracing::{error, info};

use crate::{
    advisor::{AdvisorError, CropAdviceRequest, CropAdviceResponse},
    app_state::{AppState, RunGuard, RunOutcome, Status},
    events::PipelineEvent,
    models::LocationQuery,
};

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/environmental-data", post(environmental_data_handler))
        .route("/api/predict-crops", post(predict_crops_handler))
        .route("/api/status", get(status_handler))
        .with_state(app_state)
}

// --- Handlers ---

/// Abre el stream SSE de una búsqueda. Un cuerpo ausente o ilegible cuenta
/// como ubicación vacía.
#[axum::debug_handler]
async fn environmental_data_handler(
    State(state): State<AppState>,
    payload: Option<Json<LocationQuery>>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let location = payload
        .as_ref()
        .and_then(|Json(query)| query.normalized())
        .map(str::to_string)
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Location parameter is required" })),
            )
        })?;

    info!("Nueva búsqueda ambiental para '{}'", location);

    let mut guard = RunGuard::start(state.status.clone(), &location);
    let events = state.pipeline.run(location).map(move |event| {
        if event.is_terminal() {
            let outcome = match event {
                PipelineEvent::Error(_) => RunOutcome::Failed,
                _ => RunOutcome::Completed,
            };
            guard.finish(outcome);
        }
        event.to_sse()
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[axum::debug_handler]
async fn predict_crops_handler(
    State(state): State<AppState>,
    Json(payload): Json<CropAdviceRequest>,
) -> Result<Json<CropAdviceResponse>, ApiError> {
    match state.llm_manager.recommend_crops(&payload).await {
        Ok(recommendations) => Ok(Json(CropAdviceResponse { recommendations })),
        Err(e) => {
            error!("Error generando recomendaciones de cultivo: {}", e);
            Err(advice_error_response(&e))
        }
    }
}

fn advice_error_response(err: &AdvisorError) -> ApiError {
    let (status, message) = match err {
        AdvisorError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, err.to_string()),
        AdvisorError::QuotaExceeded => (StatusCode::PAYMENT_REQUIRED, err.to_string()),
        AdvisorError::Unsupported(_) | AdvisorError::Provider(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to generate crop recommendations: {err}"),
        ),
    };
    (status, Json(json!({ "error": message })))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.lock().unwrap_or_else(PoisonError::into_inner).clone())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        advisor::LlmManager,
        client::{SearchSession, SseDecoder},
        config::{AppConfig, LlmProvider},
        pipeline::tests::{mock_upstreams, pipeline_for},
    };
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;
    use wiremock::MockServer;

    pub(crate) fn state_for(server: &MockServer) -> AppState {
        let config = AppConfig::from_lookup(|key: &str| match key {
            "LLM_PROVIDER" => Some("gemini".to_string()),
            _ => None,
        })
        .unwrap();
        AppState {
            llm_manager: LlmManager::from_config(&config).unwrap(),
            pipeline: pipeline_for(server),
            status: Arc::new(Mutex::new(Status::default())),
        }
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        response.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    /// Decodifica el cuerpo SSE y lo pasa por el reductor del cliente.
    fn replay(location: &str, bytes: &[u8]) -> (Vec<String>, crate::client::SearchState) {
        let mut session = SearchSession::new();
        let id = session.begin(location);
        let mut names = Vec::new();
        let mut decoder = SseDecoder::new();
        for raw in decoder.push(bytes) {
            let event = PipelineEvent::parse(&raw.name, &raw.data).unwrap();
            names.push(raw.name);
            session.apply(id, &event);
        }
        (names, session.into_current().unwrap())
    }

    #[tokio::test]
    async fn streams_every_event_and_counts_the_run() {
        let server = mock_upstreams(200).await;
        let state = state_for(&server);
        let status = state.status.clone();

        let response = create_router(state)
            .oneshot(post_json("/api/environmental-data", json!({ "location": "Mumbai" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        let (names, final_state) = replay("Mumbai", &body_bytes(response).await);
        assert_eq!(names.len(), 14);
        assert_eq!(names.first().map(String::as_str), Some("status"));
        assert_eq!(names.last().map(String::as_str), Some("complete"));
        assert!(final_state.complete);
        assert!(!final_state.loading);
        assert_eq!(final_state.record.location, "Mumbai");
        assert_eq!(final_state.record.weather.avg_temperature_c, 25.5);
        assert!(final_state.record.soil.soil_type.is_some());

        let s = status.lock().unwrap();
        assert_eq!((s.active, s.completed, s.failed), (0, 1, 0));
        assert_eq!(s.last_location.as_deref(), Some("Mumbai"));
    }

    #[tokio::test]
    async fn blank_location_is_rejected_before_streaming() {
        let server = mock_upstreams(200).await;
        let router = create_router(state_for(&server));

        for body in [json!({ "location": "   " }), json!({})] {
            let response = router
                .clone()
                .oneshot(post_json("/api/environmental-data", body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
            assert_eq!(body, json!({ "error": "Location parameter is required" }));
        }
    }

    #[tokio::test]
    async fn weather_failure_keeps_coordinates_and_ends_with_error() {
        let server = mock_upstreams(500).await;
        let state = state_for(&server);
        let status = state.status.clone();

        let response = create_router(state)
            .oneshot(post_json("/api/environmental-data", json!({ "location": "Mumbai" })))
            .await
            .unwrap();
        let (names, final_state) = replay("Mumbai", &body_bytes(response).await);

        assert_eq!(names, vec!["status", "coordinates", "status", "error"]);
        assert_eq!(final_state.record.coordinates.latitude, 19.07);
        assert_eq!(final_state.failure.as_deref(), Some("Failed to fetch weather data"));
        assert!(!final_state.complete);
        assert_eq!(status.lock().unwrap().failed, 1);
    }

    #[tokio::test]
    async fn status_reports_counters() {
        let server = mock_upstreams(200).await;
        let state = state_for(&server);
        state.status.lock().unwrap().completed = 3;

        let response = create_router(state)
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["completed"], 3);
        assert_eq!(body["active"], 0);
        assert_eq!(body["lastLocation"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn unsupported_llm_provider_returns_server_error() {
        let server = mock_upstreams(200).await;
        let state = state_for(&server);
        assert_eq!(state.llm_manager.provider, LlmProvider::Gemini);

        let request = post_json(
            "/api/predict-crops",
            json!({
                "location": "Pune",
                "weather": {
                    "avgTemperatureC": 25.1,
                    "avgHumidityPct": 60.0,
                    "prevYearRainfallMm": 720.0,
                    "avgAnnualRainfallMm": 700.0
                },
                "soil": {
                    "ph": 7.0,
                    "nitrogenMgKg": 40.0,
                    "phosphorusMgKg": 27.5,
                    "potassiumMgKg": 200.0,
                    "soilType": "Silty"
                }
            }),
        );
        let response = create_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(body["error"].as_str().unwrap().starts_with("Failed to generate crop recommendations"));
    }

    #[test]
    fn provider_limits_keep_their_status_codes() {
        let (status, Json(body)) = advice_error_response(&AdvisorError::RateLimited);
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body, json!({ "error": "Rate limit exceeded. Please try again in a moment." }));

        let (status, Json(body)) = advice_error_response(&AdvisorError::QuotaExceeded);
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body, json!({ "error": "AI service quota exceeded. Please contact support." }));

        let (status, _) = advice_error_response(&AdvisorError::Provider("boom".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
