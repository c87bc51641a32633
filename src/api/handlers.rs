use crate::api::responses::{
    ApiErrorCode, AverageParams, AverageSuccessResponse, ComparisonRequest,
    ComparisonSuccessResponse, ErrorResponse, FeedbackRequest, FeedbackSuccessResponse,
    HealthStatus, HealthSuccessResponse, PredictionControl, PredictionControlResponse,
    PredictionsSuccessResponse, ReadingsSuccessResponse, SnapshotSuccessResponse,
};
use crate::error::AppError;
use crate::service::VentilationService;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

pub enum ApiResponse<T> {
    Success(T),
    Error {
        status: StatusCode,
        body: ErrorResponse,
    },
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            ApiResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

type SharedService = Arc<VentilationService>;

pub async fn get_health(State(service): State<SharedService>) -> impl IntoResponse {
    build_health_response(&service, Utc::now())
}

pub async fn get_snapshot(State(service): State<SharedService>) -> impl IntoResponse {
    build_snapshot_response(&service, Utc::now()).await
}

pub async fn get_predictions(State(service): State<SharedService>) -> impl IntoResponse {
    build_predictions_response(&service, Utc::now()).await
}

pub async fn post_clear_predictions(State(service): State<SharedService>) -> impl IntoResponse {
    service.clear_predictions().await;
    control_response(PredictionControl::Cleared, Utc::now())
}

pub async fn post_rearm_predictions(State(service): State<SharedService>) -> impl IntoResponse {
    service.rearm_predictions().await;
    control_response(PredictionControl::Armed, Utc::now())
}

pub async fn get_readings(State(service): State<SharedService>) -> impl IntoResponse {
    build_readings_response(&service, Utc::now()).await
}

pub async fn post_feedback(
    State(service): State<SharedService>,
    Json(request): Json<FeedbackRequest>,
) -> impl IntoResponse {
    build_feedback_response(&service, request, Utc::now()).await
}

pub async fn get_average(
    State(service): State<SharedService>,
    Query(params): Query<AverageParams>,
) -> impl IntoResponse {
    build_average_response(&service, params, Utc::now()).await
}

pub async fn post_comparison(
    State(service): State<SharedService>,
    Json(request): Json<ComparisonRequest>,
) -> impl IntoResponse {
    build_comparison_response(&service, request).await
}

fn build_health_response(
    service: &VentilationService,
    now: DateTime<Utc>,
) -> ApiResponse<HealthSuccessResponse> {
    let engine_running = service.engine_running();
    let status = if engine_running {
        HealthStatus::Ok
    } else {
        HealthStatus::Degraded
    };
    ApiResponse::Success(HealthSuccessResponse {
        status,
        engine_running,
        timestamp: format_timestamp(now),
    })
}

async fn build_snapshot_response(
    service: &VentilationService,
    now: DateTime<Utc>,
) -> ApiResponse<SnapshotSuccessResponse> {
    match service.latest_sensor_snapshot().await {
        Some(snapshot) => ApiResponse::Success(SnapshotSuccessResponse {
            time: snapshot.time,
            co2: snapshot.co2,
            temperature: snapshot.temperature,
            humidity: snapshot.humidity,
            tvoc: snapshot.tvoc,
            ambient_temp: snapshot.ambient_temp,
            timestamp: format_timestamp(now),
        }),
        None => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::NoData,
            "No complete reading in the current epoch",
            now,
        ),
    }
}

async fn build_predictions_response(
    service: &VentilationService,
    now: DateTime<Utc>,
) -> ApiResponse<PredictionsSuccessResponse> {
    match service.latest_predictions().await {
        Some(prediction) => ApiResponse::Success(PredictionsSuccessResponse {
            id: prediction.id.to_string(),
            generated_at: format_timestamp(prediction.generated_at),
            labels: prediction.labels,
            features: prediction.features,
            timestamp: format_timestamp(now),
        }),
        None => app_error_response(&AppError::NoPredictions, now),
    }
}

fn control_response(
    status: PredictionControl,
    now: DateTime<Utc>,
) -> ApiResponse<PredictionControlResponse> {
    ApiResponse::Success(PredictionControlResponse {
        status,
        timestamp: format_timestamp(now),
    })
}

async fn build_readings_response(
    service: &VentilationService,
    now: DateTime<Utc>,
) -> ApiResponse<ReadingsSuccessResponse> {
    let view = service.current_aggregated_view().await;
    ApiResponse::Success(ReadingsSuccessResponse {
        buffer: view.buffer,
        history: view.history,
        timestamp: format_timestamp(now),
    })
}

async fn build_feedback_response(
    service: &VentilationService,
    request: FeedbackRequest,
    now: DateTime<Utc>,
) -> ApiResponse<FeedbackSuccessResponse> {
    match service.record_feedback(request.prediction_id, request.accurate).await {
        Ok(outcome) => ApiResponse::Success(FeedbackSuccessResponse {
            status: outcome.into(),
            timestamp: format_timestamp(now),
        }),
        Err(err) => app_error_response(&err, now),
    }
}

async fn build_average_response(
    service: &VentilationService,
    params: AverageParams,
    now: DateTime<Utc>,
) -> ApiResponse<AverageSuccessResponse> {
    let result = if params.wait {
        service.average_since_with_wait(&params.since).await
    } else {
        service.average_since(&params.since).await
    };
    match result {
        Ok(average) => ApiResponse::Success(AverageSuccessResponse {
            since: average.timestamp,
            co2: average.co2,
            temperature: average.temperature,
            humidity: average.humidity,
            timestamp: format_timestamp(now),
        }),
        Err(err) => app_error_response(&err, now),
    }
}

async fn build_comparison_response(
    service: &VentilationService,
    request: ComparisonRequest,
) -> ApiResponse<ComparisonSuccessResponse> {
    if request.decision > 1 {
        return error_response(
            StatusCode::BAD_REQUEST,
            ApiErrorCode::InvalidRequest,
            "decision must be 0 or 1",
            Utc::now(),
        );
    }
    match service.compare(&request.since, request.decision).await {
        Ok(row) => ApiResponse::Success(ComparisonSuccessResponse {
            current_co2: row.current.co2,
            future_co2: row.future.co2,
            co2_change: row.co2_change,
            current_temperature: row.current.temperature,
            future_temperature: row.future.temperature,
            temperature_change: row.temperature_change,
            current_humidity: row.current.humidity,
            future_humidity: row.future.humidity,
            humidity_change: row.humidity_change,
            decision: row.decision,
            timestamp: row.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }),
        Err(err) => app_error_response(&err, Utc::now()),
    }
}

fn app_error_response<T>(err: &AppError, now: DateTime<Utc>) -> ApiResponse<T> {
    let (status, code) = match err {
        AppError::NoPredictions => (StatusCode::NOT_FOUND, ApiErrorCode::NoPredictions),
        AppError::StalePrediction(_) => (StatusCode::CONFLICT, ApiErrorCode::StalePrediction),
        AppError::NoTimeKey => (StatusCode::CONFLICT, ApiErrorCode::NoTimeKey),
        AppError::InvalidTimestamp(_) => (StatusCode::BAD_REQUEST, ApiErrorCode::InvalidTimestamp),
        AppError::Store(crate::store::StoreError::InvalidTimestamp(_)) => {
            (StatusCode::BAD_REQUEST, ApiErrorCode::InvalidTimestamp)
        }
        AppError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, ApiErrorCode::StoreError),
        AppError::Model(_) => {
            error!(error = %err, "Model failure while handling request");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorCode::ModelError,
                INTERNAL_ERROR_MESSAGE,
                now,
            );
        }
    };
    error_response(status, code, &err.to_string(), now)
}

fn error_response<T>(
    status: StatusCode,
    error_code: ApiErrorCode,
    message: &str,
    now: DateTime<Utc>,
) -> ApiResponse<T> {
    ApiResponse::Error {
        status,
        body: ErrorResponse {
            error_code,
            error_message: message.to_string(),
            timestamp: format_timestamp(now),
        },
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::TopicRoutes;
    use crate::prediction::ModelSet;
    use crate::prediction::features::FeatureVector;
    use crate::query::PollPolicy;
    use crate::service::ServiceSettings;
    use crate::state::PredictionResult;
    use crate::store::Persistence;
    use crate::store::memory::MemoryStore;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use uuid::Uuid;

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, hour, minute, second)
            .single()
            .unwrap_or_default()
    }

    fn service(store: &MemoryStore) -> VentilationService {
        VentilationService::new_at(
            Persistence::new(Box::new(store.clone()), "2.09"),
            ModelSet::with_defaults("Logistic Regression", "Random Forest"),
            ServiceSettings {
                routes: TopicRoutes {
                    climate: "room/climate".to_string(),
                    tvoc: "room/tvoc".to_string(),
                    ambient: "room/ambient".to_string(),
                },
                timezone: chrono_tz::Europe::Berlin,
                prediction_interval: Duration::from_secs(600),
                poll: PollPolicy {
                    attempts: 2,
                    interval: Duration::from_secs(10),
                },
            },
            at(8, 5, 0),
        )
    }

    #[test]
    fn health_is_degraded_without_engine() {
        let store = MemoryStore::new();
        let service = service(&store);

        match build_health_response(&service, at(8, 10, 1)) {
            ApiResponse::Success(body) => {
                assert_eq!(body.status, HealthStatus::Degraded);
                assert!(!body.engine_running);
                assert_eq!(body.timestamp, "2024-05-06T08:10:01Z");
            }
            ApiResponse::Error { status, .. } => panic!("expected success, got {status}"),
        }
    }

    #[tokio::test]
    async fn snapshot_without_readings_is_no_data() {
        let store = MemoryStore::new();
        let service = service(&store);

        match build_snapshot_response(&service, at(8, 10, 0)).await {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body.error_code, ApiErrorCode::NoData);
            }
            ApiResponse::Success(_) => panic!("expected no data error response"),
        }
    }

    #[tokio::test]
    async fn snapshot_returns_latest_complete_reading() -> Result<(), Box<dyn std::error::Error>> {
        let store = MemoryStore::new();
        let service = service(&store);
        service
            .ingest_at(
                "room/climate",
                br#"{"time": "2024-05-06T08:15:00Z", "object": {"temperature": 21.0, "humidity": 40.0, "co2": 700.0}}"#,
                at(8, 15, 1),
            )
            .await?;

        match build_snapshot_response(&service, at(8, 15, 2)).await {
            ApiResponse::Success(body) => {
                assert_eq!(body.time, "2024-05-06 10:15");
                assert_eq!(body.co2, 700.0);
                assert_eq!(body.tvoc, None);
            }
            ApiResponse::Error { status, .. } => panic!("expected success, got {status}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn predictions_missing_is_not_found() {
        let store = MemoryStore::new();
        let service = service(&store);

        match build_predictions_response(&service, at(8, 10, 0)).await {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body.error_code, ApiErrorCode::NoPredictions);
            }
            ApiResponse::Success(_) => panic!("expected no predictions error"),
        }
    }

    #[tokio::test]
    async fn feedback_for_other_prediction_is_conflict() {
        let store = MemoryStore::new();
        let service = service(&store);
        let current = PredictionResult {
            id: Uuid::new_v4(),
            generated_at: at(8, 20, 0),
            labels: BTreeMap::from([("Random Forest".to_string(), 1)]),
            features: FeatureVector::default(),
        };
        service.context().lock().await.state.set_predictions(current);
        let request = FeedbackRequest {
            prediction_id: Uuid::new_v4(),
            accurate: true,
        };

        match build_feedback_response(&service, request, at(8, 21, 0)).await {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::CONFLICT);
                assert_eq!(body.error_code, ApiErrorCode::StalePrediction);
            }
            ApiResponse::Success(_) => panic!("expected stale prediction error"),
        }
        assert!(store.feedback().is_empty());
    }

    #[tokio::test]
    async fn average_with_bad_timestamp_is_bad_request() {
        let store = MemoryStore::new();
        let service = service(&store);
        let params = AverageParams {
            since: "ten past".to_string(),
            wait: false,
        };

        match build_average_response(&service, params, at(8, 10, 0)).await {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body.error_code, ApiErrorCode::InvalidTimestamp);
            }
            ApiResponse::Success(_) => panic!("expected invalid timestamp error"),
        }
    }

    #[tokio::test]
    async fn comparison_rejects_non_binary_decision() {
        let store = MemoryStore::new();
        let service = service(&store);
        let request = ComparisonRequest {
            since: "2024-05-06 10:15".to_string(),
            decision: 2,
        };

        match build_comparison_response(&service, request).await {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body.error_code, ApiErrorCode::InvalidRequest);
            }
            ApiResponse::Success(_) => panic!("expected invalid request error"),
        }
        assert!(store.analyses().is_empty());
    }

    #[test]
    fn error_codes_serialize_screaming_snake_case() -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(ApiErrorCode::NoTimeKey)?;
        assert_eq!(value, serde_json::json!("NO_TIME_KEY"));
        Ok(())
    }
}
