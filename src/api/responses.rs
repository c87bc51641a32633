use crate::ingest::buffer::AggregationBuffer;
use crate::prediction::features::FeatureVector;
use crate::state::{ClassLabel, Reading};
use crate::store::WriteOutcome;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorResponse {
    pub error_code: ApiErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    NoData,
    NoPredictions,
    NoTimeKey,
    InvalidTimestamp,
    InvalidRequest,
    StoreError,
    StalePrediction,
    ModelError,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthSuccessResponse {
    pub status: HealthStatus,
    pub engine_running: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SnapshotSuccessResponse {
    pub time: String,
    pub co2: f64,
    pub temperature: f64,
    pub humidity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tvoc: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ambient_temp: Option<f64>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PredictionsSuccessResponse {
    pub id: String,
    pub generated_at: String,
    pub labels: BTreeMap<String, ClassLabel>,
    pub features: FeatureVector,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PredictionControl {
    Cleared,
    Armed,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PredictionControlResponse {
    pub status: PredictionControl,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ReadingsSuccessResponse {
    pub buffer: AggregationBuffer,
    pub history: Vec<Reading>,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    /// Id of the prediction the feedback refers to.
    pub prediction_id: Uuid,
    pub accurate: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackStatus {
    Written,
    Rejected,
    Dropped,
}

impl From<WriteOutcome> for FeedbackStatus {
    fn from(outcome: WriteOutcome) -> Self {
        match outcome {
            WriteOutcome::Written => FeedbackStatus::Written,
            WriteOutcome::Rejected => FeedbackStatus::Rejected,
            WriteOutcome::Dropped => FeedbackStatus::Dropped,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FeedbackSuccessResponse {
    pub status: FeedbackStatus,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct AverageParams {
    pub since: String,
    /// Poll until data appears (default: false)
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct AverageSuccessResponse {
    pub since: String,
    pub co2: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct ComparisonRequest {
    pub since: String,
    pub decision: ClassLabel,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ComparisonSuccessResponse {
    pub current_co2: Option<f64>,
    pub future_co2: Option<f64>,
    pub co2_change: Option<f64>,
    pub current_temperature: Option<f64>,
    pub future_temperature: Option<f64>,
    pub temperature_change: Option<f64>,
    pub current_humidity: Option<f64>,
    pub future_humidity: Option<f64>,
    pub humidity_change: Option<f64>,
    pub decision: ClassLabel,
    pub timestamp: String,
}
