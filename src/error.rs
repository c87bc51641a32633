use crate::prediction::model::ModelError;
use crate::store::StoreError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("no predictions available")]
    NoPredictions,
    #[error("prediction {0} is no longer current")]
    StalePrediction(Uuid),
    #[error("no time key recorded in the current epoch")]
    NoTimeKey,
    #[error("invalid timestamp key: {0}")]
    InvalidTimestamp(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
}
