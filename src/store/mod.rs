//! Durable storage of readings, feedback and comparison snapshots.
//!
//! [`Persistence`] owns the single store connection and applies the write
//! discipline: at most one reconnect-and-retry on connection failures, no
//! retry for anything else, and never an error towards the caller.

use crate::ingest::normalize::parse_time_key;
use crate::state::{ClassLabel, Reading};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub mod memory;
pub mod postgres;

/// Reconnect attempts allowed per failing operation.
pub const MAX_RECONNECTS: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("query error: {0}")]
    Query(String),
    #[error("invalid timestamp key: {0}")]
    InvalidTimestamp(String),
}

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadingRow {
    pub timestamp: NaiveDateTime,
    pub co2: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub location: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedbackRecord {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub co2: Option<f64>,
    pub timestamp: Option<String>,
    pub outdoor_temperature: Option<f64>,
    pub accurate_prediction: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackRow {
    pub temperature: f64,
    pub humidity: f64,
    pub co2: f64,
    pub timestamp: NaiveDateTime,
    pub outdoor_temperature: f64,
    pub accurate_prediction: bool,
}

impl FeedbackRecord {
    /// Returns the row when all six fields are present and the timestamp parses.
    pub fn to_row(&self) -> Option<FeedbackRow> {
        Some(FeedbackRow {
            temperature: self.temperature?,
            humidity: self.humidity?,
            co2: self.co2?,
            timestamp: parse_time_key(self.timestamp.as_deref()?)?,
            outdoor_temperature: self.outdoor_temperature?,
            accurate_prediction: self.accurate_prediction?,
        })
    }
}

/// Mean of the persisted readings after a timestamp; all-`None` when nothing matched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowAverage {
    pub timestamp: String,
    pub co2: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

impl WindowAverage {
    pub fn empty(timestamp: &str) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            co2: None,
            temperature: None,
            humidity: None,
        }
    }

    pub fn has_data(&self) -> bool {
        self.co2.is_some() || self.temperature.is_some() || self.humidity.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRow {
    pub timestamp: NaiveDateTime,
    pub current: WindowAverage,
    pub future: WindowAverage,
    pub co2_change: Option<f64>,
    pub temperature_change: Option<f64>,
    pub humidity_change: Option<f64>,
    pub decision: ClassLabel,
}

#[async_trait]
pub trait Store: Send {
    async fn insert_reading(&mut self, row: &ReadingRow) -> Result<(), StoreError>;
    async fn insert_feedback(&mut self, row: &FeedbackRow) -> Result<(), StoreError>;
    async fn insert_analysis(&mut self, row: &AnalysisRow) -> Result<(), StoreError>;
    /// Averages CO2, temperature and humidity over rows strictly after `since`.
    async fn average_since(&mut self, since: NaiveDateTime) -> Result<WindowAverage, StoreError>;
    /// Drops the current connection and opens a new one.
    async fn reconnect(&mut self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Required fields were missing; nothing was sent to the store.
    Rejected,
    /// The store failed and the write was given up.
    Dropped,
}

#[derive(Clone, Copy)]
enum Insert<'a> {
    Reading(&'a ReadingRow),
    Feedback(&'a FeedbackRow),
    Analysis(&'a AnalysisRow),
}

impl Insert<'_> {
    fn kind(self) -> &'static str {
        match self {
            Insert::Reading(_) => "reading",
            Insert::Feedback(_) => "feedback",
            Insert::Analysis(_) => "analysis",
        }
    }

    // Snapshots get a single attempt; the reconnect only heals the connection.
    fn retries(self) -> bool {
        !matches!(self, Insert::Analysis(_))
    }
}

pub struct Persistence {
    store: Box<dyn Store>,
    location: String,
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl Persistence {
    pub fn new(store: Box<dyn Store>, location: impl Into<String>) -> Self {
        Self {
            store,
            location: location.into(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Persists a reading when time, CO2, temperature and humidity are present.
    pub async fn write_reading(&mut self, reading: &Reading) -> WriteOutcome {
        let Some(row) = self.reading_row(reading) else {
            debug!(time = ?reading.time, "Skipping reading without all core fields");
            return WriteOutcome::Rejected;
        };
        self.execute(Insert::Reading(&row)).await
    }

    pub async fn write_feedback(&mut self, feedback: &FeedbackRecord) -> WriteOutcome {
        let Some(row) = feedback.to_row() else {
            error!(?feedback, "Feedback is missing required fields");
            return WriteOutcome::Rejected;
        };
        self.execute(Insert::Feedback(&row)).await
    }

    pub async fn write_analysis(&mut self, analysis: &AnalysisRow) -> WriteOutcome {
        self.execute(Insert::Analysis(analysis)).await
    }

    /// Single window query. A connection failure triggers one reconnect and
    /// yields an all-null window.
    pub async fn average_since(&mut self, since: &str) -> Result<WindowAverage, StoreError> {
        let parsed =
            parse_time_key(since).ok_or_else(|| StoreError::InvalidTimestamp(since.to_string()))?;
        match self.store.average_since(parsed).await {
            Ok(mut average) => {
                average.timestamp = since.to_string();
                Ok(average)
            }
            Err(err) if err.is_connection() => {
                warn!(error = %err, since, "Window query lost the store connection");
                self.reconnect().await;
                Ok(WindowAverage::empty(since))
            }
            Err(err) => {
                error!(error = %err, since, "Window query failed");
                Ok(WindowAverage::empty(since))
            }
        }
    }

    fn reading_row(&self, reading: &Reading) -> Option<ReadingRow> {
        let timestamp = parse_time_key(reading.time.as_deref()?)?;
        Some(ReadingRow {
            timestamp,
            co2: reading.co2?,
            temperature: reading.temperature?,
            humidity: reading.humidity?,
            location: self.location.clone(),
        })
    }

    async fn execute(&mut self, insert: Insert<'_>) -> WriteOutcome {
        let mut reconnects = 0;
        loop {
            let result = match insert {
                Insert::Reading(row) => self.store.insert_reading(row).await,
                Insert::Feedback(row) => self.store.insert_feedback(row).await,
                Insert::Analysis(row) => self.store.insert_analysis(row).await,
            };

            match result {
                Ok(()) => {
                    debug!(kind = insert.kind(), "Row committed");
                    return WriteOutcome::Written;
                }
                Err(err) if err.is_connection() && reconnects < MAX_RECONNECTS => {
                    reconnects += 1;
                    warn!(
                        kind = insert.kind(),
                        error = %err,
                        "Store connection failed, reconnecting"
                    );
                    if !self.reconnect().await || !insert.retries() {
                        return WriteOutcome::Dropped;
                    }
                }
                Err(err) => {
                    error!(kind = insert.kind(), error = %err, "Dropping write");
                    return WriteOutcome::Dropped;
                }
            }
        }
    }

    async fn reconnect(&mut self) -> bool {
        info!("Reconnecting to the store");
        match self.store.reconnect().await {
            Ok(()) => {
                info!("Store connection re-established");
                true
            }
            Err(err) => {
                error!(error = %err, "Store reconnect failed");
                false
            }
        }
    }
}
