//! The ventilation service: one context object holding the epoch state and
//! the store connection, shared by ingestion, the prediction engine and the
//! consumer-facing operations.

use crate::error::AppError;
use crate::ingest::buffer::AggregationBuffer;
use crate::ingest::normalize::{TIME_KEY_FORMAT, normalize, parse_time_key};
use crate::ingest::{IngestError, TopicRoutes};
use crate::prediction::{ModelSet, PredictionEngine};
use crate::query::{self, PollPolicy};
use crate::state::{AppState, ClassLabel, PredictionResult, Reading};
use crate::store::{AnalysisRow, FeedbackRecord, Persistence, WindowAverage, WriteOutcome};
use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct Context {
    pub state: AppState,
    pub persistence: Persistence,
}

pub type SharedContext = Arc<Mutex<Context>>;

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub routes: TopicRoutes,
    pub timezone: Tz,
    pub prediction_interval: Duration,
    pub poll: PollPolicy,
}

/// Result of handling one inbound event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// True when the event crossed an hourly boundary and cleared the epoch.
    pub retention_cleared: bool,
    pub materialized: usize,
    pub written: usize,
}

/// Latest fully-qualified reading of the epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorSnapshot {
    pub time: String,
    pub co2: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub tvoc: Option<f64>,
    pub ambient_temp: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedView {
    pub buffer: AggregationBuffer,
    pub history: Vec<Reading>,
}

#[derive(Debug)]
pub struct VentilationService {
    context: SharedContext,
    engine: PredictionEngine,
    settings: ServiceSettings,
}

impl VentilationService {
    pub fn new(persistence: Persistence, models: ModelSet, settings: ServiceSettings) -> Self {
        Self::new_at(persistence, models, settings, Utc::now())
    }

    pub fn new_at(
        persistence: Persistence,
        models: ModelSet,
        settings: ServiceSettings,
        now: DateTime<Utc>,
    ) -> Self {
        let context = Arc::new(Mutex::new(Context {
            state: AppState::new(now),
            persistence,
        }));
        let engine = PredictionEngine::new(
            context.clone(),
            Arc::new(models),
            settings.prediction_interval,
        );
        Self {
            context,
            engine,
            settings,
        }
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn models(&self) -> &ModelSet {
        self.engine.models()
    }

    /// Starts the prediction engine.
    pub fn start(&self) {
        if self.engine.ensure_running() {
            info!("Ventilation service started");
        }
    }

    /// Restarts the prediction engine if its task is no longer alive.
    pub fn ensure_engine_running(&self) -> bool {
        self.engine.ensure_running()
    }

    pub fn engine_running(&self) -> bool {
        self.engine.is_running()
    }

    /// Runs a prediction cycle without waiting for the interval.
    pub fn wake(&self) {
        self.engine.wake();
    }

    pub async fn shutdown(&self) {
        self.engine.stop().await;
        info!("Ventilation service stopped");
    }

    /// Handles one inbound event; failures are logged and never propagate.
    pub async fn ingest(&self, topic: &str, payload: &[u8]) {
        if let Err(err) = self.ingest_at(topic, payload, Utc::now()).await {
            warn!(topic, error = %err, "Dropping inbound event");
        }
    }

    /// Retention check, normalization, merge, materialization and persistence
    /// of one event, all under the context lock.
    pub async fn ingest_at(
        &self,
        topic: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<IngestSummary, IngestError> {
        let mut guard = self.context.lock().await;
        let Context { state, persistence } = &mut *guard;
        let mut summary = IngestSummary::default();

        if let Some(boundary) = state.apply_retention(now) {
            info!(%boundary, "Retention boundary crossed, epoch cleared");
            summary.retention_cleared = true;
        }

        let kind = self
            .settings
            .routes
            .classify(topic)
            .ok_or_else(|| IngestError::UnknownTopic(topic.to_string()))?;
        let partial = normalize(kind, payload, self.settings.timezone)?;
        if !partial.has_values() {
            debug!(topic, "Event carried no sensor values");
        }

        state.buffer_mut().merge(&partial);
        if !state.buffer().is_materializable() {
            return Ok(summary);
        }

        let readings = state.buffer_mut().materialize();
        summary.materialized = readings.len();
        for reading in readings.iter().filter(|r| r.is_fully_qualified()) {
            if persistence.write_reading(reading).await == WriteOutcome::Written {
                summary.written += 1;
            }
        }
        state.extend_history(readings);

        Ok(summary)
    }

    pub async fn latest_sensor_snapshot(&self) -> Option<SensorSnapshot> {
        let guard = self.context.lock().await;
        guard.state.history().iter().rev().find_map(|reading| {
            Some(SensorSnapshot {
                time: reading.time.clone()?,
                co2: reading.co2?,
                temperature: reading.temperature?,
                humidity: reading.humidity?,
                tvoc: reading.tvoc,
                ambient_temp: reading.ambient_temp,
            })
        })
    }

    pub async fn latest_predictions(&self) -> Option<PredictionResult> {
        self.context.lock().await.state.predictions().cloned()
    }

    pub async fn subscribe_predictions(&self) -> watch::Receiver<Option<PredictionResult>> {
        self.context.lock().await.state.subscribe_predictions()
    }

    pub async fn current_aggregated_view(&self) -> AggregatedView {
        let guard = self.context.lock().await;
        AggregatedView {
            buffer: guard.state.buffer().clone(),
            history: guard.state.history().to_vec(),
        }
    }

    /// Empties the predictions and pauses the engine until re-armed.
    pub async fn clear_predictions(&self) {
        self.context.lock().await.state.clear_predictions();
        info!("Predictions cleared");
    }

    pub async fn rearm_predictions(&self) {
        self.context.lock().await.state.rearm_predictions();
        info!("Predictions re-armed");
    }

    /// Stores whether prediction `id` matched what the occupants observed. A
    /// written feedback consumes the prediction.
    pub async fn record_feedback(
        &self,
        id: Uuid,
        accurate: bool,
    ) -> Result<WriteOutcome, AppError> {
        let mut guard = self.context.lock().await;
        let Context { state, persistence } = &mut *guard;

        let prediction = state.predictions().ok_or(AppError::NoPredictions)?;
        if prediction.id != id {
            return Err(AppError::StalePrediction(id));
        }
        let timestamp = state
            .buffer()
            .latest_time()
            .map(str::to_string)
            .ok_or(AppError::NoTimeKey)?;
        let features = &prediction.features;
        let feedback = FeedbackRecord {
            temperature: Some(features.temperature),
            humidity: Some(features.humidity),
            co2: Some(features.co2),
            timestamp: Some(timestamp),
            outdoor_temperature: Some(features.ambient_temp),
            accurate_prediction: Some(accurate),
        };
        debug!(%id, accurate, "Recording feedback");

        let outcome = persistence.write_feedback(&feedback).await;
        if outcome == WriteOutcome::Written {
            state.consume_predictions(id);
        }
        Ok(outcome)
    }

    pub async fn average_since(&self, since: &str) -> Result<WindowAverage, AppError> {
        Ok(query::average_since(&self.context, since).await?)
    }

    pub async fn average_since_with_wait(&self, since: &str) -> Result<WindowAverage, AppError> {
        Ok(query::average_since_with_wait(&self.context, since, self.settings.poll).await?)
    }

    /// Compares the minute before `since` with the data arriving after it and
    /// stores the snapshot.
    pub async fn compare(
        &self,
        since: &str,
        decision: ClassLabel,
    ) -> Result<AnalysisRow, AppError> {
        self.compare_at(since, decision, Utc::now()).await
    }

    pub async fn compare_at(
        &self,
        since: &str,
        decision: ClassLabel,
        now: DateTime<Utc>,
    ) -> Result<AnalysisRow, AppError> {
        let start = parse_time_key(since)
            .ok_or_else(|| AppError::InvalidTimestamp(since.to_string()))?;
        let before = (start - TimeDelta::minutes(1))
            .format(TIME_KEY_FORMAT)
            .to_string();

        let current = self.average_since(&before).await?;
        let future = self.average_since_with_wait(since).await?;

        let timestamp = now.with_timezone(&self.settings.timezone).naive_local();
        let row = query::analysis_row(timestamp, current, future, decision);

        let outcome = self.context.lock().await.persistence.write_analysis(&row).await;
        debug!(?outcome, since, "Comparison snapshot stored");

        Ok(row)
    }
}
