use crate::ingest::buffer::AggregationBuffer;
use crate::ingest::retention::RetentionClock;
use crate::prediction::features::FeatureVector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::watch;
use uuid::Uuid;

/// Binary class label produced by a classifier.
pub type ClassLabel = u8;

/// Sensor quantities tracked per reading slot, besides the shared time marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Temperature,
    Humidity,
    Co2,
    Tvoc,
    AmbientTemp,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Temperature,
        Channel::Humidity,
        Channel::Co2,
        Channel::Tvoc,
        Channel::AmbientTemp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Temperature => "temperature",
            Channel::Humidity => "humidity",
            Channel::Co2 => "co2",
            Channel::Tvoc => "tvoc",
            Channel::AmbientTemp => "ambient_temp",
        }
    }
}

/// Canonical form of one inbound event; covers a subset of the channels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialReading {
    /// Minute-resolution key in the configured zone, `%Y-%m-%d %H:%M`.
    pub time: Option<String>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub co2: Option<f64>,
    pub tvoc: Option<f64>,
    pub ambient_temp: Option<f64>,
}

impl PartialReading {
    pub fn value(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Temperature => self.temperature,
            Channel::Humidity => self.humidity,
            Channel::Co2 => self.co2,
            Channel::Tvoc => self.tvoc,
            Channel::AmbientTemp => self.ambient_temp,
        }
    }

    pub fn set(&mut self, channel: Channel, value: Option<f64>) {
        match channel {
            Channel::Temperature => self.temperature = value,
            Channel::Humidity => self.humidity = value,
            Channel::Co2 => self.co2 = value,
            Channel::Tvoc => self.tvoc = value,
            Channel::AmbientTemp => self.ambient_temp = value,
        }
    }

    pub fn has_values(&self) -> bool {
        Channel::ALL.iter().any(|channel| self.value(*channel).is_some())
    }
}

/// One materialized slot of the aggregation buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub time: Option<String>,
    pub humidity: Option<f64>,
    pub temperature: Option<f64>,
    pub co2: Option<f64>,
    pub tvoc: Option<f64>,
    pub ambient_temp: Option<f64>,
}

impl Reading {
    pub fn value(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Temperature => self.temperature,
            Channel::Humidity => self.humidity,
            Channel::Co2 => self.co2,
            Channel::Tvoc => self.tvoc,
            Channel::AmbientTemp => self.ambient_temp,
        }
    }

    /// True when time, CO2, temperature and humidity are all present.
    pub fn is_fully_qualified(&self) -> bool {
        self.time.is_some()
            && self.co2.is_some()
            && self.temperature.is_some()
            && self.humidity.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub labels: BTreeMap<String, ClassLabel>,
    pub features: FeatureVector,
}

impl PredictionResult {
    pub fn label(&self, model_name: &str) -> Option<ClassLabel> {
        self.labels.get(model_name).copied()
    }
}

/// Everything the ingestion path and the prediction engine share for one epoch.
#[derive(Debug)]
pub struct AppState {
    buffer: AggregationBuffer,
    history: Vec<Reading>,
    predictions: Option<PredictionResult>,
    predictions_tx: watch::Sender<Option<PredictionResult>>,
    predictions_armed: bool,
    /// Bumped whenever the epoch's predictions are invalidated.
    generation: u64,
    retention: RetentionClock,
}

impl AppState {
    pub fn new(now: DateTime<Utc>) -> Self {
        let (predictions_tx, _predictions_rx) = watch::channel(None);
        Self {
            buffer: AggregationBuffer::default(),
            history: Vec::new(),
            predictions: None,
            predictions_tx,
            predictions_armed: true,
            generation: 0,
            retention: RetentionClock::starting_at(now),
        }
    }

    pub fn buffer(&self) -> &AggregationBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut AggregationBuffer {
        &mut self.buffer
    }

    pub fn history(&self) -> &[Reading] {
        &self.history
    }

    pub fn extend_history(&mut self, readings: impl IntoIterator<Item = Reading>) {
        self.history.extend(readings);
    }

    pub fn predictions(&self) -> Option<&PredictionResult> {
        self.predictions.as_ref()
    }

    pub fn subscribe_predictions(&self) -> watch::Receiver<Option<PredictionResult>> {
        self.predictions_tx.subscribe()
    }

    pub fn set_predictions(&mut self, result: PredictionResult) {
        self.predictions = Some(result.clone());
        self.predictions_tx.send_replace(Some(result));
    }

    pub fn predictions_armed(&self) -> bool {
        self.predictions_armed
    }

    /// Changes on every clear and every retention boundary. A cycle publishes
    /// only when the generation it snapshotted is still current.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Drops the current predictions and disarms further cycles.
    pub fn clear_predictions(&mut self) {
        self.predictions = None;
        self.predictions_armed = false;
        self.generation += 1;
        self.predictions_tx.send_replace(None);
    }

    /// Removes the prediction with `id` once feedback consumed it. Cycles stay
    /// armed.
    pub fn consume_predictions(&mut self, id: Uuid) -> Option<PredictionResult> {
        if self.predictions.as_ref().is_none_or(|p| p.id != id) {
            return None;
        }
        self.predictions_tx.send_replace(None);
        self.predictions.take()
    }

    pub fn rearm_predictions(&mut self) {
        self.predictions_armed = true;
    }

    pub fn retention(&self) -> &RetentionClock {
        &self.retention
    }

    /// Clears the epoch when `now` crossed the next hourly boundary.
    pub fn apply_retention(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let crossed = self.retention.check(now)?;
        self.buffer.clear();
        self.history.clear();
        self.predictions = None;
        self.generation += 1;
        self.predictions_tx.send_replace(None);
        Some(crossed)
    }
}
