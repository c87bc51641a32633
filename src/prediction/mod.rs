use crate::config::Config;
use crate::error::AppError;
use crate::service::SharedContext;
use crate::state::{ClassLabel, PredictionResult};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod features;
pub mod forest;
pub mod logistic;
pub mod model;

use features::{
    FeatureVector, PRIMARY_FEATURE_NAMES, SECONDARY_FEATURE_NAMES, compute_features,
};
use forest::{ForestModel, ForestParams};
use logistic::{LogisticModel, LogisticParams};
use model::{Classifier, ModelError};

pub const DEFAULT_PREDICTION_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Debug, Deserialize)]
pub struct ModelFile {
    pub model: String,
    pub params: serde_json::Value,
}

// Model Factory
pub fn create_model(file: &ModelFile) -> Result<Box<dyn Classifier>, ModelError> {
    match file.model.as_str() {
        "logistic_regression" => {
            let params: LogisticParams = serde_json::from_value(file.params.clone())?;
            Ok(Box::new(LogisticModel::new(params)?))
        }
        "random_forest" => {
            let params: ForestParams = serde_json::from_value(file.params.clone())?;
            Ok(Box::new(ForestModel::new(params)?))
        }
        other => Err(ModelError::Invalid(format!("unknown model: {other}"))),
    }
}

pub fn load_model_from_path(path: impl AsRef<Path>) -> Result<Box<dyn Classifier>, ModelError> {
    let contents = std::fs::read_to_string(path)?;
    let file: ModelFile = serde_json::from_str(&contents)?;
    create_model(&file)
}

#[derive(Debug)]
struct NamedModel {
    name: String,
    model: Box<dyn Classifier>,
}

/// The primary model reads all eight features, the secondary one co2 and temperature.
#[derive(Debug)]
pub struct ModelSet {
    primary: NamedModel,
    secondary: NamedModel,
}

impl ModelSet {
    pub fn new(
        primary_name: impl Into<String>,
        primary: Box<dyn Classifier>,
        secondary_name: impl Into<String>,
        secondary: Box<dyn Classifier>,
    ) -> Result<Self, ModelError> {
        expect_arity(primary.as_ref(), PRIMARY_FEATURE_NAMES.len())?;
        expect_arity(secondary.as_ref(), SECONDARY_FEATURE_NAMES.len())?;
        Ok(Self {
            primary: NamedModel {
                name: primary_name.into(),
                model: primary,
            },
            secondary: NamedModel {
                name: secondary_name.into(),
                model: secondary,
            },
        })
    }

    pub fn with_defaults(
        primary_name: impl Into<String>,
        secondary_name: impl Into<String>,
    ) -> Self {
        Self {
            primary: NamedModel {
                name: primary_name.into(),
                model: Box::new(LogisticModel::with_defaults()),
            },
            secondary: NamedModel {
                name: secondary_name.into(),
                model: Box::new(ForestModel::with_defaults()),
            },
        }
    }

    /// Loads both models named in the config; a missing or broken file falls
    /// back to the built-in parameters.
    pub fn from_config(config: &Config) -> Self {
        let primary = load_or_default(
            config.primary_model_path(),
            PRIMARY_FEATURE_NAMES.len(),
            || Box::new(LogisticModel::with_defaults()),
        );
        let secondary = load_or_default(
            config.secondary_model_path(),
            SECONDARY_FEATURE_NAMES.len(),
            || Box::new(ForestModel::with_defaults()),
        );
        Self {
            primary: NamedModel {
                name: config.primary_model_name().to_string(),
                model: primary,
            },
            secondary: NamedModel {
                name: config.secondary_model_name().to_string(),
                model: secondary,
            },
        }
    }

    pub fn primary_name(&self) -> &str {
        &self.primary.name
    }

    pub fn secondary_name(&self) -> &str {
        &self.secondary.name
    }

    pub fn predict(
        &self,
        features: &FeatureVector,
    ) -> Result<BTreeMap<String, ClassLabel>, ModelError> {
        let primary = self.primary.model.predict(&features.primary())?;
        let secondary = self.secondary.model.predict(&features.secondary())?;
        Ok(BTreeMap::from([
            (self.primary.name.clone(), primary),
            (self.secondary.name.clone(), secondary),
        ]))
    }
}

fn expect_arity(model: &dyn Classifier, expected: usize) -> Result<(), ModelError> {
    if model.arity() == expected {
        Ok(())
    } else {
        Err(ModelError::Arity {
            expected,
            actual: model.arity(),
        })
    }
}

fn load_or_default(
    path: Option<&Path>,
    arity: usize,
    fallback: impl FnOnce() -> Box<dyn Classifier>,
) -> Box<dyn Classifier> {
    let Some(path) = path else {
        info!(arity, "No model file configured, using built-in parameters");
        return fallback();
    };
    match load_model_from_path(path).and_then(|model| {
        expect_arity(model.as_ref(), arity)?;
        Ok(model)
    }) {
        Ok(model) => {
            info!(path = %path.display(), kind = model.kind(), "Loaded model");
            model
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "Failed to load model, using built-in parameters"
            );
            fallback()
        }
    }
}

/// Runs one prediction cycle. Returns `None` when the cycle was skipped.
pub async fn run_prediction_cycle(
    context: &SharedContext,
    models: &ModelSet,
) -> Result<Option<PredictionResult>, AppError> {
    run_prediction_cycle_at(context, models, Utc::now()).await
}

pub(crate) async fn run_prediction_cycle_at(
    context: &SharedContext,
    models: &ModelSet,
    now: DateTime<Utc>,
) -> Result<Option<PredictionResult>, AppError> {
    let (history, generation) = {
        let guard = context.lock().await;
        if !guard.state.predictions_armed() {
            debug!("Predictions cleared, skipping cycle until re-armed");
            return Ok(None);
        }
        if guard.state.history().is_empty() {
            info!("No readings in the current epoch, skipping prediction cycle");
            return Ok(None);
        }
        (guard.state.history().to_vec(), guard.state.generation())
    };

    let Some(features) = compute_features(&history) else {
        return Ok(None);
    };
    let labels = models.predict(&features)?;

    let result = PredictionResult {
        id: Uuid::new_v4(),
        generated_at: now,
        labels,
        features,
    };

    let mut guard = context.lock().await;
    // Cleared or rolled over while the models ran.
    if !guard.state.predictions_armed() || guard.state.generation() != generation {
        debug!(id = %result.id, "Discarding prediction computed for a stale epoch");
        return Ok(None);
    }
    guard.state.set_predictions(result.clone());
    info!(id = %result.id, labels = ?result.labels, "Predictions updated");

    Ok(Some(result))
}

/// Periodic task that evaluates the models every interval.
#[derive(Debug)]
pub struct PredictionEngine {
    context: SharedContext,
    models: Arc<ModelSet>,
    interval: Duration,
    wake: Arc<Notify>,
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PredictionEngine {
    pub fn new(context: SharedContext, models: Arc<ModelSet>, interval: Duration) -> Self {
        let (stop_tx, _stop_rx) = watch::channel(false);
        Self {
            context,
            models,
            interval,
            wake: Arc::new(Notify::new()),
            stop_tx,
            handle: Mutex::new(None),
        }
    }

    pub fn models(&self) -> &ModelSet {
        &self.models
    }

    /// Starts the task unless it is already running or the engine was stopped.
    /// Returns true when a new task was spawned.
    pub fn ensure_running(&self) -> bool {
        if *self.stop_tx.borrow() {
            return false;
        }
        let mut handle = self.handle.lock().unwrap_or_else(|p| p.into_inner());
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }
        if handle.is_some() {
            warn!("Prediction task was not running, restarting");
        }
        *handle = Some(self.spawn());
        true
    }

    pub fn is_running(&self) -> bool {
        let handle = self.handle.lock().unwrap_or_else(|p| p.into_inner());
        handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cuts the current wait short and runs a cycle now.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);
        let handle = self.handle.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            warn!(error = %err, "Prediction task ended abnormally");
        }
    }

    fn spawn(&self) -> JoinHandle<()> {
        let context = self.context.clone();
        let models = self.models.clone();
        let wake = self.wake.clone();
        let interval = self.interval;
        let mut stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Prediction engine started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = wake.notified() => debug!("Prediction engine woken"),
                    _ = stop_rx.changed() => break,
                }

                if let Err(err) = run_prediction_cycle(&context, &models).await {
                    warn!(error = %err, "Error running prediction cycle");
                }
            }
            info!("Prediction engine stopped");
        })
    }
}
