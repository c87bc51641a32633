//! Logistic regression over standardized features.
//!
//! Formula: label = sigmoid(w · ((x - mean) / scale) + b) >= threshold

use crate::prediction::model::{Classifier, ModelError, check_arity};
use crate::state::ClassLabel;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct LogisticParams {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    /// Standard-scaler means; identity when omitted.
    #[serde(default)]
    pub mean: Option<Vec<f64>>,
    #[serde(default)]
    pub scale: Option<Vec<f64>>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    0.5
}

impl Default for LogisticParams {
    fn default() -> Self {
        // Rising CO2 and temperature push towards ventilating.
        Self {
            coefficients: vec![1.8, 0.6, 0.4, 0.35, -0.2, 0.0, 0.0, 0.0],
            intercept: -0.3,
            mean: Some(vec![950.0, 21.5, 47.0, 300.0, 12.0, 11.5, 2.0, 6.5]),
            scale: Some(vec![300.0, 2.0, 9.0, 180.0, 7.0, 3.5, 1.4, 3.4]),
            threshold: default_threshold(),
        }
    }
}

#[derive(Debug)]
pub struct LogisticModel {
    params: LogisticParams,
}

impl LogisticModel {
    pub fn new(params: LogisticParams) -> Result<Self, ModelError> {
        let width = params.coefficients.len();
        if width == 0 {
            return Err(ModelError::Invalid("logistic model has no coefficients".into()));
        }
        for (name, values) in [("mean", &params.mean), ("scale", &params.scale)] {
            if let Some(values) = values
                && values.len() != width
            {
                return Err(ModelError::Invalid(format!(
                    "{name} has {} entries, expected {width}",
                    values.len()
                )));
            }
        }
        if params
            .scale
            .as_ref()
            .is_some_and(|scale| scale.iter().any(|s| *s == 0.0))
        {
            return Err(ModelError::Invalid("scale entries must be non-zero".into()));
        }
        Ok(Self { params })
    }

    pub fn with_defaults() -> Self {
        Self {
            params: LogisticParams::default(),
        }
    }

    pub fn probability(&self, features: &[f64]) -> Result<f64, ModelError> {
        check_arity(self.arity(), features)?;
        let params = &self.params;
        let z = features
            .iter()
            .enumerate()
            .map(|(i, x)| {
                let mean = params.mean.as_ref().map_or(0.0, |m| m[i]);
                let scale = params.scale.as_ref().map_or(1.0, |s| s[i]);
                params.coefficients[i] * (x - mean) / scale
            })
            .sum::<f64>()
            + params.intercept;
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}

impl Classifier for LogisticModel {
    fn kind(&self) -> &'static str {
        "logistic_regression"
    }

    fn arity(&self) -> usize {
        self.params.coefficients.len()
    }

    fn predict(&self, features: &[f64]) -> Result<ClassLabel, ModelError> {
        let probability = self.probability(features)?;
        Ok(ClassLabel::from(probability >= self.params.threshold))
    }
}
