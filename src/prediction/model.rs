//! Classifier trait shared by the pretrained ventilation models.
//!
//! Models are selected via the `model` field of their JSON file and loaded at
//! startup through [`crate::prediction::create_model`].

use crate::state::ClassLabel;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse model file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid model: {0}")]
    Invalid(String),
    #[error("expected {expected} features, got {actual}")]
    Arity { expected: usize, actual: usize },
}

/// Binary classifier over a fixed-width feature row.
pub trait Classifier: Send + Sync + std::fmt::Debug {
    /// Model kind as written in the model file.
    fn kind(&self) -> &'static str;

    /// Number of features `predict` expects.
    fn arity(&self) -> usize;

    fn predict(&self, features: &[f64]) -> Result<ClassLabel, ModelError>;
}

pub(crate) fn check_arity(expected: usize, features: &[f64]) -> Result<(), ModelError> {
    if features.len() == expected {
        Ok(())
    } else {
        Err(ModelError::Arity {
            expected,
            actual: features.len(),
        })
    }
}
