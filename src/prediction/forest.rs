//! Random forest of binary decision trees stored as flat node arrays.

use crate::prediction::model::{Classifier, ModelError, check_arity};
use crate::state::ClassLabel;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        label: ClassLabel,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    // Children must come after their parent, which rules out cycles.
    fn validate(&self, arity: usize) -> Result<(), ModelError> {
        if self.nodes.is_empty() {
            return Err(ModelError::Invalid("tree has no nodes".into()));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= arity {
                        return Err(ModelError::Invalid(format!(
                            "node {index} splits on feature {feature}, model has {arity}"
                        )));
                    }
                    for child in [*left, *right] {
                        if child <= index || child >= self.nodes.len() {
                            return Err(ModelError::Invalid(format!(
                                "node {index} points to invalid child {child}"
                            )));
                        }
                    }
                }
                TreeNode::Leaf { label } if *label > 1 => {
                    return Err(ModelError::Invalid(format!(
                        "node {index} has non-binary label {label}"
                    )));
                }
                TreeNode::Leaf { .. } => {}
            }
        }
        Ok(())
    }

    fn classify(&self, features: &[f64]) -> ClassLabel {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { label } => return *label,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForestParams {
    pub trees: Vec<DecisionTree>,
    /// Width of the feature row (default: 2, co2 and temperature)
    #[serde(default = "default_arity")]
    pub arity: usize,
}

fn default_arity() -> usize {
    2
}

impl Default for ForestParams {
    fn default() -> Self {
        let stump = |feature, threshold| DecisionTree {
            nodes: vec![
                TreeNode::Split {
                    feature,
                    threshold,
                    left: 1,
                    right: 2,
                },
                TreeNode::Leaf { label: 0 },
                TreeNode::Leaf { label: 1 },
            ],
        };
        Self {
            trees: vec![stump(0, 1000.0), stump(0, 1200.0), stump(1, 24.0)],
            arity: default_arity(),
        }
    }
}

#[derive(Debug)]
pub struct ForestModel {
    params: ForestParams,
}

impl ForestModel {
    pub fn new(params: ForestParams) -> Result<Self, ModelError> {
        if params.trees.is_empty() {
            return Err(ModelError::Invalid("forest has no trees".into()));
        }
        for tree in &params.trees {
            tree.validate(params.arity)?;
        }
        Ok(Self { params })
    }

    pub fn with_defaults() -> Self {
        Self {
            params: ForestParams::default(),
        }
    }
}

impl Classifier for ForestModel {
    fn kind(&self) -> &'static str {
        "random_forest"
    }

    fn arity(&self) -> usize {
        self.params.arity
    }

    /// Majority vote across trees; a tie votes to ventilate.
    fn predict(&self, features: &[f64]) -> Result<ClassLabel, ModelError> {
        check_arity(self.arity(), features)?;
        let positive = self
            .params
            .trees
            .iter()
            .filter(|tree| tree.classify(features) == 1)
            .count();
        let negative = self.params.trees.len() - positive;
        Ok(ClassLabel::from(positive >= negative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump(feature: usize, threshold: f64) -> DecisionTree {
        DecisionTree {
            nodes: vec![
                TreeNode::Split {
                    feature,
                    threshold,
                    left: 1,
                    right: 2,
                },
                TreeNode::Leaf { label: 0 },
                TreeNode::Leaf { label: 1 },
            ],
        }
    }

    #[test]
    fn threshold_value_goes_left() -> Result<(), ModelError> {
        let model = ForestModel::new(ForestParams {
            trees: vec![stump(0, 1000.0)],
            arity: 2,
        })?;

        assert_eq!(model.predict(&[1000.0, 21.0])?, 0);
        assert_eq!(model.predict(&[1000.5, 21.0])?, 1);
        Ok(())
    }

    #[test]
    fn majority_vote_with_tie_is_positive() -> Result<(), ModelError> {
        let model = ForestModel::new(ForestParams {
            trees: vec![stump(0, 1000.0), stump(1, 25.0)],
            arity: 2,
        })?;

        // co2 votes 1, temperature votes 0
        assert_eq!(model.predict(&[1100.0, 21.0])?, 1);
        assert_eq!(model.predict(&[900.0, 21.0])?, 0);
        Ok(())
    }

    #[test]
    fn backwards_child_is_rejected() {
        let tree = DecisionTree {
            nodes: vec![
                TreeNode::Split {
                    feature: 0,
                    threshold: 1.0,
                    left: 0,
                    right: 1,
                },
                TreeNode::Leaf { label: 1 },
            ],
        };

        let result = ForestModel::new(ForestParams {
            trees: vec![tree],
            arity: 2,
        });

        assert!(matches!(result, Err(ModelError::Invalid(_))));
    }

    #[test]
    fn split_on_missing_feature_is_rejected() {
        let result = ForestModel::new(ForestParams {
            trees: vec![stump(3, 1.0)],
            arity: 2,
        });

        assert!(matches!(result, Err(ModelError::Invalid(_))));
    }

    #[test]
    fn nodes_deserialize_from_tagged_json() -> Result<(), Box<dyn std::error::Error>> {
        let tree: DecisionTree = serde_json::from_str(
            r#"{"nodes": [
                {"kind": "split", "feature": 1, "threshold": 22.5, "left": 1, "right": 2},
                {"kind": "leaf", "label": 0},
                {"kind": "leaf", "label": 1}
            ]}"#,
        )?;

        assert_eq!(tree.nodes.len(), 3);
        assert_eq!(tree.nodes[1], TreeNode::Leaf { label: 0 });
        Ok(())
    }
}
