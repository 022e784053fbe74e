use std::{fmt, num::NonZeroU32};

use serde::{Deserialize, Serialize};

/// How the service approximates each primitive's spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Full covariance ellipses, primitives carry `sigmaXY`.
    #[default]
    Covariance,
    /// Axis-aligned variance only.
    Variance,
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Covariance => "covariance",
            Self::Variance => "variance",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The loss function the service minimizes while training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossFn {
    #[default]
    L1Ssim,
    L2,
    Mse,
}

impl LossFn {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::L1Ssim => "l1_ssim",
            Self::L2 => "l2",
            Self::Mse => "mse",
        }
    }
}

impl fmt::Display for LossFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The model shape sent on initialize and reinitialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    pub gaussian_count: NonZeroU32,
    pub variant: Variant,
}

/// The configuration frame sent once when a training channel opens.
///
/// Built fresh for every run and never mutated after it was sent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSpec {
    pub learning_rate: f32,
    pub num_steps: NonZeroU32,
    pub update_interval: NonZeroU32,
    #[serde(rename = "lossFunctionId")]
    pub loss_fn: LossFn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_spec_wire_format() {
        let spec = TrainingSpec {
            learning_rate: 0.01,
            num_steps: NonZeroU32::new(10_000).unwrap(),
            update_interval: NonZeroU32::new(100).unwrap(),
            loss_fn: LossFn::L1Ssim,
        };

        let value = serde_json::to_value(spec).unwrap();
        assert_eq!(value["numSteps"], 10_000);
        assert_eq!(value["updateInterval"], 100);
        assert_eq!(value["lossFunctionId"], "l1_ssim");
        assert!(value.get("learningRate").is_some());
    }

    #[test]
    fn zero_steps_is_rejected_on_the_wire() {
        let json = r#"{"learningRate":0.1,"numSteps":0,"updateInterval":1,"lossFunctionId":"mse"}"#;
        assert!(serde_json::from_str::<TrainingSpec>(json).is_err());
    }
}
