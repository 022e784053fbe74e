use std::{num::NonZeroU32, ops::RangeInclusive, path::Path};

use comms::{LossFn, ModelSpec, TrainingSpec, Variant};
use serde::Deserialize;

use crate::error::{Result, SessionError};

const GAUSSIAN_COUNT: RangeInclusive<u32> = 1..=5000;
const LEARNING_RATE: RangeInclusive<f32> = 0.001..=0.1;
const NUM_STEPS: RangeInclusive<u32> = 100..=50_000;
const UPDATE_INTERVAL: RangeInclusive<u32> = 1..=1000;

/// The user-editable model and training configuration.
///
/// A fresh `ModelSpec` and `TrainingSpec` are derived from it every time the model is
/// reinitialized or trained.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub gaussian_count: u32,
    pub variant: Variant,
    pub learning_rate: f32,
    pub num_steps: u32,
    pub update_interval: u32,
    pub loss_function: LossFn,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gaussian_count: 1000,
            variant: Variant::Covariance,
            learning_rate: 0.01,
            num_steps: 10_000,
            update_interval: 100,
            loss_function: LossFn::L1Ssim,
        }
    }
}

impl Settings {
    /// Loads `Settings` from a JSON file, missing fields keep their defaults.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SessionError::InvalidConfig(format!("cannot read '{}': {e}", path.display()))
        })?;

        let settings: Self = serde_json::from_str(&content)
            .map_err(|e| SessionError::InvalidConfig(format!("invalid JSON: {e}")))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Checks every value against the ranges the service accepts.
    pub fn validate(&self) -> Result<()> {
        check("gaussianCount", self.gaussian_count, &GAUSSIAN_COUNT)?;
        check("learningRate", self.learning_rate, &LEARNING_RATE)?;
        check("numSteps", self.num_steps, &NUM_STEPS)?;
        check("updateInterval", self.update_interval, &UPDATE_INTERVAL)?;

        if self.update_interval > self.num_steps {
            return Err(SessionError::InvalidConfig(format!(
                "updateInterval ({}) must not exceed numSteps ({})",
                self.update_interval, self.num_steps
            )));
        }

        Ok(())
    }

    pub fn model_spec(&self) -> Result<ModelSpec> {
        Ok(ModelSpec {
            gaussian_count: non_zero("gaussianCount", self.gaussian_count)?,
            variant: self.variant,
        })
    }

    pub fn training_spec(&self) -> Result<TrainingSpec> {
        Ok(TrainingSpec {
            learning_rate: self.learning_rate,
            num_steps: non_zero("numSteps", self.num_steps)?,
            update_interval: non_zero("updateInterval", self.update_interval)?,
            loss_fn: self.loss_function,
        })
    }
}

fn check<T>(name: &str, value: T, range: &RangeInclusive<T>) -> Result<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if range.contains(&value) {
        return Ok(());
    }

    Err(SessionError::InvalidConfig(format!(
        "{name} must be within {}..={}, got {value}",
        range.start(),
        range.end()
    )))
}

fn non_zero(name: &str, value: u32) -> Result<NonZeroU32> {
    NonZeroU32::new(value)
        .ok_or_else(|| SessionError::InvalidConfig(format!("{name} must be positive")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();

        let spec = settings.training_spec().unwrap();
        assert_eq!(spec.num_steps.get(), 10_000);
        assert_eq!(spec.update_interval.get(), 100);
        assert_eq!(settings.model_spec().unwrap().gaussian_count.get(), 1000);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"gaussianCount":250,"variant":"variance","lossFunction":"mse"}"#)
                .unwrap();

        assert_eq!(settings.gaussian_count, 250);
        assert_eq!(settings.variant, Variant::Variance);
        assert_eq!(settings.loss_function, LossFn::Mse);
        assert_eq!(settings.num_steps, Settings::default().num_steps);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let too_many = Settings {
            gaussian_count: 6000,
            ..Settings::default()
        };
        let interval_too_long = Settings {
            num_steps: 100,
            update_interval: 500,
            ..Settings::default()
        };
        let lr = Settings {
            learning_rate: 0.5,
            ..Settings::default()
        };

        assert!(matches!(too_many.validate(), Err(SessionError::InvalidConfig(_))));
        assert!(matches!(interval_too_long.validate(), Err(SessionError::InvalidConfig(_))));
        assert!(matches!(lr.validate(), Err(SessionError::InvalidConfig(_))));
    }
}
