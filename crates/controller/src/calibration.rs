use crate::errors::ControllerError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Resting-hand statistics around the reference line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Reference line, pixels from the top of the frame.
    pub y_line: f64,
    pub std_offset: f64,
    pub mean_offset: f64,
}

impl Calibration {
    /// Mean and population standard deviation of resting distances to `y_line`.
    pub fn from_distances(y_line: f64, distances: &[f64]) -> Result<Self, ControllerError> {
        if distances.is_empty() {
            return Err(ControllerError::Configuration(
                "calibration needs at least one sample".to_string(),
            ));
        }
        let n = distances.len() as f64;
        let mean = distances.iter().sum::<f64>() / n;
        let variance = distances.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
        Ok(Self {
            y_line,
            std_offset: variance.sqrt(),
            mean_offset: mean,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ControllerError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            ControllerError::Configuration(format!(
                "cannot read calibration {}: {}",
                path.display(),
                e
            ))
        })?;
        let calibration: Self = serde_json::from_str(&raw).map_err(|e| {
            ControllerError::Configuration(format!(
                "invalid calibration {}: {}",
                path.display(),
                e
            ))
        })?;
        calibration.validate()?;
        Ok(calibration)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ControllerError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ControllerError::Configuration(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ControllerError> {
        let finite = self.y_line.is_finite()
            && self.std_offset.is_finite()
            && self.mean_offset.is_finite();
        if !finite || self.std_offset < 0.0 {
            return Err(ControllerError::Configuration(format!(
                "calibration values out of range: {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// `threshold = mean_offset + sigma_multiplier * std_offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPolicy {
    pub sigma_multiplier: f64,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            sigma_multiplier: 3.0,
        }
    }
}

impl ThresholdPolicy {
    pub fn threshold(&self, calibration: &Calibration) -> f64 {
        calibration.mean_offset + self.sigma_multiplier * calibration.std_offset
    }
}
