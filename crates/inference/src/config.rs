use crate::bright_spot::BrightSpotDetector;
use crate::hand::Handedness;
use common::env_parse;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub luma_threshold: u8,
    pub min_pixels: usize,
    pub handedness: Handedness,
}

impl DetectorConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = BrightSpotDetector::default();
        Ok(Self {
            luma_threshold: env_parse("DETECTOR_LUMA_THRESHOLD", defaults.luma_threshold)?,
            min_pixels: env_parse("DETECTOR_MIN_PIXELS", defaults.min_pixels)?,
            handedness: env_parse("DETECTOR_HANDEDNESS", defaults.handedness)?,
        })
    }

    pub fn build(&self) -> BrightSpotDetector {
        BrightSpotDetector {
            luma_threshold: self.luma_threshold,
            min_pixels: self.min_pixels,
            handedness: self.handedness,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_from_env() {
        unsafe {
            env::remove_var("DETECTOR_LUMA_THRESHOLD");
            env::set_var("DETECTOR_MIN_PIXELS", "12");
            env::set_var("DETECTOR_HANDEDNESS", "right");
        }
        let detector = DetectorConfig::from_env().unwrap().build();
        assert_eq!(detector.luma_threshold, 200);
        assert_eq!(detector.min_pixels, 12);
        assert_eq!(detector.handedness, Handedness::Right);

        unsafe { env::set_var("DETECTOR_LUMA_THRESHOLD", "300") };
        assert!(DetectorConfig::from_env().is_err(), "u8 overflow is rejected");

        unsafe {
            env::remove_var("DETECTOR_LUMA_THRESHOLD");
            env::remove_var("DETECTOR_MIN_PIXELS");
            env::remove_var("DETECTOR_HANDEDNESS");
        }
    }
}
