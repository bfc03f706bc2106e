use crate::replay::ImageSequenceSource;
use crate::source::{FrameSource, SourceError};
use crate::synthetic::{SyntheticConfig, SyntheticSource, TapWaveform};
use anyhow::Context;
use bridge::{FrameShape, StopSignal, paths};
use common::{env_flag, env_optional, env_parse, env_parse_optional, env_string};
use std::str::FromStr;

pub use common::Environment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Synthetic,
    Images,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "synthetic" | "synth" => Ok(SourceKind::Synthetic),
            "images" | "image" | "replay" => Ok(SourceKind::Images),
            other => Err(format!("unknown source {:?} (synthetic|images)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Frames per second; 0 delivers frames as fast as the source can.
    pub fps: f64,
    pub pattern: Option<String>,
    pub looping: bool,
    pub frame_limit: Option<u64>,
    pub tap_hz: f32,
    pub jitter_px: u32,
    pub reference_y: Option<f32>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Synthetic,
            fps: 60.0,
            pattern: None,
            looping: false,
            frame_limit: None,
            tap_hz: 1.0,
            jitter_px: 2,
            reference_y: None,
        }
    }
}

impl SourceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            kind: env_parse("SOURCE", defaults.kind)?,
            fps: env_parse("SOURCE_FPS", defaults.fps)?,
            pattern: env_optional("SOURCE_PATTERN"),
            looping: env_flag("SOURCE_LOOP", defaults.looping)?,
            frame_limit: env_parse_optional("SOURCE_FRAME_LIMIT")?,
            tap_hz: env_parse("SYNTHETIC_TAP_HZ", defaults.tap_hz)?,
            jitter_px: env_parse("SYNTHETIC_JITTER_PX", defaults.jitter_px)?,
            reference_y: env_parse_optional("SYNTHETIC_REFERENCE_Y")?,
        })
    }

    /// Construct the configured source for frames of `shape`.
    pub fn build(
        &self,
        shape: FrameShape,
        stop: &StopSignal,
    ) -> Result<Box<dyn FrameSource>, SourceError> {
        match self.kind {
            SourceKind::Synthetic => {
                let config = SyntheticConfig {
                    fps: self.fps,
                    reference_y: self.reference_y,
                    waveform: TapWaveform {
                        tap_hz: self.tap_hz,
                        ..TapWaveform::default()
                    },
                    jitter_px: self.jitter_px,
                    frame_limit: self.frame_limit,
                    ..SyntheticConfig::default()
                };
                Ok(Box::new(
                    SyntheticSource::new(shape, config)?.with_stop(stop.clone()),
                ))
            }
            SourceKind::Images => {
                let pattern = self.pattern.as_deref().ok_or_else(|| {
                    SourceError::Device("SOURCE=images requires SOURCE_PATTERN".to_string())
                })?;
                Ok(Box::new(
                    ImageSequenceSource::from_glob(pattern, shape)?
                        .looping(self.looping)
                        .paced(self.fps, Some(stop.clone())),
                ))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub environment: Environment,
    pub frame_shape: FrameShape,
    pub exchange_path: String,
    pub session_control_path: String,
    pub source: SourceConfig,
    pub open_retries: u32,
    pub otel_endpoint: Option<String>,
}

impl CaptureConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let frame_shape = env_string("FRAME_SHAPE", paths::DEFAULT_FRAME_SHAPE)
            .parse::<FrameShape>()
            .context("FRAME_SHAPE")?;

        Ok(Self {
            environment: Environment::from_env(),
            frame_shape,
            exchange_path: env_string("EXCHANGE_PATH", paths::FRAME_EXCHANGE_PATH),
            session_control_path: env_string("SESSION_CONTROL_PATH", paths::SESSION_CONTROL_PATH),
            source: SourceConfig::from_env()?,
            open_retries: env_parse("SOURCE_OPEN_RETRIES", 5)?,
            otel_endpoint: env_optional("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }
}
