use crate::calibration::{Calibration, ThresholdPolicy};
use crate::errors::ControllerError;
use crate::session::SchedulingMode;
use crate::signal::{TrackedHand, parse_landmark_set};
use crate::trigger::{
    DEFAULT_OSC_ADDRESS, DEFAULT_OSC_TARGET, LogTrigger, MqttTrigger, OscTrigger, TriggerSink,
};
use anyhow::Context;
use bridge::{FrameShape, paths};
use capture::SourceConfig;
use chrono::Local;
use common::{env_flag, env_optional, env_parse, env_parse_optional, env_string};
use inference::{DetectorConfig, HandLandmark};
use std::path::PathBuf;
use std::str::FromStr;

pub use common::Environment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Osc,
    Mqtt,
    Log,
}

impl FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "osc" => Ok(TriggerKind::Osc),
            "mqtt" => Ok(TriggerKind::Mqtt),
            "log" | "none" => Ok(TriggerKind::Log),
            other => Err(format!("unknown trigger {:?} (osc|mqtt|log)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub kind: TriggerKind,
    pub osc_target: String,
    pub osc_address: String,
    pub mqtt_broker_host: String,
    pub mqtt_broker_port: u16,
    pub mqtt_topic: String,
    pub mqtt_device_id: String,
}

impl TriggerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            kind: env_parse("TRIGGER", TriggerKind::Osc)?,
            osc_target: env_string("OSC_TARGET", DEFAULT_OSC_TARGET),
            osc_address: env_string("OSC_ADDRESS", DEFAULT_OSC_ADDRESS),
            mqtt_broker_host: env_string("MQTT_BROKER_HOST", "localhost"),
            mqtt_broker_port: env_parse("MQTT_BROKER_PORT", 1883)?,
            mqtt_topic: env_string("MQTT_TOPIC", "tapsync/controller/tap"),
            mqtt_device_id: env_string("MQTT_DEVICE_ID", "unknown"),
        })
    }

    pub fn build(&self) -> Result<Box<dyn TriggerSink>, ControllerError> {
        Ok(match self.kind {
            TriggerKind::Osc => Box::new(OscTrigger::new(&self.osc_target, &self.osc_address)?),
            TriggerKind::Mqtt => Box::new(MqttTrigger::new(
                &self.mqtt_broker_host,
                self.mqtt_broker_port,
                self.mqtt_topic.clone(),
                self.mqtt_device_id.clone(),
            )?),
            TriggerKind::Log => Box::new(LogTrigger),
        })
    }
}

/// Landmarks averaged into the tap signal, from `FINGERTIP_LANDMARKS`.
///
/// Shared with the calibration tool so both measure the same points.
pub fn fingertips_from_env() -> anyhow::Result<Vec<HandLandmark>> {
    parse_landmark_set(&env_string("FINGERTIP_LANDMARKS", "17,18,19,20"))
        .map_err(anyhow::Error::msg)
        .context("FINGERTIP_LANDMARKS")
}

/// Experiment labels that name the run folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunLabels {
    pub device: Option<String>,
    pub method: Option<String>,
    pub frequency: Option<String>,
    pub threshold: Option<String>,
    pub output_method: Option<String>,
}

impl RunLabels {
    pub fn from_env() -> Self {
        Self {
            device: env_optional("RUN_DEVICE"),
            method: env_optional("RUN_METHOD"),
            frequency: env_optional("RUN_FREQUENCY"),
            threshold: env_optional("RUN_THRESHOLD"),
            output_method: env_optional("RUN_OUTPUT_METHOD"),
        }
    }

    /// `{device}_{method}_freq{F}Hz_th{T}_out{O}` when every label is set, else `None`.
    pub fn run_name(&self) -> Option<String> {
        let device = self.device.as_deref()?;
        let method = self.method.as_deref()?;
        let frequency = self.frequency.as_deref()?;
        let threshold = self.threshold.as_deref()?;
        let output = self.output_method.as_deref()?;
        Some(format!(
            "{}_{}_freq{}Hz_th{}_out{}",
            sanitize(device),
            sanitize(method),
            sanitize(frequency),
            sanitize(threshold),
            sanitize(output)
        ))
    }
}

/// Keep `[A-Za-z0-9_.-]`, replace everything else with `_`.
fn sanitize(part: &str) -> String {
    part.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub environment: Environment,
    pub mode: SchedulingMode,
    pub frame_shape: FrameShape,
    pub exchange_path: String,
    pub session_control_path: String,
    pub calibration_path: PathBuf,
    pub threshold_policy: ThresholdPolicy,
    pub threshold_override: Option<f64>,
    pub tracked_hand: TrackedHand,
    pub fingertips: Vec<HandLandmark>,
    pub skip_stale: bool,
    pub trigger: TriggerConfig,
    pub output_dir: PathBuf,
    pub run_labels: RunLabels,
    pub archive_frames: bool,
    pub archive_depth: usize,
    pub poll_interval_ms: u64,
    pub detector: DetectorConfig,
    /// Only used in threaded mode, where the controller also runs the producer.
    pub source: SourceConfig,
    pub otel_endpoint: Option<String>,
}

impl ControllerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let frame_shape = env_string("FRAME_SHAPE", paths::DEFAULT_FRAME_SHAPE)
            .parse::<FrameShape>()
            .context("FRAME_SHAPE")?;
        let fingertips = fingertips_from_env()?;

        Ok(Self {
            environment: Environment::from_env(),
            mode: env_parse("PIPELINE_MODE", SchedulingMode::Threaded)?,
            frame_shape,
            exchange_path: env_string("EXCHANGE_PATH", paths::FRAME_EXCHANGE_PATH),
            session_control_path: env_string("SESSION_CONTROL_PATH", paths::SESSION_CONTROL_PATH),
            calibration_path: PathBuf::from(env_string("CALIBRATION_PATH", "calibration.json")),
            threshold_policy: ThresholdPolicy {
                sigma_multiplier: env_parse("THRESHOLD_SIGMA", 3.0)?,
            },
            threshold_override: env_parse_optional("TAP_THRESHOLD_PX")?,
            tracked_hand: env_parse("TRACKED_HAND", TrackedHand::Left)?,
            fingertips,
            skip_stale: env_flag("SKIP_STALE", true)?,
            trigger: TriggerConfig::from_env()?,
            output_dir: PathBuf::from(env_string("RUN_OUTPUT_DIR", "runs")),
            run_labels: RunLabels::from_env(),
            archive_frames: env_flag("ARCHIVE_FRAMES", false)?,
            archive_depth: env_parse("ARCHIVE_DEPTH", crate::archive::DEFAULT_DEPTH)?,
            poll_interval_ms: env_parse("POLL_INTERVAL_MS", 500)?,
            detector: DetectorConfig::from_env()?,
            source: SourceConfig::from_env()?,
            otel_endpoint: env_optional("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }

    /// Tap threshold in pixels: the explicit override, else the policy applied to `calibration`.
    pub fn threshold(&self, calibration: &Calibration) -> f64 {
        self.threshold_override
            .unwrap_or_else(|| self.threshold_policy.threshold(calibration))
    }

    /// Folder for this run's CSVs and trial frames.
    pub fn run_dir(&self) -> PathBuf {
        let name = self
            .run_labels
            .run_name()
            .unwrap_or_else(|| format!("run_{}", Local::now().format("%Y%m%d_%H%M%S")));
        self.output_dir.join(name)
    }
}
