pub mod archive;
pub mod calibration;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod session;
pub mod signal;
pub mod tap;
pub mod tap_log;
pub mod trigger;

pub use archive::FrameArchive;
pub use calibration::{Calibration, ThresholdPolicy};
pub use config::{ControllerConfig, RunLabels, TriggerConfig, TriggerKind, fingertips_from_env};
pub use consumer::{ConsumerLoop, ConsumerReport, SignalSettings, StepOutcome};
pub use errors::ControllerError;
pub use session::{SchedulingMode, SessionReport, attach_exchange, run_attached, run_threaded};
pub use signal::{DEFAULT_FINGERTIPS, TrackedHand, tap_signal};
pub use tap::{TapEvent, TapState, TapStateMachine};
pub use tap_log::{TapLog, TapRecord};
pub use trigger::{LogTrigger, MqttTrigger, OscTrigger, TriggerSink};
