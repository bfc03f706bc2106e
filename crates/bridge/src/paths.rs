//! Default shared-memory paths and frame geometry.
//!
//! The capture and controller processes must agree on these when running as
//! separate processes; both read overrides from the same environment variables.

/// File-backed frame exchange, created by capture and opened by the controller.
pub const FRAME_EXCHANGE_PATH: &str = "/dev/shm/tapsync_frame_exchange";

/// Session control byte, shared by both processes.
pub const SESSION_CONTROL_PATH: &str = "/dev/shm/tapsync_session_control";

/// Default camera geometry: 540 rows × 720 columns × RGB.
pub const DEFAULT_FRAME_SHAPE: &str = "540x720x3";
