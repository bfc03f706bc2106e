pub mod config;
pub mod logging;
pub mod retry;
pub mod stats;
pub mod telemetry;
pub mod wait;

pub use config::{Environment, env_flag, env_optional, env_parse, env_parse_optional, env_string};
pub use logging::setup_logging;
pub use retry::retry_with_backoff;
pub use stats::{DurationStats, as_millis_f64};
pub use telemetry::{Observability, TelemetryGuard};
pub use wait::wait_for_resource;
