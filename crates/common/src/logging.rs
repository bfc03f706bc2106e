use crate::config::Environment;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global tracing subscriber: pretty output in development,
/// JSON in production, filtered by `RUST_LOG` (default `info`).
///
/// An OpenTelemetry layer is included so spans reach a tracer provider if one
/// has been installed. Fails if a subscriber is already set.
pub fn setup_logging(environment: Environment) -> anyhow::Result<()> {
    install(tracing_opentelemetry::layer(), environment)
}

/// Registry with the env filter, `otel_layer` and the environment's formatter.
pub(crate) fn install<L>(otel_layer: L, environment: Environment) -> anyhow::Result<()>
where
    L: Layer<Layered<EnvFilter, Registry>> + Send + Sync + 'static,
{
    let fmt_layer = match environment {
        Environment::Production => tracing_subscriber::fmt::layer()
            .json()
            .with_level(true)
            .boxed(),
        Environment::Development => tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(otel_layer)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}
