use crate::config::{Environment, env_parse};
use crate::logging::{install, setup_logging};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
    propagation::TraceContextPropagator,
    trace::{Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::attribute::{SERVICE_NAME, SERVICE_VERSION};
use std::time::Duration;

/// Standard OTel variable, milliseconds.
const METRIC_INTERVAL_VAR: &str = "OTEL_METRIC_EXPORT_INTERVAL";
const DEFAULT_METRIC_INTERVAL_MS: u64 = 10_000;

/// Tracer and meter providers exporting over OTLP, shut down on drop.
pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl TelemetryGuard {
    /// Install the providers globally, then the tracing subscriber.
    ///
    /// Must be called inside a Tokio runtime context (the tonic exporters need one).
    pub fn init(
        service_name: &str,
        endpoint: &str,
        environment: Environment,
    ) -> anyhow::Result<Self> {
        global::set_text_map_propagator(TraceContextPropagator::new());

        let resource = resource(service_name, environment);
        let interval =
            Duration::from_millis(env_parse(METRIC_INTERVAL_VAR, DEFAULT_METRIC_INTERVAL_MS)?);

        let tracer_provider = tracer_provider(endpoint, resource.clone())?;
        global::set_tracer_provider(tracer_provider.clone());

        let meter_provider = meter_provider(endpoint, resource, interval)?;
        global::set_meter_provider(meter_provider.clone());

        install(
            tracing_opentelemetry::layer().with_tracer(global::tracer(service_name.to_string())),
            environment,
        )?;

        Ok(Self {
            tracer_provider,
            meter_provider,
        })
    }
}

fn resource(service_name: &str, environment: Environment) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new(SERVICE_NAME, service_name.to_string()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
            KeyValue::new("deployment.environment", environment.as_str()),
        ])
        .build()
}

fn tracer_provider(endpoint: &str, resource: Resource) -> anyhow::Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
        .with_batch_exporter(exporter)
        .build())
}

fn meter_provider(
    endpoint: &str,
    resource: Resource,
    interval: Duration,
) -> anyhow::Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let reader = PeriodicReader::builder(exporter)
        .with_interval(interval)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("Failed to shutdown tracer provider: {:?}", e);
        }
        if let Err(e) = self.meter_provider.shutdown() {
            eprintln!("Failed to shutdown meter provider: {:?}", e);
        }
    }
}

/// Logging plus optional OTLP export for a binary.
///
/// Holds the Tokio runtime the exporters run on; drop it last in `main`.
pub struct Observability {
    _telemetry: Option<TelemetryGuard>,
    _runtime: Option<tokio::runtime::Runtime>,
}

impl Observability {
    /// With an endpoint, export traces and metrics over OTLP; otherwise local logs only
    /// and the global meter stays a no-op.
    pub fn init(
        service_name: &str,
        environment: Environment,
        otlp_endpoint: Option<&str>,
    ) -> anyhow::Result<Self> {
        match otlp_endpoint {
            Some(endpoint) => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .thread_name("otel-export")
                    .enable_all()
                    .build()?;
                let guard = {
                    let _enter = runtime.enter();
                    TelemetryGuard::init(service_name, endpoint, environment)?
                };
                tracing::info!(service = service_name, endpoint, "OTLP telemetry enabled");
                Ok(Self {
                    _telemetry: Some(guard),
                    _runtime: Some(runtime),
                })
            }
            None => {
                setup_logging(environment)?;
                Ok(Self {
                    _telemetry: None,
                    _runtime: None,
                })
            }
        }
    }
}

/// Creates an info-level span and enters it.
#[macro_export]
macro_rules! span {
    ($name:literal) => {
        tracing::info_span!($name).entered()
    };
    ($name:literal, $($field:tt)+) => {
        tracing::info_span!($name, $($field)+).entered()
    };
}

/// Creates a debug-level span and enters it.
#[macro_export]
macro_rules! span_debug {
    ($name:literal) => {
        tracing::debug_span!($name).entered()
    };
    ($name:literal, $($field:tt)+) => {
        tracing::debug_span!($name, $($field)+).entered()
    };
}
