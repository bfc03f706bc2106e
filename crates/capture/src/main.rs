use anyhow::Context;
use bridge::{SessionControl, SharedFrameExchange, StopSignal};
use capture::{CaptureConfig, ProducerLoop};
use common::{Observability, retry_with_backoff};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let config = CaptureConfig::from_env()?;
    let _observability = Observability::init(
        "capture",
        config.environment,
        config.otel_endpoint.as_deref(),
    )?;

    let session = SessionControl::open(&config.session_control_path).with_context(|| {
        format!(
            "Failed to open session control at {}",
            config.session_control_path
        )
    })?;
    session.reset();
    let stop = StopSignal::with_session(Arc::new(session));

    flag::register(SIGTERM, stop.flag())?;
    flag::register(SIGINT, stop.flag())?;
    tracing::info!("Signal handlers registered (SIGTERM, SIGINT)");

    let exchange = SharedFrameExchange::create(&config.exchange_path, config.frame_shape)
        .with_context(|| format!("Failed to create frame exchange at {}", config.exchange_path))?;
    tracing::info!(
        path = %config.exchange_path,
        shape = %config.frame_shape,
        "Frame exchange created"
    );
    let mut publisher = exchange.publisher();

    let mut source = retry_with_backoff(
        || config.source.build(config.frame_shape, &stop),
        config.open_retries,
        200,
        2_000,
        "Frame source init",
    )
    .context("Failed to initialize frame source")?;

    let result = ProducerLoop::run(&mut source, &mut publisher, &stop);
    // Whatever ended the producer also ends the consumer.
    stop.set();

    match result {
        Ok(report) => {
            tracing::info!(
                exit = ?report.exit,
                frames = report.frames_published,
                "Capture stopped gracefully"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Capture failed");
            Err(e).context("Capture error")
        }
    }
}
