use anyhow::Context;
use bridge::{FrameSubscriber, SessionControl, StopSignal};
use common::{Observability, retry_with_backoff};
use controller::{
    Calibration, ConsumerLoop, ControllerConfig, ControllerError, FrameArchive, SchedulingMode,
    SignalSettings, TapLog, TapStateMachine, attach_exchange, run_attached, run_threaded,
};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use std::sync::Arc;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    let config = ControllerConfig::from_env()?;
    let _observability = Observability::init(
        "controller",
        config.environment,
        config.otel_endpoint.as_deref(),
    )?;

    tracing::info!(mode = %config.mode, "Controller starting with config: {:?}", config);

    let calibration = Calibration::load(&config.calibration_path)
        .context("Failed to load calibration")?;
    let threshold = config.threshold(&calibration);
    let machine = TapStateMachine::new(threshold)?;
    tracing::info!(
        y_line = calibration.y_line,
        threshold_px = threshold,
        "Calibration loaded"
    );

    let stop = match config.mode {
        SchedulingMode::Threaded => StopSignal::new(),
        SchedulingMode::MultiProcess => {
            let session = SessionControl::open(&config.session_control_path).with_context(|| {
                format!(
                    "Failed to open session control at {}",
                    config.session_control_path
                )
            })?;
            StopSignal::with_session(Arc::new(session))
        }
    };
    flag::register(SIGTERM, stop.flag())?;
    flag::register(SIGINT, stop.flag())?;
    tracing::info!("Signal handlers registered (SIGTERM, SIGINT)");

    let run_dir = config.run_dir();
    let tap_log = TapLog::create(&run_dir)
        .with_context(|| format!("Failed to create tap log in {}", run_dir.display()))?;
    let archive = if config.archive_frames {
        Some(FrameArchive::new(&run_dir, config.archive_depth)?)
    } else {
        None
    };
    let trigger = config.trigger.build().context("Failed to set up trigger")?;
    let detector = config.detector.build();
    let settings = SignalSettings {
        tracked_hand: config.tracked_hand,
        fingertips: config.fingertips.clone(),
        reference_y: calibration.y_line,
        skip_stale: config.skip_stale,
    };
    let build_consumer = move |subscriber: FrameSubscriber| {
        let consumer = ConsumerLoop::new(subscriber, detector, trigger, machine, settings)?
            .with_tap_log(tap_log);
        Ok::<_, ControllerError>(match archive {
            Some(archive) => consumer.with_archive(archive),
            None => consumer,
        })
    };

    let result = match config.mode {
        SchedulingMode::Threaded => {
            let mut source = retry_with_backoff(
                || config.source.build(config.frame_shape, &stop),
                5,
                200,
                2_000,
                "Frame source init",
            )
            .context("Failed to initialize frame source")?;
            run_threaded(config.frame_shape, &mut source, build_consumer, &stop)
        }
        SchedulingMode::MultiProcess => {
            let Some(exchange) = attach_exchange(
                &config.exchange_path,
                Duration::from_millis(config.poll_interval_ms),
                &stop,
            ) else {
                tracing::info!("Stopped before the frame exchange appeared");
                return Ok(());
            };
            tracing::info!(
                path = %config.exchange_path,
                shape = %exchange.shape(),
                "Attached to frame exchange"
            );
            run_attached(build_consumer(exchange.subscriber())?, &stop)
        }
    };
    // Whatever ended the consumer also ends the producer.
    stop.set();

    match result {
        Ok(report) => {
            tracing::info!(
                frames = report.consumer.frames_processed,
                taps = report.consumer.taps,
                produced = report.producer.map(|p| p.frames_published),
                run_dir = %run_dir.display(),
                "Controller stopped gracefully"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Controller failed");
            Err(e).context("Controller error")
        }
    }
}
