use crate::consumer::{ConsumerLoop, ConsumerReport};
use crate::errors::ControllerError;
use crate::trigger::TriggerSink;
use anyhow::{Context, anyhow};
use bridge::{FrameShape, FrameSubscriber, SharedFrameExchange, StopSignal};
use capture::{FrameSource, ProducerLoop, ProducerReport};
use common::wait_for_resource;
use inference::Detector;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// How producer and consumer are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingMode {
    /// Producer on a scoped thread, consumer on the caller's thread, one anonymous exchange.
    Threaded,
    /// The `capture` binary owns a file-backed exchange; this process only consumes.
    MultiProcess,
}

impl fmt::Display for SchedulingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingMode::Threaded => f.write_str("threaded"),
            SchedulingMode::MultiProcess => f.write_str("multi-process"),
        }
    }
}

impl FromStr for SchedulingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "threaded" | "thread" | "threads" => Ok(SchedulingMode::Threaded),
            "multi-process" | "multiprocess" | "process" | "processes" => {
                Ok(SchedulingMode::MultiProcess)
            }
            other => Err(format!(
                "unknown pipeline mode {:?} (threaded|multi-process)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    /// `None` when the producer ran in another process.
    pub producer: Option<ProducerReport>,
    pub consumer: ConsumerReport,
}

/// Run producer and consumer in this process until either one stops.
///
/// `build_consumer` receives the subscriber of a fresh anonymous exchange.
pub fn run_threaded<S, F, D, T>(
    shape: FrameShape,
    source: &mut S,
    build_consumer: F,
    stop: &StopSignal,
) -> anyhow::Result<SessionReport>
where
    S: FrameSource + ?Sized,
    F: FnOnce(FrameSubscriber) -> Result<ConsumerLoop<D, T>, ControllerError>,
    D: Detector,
    T: TriggerSink,
{
    let (mut publisher, subscriber) = SharedFrameExchange::initialize(shape)
        .context("Failed to initialize frame exchange")?
        .split();
    let mut consumer = build_consumer(subscriber)?;

    tracing::info!(shape = %shape, "Threaded session starting");

    std::thread::scope(|scope| {
        let producer = std::thread::Builder::new()
            .name("producer".to_string())
            .spawn_scoped(scope, || {
                let result = ProducerLoop::run(source, &mut publisher, stop);
                stop.set();
                result
            })
            .context("Failed to spawn producer thread")?;

        let consumer_result = consumer.run(stop);
        // Covers a consumer that returned without stop being set.
        stop.set();

        let producer_result = producer
            .join()
            .map_err(|_| anyhow!("producer thread panicked"))?;

        let consumer = consumer_result.context("Consumer failed")?;
        let producer = producer_result.context("Producer failed")?;
        Ok(SessionReport {
            producer: Some(producer),
            consumer,
        })
    })
}

/// Wait for the producer process to create the exchange at `path`.
///
/// Returns `None` when `stop` is set first.
pub fn attach_exchange(
    path: impl AsRef<Path>,
    poll_interval: Duration,
    stop: &StopSignal,
) -> Option<SharedFrameExchange> {
    let path = path.as_ref();
    wait_for_resource(
        || SharedFrameExchange::open(path),
        || stop.is_set(),
        poll_interval,
        "Frame exchange",
    )
}

/// Consume from an exchange published by another process.
pub fn run_attached<D: Detector, T: TriggerSink>(
    mut consumer: ConsumerLoop<D, T>,
    stop: &StopSignal,
) -> anyhow::Result<SessionReport> {
    tracing::info!("Attached session starting");
    let report = consumer.run(stop).context("Consumer failed")?;
    Ok(SessionReport {
        producer: None,
        consumer: report,
    })
}
