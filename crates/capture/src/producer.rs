use crate::source::{FrameSource, SourceError};
use bridge::{BridgeError, FramePublisher, FrameTimings, StopSignal};
use common::DurationStats;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::time::Instant;
use thiserror::Error;

const STATUS_EVERY: u64 = 30;

#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Frame source failed: {0}")]
    Source(#[source] SourceError),

    #[error("Publish failed: {0}")]
    Publish(#[from] BridgeError),
}

/// Why the producer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerExit {
    /// The stop signal was set by someone else.
    Stopped,
    EndOfStream,
    /// The source returned a frame with no samples.
    EmptyFrame,
}

#[derive(Debug, Clone)]
pub struct ProducerReport {
    pub exit: ProducerExit,
    pub frames_published: u64,
    pub read_total: DurationStats,
    pub acquisition: DurationStats,
}

struct ProducerMetrics {
    read_duration: Histogram<f64>,
    frames: Counter<u64>,
}

impl ProducerMetrics {
    fn new(source: &str) -> (Self, [KeyValue; 1]) {
        let meter = global::meter("capture");
        let latency_buckets = [
            0.0005, 0.001, 0.002, 0.005, 0.0075, 0.01, 0.015, 0.02, 0.03, 0.04, 0.05, 0.075, 0.1,
        ];
        let read_duration = meter
            .f64_histogram("capture_read_duration_seconds")
            .with_description("Producer wall time around a single read_frame call")
            .with_unit("s")
            .with_boundaries(latency_buckets.to_vec())
            .build();
        let frames = meter
            .u64_counter("capture_frames_total")
            .with_description("Total frames published to the exchange")
            .build();
        (
            Self {
                read_duration,
                frames,
            },
            [KeyValue::new("source", source.to_string())],
        )
    }
}

/// Reads frames from a source and publishes each one to the exchange.
///
/// The loop never waits on the consumer; pacing, if any, belongs to the source.
pub struct ProducerLoop;

impl ProducerLoop {
    pub fn run<S: FrameSource + ?Sized>(
        source: &mut S,
        publisher: &mut FramePublisher,
        stop: &StopSignal,
    ) -> Result<ProducerReport, ProducerError> {
        let (metrics, attrs) = ProducerMetrics::new(source.name());
        let mut report = ProducerReport {
            exit: ProducerExit::Stopped,
            frames_published: 0,
            read_total: DurationStats::default(),
            acquisition: DurationStats::default(),
        };

        tracing::info!(source = source.name(), shape = %publisher.shape(), "Producer starting");

        let result = source
            .start()
            .map_err(ProducerError::Source)
            .and_then(|()| Self::pump(source, publisher, stop, &metrics, &attrs, &mut report));

        source.cleanup();

        match result {
            Ok(()) => {
                tracing::info!(
                    exit = ?report.exit,
                    frames = report.frames_published,
                    mean_read_ms = common::as_millis_f64(report.read_total.mean()),
                    max_read_ms = common::as_millis_f64(report.read_total.max()),
                    "Producer stopped"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(error = %e, frames = report.frames_published, "Producer failed");
                stop.set();
                Err(e)
            }
        }
    }

    fn pump<S: FrameSource + ?Sized>(
        source: &mut S,
        publisher: &mut FramePublisher,
        stop: &StopSignal,
        metrics: &ProducerMetrics,
        attrs: &[KeyValue],
        report: &mut ProducerReport,
    ) -> Result<(), ProducerError> {
        loop {
            if stop.is_set() {
                report.exit = ProducerExit::Stopped;
                return Ok(());
            }

            let t0 = Instant::now();
            let read = source.read_frame();
            let read_total = t0.elapsed();

            let (frame, acquisition) = match read {
                Ok(read) => read,
                Err(SourceError::EndOfStream) => {
                    tracing::info!(source = source.name(), "Source reached end of stream");
                    report.exit = ProducerExit::EndOfStream;
                    stop.set();
                    return Ok(());
                }
                Err(e) => return Err(ProducerError::Source(e)),
            };

            if frame.is_empty() {
                if stop.is_set() {
                    // Paced source interrupted mid-wait.
                    report.exit = ProducerExit::Stopped;
                    return Ok(());
                }
                tracing::warn!(source = source.name(), "Source returned an empty frame");
                report.exit = ProducerExit::EmptyFrame;
                stop.set();
                return Ok(());
            }

            let receipt = publisher.publish_with_timings(
                &frame,
                &FrameTimings {
                    read_total,
                    acquisition,
                },
            )?;

            report.frames_published += 1;
            report.read_total.record(read_total);
            report.acquisition.record(acquisition.total());
            metrics
                .read_duration
                .record(read_total.as_secs_f64(), attrs);
            metrics.frames.add(1, attrs);

            if receipt.sequence.is_multiple_of(STATUS_EVERY) {
                tracing::debug!(
                    sequence = receipt.sequence,
                    slot = receipt.slot,
                    read_ms = common::as_millis_f64(read_total),
                    acquisition_ms = common::as_millis_f64(acquisition.acquisition),
                    conversion_ms = common::as_millis_f64(acquisition.conversion),
                    "Producer status"
                );
            }
        }
    }
}
