use crate::archive::FrameArchive;
use crate::errors::ControllerError;
use crate::signal::{DEFAULT_FINGERTIPS, TrackedHand, tap_signal};
use crate::tap::{TapEvent, TapStateMachine};
use crate::tap_log::{TapLog, TapRecord};
use crate::trigger::TriggerSink;
use bridge::{Frame, FrameMeta, FrameSubscriber, IdleBackoff, MonotonicTime, StopSignal};
use common::{DurationStats, span, span_debug};
use inference::{Detector, HandLandmark};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::time::{Duration, Instant};

const STATUS_EVERY: u64 = 30;

/// How detections become the tap signal.
#[derive(Debug, Clone)]
pub struct SignalSettings {
    pub tracked_hand: TrackedHand,
    pub fingertips: Vec<HandLandmark>,
    /// Reference line, pixels from the top of the frame.
    pub reference_y: f64,
    /// Skip detection when no frame was published since the last one.
    pub skip_stale: bool,
}

impl SignalSettings {
    pub fn new(reference_y: f64) -> Self {
        Self {
            tracked_hand: TrackedHand::Left,
            fingertips: DEFAULT_FINGERTIPS.to_vec(),
            reference_y,
            skip_stale: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing new to process.
    Idle,
    Processed {
        sequence: u64,
        hands: usize,
        taps: Vec<TapEvent>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ConsumerReport {
    pub frames_processed: u64,
    pub taps: u64,
    /// Frames published but never seen by the consumer.
    pub frames_skipped: u64,
    pub trigger_failures: u64,
    pub frame_age: DurationStats,
    pub detection: DurationStats,
}

struct ConsumerMetrics {
    frame_age: Histogram<f64>,
    detection: Histogram<f64>,
    taps: Counter<u64>,
    attrs: [KeyValue; 1],
}

impl ConsumerMetrics {
    fn new(detector: &str) -> Self {
        let meter = global::meter("controller");
        let latency_buckets = vec![
            0.0005, 0.001, 0.002, 0.005, 0.0075, 0.01, 0.015, 0.02, 0.03, 0.04, 0.05, 0.075, 0.1,
        ];
        Self {
            frame_age: meter
                .f64_histogram("consumer_frame_age_seconds")
                .with_description("Time between publish and acquire of a consumed frame")
                .with_unit("s")
                .with_boundaries(latency_buckets.clone())
                .build(),
            detection: meter
                .f64_histogram("consumer_detection_duration_seconds")
                .with_description("Hand detection time per frame")
                .with_unit("s")
                .with_boundaries(latency_buckets)
                .build(),
            taps: meter
                .u64_counter("consumer_taps_total")
                .with_description("Total taps detected")
                .build(),
            attrs: [KeyValue::new("detector", detector.to_string())],
        }
    }
}

/// Acquires the latest frame, runs detection and drives the tap state machine.
pub struct ConsumerLoop<D, T> {
    subscriber: FrameSubscriber,
    detector: D,
    trigger: T,
    machine: TapStateMachine,
    settings: SignalSettings,
    frame: Frame,
    tap_log: Option<TapLog>,
    archive: Option<FrameArchive>,
    backoff: IdleBackoff,
    metrics: ConsumerMetrics,
    report: ConsumerReport,
}

impl<D: Detector, T: TriggerSink> ConsumerLoop<D, T> {
    pub fn new(
        subscriber: FrameSubscriber,
        detector: D,
        trigger: T,
        machine: TapStateMachine,
        settings: SignalSettings,
    ) -> Result<Self, ControllerError> {
        if settings.fingertips.is_empty() {
            return Err(ControllerError::Configuration(
                "fingertip landmark set is empty".to_string(),
            ));
        }
        let frame = Frame::try_new(subscriber.shape())?;
        let metrics = ConsumerMetrics::new(detector.name());
        Ok(Self {
            subscriber,
            detector,
            trigger,
            machine,
            settings,
            frame,
            tap_log: None,
            archive: None,
            backoff: IdleBackoff::default(),
            metrics,
            report: ConsumerReport::default(),
        })
    }

    pub fn with_tap_log(mut self, log: TapLog) -> Self {
        self.tap_log = Some(log);
        self
    }

    pub fn with_archive(mut self, archive: FrameArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn machine(&self) -> &TapStateMachine {
        &self.machine
    }

    pub fn report(&self) -> &ConsumerReport {
        &self.report
    }

    /// One consumer iteration.
    pub fn step(&mut self) -> Result<StepOutcome, ControllerError> {
        if self.settings.skip_stale && !self.subscriber.has_new_frame() {
            return Ok(StepOutcome::Idle);
        }

        let meta = match self.subscriber.acquire_latest_into(&mut self.frame) {
            Ok(Some(meta)) => meta,
            Ok(None) => return Ok(StepOutcome::Idle),
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "Frame acquire failed, retrying");
                return Ok(StepOutcome::Idle);
            }
            Err(e) => return Err(e.into()),
        };

        self.report.frames_skipped += meta.skipped;
        self.report.frame_age.record(meta.age);
        self.metrics
            .frame_age
            .record(meta.age.as_secs_f64(), &self.metrics.attrs);

        if let Some(archive) = self.archive.as_mut() {
            archive.push(&self.frame);
        }

        let _s = span_debug!("consumer_detect", sequence = meta.sequence);
        let started = Instant::now();
        let observations = self
            .detector
            .detect(&self.frame)
            .map_err(ControllerError::Detector)?;
        let detection = started.elapsed();
        self.report.detection.record(detection);
        self.metrics
            .detection
            .record(detection.as_secs_f64(), &self.metrics.attrs);

        let height = self.frame.height();
        let mut taps = Vec::new();
        for observation in &observations {
            if !self.settings.tracked_hand.accepts(observation.handedness) {
                continue;
            }
            let Some(signal) = tap_signal(
                observation,
                &self.settings.fingertips,
                height,
                self.settings.reference_y,
            ) else {
                tracing::trace!(sequence = meta.sequence, "Hand without fingertip landmarks");
                continue;
            };

            if let Some(event) = self.machine.update(signal) {
                self.on_tap(event, signal, &meta, detection)?;
                taps.push(event);
            }
        }

        self.report.frames_processed += 1;
        if self.report.frames_processed.is_multiple_of(STATUS_EVERY) {
            tracing::debug!(
                sequence = meta.sequence,
                age_ms = common::as_millis_f64(meta.age),
                detect_ms = common::as_millis_f64(detection),
                hands = observations.len(),
                state = ?self.machine.state(),
                skipped = self.report.frames_skipped,
                "Consumer status"
            );
        }

        Ok(StepOutcome::Processed {
            sequence: meta.sequence,
            hands: observations.len(),
            taps,
        })
    }

    fn on_tap(
        &mut self,
        event: TapEvent,
        signal: f64,
        meta: &FrameMeta,
        detection: Duration,
    ) -> Result<(), ControllerError> {
        let _s = span!("tap", tap = event.count, sequence = meta.sequence);
        self.report.taps += 1;
        self.metrics.taps.add(1, &self.metrics.attrs);
        tracing::info!(
            tap = event.count,
            signal_px = signal,
            threshold_px = self.machine.threshold(),
            sequence = meta.sequence,
            age_ms = common::as_millis_f64(meta.age),
            "Tap detected"
        );

        if let Err(e) = self.trigger.fire(&event) {
            self.report.trigger_failures += 1;
            tracing::warn!(error = %e, sink = self.trigger.name(), "Trigger failed");
        }

        let record_time_s = MonotonicTime::now()?.as_nanos() as f64 / 1e9;

        let frames_folder = match self.archive.as_mut() {
            Some(archive) => match archive.save_trial(event.count) {
                Ok(folder) => Some(folder),
                Err(e) => {
                    tracing::warn!(error = %e, tap = event.count, "Failed to archive trial frames");
                    None
                }
            },
            None => None,
        };

        if let Some(log) = self.tap_log.as_mut() {
            log.record(&TapRecord {
                record_time_s,
                tap_number: event.count,
                frame_age: meta.age,
                timings: meta.timings,
                detection,
                frames_folder,
            })?;
        }
        Ok(())
    }

    /// Step until `stop` is set, backing off while no new frame arrives.
    ///
    /// A failing step sets `stop` so the producer ends too.
    pub fn run(&mut self, stop: &StopSignal) -> Result<ConsumerReport, ControllerError> {
        tracing::info!(
            detector = self.detector.name(),
            trigger = self.trigger.name(),
            threshold_px = self.machine.threshold(),
            reference_y = self.settings.reference_y,
            tracked_hand = %self.settings.tracked_hand,
            "Consumer starting"
        );

        let result = self.pump(stop);
        self.flush();

        match result {
            Ok(()) => {
                tracing::info!(
                    frames = self.report.frames_processed,
                    taps = self.report.taps,
                    skipped = self.report.frames_skipped,
                    lapped_reads = self.subscriber.lapped_reads(),
                    mean_age_ms = common::as_millis_f64(self.report.frame_age.mean()),
                    max_age_ms = common::as_millis_f64(self.report.frame_age.max()),
                    mean_detect_ms = common::as_millis_f64(self.report.detection.mean()),
                    "Consumer stopped"
                );
                Ok(self.report.clone())
            }
            Err(e) => {
                tracing::error!(error = %e, frames = self.report.frames_processed, "Consumer failed");
                stop.set();
                Err(e)
            }
        }
    }

    fn pump(&mut self, stop: &StopSignal) -> Result<(), ControllerError> {
        while !stop.is_set() {
            match self.step()? {
                StepOutcome::Idle => self.backoff.idle(stop),
                StepOutcome::Processed { .. } => self.backoff.reset(),
            }
        }
        Ok(())
    }

    fn flush(&mut self) {
        if let Some(log) = self.tap_log.as_mut()
            && let Err(e) = log.flush()
        {
            tracing::warn!(error = %e, "Failed to flush tap log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::LogTrigger;
    use bridge::{FramePublisher, FrameShape, SharedFrameExchange};
    use inference::{HandObservation, Handedness, Landmark};
    use std::sync::{Arc, Mutex};

    const HEIGHT: u32 = 100;

    fn shape() -> FrameShape {
        FrameShape::new(HEIGHT, 4, 1).unwrap()
    }

    /// Reads the hand's normalized `y` from the first byte of the frame (0 = no hand).
    struct ByteDetector {
        handedness: Handedness,
    }

    impl Detector for ByteDetector {
        fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<HandObservation>> {
            let row = frame.as_bytes()[0];
            if row == 0 {
                return Ok(Vec::new());
            }
            let y = row as f32 / HEIGHT as f32;
            Ok(vec![HandObservation {
                handedness: self.handedness,
                landmarks: vec![Landmark { x: 0.5, y, z: 0.0 }; HandLandmark::COUNT],
            }])
        }

        fn name(&self) -> &str {
            "byte"
        }
    }

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn detect(&mut self, _frame: &Frame) -> anyhow::Result<Vec<HandObservation>> {
            anyhow::bail!("model crashed")
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[derive(Clone, Default)]
    struct RecordingTrigger {
        fired: Arc<Mutex<Vec<u64>>>,
        fail: bool,
    }

    impl TriggerSink for RecordingTrigger {
        fn fire(&mut self, event: &TapEvent) -> Result<(), ControllerError> {
            self.fired.lock().unwrap().push(event.count);
            if self.fail {
                return Err(ControllerError::Trigger("unreachable".into()));
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn publish_row(publisher: &mut FramePublisher, row: u8) {
        publisher.publish(&Frame::filled(shape(), row)).unwrap();
    }

    fn consumer<D: Detector, T: TriggerSink>(
        detector: D,
        trigger: T,
        threshold: f64,
    ) -> (FramePublisher, ConsumerLoop<D, T>) {
        let (publisher, subscriber) = SharedFrameExchange::initialize(shape()).unwrap().split();
        let consumer = ConsumerLoop::new(
            subscriber,
            detector,
            trigger,
            TapStateMachine::new(threshold).unwrap(),
            SignalSettings::new(0.0),
        )
        .unwrap();
        (publisher, consumer)
    }

    #[test]
    fn test_idle_before_first_publish() {
        let detector = ByteDetector {
            handedness: Handedness::Left,
        };
        let (_publisher, mut consumer) = consumer(detector, LogTrigger, 10.0);
        assert_eq!(consumer.step().unwrap(), StepOutcome::Idle);
    }

    #[test]
    fn test_stale_frame_is_not_reprocessed() {
        let detector = ByteDetector {
            handedness: Handedness::Left,
        };
        let (mut publisher, mut consumer) = consumer(detector, LogTrigger, 10.0);
        publish_row(&mut publisher, 50);

        assert!(matches!(
            consumer.step().unwrap(),
            StepOutcome::Processed { sequence: 1, hands: 1, .. }
        ));
        assert_eq!(consumer.step().unwrap(), StepOutcome::Idle);

        consumer.settings.skip_stale = false;
        assert!(matches!(
            consumer.step().unwrap(),
            StepOutcome::Processed { sequence: 1, .. }
        ));
    }

    #[test]
    fn test_taps_fire_trigger_once_per_approach() {
        let trigger = RecordingTrigger::default();
        let fired = Arc::clone(&trigger.fired);
        let detector = ByteDetector {
            handedness: Handedness::Left,
        };
        let (mut publisher, mut consumer) = consumer(detector, trigger, 23.0);

        let mut tap_frames = Vec::new();
        for (i, row) in [50u8, 40, 10, 8, 35, 5].into_iter().enumerate() {
            publish_row(&mut publisher, row);
            if let StepOutcome::Processed { taps, .. } = consumer.step().unwrap()
                && !taps.is_empty()
            {
                tap_frames.push(i + 1);
            }
        }

        assert_eq!(tap_frames, vec![3, 6]);
        assert_eq!(consumer.machine().count(), 2);
        assert_eq!(*fired.lock().unwrap(), vec![1, 2]);
        assert_eq!(consumer.report().taps, 2);
    }

    #[test]
    fn test_untracked_hand_is_ignored() {
        let detector = ByteDetector {
            handedness: Handedness::Right,
        };
        let (mut publisher, mut consumer) = consumer(detector, LogTrigger, 23.0);
        publish_row(&mut publisher, 5);

        match consumer.step().unwrap() {
            StepOutcome::Processed { hands, taps, .. } => {
                assert_eq!(hands, 1);
                assert!(taps.is_empty());
            }
            StepOutcome::Idle => panic!("Frame should be processed"),
        }
        assert_eq!(consumer.machine().count(), 0);
    }

    #[test]
    fn test_trigger_failure_is_not_fatal() {
        let trigger = RecordingTrigger {
            fail: true,
            ..RecordingTrigger::default()
        };
        let detector = ByteDetector {
            handedness: Handedness::Left,
        };
        let (mut publisher, mut consumer) = consumer(detector, trigger, 23.0);
        publish_row(&mut publisher, 5);

        assert!(consumer.step().is_ok());
        assert_eq!(consumer.report().trigger_failures, 1);
        assert_eq!(consumer.machine().count(), 1);
    }

    #[test]
    fn test_detector_error_sets_stop() {
        let (mut publisher, mut consumer) = consumer(FailingDetector, LogTrigger, 23.0);
        publish_row(&mut publisher, 5);

        let stop = StopSignal::new();
        let err = consumer.run(&stop).unwrap_err();
        assert!(matches!(err, ControllerError::Detector(_)));
        assert!(stop.is_set());
    }

    #[test]
    fn test_skipped_frames_are_counted() {
        let detector = ByteDetector {
            handedness: Handedness::Left,
        };
        let (mut publisher, mut consumer) = consumer(detector, LogTrigger, 23.0);
        publish_row(&mut publisher, 50);
        consumer.step().unwrap();
        for _ in 0..4 {
            publish_row(&mut publisher, 50);
        }
        consumer.step().unwrap();

        assert_eq!(consumer.report().frames_processed, 2);
        assert_eq!(consumer.report().frames_skipped, 3);
    }

    #[test]
    fn test_empty_fingertip_set_is_rejected() {
        let (_publisher, subscriber) = SharedFrameExchange::initialize(shape()).unwrap().split();
        let mut settings = SignalSettings::new(0.0);
        settings.fingertips.clear();
        let result = ConsumerLoop::new(
            subscriber,
            FailingDetector,
            LogTrigger,
            TapStateMachine::new(1.0).unwrap(),
            settings,
        );
        assert!(matches!(result, Err(ControllerError::Configuration(_))));
    }
}
