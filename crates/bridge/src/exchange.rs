//! Double-buffered, last-frame-wins handoff between one producer and one consumer.
//!
//! The publisher always writes the slot that is *not* current and then flips the
//! slot index, so the consumer can copy the current slot without ever blocking
//! the producer. Each slot carries a seqlock version: if a slow consumer is
//! lapped (the producer flips twice during one copy and starts rewriting the
//! slot being read), the version changes and the copy is retried against the
//! new current slot instead of returning a torn frame.
//!
//! Pixels are moved word by word through relaxed atomics, so a lapped read is a
//! detected retry rather than a data race.

use crate::clock::MonotonicTime;
use crate::errors::BridgeError;
use crate::frame::{AcquisitionTimings, Frame, FrameShape, FrameTimings};
use crate::region::ExchangeRegion;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering, fence};
use std::time::Duration;

const WORD: usize = std::mem::size_of::<u64>();

/// Shared storage for the freshest frame: two slots, an atomic slot index and an
/// atomic publish timestamp.
///
/// Construct once and hand its two sides to the producer and consumer tasks with
/// [`split`](Self::split) (threads) or [`publisher`](Self::publisher) /
/// [`subscriber`](Self::subscriber) (one side per process).
pub struct SharedFrameExchange {
    region: Arc<ExchangeRegion>,
}

impl SharedFrameExchange {
    /// In-process exchange on an anonymous mapping. Slot index and timestamp start at 0.
    pub fn initialize(shape: FrameShape) -> Result<Self, BridgeError> {
        let region = ExchangeRegion::anonymous(shape)?;
        tracing::debug!(%shape, "Frame exchange initialized");
        Ok(Self {
            region: Arc::new(region),
        })
    }

    /// File-backed exchange for a producer process. The file is removed when the
    /// exchange (and every handle split from it) is dropped.
    pub fn create(path: impl AsRef<Path>, shape: FrameShape) -> Result<Self, BridgeError> {
        let region = ExchangeRegion::create(&path, shape)?;
        tracing::debug!(%shape, path = %path.as_ref().display(), "Shared frame exchange created");
        Ok(Self {
            region: Arc::new(region),
        })
    }

    /// Attach to a file-backed exchange created by another process.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let region = ExchangeRegion::open(&path)?;
        Ok(Self {
            region: Arc::new(region),
        })
    }

    /// Split into the single publisher and the single subscriber.
    pub fn split(self) -> (FramePublisher, FrameSubscriber) {
        let subscriber = FrameSubscriber::new(Arc::clone(&self.region));
        (FramePublisher::new(self.region), subscriber)
    }

    pub fn publisher(self) -> FramePublisher {
        FramePublisher::new(self.region)
    }

    pub fn subscriber(self) -> FrameSubscriber {
        FrameSubscriber::new(self.region)
    }

    pub fn shape(&self) -> FrameShape {
        self.region.layout().shape
    }

    pub fn current_slot(&self) -> usize {
        current_slot(&self.region)
    }

    pub fn sequence(&self) -> u64 {
        self.region.header().sequence.load(Ordering::Acquire)
    }

    /// Timestamp of the last completed publish, `None` before the first one.
    pub fn last_publish(&self) -> Option<MonotonicTime> {
        last_publish(&self.region)
    }

    /// Raw publish timestamp in monotonic nanoseconds, 0 before the first publish.
    pub fn last_publish_ns(&self) -> u64 {
        self.region.header().publish_ns.load(Ordering::Acquire)
    }

    /// Backing file, if this exchange created one.
    pub fn path(&self) -> Option<&Path> {
        self.region.path()
    }
}

/// Receipt for a completed publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub sequence: u64,
    pub slot: usize,
    pub published: MonotonicTime,
}

/// Metadata of an acquired frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    /// Publish sequence that produced this frame (1-based).
    pub sequence: u64,
    pub slot: usize,
    pub published: MonotonicTime,
    /// Consumer read time minus publish time.
    pub age: Duration,
    pub timings: FrameTimings,
    /// Publishes overwritten since the previous acquire.
    pub skipped: u64,
}

#[derive(Debug, Clone)]
pub struct AcquiredFrame {
    pub frame: Frame,
    pub meta: FrameMeta,
}

/// Producer side of the exchange. Not `Clone`: there is exactly one writer.
pub struct FramePublisher {
    region: Arc<ExchangeRegion>,
    sequence: u64,
}

impl FramePublisher {
    fn new(region: Arc<ExchangeRegion>) -> Self {
        // Continue from the stored sequence so a restarted writer never goes backwards.
        let sequence = region.header().sequence.load(Ordering::Acquire);
        Self { region, sequence }
    }

    pub fn publish(&mut self, frame: &Frame) -> Result<PublishReceipt, BridgeError> {
        self.publish_with_timings(frame, &FrameTimings::default())
    }

    /// Copy `frame` into the non-current slot and advertise it as current.
    ///
    /// Never waits on the consumer: cost is the frame copy plus a handful of atomic stores.
    pub fn publish_with_timings(
        &mut self,
        frame: &Frame,
        timings: &FrameTimings,
    ) -> Result<PublishReceipt, BridgeError> {
        let expected = self.region.layout().shape;
        if frame.shape() != expected {
            return Err(BridgeError::ShapeMismatch {
                expected,
                actual: frame.shape(),
            });
        }
        if frame.is_empty() {
            return Err(BridgeError::Configuration(
                "cannot publish an empty frame".to_string(),
            ));
        }

        let header = self.region.header();
        let target = 1 - current_slot(&self.region);
        let slot = &header.slots[target];

        let version = slot.version.load(Ordering::Relaxed);
        slot.version.store(version.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        store_words(self.region.slot(target), frame.as_bytes());

        let published = match MonotonicTime::now() {
            Ok(now) => now,
            Err(e) => {
                // The slot is not current; close it so readers are never stuck.
                slot.version.store(version.wrapping_add(2), Ordering::Release);
                return Err(e);
            }
        };
        let sequence = self.sequence + 1;

        slot.sequence.store(sequence, Ordering::Relaxed);
        slot.published_ns
            .store(published.as_nanos(), Ordering::Relaxed);
        slot.read_total_ns
            .store(nanos(timings.read_total), Ordering::Relaxed);
        slot.acquisition_ns
            .store(nanos(timings.acquisition.acquisition), Ordering::Relaxed);
        slot.timestamp_ns
            .store(nanos(timings.acquisition.timestamp), Ordering::Relaxed);
        slot.conversion_ns
            .store(nanos(timings.acquisition.conversion), Ordering::Relaxed);
        slot.version.store(version.wrapping_add(2), Ordering::Release);

        // Timestamp before index: a reader that sees the new index also sees a fresh stamp.
        header
            .publish_ns
            .store(published.as_nanos(), Ordering::Release);
        header.current_slot.store(target as u64, Ordering::Release);
        header.sequence.store(sequence, Ordering::Release);
        self.sequence = sequence;

        Ok(PublishReceipt {
            sequence,
            slot: target,
            published,
        })
    }

    pub fn shape(&self) -> FrameShape {
        self.region.layout().shape
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn current_slot(&self) -> usize {
        current_slot(&self.region)
    }
}

/// Consumer side of the exchange. Not `Clone`: there is exactly one reader.
pub struct FrameSubscriber {
    region: Arc<ExchangeRegion>,
    last_sequence: u64,
    lapped_reads: u64,
}

impl FrameSubscriber {
    fn new(region: Arc<ExchangeRegion>) -> Self {
        Self {
            region,
            last_sequence: 0,
            lapped_reads: 0,
        }
    }

    /// True when a publish completed since the last successful acquire.
    pub fn has_new_frame(&self) -> bool {
        self.region.header().sequence.load(Ordering::Acquire) > self.last_sequence
    }

    /// Copy the most recently published frame into a fresh buffer.
    ///
    /// Returns `Ok(None)` before the first publish.
    pub fn acquire_latest(&mut self) -> Result<Option<AcquiredFrame>, BridgeError> {
        let mut frame = Frame::try_new(self.shape())?;
        Ok(self
            .acquire_latest_into(&mut frame)?
            .map(|meta| AcquiredFrame { frame, meta }))
    }

    /// Copy the most recently published frame into `frame`, reusing its allocation.
    pub fn acquire_latest_into(
        &mut self,
        frame: &mut Frame,
    ) -> Result<Option<FrameMeta>, BridgeError> {
        frame.ensure_shape(self.shape())?;
        let header = self.region.header();

        let (index, raw) = loop {
            let index = current_slot(&self.region);
            let slot = &header.slots[index];

            let before = slot.version.load(Ordering::Acquire);
            if before & 1 == 1 {
                // Lapped: the producer is already rewriting this slot.
                self.lapped_reads += 1;
                std::hint::spin_loop();
                continue;
            }

            load_words(self.region.slot(index), frame.as_bytes_mut());
            let raw = RawSlotMeta {
                sequence: slot.sequence.load(Ordering::Relaxed),
                published_ns: slot.published_ns.load(Ordering::Relaxed),
                read_total_ns: slot.read_total_ns.load(Ordering::Relaxed),
                acquisition_ns: slot.acquisition_ns.load(Ordering::Relaxed),
                timestamp_ns: slot.timestamp_ns.load(Ordering::Relaxed),
                conversion_ns: slot.conversion_ns.load(Ordering::Relaxed),
            };

            fence(Ordering::Acquire);
            if slot.version.load(Ordering::Relaxed) == before {
                break (index, raw);
            }

            self.lapped_reads += 1;
            tracing::trace!(slot = index, "Slot rewritten during copy, retrying");
        };

        if raw.sequence == 0 {
            return Ok(None);
        }

        let now = MonotonicTime::now()?;
        let published = MonotonicTime::from_nanos(raw.published_ns);
        let skipped = if self.last_sequence == 0 {
            0
        } else {
            raw.sequence.saturating_sub(self.last_sequence + 1)
        };
        self.last_sequence = self.last_sequence.max(raw.sequence);

        Ok(Some(FrameMeta {
            sequence: raw.sequence,
            slot: index,
            published,
            age: now.saturating_duration_since(published),
            timings: raw.timings(),
            skipped,
        }))
    }

    pub fn shape(&self) -> FrameShape {
        self.region.layout().shape
    }

    /// Sequence of the last frame handed out, 0 if none yet.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Number of copies discarded because the producer overtook the reader.
    pub fn lapped_reads(&self) -> u64 {
        self.lapped_reads
    }

    pub fn current_slot(&self) -> usize {
        current_slot(&self.region)
    }

    pub fn last_publish(&self) -> Option<MonotonicTime> {
        last_publish(&self.region)
    }
}

struct RawSlotMeta {
    sequence: u64,
    published_ns: u64,
    read_total_ns: u64,
    acquisition_ns: u64,
    timestamp_ns: u64,
    conversion_ns: u64,
}

impl RawSlotMeta {
    fn timings(&self) -> FrameTimings {
        FrameTimings {
            read_total: Duration::from_nanos(self.read_total_ns),
            acquisition: AcquisitionTimings {
                acquisition: Duration::from_nanos(self.acquisition_ns),
                timestamp: Duration::from_nanos(self.timestamp_ns),
                conversion: Duration::from_nanos(self.conversion_ns),
            },
        }
    }
}

#[inline]
fn current_slot(region: &ExchangeRegion) -> usize {
    (region.header().current_slot.load(Ordering::Acquire) & 1) as usize
}

fn last_publish(region: &ExchangeRegion) -> Option<MonotonicTime> {
    match region.header().publish_ns.load(Ordering::Acquire) {
        0 => None,
        ns => Some(MonotonicTime::from_nanos(ns)),
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

fn store_words(words: &[AtomicU64], bytes: &[u8]) {
    let mut chunks = bytes.chunks_exact(WORD);
    for (word, chunk) in words.iter().zip(&mut chunks) {
        let mut buf = [0u8; WORD];
        buf.copy_from_slice(chunk);
        word.store(u64::from_ne_bytes(buf), Ordering::Relaxed);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut buf = [0u8; WORD];
        buf[..tail.len()].copy_from_slice(tail);
        words[bytes.len() / WORD].store(u64::from_ne_bytes(buf), Ordering::Relaxed);
    }
}

fn load_words(words: &[AtomicU64], bytes: &mut [u8]) {
    let full_words = bytes.len() / WORD;
    let mut chunks = bytes.chunks_exact_mut(WORD);
    for (word, chunk) in words.iter().zip(&mut chunks) {
        chunk.copy_from_slice(&word.load(Ordering::Relaxed).to_ne_bytes());
    }

    let tail = chunks.into_remainder();
    if !tail.is_empty() {
        let last = words[full_words].load(Ordering::Relaxed).to_ne_bytes();
        let len = tail.len();
        tail.copy_from_slice(&last[..len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> FrameShape {
        FrameShape::new(4, 5, 3).unwrap()
    }

    #[test]
    fn test_initialize_rejects_invalid_shape() {
        assert!(matches!(
            FrameShape::new(0, 5, 3).and_then(SharedFrameExchange::initialize),
            Err(BridgeError::Configuration(_))
        ));
    }

    #[test]
    fn test_acquire_before_publish_returns_none() {
        let exchange = SharedFrameExchange::initialize(shape()).unwrap();
        assert_eq!(exchange.current_slot(), 0);
        assert_eq!(exchange.sequence(), 0);
        assert!(exchange.last_publish().is_none());

        let (_publisher, mut subscriber) = exchange.split();
        assert!(!subscriber.has_new_frame());
        assert!(subscriber.acquire_latest().unwrap().is_none());
        // Repeated calls stay in the initial state.
        assert!(subscriber.acquire_latest().unwrap().is_none());
    }

    #[test]
    fn test_publish_then_acquire_returns_same_bytes() {
        let (mut publisher, mut subscriber) =
            SharedFrameExchange::initialize(shape()).unwrap().split();

        // 60 bytes: not a multiple of the word size, exercises the tail path.
        let data: Vec<u8> = (0..60).collect();
        let frame = Frame::from_vec(shape(), data).unwrap();
        let receipt = publisher.publish(&frame).unwrap();

        assert_eq!(receipt.sequence, 1);
        assert_eq!(receipt.slot, 1);

        let acquired = subscriber.acquire_latest().unwrap().unwrap();
        assert_eq!(acquired.frame, frame);
        assert_eq!(acquired.meta.sequence, 1);
        assert_eq!(acquired.meta.slot, 1);
        assert_eq!(acquired.meta.published, receipt.published);
    }

    #[test]
    fn test_slot_alternates_each_publish() {
        let exchange = SharedFrameExchange::initialize(shape()).unwrap();
        let (mut publisher, _subscriber) = exchange.split();

        for k in 1..=7u64 {
            publisher.publish(&Frame::filled(shape(), k as u8)).unwrap();
            assert_eq!(publisher.current_slot() as u64, k % 2);
            assert_eq!(publisher.sequence(), k);
        }
    }

    #[test]
    fn test_latest_of_many_publishes_wins() {
        let (mut publisher, mut subscriber) =
            SharedFrameExchange::initialize(shape()).unwrap().split();

        for marker in 1..=9u8 {
            publisher.publish(&Frame::filled(shape(), marker)).unwrap();
        }

        let acquired = subscriber.acquire_latest().unwrap().unwrap();
        assert!(acquired.frame.as_bytes().iter().all(|&b| b == 9));
        assert_eq!(acquired.meta.sequence, 9);
        assert_eq!(acquired.meta.skipped, 0, "First acquire reports no skips");
    }

    #[test]
    fn test_skipped_counts_overwritten_publishes() {
        let (mut publisher, mut subscriber) =
            SharedFrameExchange::initialize(shape()).unwrap().split();

        publisher.publish(&Frame::filled(shape(), 1)).unwrap();
        subscriber.acquire_latest().unwrap().unwrap();

        for marker in 2..=5u8 {
            publisher.publish(&Frame::filled(shape(), marker)).unwrap();
        }
        let meta = subscriber.acquire_latest().unwrap().unwrap().meta;
        assert_eq!(meta.sequence, 5);
        assert_eq!(meta.skipped, 3);
    }

    #[test]
    fn test_has_new_frame_tracks_acquires() {
        let (mut publisher, mut subscriber) =
            SharedFrameExchange::initialize(shape()).unwrap().split();

        publisher.publish(&Frame::filled(shape(), 1)).unwrap();
        assert!(subscriber.has_new_frame());

        subscriber.acquire_latest().unwrap();
        assert!(!subscriber.has_new_frame());

        // Re-acquiring the same frame is allowed and still returns it.
        let again = subscriber.acquire_latest().unwrap().unwrap();
        assert_eq!(again.meta.sequence, 1);

        publisher.publish(&Frame::filled(shape(), 2)).unwrap();
        assert!(subscriber.has_new_frame());
    }

    #[test]
    fn test_timings_travel_with_the_frame() {
        let (mut publisher, mut subscriber) =
            SharedFrameExchange::initialize(shape()).unwrap().split();

        let timings = FrameTimings {
            read_total: Duration::from_micros(3_100),
            acquisition: AcquisitionTimings {
                acquisition: Duration::from_micros(2_000),
                timestamp: Duration::from_micros(100),
                conversion: Duration::from_micros(900),
            },
        };
        publisher
            .publish_with_timings(&Frame::filled(shape(), 7), &timings)
            .unwrap();

        let meta = subscriber.acquire_latest().unwrap().unwrap().meta;
        assert_eq!(meta.timings, timings);
    }

    #[test]
    fn test_age_is_bounded_by_time_since_publish() {
        let (mut publisher, mut subscriber) =
            SharedFrameExchange::initialize(shape()).unwrap().split();

        publisher.publish(&Frame::filled(shape(), 1)).unwrap();
        let after_publish = MonotonicTime::now().unwrap();
        std::thread::sleep(Duration::from_millis(2));

        let meta = subscriber.acquire_latest().unwrap().unwrap().meta;
        let upper = MonotonicTime::now()
            .unwrap()
            .saturating_duration_since(meta.published);

        assert!(meta.age >= Duration::from_millis(2));
        assert!(meta.age <= upper);
        assert!(meta.published <= after_publish);
    }

    #[test]
    fn test_publish_rejects_wrong_shape() {
        let (mut publisher, _) = SharedFrameExchange::initialize(shape()).unwrap().split();
        let other = FrameShape::new(2, 2, 3).unwrap();

        let err = publisher.publish(&Frame::new(other)).unwrap_err();
        assert!(matches!(err, BridgeError::ShapeMismatch { .. }));
        assert_eq!(publisher.sequence(), 0, "Failed publish must not advance");
        assert_eq!(publisher.current_slot(), 0);
    }

    #[test]
    fn test_publish_rejects_empty_frame() {
        let (mut publisher, _) = SharedFrameExchange::initialize(shape()).unwrap().split();
        assert!(publisher.publish(&Frame::empty(shape())).is_err());
        assert_eq!(publisher.sequence(), 0);
    }

    #[test]
    fn test_acquire_into_reshapes_buffer() {
        let (mut publisher, mut subscriber) =
            SharedFrameExchange::initialize(shape()).unwrap().split();
        publisher.publish(&Frame::filled(shape(), 3)).unwrap();

        let mut buffer = Frame::new(FrameShape::new(1, 1, 1).unwrap());
        let meta = subscriber.acquire_latest_into(&mut buffer).unwrap();

        assert!(meta.is_some());
        assert_eq!(buffer.shape(), shape());
        assert!(buffer.as_bytes().iter().all(|&b| b == 3));
    }

    #[test]
    fn test_word_copy_roundtrip_with_tail() {
        let words: Vec<AtomicU64> = (0..3).map(|_| AtomicU64::new(0)).collect();
        let src: Vec<u8> = (1..=19).collect();
        store_words(&words, &src);

        let mut dst = vec![0u8; 19];
        load_words(&words, &mut dst);
        assert_eq!(dst, src);
    }
}
