use bridge::{BridgeError, Frame, FrameShape, SharedFrameExchange, StopSignal};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn shape() -> FrameShape {
    FrameShape::new(48, 64, 3).unwrap()
}

/// Frame whose every byte is the low byte of `marker`, so a torn copy is detectable.
fn marked(marker: u64) -> Frame {
    Frame::filled(shape(), (marker % 251) as u8 + 1)
}

/// Concurrent publish/acquire must never yield a frame mixing two publishes.
///
/// Tests:
/// - Every acquired frame is uniform
/// - The marker matches the sequence reported with the frame
/// - Sequences observed by the consumer never go backwards
#[test]
fn test_no_tearing_under_stress() {
    let (mut publisher, mut subscriber) = SharedFrameExchange::initialize(shape()).unwrap().split();
    let stop = StopSignal::new();
    let published = Arc::new(AtomicU64::new(0));

    thread::scope(|s| {
        let producer_stop = stop.clone();
        let producer_count = Arc::clone(&published);
        s.spawn(move || {
            let mut marker = 0u64;
            while !producer_stop.is_set() {
                marker += 1;
                publisher.publish(&marked(marker)).unwrap();
                producer_count.store(marker, Ordering::Relaxed);
            }
        });

        let mut buffer = Frame::new(shape());
        let mut last_sequence = 0;
        let mut reads = 0u64;
        let deadline = Instant::now() + Duration::from_millis(500);

        while Instant::now() < deadline {
            let Some(meta) = subscriber.acquire_latest_into(&mut buffer).unwrap() else {
                continue;
            };
            let first = buffer.as_bytes()[0];
            assert!(
                buffer.as_bytes().iter().all(|&b| b == first),
                "Torn frame at sequence {}",
                meta.sequence
            );
            assert_eq!(first, (meta.sequence % 251) as u8 + 1);
            assert!(meta.sequence >= last_sequence, "Sequence went backwards");
            last_sequence = meta.sequence;
            reads += 1;
        }

        stop.set();
        assert!(reads > 0, "Consumer never saw a frame");
    });

    assert!(published.load(Ordering::Relaxed) > 0);
}

/// A stalled consumer never blocks the producer.
#[test]
fn test_publish_does_not_wait_for_consumer() {
    let (mut publisher, subscriber) = SharedFrameExchange::initialize(shape()).unwrap().split();

    // Consumer holds its handle and does nothing.
    let stalled = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        drop(subscriber);
    });

    let start = Instant::now();
    let mut slowest = Duration::ZERO;
    for marker in 1..=1_000 {
        let publish_start = Instant::now();
        publisher.publish(&marked(marker)).unwrap();
        slowest = slowest.max(publish_start.elapsed());
    }
    assert!(
        start.elapsed() < Duration::from_millis(300),
        "1000 publishes took {:?} while the consumer was stalled",
        start.elapsed()
    );
    // A publish that waited on the consumer would take the full 300ms stall.
    assert!(
        slowest < Duration::from_millis(50),
        "Slowest single publish took {:?} while the consumer was stalled",
        slowest
    );
    assert_eq!(publisher.sequence(), 1_000);

    stalled.join().unwrap();
}

/// Acquire after a burst of publishes returns the last one, not a queued one.
#[test]
fn test_freshness_after_burst() {
    let (mut publisher, mut subscriber) = SharedFrameExchange::initialize(shape()).unwrap().split();

    for marker in 1..=50 {
        publisher.publish(&marked(marker)).unwrap();
    }

    let acquired = subscriber.acquire_latest().unwrap().unwrap();
    assert_eq!(acquired.meta.sequence, 50);
    assert_eq!(acquired.frame, marked(50));
    assert_eq!(acquired.meta.slot, 0, "50 publishes end on slot 50 mod 2");
}

/// Producer and consumer attached through the file, as two processes would be.
#[test]
fn test_file_backed_exchange_across_handles() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("exchange");

    let mut publisher = SharedFrameExchange::create(&path, shape()).unwrap().publisher();
    let consumer_side = SharedFrameExchange::open(&path).unwrap();
    assert_eq!(consumer_side.shape(), shape());
    let mut subscriber = consumer_side.subscriber();

    assert!(subscriber.acquire_latest().unwrap().is_none());

    publisher.publish(&marked(7)).unwrap();
    let acquired = subscriber.acquire_latest().unwrap().unwrap();
    assert_eq!(acquired.frame, marked(7));
    assert_eq!(subscriber.current_slot(), 1);
    assert!(subscriber.last_publish().is_some());

    drop(publisher);
    assert!(!path.exists(), "Creator removes the exchange file on exit");
}

/// A reopened exchange with a different geometry is rejected at publish time.
#[test]
fn test_shape_mismatch_is_reported() {
    let (mut publisher, _subscriber) = SharedFrameExchange::initialize(shape()).unwrap().split();
    let wrong = FrameShape::new(64, 48, 3).unwrap();

    match publisher.publish(&Frame::new(wrong)) {
        Err(BridgeError::ShapeMismatch { expected, actual }) => {
            assert_eq!(expected, shape());
            assert_eq!(actual, wrong);
        }
        other => panic!("Expected ShapeMismatch, got {:?}", other.map(|r| r.sequence)),
    }
}

#[test]
fn test_open_missing_exchange_fails() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        SharedFrameExchange::open(dir.path().join("nope")),
        Err(BridgeError::IoError(_))
    ));
}
