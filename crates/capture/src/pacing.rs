use bridge::StopSignal;
use std::time::{Duration, Instant};

/// Final stretch before a deadline that is spun instead of slept.
const SPIN_WINDOW: Duration = Duration::from_micros(500);

/// Longest single sleep, so a stop request is noticed quickly.
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(5);

/// Fixed-rate frame pacing.
///
/// Sleeps for the bulk of the interval and spins only for the final
/// sub-millisecond window. Deadlines advance by whole intervals so the rate
/// does not drift; after a long stall the schedule restarts from now.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    next_deadline: Option<Instant>,
}

impl FramePacer {
    /// `fps` must be finite and positive.
    pub fn new(fps: f64) -> Option<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return None;
        }
        Some(Self {
            interval: Duration::from_secs_f64(1.0 / fps),
            next_deadline: None,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next frame slot. The first call returns immediately.
    ///
    /// Returns `false` if `stop` was set while waiting.
    pub fn wait(&mut self, stop: Option<&StopSignal>) -> bool {
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);

        loop {
            if stop.is_some_and(StopSignal::is_set) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;
            if remaining > SPIN_WINDOW {
                std::thread::sleep((remaining - SPIN_WINDOW).min(MAX_SLEEP_SLICE));
            } else {
                std::hint::spin_loop();
            }
        }

        let now = Instant::now();
        let next = deadline + self.interval;
        self.next_deadline = Some(if next <= now {
            tracing::trace!(behind = ?(now - deadline), "Pacer fell behind, resynchronizing");
            now + self.interval
        } else {
            next
        });
        true
    }

    pub fn reset(&mut self) {
        self.next_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_rates() {
        assert!(FramePacer::new(0.0).is_none());
        assert!(FramePacer::new(-5.0).is_none());
        assert!(FramePacer::new(f64::NAN).is_none());
        assert_eq!(
            FramePacer::new(100.0).unwrap().interval(),
            Duration::from_millis(10)
        );
    }

    #[test]
    fn test_paces_at_configured_rate() {
        let mut pacer = FramePacer::new(200.0).unwrap();
        let start = Instant::now();
        for _ in 0..11 {
            assert!(pacer.wait(None));
        }
        let elapsed = start.elapsed();
        // 10 intervals of 5ms after the immediate first slot
        assert!(elapsed >= Duration::from_millis(50), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(250), "{:?}", elapsed);
    }

    #[test]
    fn test_stop_interrupts_wait() {
        let mut pacer = FramePacer::new(0.5).unwrap();
        let stop = StopSignal::new();
        assert!(pacer.wait(Some(&stop)));

        let setter = stop.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            setter.set();
        });

        let start = Instant::now();
        assert!(!pacer.wait(Some(&stop)));
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }
}
