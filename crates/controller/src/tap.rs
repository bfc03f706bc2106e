use crate::errors::ControllerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapState {
    /// Hand is away from the reference line; the next approach counts as a tap.
    Armed,
    /// A tap was emitted; waits for the hand to move away again.
    Triggered,
}

/// Emitted on every Armed -> Triggered transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapEvent {
    /// 1-based tap number.
    pub count: u64,
}

/// Two-state hysteresis over the tap signal (distance to the reference line, in pixels).
#[derive(Debug, Clone)]
pub struct TapStateMachine {
    state: TapState,
    threshold: f64,
    count: u64,
}

impl TapStateMachine {
    pub fn new(threshold: f64) -> Result<Self, ControllerError> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ControllerError::Configuration(format!(
                "tap threshold must be finite and non-negative, got {}",
                threshold
            )));
        }
        Ok(Self {
            state: TapState::Armed,
            threshold,
            count: 0,
        })
    }

    pub fn update(&mut self, signal: f64) -> Option<TapEvent> {
        match self.state {
            TapState::Armed if signal < self.threshold => {
                self.state = TapState::Triggered;
                self.count += 1;
                Some(TapEvent { count: self.count })
            }
            TapState::Triggered if signal >= self.threshold => {
                self.state = TapState::Armed;
                None
            }
            _ => None,
        }
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(machine: &mut TapStateMachine, signals: &[f64]) -> Vec<u64> {
        signals
            .iter()
            .filter_map(|&s| machine.update(s))
            .map(|event| event.count)
            .collect()
    }

    // ========== Construction ==========

    #[test]
    fn new_starts_armed_with_zero_count() {
        let machine = TapStateMachine::new(20.0).unwrap();
        assert_eq!(machine.state(), TapState::Armed);
        assert_eq!(machine.count(), 0);
        assert_eq!(machine.threshold(), 20.0);
    }

    #[test]
    fn invalid_thresholds_are_rejected() {
        assert!(TapStateMachine::new(-1.0).is_err());
        assert!(TapStateMachine::new(f64::NAN).is_err());
        assert!(TapStateMachine::new(f64::INFINITY).is_err());
        assert!(TapStateMachine::new(0.0).is_ok());
    }

    // ========== Armed State Transitions ==========

    #[test]
    fn armed_far_signal_stays_armed() {
        let mut machine = TapStateMachine::new(20.0).unwrap();
        assert!(machine.update(30.0).is_none());
        assert!(machine.update(20.0).is_none(), "Equal to threshold is not a tap");
        assert_eq!(machine.state(), TapState::Armed);
    }

    #[test]
    fn armed_near_signal_emits_tap() {
        let mut machine = TapStateMachine::new(20.0).unwrap();
        assert_eq!(machine.update(5.0), Some(TapEvent { count: 1 }));
        assert_eq!(machine.state(), TapState::Triggered);
    }

    // ========== Triggered State Transitions ==========

    #[test]
    fn triggered_near_signal_does_not_retrigger() {
        let mut machine = TapStateMachine::new(20.0).unwrap();
        machine.update(5.0);

        assert!(machine.update(1.0).is_none());
        assert!(machine.update(19.9).is_none());
        assert_eq!(machine.state(), TapState::Triggered);
        assert_eq!(machine.count(), 1);
    }

    #[test]
    fn triggered_far_signal_rearms() {
        let mut machine = TapStateMachine::new(20.0).unwrap();
        machine.update(5.0);

        assert!(machine.update(20.0).is_none(), "Re-arming emits nothing");
        assert_eq!(machine.state(), TapState::Armed);
    }

    // ========== Sequences ==========

    #[test]
    fn hysteresis_counts_each_approach_once() {
        let mut machine = TapStateMachine::new(20.0).unwrap();
        let taps = feed(&mut machine, &[5.0, 30.0, 5.0, 30.0, 5.0]);
        assert_eq!(taps, vec![1, 2, 3]);
        assert_eq!(machine.count(), 3);
    }

    #[test]
    fn lingering_near_the_line_is_one_tap() {
        let mut machine = TapStateMachine::new(10.0).unwrap();
        let taps = feed(&mut machine, &[50.0, 9.0, 8.0, 2.0, 0.0, 9.9, 11.0, 3.0]);
        assert_eq!(taps, vec![1, 2]);
    }

    #[test]
    fn zero_threshold_never_fires() {
        let mut machine = TapStateMachine::new(0.0).unwrap();
        assert!(feed(&mut machine, &[0.0, 0.0, 5.0]).is_empty());
    }
}
