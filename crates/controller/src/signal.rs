use inference::{HandLandmark, HandObservation, Handedness};
use std::fmt;
use std::str::FromStr;

/// Which detected hands feed the tap state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedHand {
    Left,
    Right,
    Any,
}

impl TrackedHand {
    pub fn accepts(self, handedness: Handedness) -> bool {
        match self {
            TrackedHand::Any => true,
            TrackedHand::Left => handedness == Handedness::Left,
            TrackedHand::Right => handedness == Handedness::Right,
        }
    }
}

impl fmt::Display for TrackedHand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackedHand::Left => f.write_str("left"),
            TrackedHand::Right => f.write_str("right"),
            TrackedHand::Any => f.write_str("any"),
        }
    }
}

impl FromStr for TrackedHand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "any" | "both" => Ok(TrackedHand::Any),
            other => other
                .parse::<Handedness>()
                .map(|h| match h {
                    Handedness::Left => TrackedHand::Left,
                    Handedness::Right => TrackedHand::Right,
                })
                .map_err(|_| format!("unknown tracked hand {:?} (left|right|any)", other)),
        }
    }
}

/// Pinky MCP through pinky tip.
pub const DEFAULT_FINGERTIPS: [HandLandmark; 4] = [
    HandLandmark::PinkyMcp,
    HandLandmark::PinkyPip,
    HandLandmark::PinkyDip,
    HandLandmark::PinkyTip,
];

/// Parse a comma separated list of landmark indices, e.g. `"17,18,19,20"`.
pub fn parse_landmark_set(s: &str) -> Result<Vec<HandLandmark>, String> {
    let set = s
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<usize>()
                .ok()
                .and_then(HandLandmark::from_index)
                .ok_or_else(|| format!("invalid landmark index {:?}", part))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if set.is_empty() {
        return Err("landmark set is empty".to_string());
    }
    Ok(set)
}

/// Distance in pixels between the mean `y` of `set` and the reference line.
///
/// `None` when the observation lacks one of the landmarks.
pub fn tap_signal(
    observation: &HandObservation,
    set: &[HandLandmark],
    frame_height: u32,
    reference_y: f64,
) -> Option<f64> {
    let mean_y = observation.mean_y(set)? as f64 * frame_height as f64;
    Some((mean_y - reference_y).abs())
}
