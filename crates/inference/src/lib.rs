pub mod bright_spot;
pub mod config;
pub mod detector;
pub mod hand;

pub use bright_spot::BrightSpotDetector;
pub use config::DetectorConfig;
pub use detector::Detector;
pub use hand::{HandLandmark, HandObservation, Handedness, Landmark};
