pub mod config;
pub mod decoder;
pub mod pacing;
pub mod producer;
pub mod replay;
pub mod source;
pub mod synthetic;

pub use config::{CaptureConfig, SourceConfig, SourceKind};
pub use decoder::{FrameDecoder, YuyvDecoder};
pub use pacing::FramePacer;
pub use producer::{ProducerError, ProducerExit, ProducerLoop, ProducerReport};
pub use replay::ImageSequenceSource;
pub use source::{FrameSource, SourceError};
pub use synthetic::{SyntheticConfig, SyntheticSource, TapWaveform};
