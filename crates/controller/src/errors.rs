use bridge::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Exchange error: {0}")]
    Exchange(#[from] BridgeError),

    #[error("Detector failed: {0}")]
    Detector(#[source] anyhow::Error),

    #[error("Trigger failed: {0}")]
    Trigger(String),

    #[error("Archive failed: {0}")]
    Archive(#[from] image::ImageError),
}
