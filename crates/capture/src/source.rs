use bridge::{AcquisitionTimings, BridgeError, Frame};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    /// The source has no more frames. Normal termination.
    #[error("End of stream")]
    EndOfStream,

    #[error("Device error: {0}")]
    Device(String),
}

impl From<BridgeError> for SourceError {
    fn from(e: BridgeError) -> Self {
        SourceError::Device(e.to_string())
    }
}

impl From<image::ImageError> for SourceError {
    fn from(e: image::ImageError) -> Self {
        SourceError::Device(e.to_string())
    }
}

/// A producer of camera frames.
///
/// `read_frame` returns a freshly owned frame plus the source's own sub-timings.
/// An empty frame (see [`Frame::is_empty`]) means "nothing captured" and ends
/// the producer the same way end-of-stream does.
pub trait FrameSource: Send {
    /// Open the device. Called once before the first read.
    fn start(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    fn read_frame(&mut self) -> Result<(Frame, AcquisitionTimings), SourceError>;

    /// Release the device. Always called, including after errors.
    fn cleanup(&mut self) {}

    /// Short name for logs.
    fn name(&self) -> &str;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn start(&mut self) -> Result<(), SourceError> {
        (**self).start()
    }

    fn read_frame(&mut self) -> Result<(Frame, AcquisitionTimings), SourceError> {
        (**self).read_frame()
    }

    fn cleanup(&mut self) {
        (**self).cleanup()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
