use crate::frame::FrameShape;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Frame shape mismatch: exchange holds {expected}, got {actual}")]
    ShapeMismatch {
        expected: FrameShape,
        actual: FrameShape,
    },

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Incompatible exchange layout: {0}")]
    IncompatibleLayout(String),
}

impl BridgeError {
    /// Transient errors leave the exchange usable; the caller may retry next iteration.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Resource(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let bridge_err = BridgeError::IoError(io_err);
        assert_eq!(
            bridge_err.to_string(),
            "IO error: file not found",
            "IoError should display with 'IO error:' prefix"
        );

        let err = BridgeError::Configuration("height must be non-zero".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: height must be non-zero"
        );

        let expected = FrameShape::new(540, 720, 3).unwrap();
        let actual = FrameShape::new(480, 640, 3).unwrap();
        let err = BridgeError::ShapeMismatch { expected, actual };
        assert_eq!(
            err.to_string(),
            "Frame shape mismatch: exchange holds 540x720x3, got 480x640x3"
        );

        let err = BridgeError::Resource("allocation of 1166400 bytes failed".to_string());
        assert_eq!(
            err.to_string(),
            "Resource error: allocation of 1166400 bytes failed"
        );
    }

    #[test]
    fn test_only_resource_errors_are_transient() {
        assert!(BridgeError::Resource("oom".into()).is_transient());
        assert!(!BridgeError::Configuration("bad".into()).is_transient());
        assert!(!BridgeError::IncompatibleLayout("magic".into()).is_transient());
        assert!(!BridgeError::IoError(io::Error::other("x")).is_transient());
    }

    #[test]
    fn test_error_conversion_from_io_error() {
        fn returns_io_error() -> Result<(), io::Error> {
            Err(io::Error::other("test error"))
        }

        fn uses_question_mark() -> Result<(), BridgeError> {
            returns_io_error()?;
            Ok(())
        }

        match uses_question_mark() {
            Err(BridgeError::IoError(e)) => assert_eq!(e.to_string(), "test error"),
            other => panic!("Expected IoError variant, got {:?}", other),
        }
    }
}
