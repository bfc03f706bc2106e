use crate::hand::HandObservation;
use bridge::Frame;

/// Hand detector run by the consumer on each acquired frame.
///
/// An empty result is normal (no hands in view). Errors are fatal to the consumer.
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<HandObservation>>;

    fn name(&self) -> &str;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<HandObservation>> {
        (**self).detect(frame)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
