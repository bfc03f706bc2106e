pub mod backoff;
pub mod clock;
pub mod control;
pub mod errors;
pub mod exchange;
pub mod frame;
mod header;
pub mod paths;
mod region;
pub mod stop;

pub use backoff::IdleBackoff;
pub use clock::MonotonicTime;
pub use control::{SessionControl, SessionState};
pub use errors::BridgeError;
pub use exchange::{
    AcquiredFrame, FrameMeta, FramePublisher, FrameSubscriber, PublishReceipt, SharedFrameExchange,
};
pub use frame::{AcquisitionTimings, Frame, FrameShape, FrameTimings};
pub use stop::StopSignal;
