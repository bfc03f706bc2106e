use crate::errors::BridgeError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Fixed frame geometry: `height × width × channels` unsigned 8-bit samples, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameShape {
    height: u32,
    width: u32,
    channels: u32,
}

impl FrameShape {
    pub fn new(height: u32, width: u32, channels: u32) -> Result<Self, BridgeError> {
        if height == 0 || width == 0 || channels == 0 {
            return Err(BridgeError::Configuration(format!(
                "frame dimensions must be non-zero, got {}x{}x{}",
                height, width, channels
            )));
        }

        let shape = Self {
            height,
            width,
            channels,
        };

        (height as usize)
            .checked_mul(width as usize)
            .and_then(|n| n.checked_mul(channels as usize))
            .ok_or_else(|| {
                BridgeError::Configuration(format!("frame size {} overflows usize", shape))
            })?;

        Ok(shape)
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Bytes in one row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.channels as usize
    }

    /// Bytes in one frame.
    pub fn byte_len(&self) -> usize {
        self.stride() * self.height as usize
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

impl FromStr for FrameShape {
    type Err = BridgeError;

    /// Parses `HEIGHTxWIDTHxCHANNELS`, e.g. `540x720x3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dims: Vec<u32> = s
            .split(['x', 'X'])
            .map(|part| part.trim().parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|e| BridgeError::Configuration(format!("invalid frame shape {s:?}: {e}")))?;

        match dims.as_slice() {
            [h, w, c] => Self::new(*h, *w, *c),
            _ => Err(BridgeError::Configuration(format!(
                "frame shape must be HxWxC, got {s:?}"
            ))),
        }
    }
}

/// An owned frame. Producers and consumers only ever work on these private copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    shape: FrameShape,
    data: Vec<u8>,
}

impl Frame {
    /// Zero-filled frame.
    pub fn new(shape: FrameShape) -> Self {
        Self {
            shape,
            data: vec![0u8; shape.byte_len()],
        }
    }

    /// Zero-filled frame, reporting allocation failure instead of aborting.
    pub fn try_new(shape: FrameShape) -> Result<Self, BridgeError> {
        let len = shape.byte_len();
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|e| {
            BridgeError::Resource(format!("allocation of {} bytes failed: {}", len, e))
        })?;
        data.resize(len, 0);
        Ok(Self { shape, data })
    }

    /// Frame with every sample set to `value`.
    pub fn filled(shape: FrameShape, value: u8) -> Self {
        Self {
            shape,
            data: vec![value; shape.byte_len()],
        }
    }

    pub fn from_vec(shape: FrameShape, data: Vec<u8>) -> Result<Self, BridgeError> {
        if data.len() != shape.byte_len() {
            return Err(BridgeError::Configuration(format!(
                "frame {} needs {} bytes, got {}",
                shape,
                shape.byte_len(),
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// A frame carrying no samples, used by sources to report "nothing captured".
    pub fn empty(shape: FrameShape) -> Self {
        Self {
            shape,
            data: Vec::new(),
        }
    }

    /// True when the frame carries no usable image.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.data.len() != self.shape.byte_len()
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn height(&self) -> u32 {
        self.shape.height
    }

    pub fn width(&self) -> u32 {
        self.shape.width
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Samples of the pixel at (`row`, `col`), or `None` when out of bounds.
    pub fn pixel(&self, row: u32, col: u32) -> Option<&[u8]> {
        if row >= self.shape.height || col >= self.shape.width || self.is_empty() {
            return None;
        }
        let channels = self.shape.channels as usize;
        let start = row as usize * self.shape.stride() + col as usize * channels;
        self.data.get(start..start + channels)
    }

    /// Re-shape the buffer in place, growing it if needed. Allocation failure is reported.
    pub(crate) fn ensure_shape(&mut self, shape: FrameShape) -> Result<(), BridgeError> {
        let len = shape.byte_len();
        if self.data.len() != len {
            if len > self.data.len() {
                self.data
                    .try_reserve_exact(len - self.data.len())
                    .map_err(|e| {
                        BridgeError::Resource(format!("allocation of {} bytes failed: {}", len, e))
                    })?;
            }
            self.data.resize(len, 0);
        }
        self.shape = shape;
        Ok(())
    }
}

/// Sub-timings reported by a frame source for a single `read_frame` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionTimings {
    /// Time spent in the driver's acquisition call.
    pub acquisition: Duration,
    /// Time spent retrieving the device timestamp.
    pub timestamp: Duration,
    /// Time spent in color conversion.
    pub conversion: Duration,
}

impl AcquisitionTimings {
    pub fn total(&self) -> Duration {
        self.acquisition + self.timestamp + self.conversion
    }
}

/// Timings attached to a published frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameTimings {
    /// Producer-side wall time around the whole `read_frame` call.
    pub read_total: Duration,
    pub acquisition: AcquisitionTimings,
}
