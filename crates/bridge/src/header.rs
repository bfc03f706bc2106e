use crate::errors::BridgeError;
use crate::frame::FrameShape;
use std::sync::atomic::AtomicU64;

/// SAFETY & MEMORY ORDERING:
///
/// Shared layout of a frame exchange: `[ExchangeHeader | slot 0 | slot 1]`.
///
/// Publisher protocol (single writer):
/// 1. Pick `target = 1 - current_slot`
/// 2. Open the target slot's seqlock (`version` becomes odd)
/// 3. Store the frame words and slot metadata
/// 4. Close the seqlock (`version` even again, `Ordering::Release`)
/// 5. Store `publish_ns`, then `current_slot`, then `sequence`, all `Ordering::Release`
///
/// Subscriber protocol (single reader):
/// 1. Load `current_slot` with `Ordering::Acquire`
/// 2. Load the slot `version`; odd means the reader was lapped, reload the index
/// 3. Copy the slot words, fence `Ordering::Acquire`, reload `version`
/// 4. An unchanged version means the copy came from exactly one publish
///
/// Every field is atomic because the header may live in a file mapping shared
/// between processes; no `&mut` to it is ever formed after initialization.
#[repr(C, align(64))]
pub struct ExchangeHeader {
    pub magic: AtomicU64,
    pub layout_version: AtomicU64,
    pub height: AtomicU64,
    pub width: AtomicU64,
    pub channels: AtomicU64,
    /// Index of the slot holding the most recent complete frame. Always 0 or 1.
    pub current_slot: AtomicU64,
    /// Monotonic nanoseconds of the last completed publish, 0 before the first one.
    pub publish_ns: AtomicU64,
    /// Number of completed publishes. 0 means "no data written yet".
    pub sequence: AtomicU64,
    pub slots: [SlotHeader; SLOT_COUNT],
}

/// Per-slot metadata, written inside the slot's seqlock window together with the pixels.
#[repr(C, align(64))]
pub struct SlotHeader {
    /// Seqlock version: odd while the publisher is writing this slot.
    pub version: AtomicU64,
    /// Publish sequence that produced the slot contents, 0 if never written.
    pub sequence: AtomicU64,
    pub published_ns: AtomicU64,
    pub read_total_ns: AtomicU64,
    pub acquisition_ns: AtomicU64,
    pub timestamp_ns: AtomicU64,
    pub conversion_ns: AtomicU64,
}

pub const SLOT_COUNT: usize = 2;
pub const MAGIC: u64 = u64::from_le_bytes(*b"TAPXCHG\0");
pub const LAYOUT_VERSION: u64 = 1;

const SLOT_ALIGN: usize = 64;

impl ExchangeHeader {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Byte offsets of the header and slots for a given frame shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeLayout {
    pub shape: FrameShape,
    /// Slot size in bytes, rounded up to a cache line so both slots stay word aligned.
    pub slot_stride: usize,
    pub total_len: usize,
}

impl ExchangeLayout {
    pub fn for_shape(shape: FrameShape) -> Result<Self, BridgeError> {
        let overflow =
            || BridgeError::Configuration(format!("exchange for {} overflows usize", shape));

        let slot_stride = shape
            .byte_len()
            .checked_next_multiple_of(SLOT_ALIGN)
            .ok_or_else(overflow)?;
        let total_len = slot_stride
            .checked_mul(SLOT_COUNT)
            .and_then(|n| n.checked_add(ExchangeHeader::SIZE))
            .ok_or_else(overflow)?;

        Ok(Self {
            shape,
            slot_stride,
            total_len,
        })
    }

    pub fn slot_offset(&self, slot: usize) -> usize {
        ExchangeHeader::SIZE + slot * self.slot_stride
    }

    /// Number of 8-byte words in one slot.
    pub fn slot_words(&self) -> usize {
        self.slot_stride / std::mem::size_of::<u64>()
    }
}
