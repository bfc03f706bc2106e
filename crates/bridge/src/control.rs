use crate::errors::BridgeError;
use crate::paths;
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running = 0,
    Stopping = 1,
}

impl SessionState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SessionState::Running),
            1 => Some(SessionState::Stopping),
            _ => None,
        }
    }
}

#[repr(C)]
struct ControlBlock {
    state: AtomicU8,
    _pad: [u8; 7],
    /// Bumped by every `reset`, after the state is back to `Running`.
    generation: AtomicU64,
}

const CONTROL_LEN: u64 = std::mem::size_of::<ControlBlock>() as u64;

/// Cross-process stop flag: an atomic state byte plus a session generation in `/dev/shm`.
///
/// The producer and consumer processes both map it; whichever side stops first
/// flips it to `Stopping` and the other side sees it on its next iteration.
/// The file outlives a session, so a `Stopping` left by the previous run stays
/// visible until the next session owner calls [`SessionControl::reset`].
pub struct SessionControl {
    _mmap: MmapMut,
    block: &'static ControlBlock,
}

unsafe impl Send for SessionControl {}
unsafe impl Sync for SessionControl {}

impl SessionControl {
    /// Open the session control at the default path.
    pub fn build() -> Result<Self, BridgeError> {
        Self::open(paths::SESSION_CONTROL_PATH)
    }

    /// Create or open the control byte at `path`. A new file starts as `Running`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(path)?;

        if file.metadata()?.len() < CONTROL_LEN {
            file.set_len(CONTROL_LEN)?;
        }

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let ptr = mmap.as_mut_ptr() as *const ControlBlock;
        // Page-aligned mapping of at least CONTROL_LEN bytes, alive as long as `_mmap`.
        let block = unsafe { &*ptr };

        Ok(Self { _mmap: mmap, block })
    }

    /// Reset to `Running` and start a new generation. Called by the session owner
    /// before the pipeline starts.
    pub fn reset(&self) {
        self.block
            .state
            .store(SessionState::Running as u8, Ordering::Release);
        self.block.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Session generation, advanced by each [`reset`](Self::reset).
    #[inline]
    pub fn generation(&self) -> u64 {
        self.block.generation.load(Ordering::Acquire)
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        // Unknown values are treated as a stop request.
        SessionState::from_u8(self.block.state.load(Ordering::Acquire))
            .unwrap_or(SessionState::Stopping)
    }

    /// Generation paired with the state observed after it.
    ///
    /// `reset` writes the state before bumping the generation, so a `Stopping`
    /// read here belongs to the returned generation or a newer one.
    #[inline]
    pub fn snapshot(&self) -> (u64, SessionState) {
        let generation = self.generation();
        (generation, self.state())
    }

    #[inline]
    pub fn is_stopping(&self) -> bool {
        self.state() == SessionState::Stopping
    }

    /// Request a stop. Returns `true` if this call changed the state.
    #[inline]
    pub fn request_stop(&self) -> bool {
        self.block
            .state
            .swap(SessionState::Stopping as u8, Ordering::AcqRel)
            != SessionState::Stopping as u8
    }
}
