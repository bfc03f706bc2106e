use crate::errors::BridgeError;
use crate::frame::FrameShape;
use crate::header::{ExchangeHeader, ExchangeLayout, LAYOUT_VERSION, MAGIC, SLOT_COUNT};
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

/// The mapped memory behind an exchange: header plus two frame slots.
///
/// The mapping is either anonymous (threads of one process) or backed by a
/// file under `/dev/shm` (separate producer and consumer processes).
pub(crate) struct ExchangeRegion {
    _mmap: MmapMut,
    base: NonNull<u8>,
    layout: ExchangeLayout,
    owned_path: Option<PathBuf>,
}

// The region is only ever accessed through atomics.
unsafe impl Send for ExchangeRegion {}
unsafe impl Sync for ExchangeRegion {}

impl ExchangeRegion {
    /// Allocate a private mapping for an in-process exchange.
    pub fn anonymous(shape: FrameShape) -> Result<Self, BridgeError> {
        let layout = ExchangeLayout::for_shape(shape)?;
        let mmap = MmapOptions::new().len(layout.total_len).map_anon()?;
        Self::initialize(mmap, layout, None)
    }

    /// Create (or take over) a file-backed exchange and reset it to the initial state.
    ///
    /// Creates the file if it doesn't exist and grows it if undersized; an existing
    /// larger file is never shrunk so that stale readers cannot fault on access.
    /// The file is removed when the region is dropped.
    pub fn create(path: impl AsRef<Path>, shape: FrameShape) -> Result<Self, BridgeError> {
        let layout = ExchangeLayout::for_shape(shape)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(&path)?;

        if file.metadata()?.len() < layout.total_len as u64 {
            file.set_len(layout.total_len as u64)?;
        }

        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        Self::initialize(mmap, layout, Some(path.as_ref().to_path_buf()))
    }

    /// Attach to an exchange created by another process.
    ///
    /// Fails with `IncompatibleLayout` until the creator has finished initializing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_len = file.metadata()?.len();
        if file_len < ExchangeHeader::SIZE as u64 {
            return Err(BridgeError::IncompatibleLayout(format!(
                "{} bytes is too small for an exchange header",
                file_len
            )));
        }

        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| BridgeError::Resource("mapping returned a null pointer".into()))?;
        let header = unsafe { &*(base.as_ptr() as *const ExchangeHeader) };

        let magic = header.magic.load(Ordering::Acquire);
        if magic != MAGIC {
            return Err(BridgeError::IncompatibleLayout(format!(
                "bad magic {:#018x}",
                magic
            )));
        }
        let version = header.layout_version.load(Ordering::Relaxed);
        if version != LAYOUT_VERSION {
            return Err(BridgeError::IncompatibleLayout(format!(
                "layout version {} (expected {})",
                version, LAYOUT_VERSION
            )));
        }

        let dim = |field: &AtomicU64| u32::try_from(field.load(Ordering::Relaxed)).unwrap_or(0);
        let shape = FrameShape::new(dim(&header.height), dim(&header.width), dim(&header.channels))
            .map_err(|e| BridgeError::IncompatibleLayout(e.to_string()))?;
        let layout = ExchangeLayout::for_shape(shape)?;
        if mmap.len() < layout.total_len {
            return Err(BridgeError::IncompatibleLayout(format!(
                "mapping is {} bytes, layout for {} needs {}",
                mmap.len(),
                shape,
                layout.total_len
            )));
        }

        Ok(Self {
            _mmap: mmap,
            base,
            layout,
            owned_path: None,
        })
    }

    fn initialize(
        mut mmap: MmapMut,
        layout: ExchangeLayout,
        owned_path: Option<PathBuf>,
    ) -> Result<Self, BridgeError> {
        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| BridgeError::Resource("mapping returned a null pointer".into()))?;
        let region = Self {
            _mmap: mmap,
            base,
            layout,
            owned_path,
        };

        let header = region.header();
        header.magic.store(0, Ordering::Release);
        header.layout_version.store(LAYOUT_VERSION, Ordering::Relaxed);
        header
            .height
            .store(layout.shape.height() as u64, Ordering::Relaxed);
        header
            .width
            .store(layout.shape.width() as u64, Ordering::Relaxed);
        header
            .channels
            .store(layout.shape.channels() as u64, Ordering::Relaxed);
        header.current_slot.store(0, Ordering::Relaxed);
        header.publish_ns.store(0, Ordering::Relaxed);
        header.sequence.store(0, Ordering::Relaxed);
        for slot in &header.slots {
            slot.version.store(0, Ordering::Relaxed);
            slot.sequence.store(0, Ordering::Relaxed);
            slot.published_ns.store(0, Ordering::Relaxed);
            slot.read_total_ns.store(0, Ordering::Relaxed);
            slot.acquisition_ns.store(0, Ordering::Relaxed);
            slot.timestamp_ns.store(0, Ordering::Relaxed);
            slot.conversion_ns.store(0, Ordering::Relaxed);
        }
        // Magic last: openers only trust a header whose magic they can see.
        header.magic.store(MAGIC, Ordering::Release);

        Ok(region)
    }

    #[inline]
    pub fn header(&self) -> &ExchangeHeader {
        unsafe { &*(self.base.as_ptr() as *const ExchangeHeader) }
    }

    /// Word view of one frame slot.
    #[inline]
    pub fn slot(&self, slot: usize) -> &[AtomicU64] {
        debug_assert!(slot < SLOT_COUNT);
        unsafe {
            let ptr = self.base.as_ptr().add(self.layout.slot_offset(slot)) as *const AtomicU64;
            std::slice::from_raw_parts(ptr, self.layout.slot_words())
        }
    }

    pub fn layout(&self) -> &ExchangeLayout {
        &self.layout
    }

    pub fn path(&self) -> Option<&Path> {
        self.owned_path.as_deref()
    }
}

impl Drop for ExchangeRegion {
    fn drop(&mut self) {
        if let Some(path) = self.owned_path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Exchange file removed"),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove exchange file")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn shape() -> FrameShape {
        FrameShape::new(4, 4, 3).unwrap()
    }

    #[test]
    fn test_anonymous_region_starts_empty() {
        let region = ExchangeRegion::anonymous(shape()).unwrap();
        let header = region.header();

        assert_eq!(header.magic.load(Ordering::Acquire), MAGIC);
        assert_eq!(header.current_slot.load(Ordering::Acquire), 0);
        assert_eq!(header.publish_ns.load(Ordering::Acquire), 0);
        assert_eq!(header.sequence.load(Ordering::Acquire), 0);
        assert_eq!(region.slot(0).len(), region.layout().slot_words());
        assert!(region.path().is_none());
    }

    #[test]
    fn test_open_reads_shape_from_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exchange");

        let created = ExchangeRegion::create(&path, shape()).unwrap();
        let opened = ExchangeRegion::open(&path).unwrap();

        assert_eq!(opened.layout(), created.layout());
        assert!(opened.path().is_none(), "Only the creator owns the file");
    }

    #[test]
    fn test_regions_share_memory_through_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exchange");

        let created = ExchangeRegion::create(&path, shape()).unwrap();
        let opened = ExchangeRegion::open(&path).unwrap();

        created.slot(1)[0].store(0xDEAD_BEEF, Ordering::Release);
        assert_eq!(opened.slot(1)[0].load(Ordering::Acquire), 0xDEAD_BEEF);
    }

    #[test]
    fn test_open_rejects_uninitialized_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        assert!(matches!(
            ExchangeRegion::open(&path),
            Err(BridgeError::IncompatibleLayout(_))
        ));
    }

    #[test]
    fn test_open_rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny");
        std::fs::write(&path, [0u8; 16]).unwrap();

        assert!(matches!(
            ExchangeRegion::open(&path),
            Err(BridgeError::IncompatibleLayout(_))
        ));
    }

    #[test]
    fn test_open_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            ExchangeRegion::open(dir.path().join("missing")),
            Err(BridgeError::IoError(_))
        ));
    }

    #[test]
    fn test_creator_removes_file_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exchange");

        let region = ExchangeRegion::create(&path, shape()).unwrap();
        assert!(path.exists());
        drop(region);
        assert!(!path.exists(), "No durability after the creator exits");
    }

    #[test]
    fn test_create_resets_existing_exchange() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exchange");

        let first = ExchangeRegion::create(&path, shape()).unwrap();
        first.header().sequence.store(42, Ordering::Release);
        let second = ExchangeRegion::create(&path, shape()).unwrap();

        assert_eq!(second.header().sequence.load(Ordering::Acquire), 0);
        drop(first);
        drop(second);
    }
}
