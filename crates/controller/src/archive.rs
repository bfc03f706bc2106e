use crate::errors::ControllerError;
use bridge::Frame;
use chrono::Local;
use image::ExtendedColorType;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

pub const DEFAULT_DEPTH: usize = 7;

/// Ring of the most recently consumed frames, dumped to PNG on each tap.
pub struct FrameArchive {
    root: PathBuf,
    depth: usize,
    frames: VecDeque<Frame>,
}

impl FrameArchive {
    pub fn new(root: impl Into<PathBuf>, depth: usize) -> Result<Self, ControllerError> {
        if depth == 0 {
            return Err(ControllerError::Configuration(
                "archive depth must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            root: root.into(),
            depth,
            frames: VecDeque::with_capacity(depth),
        })
    }

    pub fn push(&mut self, frame: &Frame) {
        if self.frames.len() == self.depth
            && let Some(mut oldest) = self.frames.pop_front()
            && oldest.as_bytes().len() == frame.as_bytes().len()
        {
            // Reuse the evicted buffer.
            oldest.as_bytes_mut().copy_from_slice(frame.as_bytes());
            self.frames.push_back(oldest);
            return;
        }
        self.frames.push_back(frame.clone());
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Write the buffered frames, oldest first, into `trial_{tap:04}_{timestamp}`
    /// and start a fresh ring for the next trial.
    pub fn save_trial(&mut self, tap: u64) -> Result<PathBuf, ControllerError> {
        let folder = self.root.join(format!(
            "trial_{:04}_{}",
            tap,
            Local::now().format("%Y%m%d_%H%M%S")
        ));
        std::fs::create_dir_all(&folder)?;

        for (i, frame) in self.frames.iter().enumerate() {
            let path = folder.join(format!("frame_{:03}.png", i));
            save_png(&path, frame)?;
        }

        tracing::debug!(
            tap,
            frames = self.frames.len(),
            folder = %folder.display(),
            "Trial frames archived"
        );
        self.frames.clear();
        Ok(folder)
    }
}

fn save_png(path: &Path, frame: &Frame) -> Result<(), ControllerError> {
    let color = match frame.shape().channels() {
        1 => ExtendedColorType::L8,
        3 => ExtendedColorType::Rgb8,
        4 => ExtendedColorType::Rgba8,
        other => {
            return Err(ControllerError::Configuration(format!(
                "cannot archive {}-channel frames",
                other
            )));
        }
    };
    image::save_buffer(path, frame.as_bytes(), frame.width(), frame.height(), color)?;
    Ok(())
}
