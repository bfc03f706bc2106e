use crate::pacing::FramePacer;
use crate::source::{FrameSource, SourceError};
use bridge::{AcquisitionTimings, Frame, FrameShape, MonotonicTime, StopSignal};
use std::path::PathBuf;
use std::time::Instant;

/// Replays a sorted set of image files as camera frames.
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    shape: FrameShape,
    looping: bool,
    pacer: Option<FramePacer>,
    stop: Option<StopSignal>,
    index: usize,
}

impl ImageSequenceSource {
    /// Collect the files matching `pattern` (a glob such as `recordings/*.png`).
    pub fn from_glob(pattern: &str, shape: FrameShape) -> Result<Self, SourceError> {
        let paths = glob::glob(pattern)
            .map_err(|e| SourceError::Device(format!("invalid pattern {:?}: {}", pattern, e)))?
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable path");
                    None
                }
            })
            .collect();
        Self::from_paths(paths, shape)
    }

    pub fn from_paths(mut paths: Vec<PathBuf>, shape: FrameShape) -> Result<Self, SourceError> {
        if !matches!(shape.channels(), 1 | 3) {
            return Err(SourceError::Device(format!(
                "image replay produces gray or RGB frames, not {} channels",
                shape.channels()
            )));
        }
        if paths.is_empty() {
            return Err(SourceError::Device("no images to replay".to_string()));
        }
        paths.sort();

        Ok(Self {
            paths,
            shape,
            looping: false,
            pacer: None,
            stop: None,
            index: 0,
        })
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Replay at `fps`; without it frames are delivered as fast as they decode.
    pub fn paced(mut self, fps: f64, stop: Option<StopSignal>) -> Self {
        self.pacer = FramePacer::new(fps);
        self.stop = stop;
        self
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn start(&mut self) -> Result<(), SourceError> {
        tracing::info!(
            images = self.paths.len(),
            shape = %self.shape,
            looping = self.looping,
            "Image sequence source started"
        );
        self.index = 0;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<(Frame, AcquisitionTimings), SourceError> {
        if self.index >= self.paths.len() {
            if !self.looping {
                return Err(SourceError::EndOfStream);
            }
            self.index = 0;
        }

        if let Some(pacer) = self.pacer.as_mut()
            && !pacer.wait(self.stop.as_ref())
        {
            return Ok((Frame::empty(self.shape), AcquisitionTimings::default()));
        }

        let path = &self.paths[self.index];
        self.index += 1;

        let acquire_start = Instant::now();
        let image = image::open(path)
            .map_err(|e| SourceError::Device(format!("{}: {}", path.display(), e)))?;
        let acquisition = acquire_start.elapsed();

        let stamp_start = Instant::now();
        let _device_stamp = MonotonicTime::now()?;
        let timestamp = stamp_start.elapsed();

        if image.height() != self.shape.height() || image.width() != self.shape.width() {
            return Err(SourceError::Device(format!(
                "{} is {}x{}, expected {}x{}",
                path.display(),
                image.height(),
                image.width(),
                self.shape.height(),
                self.shape.width()
            )));
        }

        let convert_start = Instant::now();
        let samples = match self.shape.channels() {
            1 => image.into_luma8().into_raw(),
            _ => image.into_rgb8().into_raw(),
        };
        let frame = Frame::from_vec(self.shape, samples)?;
        let conversion = convert_start.elapsed();

        Ok((
            frame,
            AcquisitionTimings {
                acquisition,
                timestamp,
                conversion,
            },
        ))
    }

    fn cleanup(&mut self) {
        tracing::debug!(position = self.index, "Image sequence source closed");
    }

    fn name(&self) -> &str {
        "images"
    }
}
