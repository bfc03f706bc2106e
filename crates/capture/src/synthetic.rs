//! Synthetic camera: a bright block ("the hand") over a dark background,
//! bouncing towards a reference line on a periodic tap waveform.
//!
//! Frames are rendered as YUYV and pushed through the same decoder a real
//! YUYV camera would use, so the conversion timing is realistic.

use crate::decoder::{FrameDecoder, YuyvDecoder};
use crate::pacing::FramePacer;
use crate::source::{FrameSource, SourceError};
use bridge::{AcquisitionTimings, Frame, FrameShape, MonotonicTime, StopSignal};
use std::time::Instant;

const BACKGROUND_LUMA: u8 = 16;
const HAND_LUMA: u8 = 235;
const NEUTRAL_CHROMA: u8 = 128;

/// Distance of the hand above the reference line over time.
#[derive(Debug, Clone, PartialEq)]
pub struct TapWaveform {
    /// Offset while the hand is raised, in pixels.
    pub rest_offset_px: f32,
    /// Offset at the bottom of a tap, in pixels.
    pub tap_offset_px: f32,
    /// Taps per second. 0 holds the hand at rest.
    pub tap_hz: f32,
    /// Fraction of each period spent down.
    pub duty: f32,
}

impl Default for TapWaveform {
    fn default() -> Self {
        Self {
            rest_offset_px: 40.0,
            tap_offset_px: 5.0,
            tap_hz: 1.0,
            duty: 0.25,
        }
    }
}

impl TapWaveform {
    pub fn offset_at(&self, seconds: f64) -> f32 {
        if self.tap_hz <= 0.0 {
            return self.rest_offset_px;
        }
        let phase = (seconds * self.tap_hz as f64).fract() as f32;
        if phase < self.duty {
            self.tap_offset_px
        } else {
            self.rest_offset_px
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub fps: f64,
    /// Row of the reference line. Defaults to 60% of the frame height.
    pub reference_y: Option<f32>,
    pub block_size: Option<u32>,
    pub waveform: TapWaveform,
    /// Uniform vertical jitter in ±pixels.
    pub jitter_px: u32,
    /// End of stream after this many frames.
    pub frame_limit: Option<u64>,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            fps: 60.0,
            reference_y: None,
            block_size: None,
            waveform: TapWaveform::default(),
            jitter_px: 0,
            frame_limit: None,
            seed: 0x7A95,
        }
    }
}

pub struct SyntheticSource {
    shape: FrameShape,
    config: SyntheticConfig,
    reference_y: f32,
    block_size: u32,
    pacer: Option<FramePacer>,
    stop: Option<StopSignal>,
    decoder: YuyvDecoder,
    rng: fastrand::Rng,
    raw: Vec<u8>,
    frames: u64,
}

impl SyntheticSource {
    pub fn new(shape: FrameShape, config: SyntheticConfig) -> Result<Self, SourceError> {
        if shape.channels() != 3 {
            return Err(SourceError::Device(format!(
                "synthetic source renders RGB, frame shape {} has {} channels",
                shape,
                shape.channels()
            )));
        }
        if shape.width() % 2 != 0 {
            return Err(SourceError::Device(format!(
                "synthetic source renders YUYV, width {} must be even",
                shape.width()
            )));
        }

        let reference_y = config
            .reference_y
            .unwrap_or(shape.height() as f32 * 0.6);
        let block_size = config
            .block_size
            .unwrap_or(shape.height() / 10)
            .max(2)
            .min(shape.height().min(shape.width()));
        // A zero rate means "as fast as possible".
        let pacer = FramePacer::new(config.fps);
        let rng = fastrand::Rng::with_seed(config.seed);

        Ok(Self {
            shape,
            reference_y,
            block_size,
            pacer,
            stop: None,
            decoder: YuyvDecoder::new(),
            rng,
            raw: vec![0u8; YuyvDecoder::raw_len(shape.width(), shape.height())],
            frames: 0,
            config,
        })
    }

    /// Let a stop request cut a pacing wait short.
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn reference_y(&self) -> f32 {
        self.reference_y
    }

    /// Expected hand offset for frame `index`, before jitter.
    pub fn offset_for_frame(&self, index: u64) -> f32 {
        let fps = if self.config.fps > 0.0 { self.config.fps } else { 60.0 };
        self.config.waveform.offset_at(index as f64 / fps)
    }

    fn render(&mut self, center_y: f32) {
        let width = self.shape.width() as usize;
        let height = self.shape.height() as i64;

        for pair in self.raw.chunks_exact_mut(2) {
            pair[0] = BACKGROUND_LUMA;
            pair[1] = NEUTRAL_CHROMA;
        }

        let half = self.block_size as i64 / 2;
        let top = (center_y.round() as i64 - half).clamp(0, height);
        let bottom = (top + self.block_size as i64).min(height);
        let left = (width - self.block_size as usize) / 2;

        for row in top as usize..bottom as usize {
            let row_start = row * width * 2;
            for col in left..left + self.block_size as usize {
                self.raw[row_start + col * 2] = HAND_LUMA;
            }
        }
    }
}

impl FrameSource for SyntheticSource {
    fn start(&mut self) -> Result<(), SourceError> {
        tracing::info!(
            shape = %self.shape,
            fps = self.config.fps,
            reference_y = self.reference_y,
            tap_hz = self.config.waveform.tap_hz,
            "Synthetic source started"
        );
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.reset();
        }
        Ok(())
    }

    fn read_frame(&mut self) -> Result<(Frame, AcquisitionTimings), SourceError> {
        if self
            .config
            .frame_limit
            .is_some_and(|limit| self.frames >= limit)
        {
            return Err(SourceError::EndOfStream);
        }

        if let Some(pacer) = self.pacer.as_mut()
            && !pacer.wait(self.stop.as_ref())
        {
            // Stopped mid-wait: report nothing captured.
            return Ok((Frame::empty(self.shape), AcquisitionTimings::default()));
        }

        let acquire_start = Instant::now();
        let jitter = if self.config.jitter_px > 0 {
            let j = self.config.jitter_px as i32;
            self.rng.i32(-j..=j) as f32
        } else {
            0.0
        };
        let center_y = self.reference_y - self.offset_for_frame(self.frames) + jitter;
        self.render(center_y);
        let acquisition = acquire_start.elapsed();

        let stamp_start = Instant::now();
        let _device_stamp = MonotonicTime::now()?;
        let timestamp = stamp_start.elapsed();

        let convert_start = Instant::now();
        let mut frame = Frame::try_new(self.shape)?;
        self.decoder.decode_into(
            &self.raw,
            self.shape.width(),
            self.shape.height(),
            frame.as_bytes_mut(),
        )?;
        let conversion = convert_start.elapsed();

        self.frames += 1;
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
        tracing::info!(frames = self.frames, "Synthetic source closed");
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> FrameShape {
        FrameShape::new(100, 80, 3).unwrap()
    }

    fn unpaced(waveform: TapWaveform) -> SyntheticConfig {
        SyntheticConfig {
            fps: 0.0,
            waveform,
            ..SyntheticConfig::default()
        }
    }

    fn bright_rows(frame: &Frame) -> Vec<u32> {
        (0..frame.height())
            .filter(|&row| (0..frame.width()).any(|col| frame.pixel(row, col).unwrap()[0] > 128))
            .collect()
    }

    #[test]
    fn test_waveform_shape() {
        let wave = TapWaveform {
            rest_offset_px: 40.0,
            tap_offset_px: 5.0,
            tap_hz: 2.0,
            duty: 0.25,
        };
        assert_eq!(wave.offset_at(0.0), 5.0);
        assert_eq!(wave.offset_at(0.1), 5.0);
        assert_eq!(wave.offset_at(0.2), 40.0);
        assert_eq!(wave.offset_at(0.5), 5.0);

        let still = TapWaveform {
            tap_hz: 0.0,
            ..wave
        };
        assert_eq!(still.offset_at(0.1), 40.0);
    }

    #[test]
    fn test_rejects_non_rgb_and_odd_width() {
        let gray = FrameShape::new(10, 10, 1).unwrap();
        assert!(SyntheticSource::new(gray, SyntheticConfig::default()).is_err());

        let odd = FrameShape::new(10, 11, 3).unwrap();
        assert!(SyntheticSource::new(odd, SyntheticConfig::default()).is_err());
    }

    #[test]
    fn test_single_row_frame_renders() {
        let tiny = FrameShape::new(1, 2, 3).unwrap();
        let mut source = SyntheticSource::new(tiny, unpaced(TapWaveform::default())).unwrap();
        source.start().unwrap();

        let (frame, _) = source.read_frame().unwrap();
        assert_eq!(frame.shape(), tiny);
        assert!(!frame.is_empty());
    }

    #[test]
    fn test_block_sits_above_reference_line() {
        let config = SyntheticConfig {
            reference_y: Some(60.0),
            block_size: Some(10),
            ..unpaced(TapWaveform {
                tap_hz: 0.0,
                ..TapWaveform::default()
            })
        };
        let mut source = SyntheticSource::new(shape(), config).unwrap();
        source.start().unwrap();

        let (frame, timings) = source.read_frame().unwrap();
        assert!(!frame.is_empty());
        assert_eq!(frame.shape(), shape());

        // Center at 60 - 40 = 20, block spans rows 15..25
        let rows = bright_rows(&frame);
        assert_eq!(rows.first(), Some(&15));
        assert_eq!(rows.last(), Some(&24));
        assert!(timings.total() > std::time::Duration::ZERO);
    }

    #[test]
    fn test_frame_limit_ends_stream() {
        let config = SyntheticConfig {
            frame_limit: Some(2),
            ..unpaced(TapWaveform::default())
        };
        let mut source = SyntheticSource::new(shape(), config).unwrap();

        assert!(source.read_frame().is_ok());
        assert!(source.read_frame().is_ok());
        assert!(matches!(source.read_frame(), Err(SourceError::EndOfStream)));
    }

    #[test]
    fn test_stop_yields_empty_frame() {
        let stop = StopSignal::new();
        let config = SyntheticConfig {
            fps: 0.2,
            ..SyntheticConfig::default()
        };
        let mut source = SyntheticSource::new(shape(), config)
            .unwrap()
            .with_stop(stop.clone());

        // First slot is immediate, the second would wait five seconds.
        assert!(!source.read_frame().unwrap().0.is_empty());
        stop.set();
        assert!(source.read_frame().unwrap().0.is_empty());
    }

    #[test]
    fn test_jitter_is_seeded() {
        let config = SyntheticConfig {
            jitter_px: 3,
            ..unpaced(TapWaveform::default())
        };
        let mut a = SyntheticSource::new(shape(), config.clone()).unwrap();
        let mut b = SyntheticSource::new(shape(), config).unwrap();

        for _ in 0..5 {
            assert_eq!(a.read_frame().unwrap().0, b.read_frame().unwrap().0);
        }
    }
}
