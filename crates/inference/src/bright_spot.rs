use crate::detector::Detector;
use crate::hand::{HandLandmark, HandObservation, Handedness, Landmark};
use bridge::Frame;
use common::span_debug;

/// Treats the centroid of bright pixels as a single hand.
///
/// Every landmark is placed at the centroid. Enough to drive the tap signal from
/// a marker, an LED or the synthetic source without a learned model.
#[derive(Debug, Clone)]
pub struct BrightSpotDetector {
    pub luma_threshold: u8,
    /// Fewer bright pixels than this means "no hand".
    pub min_pixels: usize,
    pub handedness: Handedness,
}

impl Default for BrightSpotDetector {
    fn default() -> Self {
        Self {
            luma_threshold: 200,
            min_pixels: 4,
            handedness: Handedness::Left,
        }
    }
}

/// BT.601 luma, 8-bit fixed point.
#[inline]
fn luma(px: &[u8]) -> u8 {
    match px {
        &[r, g, b, ..] => ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8,
        &[y, ..] => y,
        &[] => 0,
    }
}

impl Detector for BrightSpotDetector {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<HandObservation>> {
        let _s = span_debug!("bright_spot_detect");

        if frame.is_empty() {
            anyhow::bail!("cannot run detection on an empty frame");
        }

        let shape = frame.shape();
        let channels = shape.channels() as usize;

        let mut count = 0u64;
        let mut sum_x = 0u64;
        let mut sum_y = 0u64;
        for (row, line) in frame.as_bytes().chunks_exact(shape.stride()).enumerate() {
            for (col, px) in line.chunks_exact(channels).enumerate() {
                if luma(px) >= self.luma_threshold {
                    count += 1;
                    sum_x += col as u64;
                    sum_y += row as u64;
                }
            }
        }

        if (count as usize) < self.min_pixels.max(1) {
            tracing::trace!(bright_pixels = count, "No hand in frame");
            return Ok(Vec::new());
        }

        // Pixel centers sit at +0.5.
        let x = ((sum_x as f64 / count as f64 + 0.5) / shape.width() as f64) as f32;
        let y = ((sum_y as f64 / count as f64 + 0.5) / shape.height() as f64) as f32;
        let landmark = Landmark { x, y, z: 0.0 };

        Ok(vec![HandObservation {
            handedness: self.handedness,
            landmarks: vec![landmark; HandLandmark::COUNT],
        }])
    }

    fn name(&self) -> &str {
        "bright_spot"
    }
}
