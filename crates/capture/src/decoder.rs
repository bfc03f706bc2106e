use crate::source::SourceError;
use common::span_debug;

/// Trait for decoding raw camera frames to RGB.
pub trait FrameDecoder: Send {
    /// Decode raw frame data to RGB (3 bytes per pixel) into `out`.
    fn decode_into(
        &mut self,
        raw: &[u8],
        width: u32,
        height: u32,
        out: &mut [u8],
    ) -> Result<(), SourceError>;
}

/// YUYV (YUV 4:2:2) decoder.
///
/// YUYV packs 2 pixels in 4 bytes: [Y0, U, Y1, V]
#[derive(Debug, Default, Clone, Copy)]
pub struct YuyvDecoder;

impl YuyvDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Raw buffer size for a `width × height` YUYV image.
    pub fn raw_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 2
    }
}

impl FrameDecoder for YuyvDecoder {
    fn decode_into(
        &mut self,
        raw: &[u8],
        width: u32,
        height: u32,
        out: &mut [u8],
    ) -> Result<(), SourceError> {
        let _s = span_debug!("yuyv_decode");

        if width % 2 != 0 {
            return Err(SourceError::Device(format!(
                "YUYV needs an even width, got {}",
                width
            )));
        }
        let bytes_per_row = width as usize * 2;
        let rows = height as usize;
        if rows == 0 || raw.len() < bytes_per_row * rows {
            return Err(SourceError::Device(format!(
                "YUYV buffer of {} bytes is too small for {}x{}",
                raw.len(),
                width,
                height
            )));
        }
        let rgb_size = width as usize * rows * 3;
        if out.len() != rgb_size {
            return Err(SourceError::Device(format!(
                "RGB output holds {} bytes, {}x{} needs {}",
                out.len(),
                width,
                height,
                rgb_size
            )));
        }

        // Drivers may pad rows.
        let stride = raw.len() / rows;

        for (row, out_row) in out.chunks_exact_mut(width as usize * 3).enumerate() {
            let row_start = row * stride;
            let row_data = &raw[row_start..row_start + bytes_per_row];

            for (chunk, px) in row_data.chunks_exact(4).zip(out_row.chunks_exact_mut(6)) {
                let y0 = chunk[0] as i32;
                let u = chunk[1] as i32 - 128;
                let y1 = chunk[2] as i32;
                let v = chunk[3] as i32 - 128;

                // BT.601 fixed-point coefficients (8-bit fraction)
                // R = Y + 1.402*V  -> Y + (359*V >> 8)
                // G = Y - 0.344*U - 0.714*V -> Y - ((88*U + 183*V) >> 8)
                // B = Y + 1.772*U -> Y + (454*U >> 8)
                let rv = (359 * v) >> 8;
                let gu = (88 * u + 183 * v) >> 8;
                let bu = (454 * u) >> 8;

                px[0] = (y0 + rv).clamp(0, 255) as u8;
                px[1] = (y0 - gu).clamp(0, 255) as u8;
                px[2] = (y0 + bu).clamp(0, 255) as u8;
                px[3] = (y1 + rv).clamp(0, 255) as u8;
                px[4] = (y1 - gu).clamp(0, 255) as u8;
                px[5] = (y1 + bu).clamp(0, 255) as u8;
            }
        }

        Ok(())
    }
}
