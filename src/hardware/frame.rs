//! Captured camera frames.

use chrono::{DateTime, Utc};

/// A single captured image.
///
/// # Storage
/// Pixels are packed row-major in a byte vector, `channels` bytes per pixel
/// (1 = grayscale, 3 = BGR as delivered by most USB cameras).
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Bytes per pixel
    pub channels: u8,

    /// Raw pixel data
    pub data: Vec<u8>,

    /// When the frame left the camera
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Create a frame from raw byte data.
    ///
    /// The caller must ensure `data.len() == width * height * channels`.
    pub fn from_bytes(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            channels,
            data,
            captured_at: Utc::now(),
        }
    }

    /// A uniformly filled frame.
    pub fn filled(width: u32, height: u32, channels: u8, value: u8) -> Self {
        let len = width as usize * height as usize * channels as usize;
        Self::from_bytes(width, height, channels, vec![value; len])
    }

    /// Number of bytes one row occupies.
    pub fn stride(&self) -> usize {
        self.width as usize * self.channels as usize
    }

    /// Whether the buffer length matches the declared geometry.
    pub fn is_well_formed(&self) -> bool {
        self.channels > 0 && self.data.len() == self.stride() * self.height as usize
    }

    /// Pixel bytes at (x, y), or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = y as usize * self.stride() + x as usize * self.channels as usize;
        self.data.get(start..start + self.channels as usize)
    }

    /// Overwrite the pixel at (x, y). Out-of-range coordinates are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, color: &[u8]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let channels = self.channels as usize;
        let start = y as usize * self.stride() + x as usize * channels;
        if let Some(dst) = self.data.get_mut(start..start + channels) {
            for (i, byte) in dst.iter_mut().enumerate() {
                *byte = color.get(i).copied().unwrap_or(0);
            }
        }
    }

    /// Nearest-neighbour resample to `width` x `height`.
    pub fn resized(&self, width: u32, height: u32) -> Frame {
        let channels = self.channels as usize;
        let mut data = Vec::with_capacity(width as usize * height as usize * channels);
        for y in 0..height {
            let src_y = (u64::from(y) * u64::from(self.height) / u64::from(height.max(1))) as u32;
            for x in 0..width {
                let src_x = (u64::from(x) * u64::from(self.width) / u64::from(width.max(1))) as u32;
                match self.pixel(src_x, src_y) {
                    Some(px) => data.extend_from_slice(px),
                    None => data.extend(std::iter::repeat(0).take(channels)),
                }
            }
        }
        Frame {
            width,
            height,
            channels: self.channels,
            data,
            captured_at: self.captured_at,
        }
    }
}
