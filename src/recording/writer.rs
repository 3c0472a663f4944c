//! Recording container writers.
//!
//! The core never encodes video itself. It asks a [`VideoWriterFactory`] for a
//! [`FrameWriter`] bound to a file and appends frames to it. [`RawVideoWriter`] is the
//! built-in container: a small header followed by timestamped raw frames.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::hardware::Frame;

/// Appends frames to one open recording file.
pub trait FrameWriter: Send {
    /// Append one frame
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush buffered data and close the file
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Opens recording files.
pub trait VideoWriterFactory: Send + Sync {
    /// Create a writer for `path` sized for `width` x `height` frames at `fps`
    fn create(&self, path: &Path, fps: u32, width: u32, height: u32) -> Result<Box<dyn FrameWriter>>;
}

/// Magic bytes opening every raw recording.
pub const RAW_MAGIC: &[u8; 4] = b"ESRV";
const RAW_VERSION: u8 = 1;

/// Writer for the raw container format.
///
/// Layout (little endian): magic, version `u8`, width `u32`, height `u32`, fps `u32`,
/// then per frame: capture time in unix milliseconds `i64`, channels `u8`, payload
/// length `u32`, payload. Frames of a different size are resampled to the header size.
pub struct RawVideoWriter {
    out: BufWriter<File>,
    width: u32,
    height: u32,
}

impl RawVideoWriter {
    /// Create `path` and write the header
    pub fn create(path: &Path, fps: u32, width: u32, height: u32) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create recording {}", path.display()))?;
        let mut out = BufWriter::new(file);
        out.write_all(RAW_MAGIC)?;
        out.write_all(&[RAW_VERSION])?;
        out.write_all(&width.to_le_bytes())?;
        out.write_all(&height.to_le_bytes())?;
        out.write_all(&fps.to_le_bytes())?;
        Ok(Self { out, width, height })
    }
}

impl FrameWriter for RawVideoWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let resized;
        let frame = if frame.width == self.width && frame.height == self.height {
            frame
        } else {
            resized = frame.resized(self.width, self.height);
            &resized
        };

        let len = u32::try_from(frame.data.len()).context("Frame too large for container")?;
        self.out
            .write_all(&frame.captured_at.timestamp_millis().to_le_bytes())?;
        self.out.write_all(&[frame.channels])?;
        self.out.write_all(&len.to_le_bytes())?;
        self.out.write_all(&frame.data)?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let file = self
            .out
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush recording: {}", e.error()))?;
        file.sync_all()?;
        Ok(())
    }
}

/// Factory producing [`RawVideoWriter`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawVideoWriterFactory;

impl VideoWriterFactory for RawVideoWriterFactory {
    fn create(&self, path: &Path, fps: u32, width: u32, height: u32) -> Result<Box<dyn FrameWriter>> {
        Ok(Box::new(RawVideoWriter::create(path, fps, width, height)?))
    }
}
