//! Newline framing over a growable byte buffer.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::protocol::ProtocolError;

const READ_CHUNK: usize = 4096;

/// Splits a byte stream into `\n`-terminated lines.
///
/// Partial reads accumulate until a delimiter arrives; several messages in one read are
/// returned one at a time. A trailing `\r` is stripped.
#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    max_line: usize,
}

impl LineFramer {
    /// Framer rejecting lines longer than `max_line` bytes
    pub fn new(max_line: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK),
            max_line,
        }
    }

    /// Append received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as a line.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete line, without its delimiter.
    pub fn next_line(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        match self.buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if pos > self.max_line {
                    return Err(ProtocolError::LineTooLong {
                        limit: self.max_line,
                    });
                }
                let mut line = self.buf.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                Ok(Some(line.freeze()))
            }
            None if self.buf.len() > self.max_line => Err(ProtocolError::LineTooLong {
                limit: self.max_line,
            }),
            None => Ok(None),
        }
    }

    /// Read from `reader` until a full line is buffered.
    ///
    /// Returns `Ok(None)` when the peer closes the stream.
    pub async fn read_line<R>(&mut self, reader: &mut R) -> Result<Option<Bytes>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(line) = self.next_line()? {
                return Ok(Some(line));
            }
            self.buf.reserve(READ_CHUNK);
            if reader.read_buf(&mut self.buf).await? == 0 {
                return Ok(None);
            }
        }
    }
}
