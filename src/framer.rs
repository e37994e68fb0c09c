use std::io;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::time::timeout;
use tokio_util::io::read_buf;

const READ_CHUNK: usize = 4096;
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer closed its side. `buffered` is what is still kept for the caller.
    #[error("peer closed the stream with {buffered} bytes buffered")]
    EndOfStream { buffered: usize },

    #[error("no data received within {0:?}")]
    TimedOut(Duration),

    #[error("more than {limit} bytes buffered without a delimiter")]
    FrameTooLarge { limit: usize },

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// Pulls delimited or length-bounded frames out of a byte stream.
///
/// Whatever is read past the end of a frame stays in `leftover` and is
/// served first on the next call, so a keep-alive connection never loses
/// the start of the following request.
pub struct Framer<R> {
    reader: R,
    leftover: BytesMut,
    read_timeout: Option<Duration>,
    max_frame: usize,
}

impl<R> Framer<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self::with_limits(reader, None, DEFAULT_MAX_FRAME)
    }

    pub fn with_limits(reader: R, read_timeout: Option<Duration>, max_frame: usize) -> Self {
        Framer {
            reader,
            leftover: BytesMut::with_capacity(READ_CHUNK),
            read_timeout,
            max_frame,
        }
    }

    pub fn set_read_timeout(&mut self, read_timeout: Option<Duration>) {
        self.read_timeout = read_timeout;
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn buffered(&self) -> &[u8] {
        &self.leftover
    }

    /// Returns everything up to `delimiter`. The delimiter itself is consumed
    /// and dropped.
    pub async fn read_until(&mut self, delimiter: &[u8]) -> Result<Bytes, FrameError> {
        let mut searched = 0;
        loop {
            if let Some(pos) = find(&self.leftover[searched..], delimiter) {
                let frame = self.leftover.split_to(searched + pos).freeze();
                self.leftover.advance(delimiter.len());
                return Ok(frame);
            }

            if self.leftover.len() > self.max_frame {
                return Err(FrameError::FrameTooLarge { limit: self.max_frame });
            }

            // The delimiter may straddle two reads.
            searched = self.leftover.len().saturating_sub(delimiter.len() - 1);
            self.fill().await?;
        }
    }

    pub async fn read_exactly(&mut self, n: usize) -> Result<Bytes, FrameError> {
        while self.leftover.len() < n {
            self.fill().await?;
        }
        Ok(self.leftover.split_to(n).freeze())
    }

    async fn fill(&mut self) -> Result<usize, FrameError> {
        self.leftover.reserve(READ_CHUNK);
        let read = read_buf(&mut self.reader, &mut self.leftover);

        let read_size = match self.read_timeout {
            Some(limit) => timeout(limit, read)
                .await
                .map_err(|_| FrameError::TimedOut(limit))??,
            None => read.await?,
        };

        // Ok(0) is a real EOF, not a slow peer.
        if read_size == 0 {
            return Err(FrameError::EndOfStream { buffered: self.leftover.len() });
        }
        Ok(read_size)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
