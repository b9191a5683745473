use bytes::{Buf, Bytes, BytesMut};
use futures_util::io::{AsyncRead, AsyncWrite};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::codec::{FrameCodec, RecvError, SendError};
use crate::frame::Frame;
use crate::transport::Transport;

const READ_BUFFER_SIZE: usize = 8 * 1_024;

const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1_024;

/// A transport paired with its codec.
///
/// Reads accumulate in `read_buf` until the codec can cut a frame off the
/// front. Writes are encoded one frame at a time so the session can track
/// the frame in flight.
pub(crate) struct Framed {
    io: Box<dyn Transport>,
    codec: Box<dyn FrameCodec>,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl Framed {
    pub fn new(io: Box<dyn Transport>, codec: Box<dyn FrameCodec>) -> Framed {
        Framed {
            io,
            codec,
            read_buf: BytesMut::with_capacity(DEFAULT_BUFFER_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUFFER_CAPACITY),
        }
    }

    pub fn transport(&self) -> &dyn Transport {
        &*self.io
    }

    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        &mut *self.io
    }

    /// Reads once from the transport, appending to the read buffer.
    pub fn poll_fill(&mut self, cx: &mut Context) -> Poll<io::Result<usize>> {
        let mut chunk = [0u8; READ_BUFFER_SIZE];
        let n = ready!(Pin::new(&mut self.io).poll_read(cx, &mut chunk))?;
        self.read_buf.extend_from_slice(&chunk[..n]);
        tracing::trace!(read = n, buffered = self.read_buf.len(), "poll_fill");
        Poll::Ready(Ok(n))
    }

    /// Cuts the next frame off the read buffer, along with the number of
    /// wire bytes it occupied.
    pub fn decode(&mut self) -> Result<Option<(Frame, usize)>, RecvError> {
        if self.read_buf.is_empty() {
            return Ok(None);
        }

        let before = self.read_buf.len();
        let frame = self.codec.decode(&mut self.read_buf)?;
        Ok(frame.map(|frame| (frame, before - self.read_buf.len())))
    }

    pub fn encode(&mut self, frame: Frame) -> Result<Bytes, SendError> {
        tracing::debug!(frame = ?frame, "send");
        self.write_buf.clear();
        self.codec.encode(frame, &mut self.write_buf)?;
        Ok(self.write_buf.split().freeze())
    }

    /// Writes as much of `buf` as the transport accepts, advancing it.
    pub fn poll_write(&mut self, cx: &mut Context, buf: &mut Bytes) -> Poll<io::Result<usize>> {
        let n = ready!(Pin::new(&mut self.io).poll_write(cx, buf.chunk()))?;
        buf.advance(n);
        Poll::Ready(Ok(n))
    }

    pub fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    pub fn poll_close(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_close(cx)
    }
}

impl fmt::Debug for Framed {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Framed")
            .field("read_buf", &self.read_buf.len())
            .finish()
    }
}
