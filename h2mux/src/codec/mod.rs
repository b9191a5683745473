//! The framing seam between a session and its transport.
//!
//! Frame byte layout and HPACK are not implemented here. A session is handed
//! a [`FrameCodec`] that turns bytes into [`Frame`]s and back; it must be
//! driven in wire order on one task since its compression context is
//! stateful.

mod error;
mod framed;

pub use self::error::{RecvError, SendError, UserError};
pub(crate) use self::framed::Framed;

use bytes::BytesMut;

use crate::frame::Frame;

pub trait FrameCodec {
    /// Decodes one frame from the front of `src`, consuming its bytes.
    ///
    /// `Ok(None)` means more bytes are needed.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, RecvError>;

    /// Appends the encoding of `frame` to `dst`.
    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), SendError>;
}
