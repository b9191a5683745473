use std::{error, fmt, io};

use crate::frame::{Reason, StreamId};

/// Failure reported by [`FrameCodec::decode`](super::FrameCodec::decode).
#[derive(Debug)]
pub enum RecvError {
    Connection(Reason),
    Stream { id: StreamId, reason: Reason },
    Io(io::Error),
}

/// Failure reported by [`FrameCodec::encode`](super::FrameCodec::encode).
#[derive(Debug)]
pub enum SendError {
    Connection(Reason),
    Io(io::Error),
}

/// Misuse of a stream handle.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UserError {
    InactiveStreamId,
    UnexpectedFrameType,
    DelegateAlreadySet,
    HeadersAlreadySent,
    SendWhileClosed,
    SendInProgress,
    SessionGone,
}

impl From<io::Error> for RecvError {
    fn from(src: io::Error) -> Self {
        RecvError::Io(src)
    }
}

impl error::Error for RecvError {}

impl fmt::Display for RecvError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::RecvError::*;

        match *self {
            Connection(ref reason) => reason.fmt(fmt),
            Stream { ref reason, .. } => reason.fmt(fmt),
            Io(ref e) => e.fmt(fmt),
        }
    }
}

impl error::Error for SendError {}

impl fmt::Display for SendError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::SendError::*;

        match *self {
            Connection(ref reason) => reason.fmt(fmt),
            Io(ref e) => e.fmt(fmt),
        }
    }
}

impl From<io::Error> for SendError {
    fn from(src: io::Error) -> Self {
        SendError::Io(src)
    }
}

impl error::Error for UserError {}

impl fmt::Display for UserError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::UserError::*;

        fmt.write_str(match *self {
            InactiveStreamId => "inactive stream",
            UnexpectedFrameType => "unexpected frame type",
            DelegateAlreadySet => "stream delegate already set",
            HeadersAlreadySent => "request headers already sent",
            SendWhileClosed => "send on a locally closed stream",
            SendInProgress => "previous body chunk not yet sent",
            SessionGone => "session no longer exists",
        })
    }
}
