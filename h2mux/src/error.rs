use std::io;

use thiserror::Error;

use crate::frame::Reason;

/// Close reason delivered to streams, stream requests and the pool.
///
/// `Copy` because one session failure fans out to every stream it carried.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Error)]
pub enum Error {
    #[error("operation failed")]
    Failed,
    #[error("operation aborted")]
    Aborted,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("connection reset")]
    ConnectionReset,
    #[error("socket is not connected")]
    SocketNotConnected,
    #[error("network changed")]
    NetworkChanged,
    #[error("certificate database changed")]
    CertDatabaseChanged,
    #[error("operation timed out")]
    TimedOut,
    #[error("HTTP/1.1 required")]
    Http11Required,
    #[error("HTTP/2 protocol error")]
    Protocol,
    #[error("HTTP/2 flow control error")]
    FlowControl,
    #[error("HTTP/2 frame size error")]
    FrameSize,
    #[error("HTTP/2 compression error")]
    Compression,
    #[error("HTTP/2 stream closed")]
    StreamClosed,
    #[error("HTTP/2 ping failed")]
    PingFailed,
    #[error("server refused stream")]
    ServerRefusedStream,
    #[error("RST_STREAM with NO_ERROR received")]
    RstStreamNoErrorReceived,
    #[error("inadequate transport security")]
    InadequateTransportSecurity,
    #[error("i/o error: {0:?}")]
    Io(io::ErrorKind),
}

impl Error {
    /// Error code written into RST_STREAM when this error resets a stream.
    pub fn reset_reason(&self) -> Reason {
        match *self {
            Error::Failed => Reason::INTERNAL_ERROR,
            Error::Aborted => Reason::CANCEL,
            Error::FlowControl => Reason::FLOW_CONTROL_ERROR,
            Error::TimedOut => Reason::REFUSED_STREAM,
            Error::StreamClosed => Reason::STREAM_CLOSED,
            _ => Reason::PROTOCOL_ERROR,
        }
    }

    /// Error code written into GOAWAY when this error drains a session.
    pub fn go_away_reason(&self) -> Reason {
        match *self {
            Error::Protocol => Reason::PROTOCOL_ERROR,
            Error::Failed => Reason::INTERNAL_ERROR,
            Error::FlowControl => Reason::FLOW_CONTROL_ERROR,
            Error::FrameSize => Reason::FRAME_SIZE_ERROR,
            Error::Compression => Reason::COMPRESSION_ERROR,
            Error::InadequateTransportSecurity => Reason::INADEQUATE_SECURITY,
            Error::Http11Required => Reason::HTTP_1_1_REQUIRED,
            _ => Reason::PROTOCOL_ERROR,
        }
    }

    /// Close reasons that do not warrant telling the peer via GOAWAY.
    pub(crate) fn is_quiet_close(&self) -> bool {
        match *self {
            Error::Aborted
            | Error::NetworkChanged
            | Error::SocketNotConnected
            | Error::Http11Required
            | Error::ConnectionClosed
            | Error::ConnectionReset => true,
            _ => false,
        }
    }

    /// Maps a received connection error code to a close reason.
    pub(crate) fn from_reason(reason: Reason) -> Error {
        match reason {
            Reason::FLOW_CONTROL_ERROR => Error::FlowControl,
            Reason::FRAME_SIZE_ERROR => Error::FrameSize,
            Reason::COMPRESSION_ERROR => Error::Compression,
            Reason::INADEQUATE_SECURITY => Error::InadequateTransportSecurity,
            Reason::HTTP_1_1_REQUIRED => Error::Http11Required,
            _ => Error::Protocol,
        }
    }
}

impl From<io::Error> for Error {
    fn from(src: io::Error) -> Error {
        match src.kind() {
            io::ErrorKind::ConnectionReset => Error::ConnectionReset,
            io::ErrorKind::NotConnected => Error::SocketNotConnected,
            io::ErrorKind::TimedOut => Error::TimedOut,
            kind => Error::Io(kind),
        }
    }
}
