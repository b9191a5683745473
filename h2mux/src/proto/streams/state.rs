use self::StreamState::*;

/// Lifecycle of one stream.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StreamState {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
    /// Server initiated, waiting for its response headers.
    ReservedRemote,
    /// Pushed stream whose headers arrived before anyone claimed it.
    HalfClosedLocalUnclaimed,
}

/// Which header block the stream accepts next.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ResponseState {
    ReadyForHeaders,
    ReadyForDataOrTrailers,
    TrailersReceived,
}

/// Outcome of the remote side finishing its half.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum RecvClose {
    /// Stream stays half open; the delegate sees end of data.
    HalfClosed,
    /// Both sides are done.
    Closed,
    /// Not a valid place to finish.
    Invalid,
}

impl StreamState {
    pub fn is_idle(&self) -> bool {
        *self == Idle
    }

    pub fn is_open(&self) -> bool {
        *self == Open
    }

    pub fn is_closed(&self) -> bool {
        *self == Closed
    }

    /// Nothing more will be written locally.
    pub fn is_locally_closed(&self) -> bool {
        match *self {
            HalfClosedLocal | HalfClosedLocalUnclaimed | Closed => true,
            _ => false,
        }
    }

    pub fn can_send_data(&self) -> bool {
        match *self {
            Open | HalfClosedRemote => true,
            _ => false,
        }
    }

    /// Request headers finished writing.
    pub(crate) fn send_open(&mut self) {
        if *self == Idle {
            *self = Open;
        }
    }

    /// The final local frame finished writing.
    pub(crate) fn send_close(&mut self) {
        *self = match *self {
            Open => HalfClosedLocal,
            HalfClosedRemote => Closed,
            state => state,
        };
    }

    pub(crate) fn recv_close(&mut self) -> RecvClose {
        match *self {
            Open => {
                *self = HalfClosedRemote;
                RecvClose::HalfClosed
            }
            HalfClosedLocal => {
                *self = Closed;
                RecvClose::Closed
            }
            _ => RecvClose::Invalid,
        }
    }

    pub(crate) fn reserve_remote(&mut self) {
        debug_assert_eq!(*self, Idle);
        *self = ReservedRemote;
    }

    /// Response headers of a pushed stream arrived.
    pub(crate) fn recv_push_headers(&mut self) {
        if *self == ReservedRemote {
            *self = HalfClosedLocalUnclaimed;
        }
    }

    /// A delegate took over a pushed stream.
    pub(crate) fn claim(&mut self) {
        if *self == HalfClosedLocalUnclaimed {
            *self = HalfClosedLocal;
        }
    }
}

impl Default for StreamState {
    fn default() -> Self {
        Idle
    }
}
