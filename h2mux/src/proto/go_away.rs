use bytes::Bytes;

use super::connection::Connection;
use crate::frame::{self, Reason, StreamId};
use crate::Error;

/// GOAWAY frames seen in either direction.
#[derive(Debug, Default)]
pub(super) struct GoAway {
    /// What the peer told us.
    pub received: Option<Received>,

    /// Error code we closed with.
    pub sent: Option<Reason>,
}

#[derive(Debug, Clone)]
pub(super) struct Received {
    pub last_stream_id: StreamId,
    pub reason: Reason,
    pub debug_data: Bytes,
}

impl GoAway {
    pub(super) fn new() -> GoAway {
        GoAway::default()
    }
}

impl Connection {
    pub(super) fn recv_go_away(&mut self, frame: frame::GoAway) {
        let last_stream_id = frame.last_stream_id();
        let reason = frame.reason();
        tracing::debug!(?last_stream_id, ?reason, "received GOAWAY");

        self.go_away.received = Some(Received {
            last_stream_id,
            reason,
            debug_data: frame.debug_data().clone(),
        });

        self.make_unavailable();
        match reason {
            Reason::HTTP_1_1_REQUIRED => {
                self.do_drain_session(Err(Error::Http11Required), "HTTP/1.1 required");
            }
            Reason::NO_ERROR => self.start_going_away(last_stream_id, Error::ServerRefusedStream),
            _ => self.start_going_away(last_stream_id, Error::Protocol),
        }
        self.maybe_finish_going_away();
    }
}
