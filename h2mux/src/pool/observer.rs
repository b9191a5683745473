use super::SessionKey;
use crate::frame::StreamId;
use crate::proto::SessionId;
use crate::Error;

/// Informational notifications about sessions and their streams.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SessionCreated {
        session: SessionId,
        key: SessionKey,
    },
    SessionFound {
        session: SessionId,
        key: SessionKey,
        /// Served through an IP pooled alias rather than an exact key match.
        via_alias: bool,
    },
    SessionClosed {
        session: SessionId,
        status: Result<(), Error>,
    },
    StreamOpened {
        session: SessionId,
        stream_id: StreamId,
    },
    StreamClosed {
        session: SessionId,
        stream_id: StreamId,
        status: Result<(), Error>,
    },
    ProtocolError {
        session: SessionId,
        stream_id: Option<StreamId>,
        error: Error,
    },
}

/// Receives [`SessionEvent`]s. Implementations must not rely on being
/// called at any particular point of a session's processing.
pub trait Observer {
    fn on_event(&self, event: &SessionEvent);
}
