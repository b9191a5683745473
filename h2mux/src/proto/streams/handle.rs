use bytes::Bytes;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use url::Url;

use super::state::StreamState;
use super::store::Key;
use super::stream::{SendStatus, StreamStats, StreamType};
use crate::codec::UserError;
use crate::delegate::Delegate;
use crate::frame::{HeaderBlock, StreamId};
use crate::priority::Priority;
use crate::proto::session::Shared;
use crate::proto::{SessionHandle, WindowSize};
use crate::Error;

/// A stream on a session.
///
/// Handles stay valid after the stream closes: operations then fail with
/// [`UserError::InactiveStreamId`] and queries report a closed stream. The
/// stream's statistics outlive it.
#[derive(Clone)]
pub struct StreamHandle {
    session: Weak<Shared>,
    key: Key,
    stats: Rc<RefCell<StreamStats>>,
}

impl StreamHandle {
    pub(crate) fn new(session: Weak<Shared>, key: Key, stats: Rc<RefCell<StreamStats>>) -> StreamHandle {
        StreamHandle {
            session,
            key,
            stats,
        }
    }

    pub(crate) fn key(&self) -> Key {
        self.key
    }

    /// The owning session, while it is alive.
    pub fn session(&self) -> Option<SessionHandle> {
        self.session.upgrade().map(SessionHandle::from_shared)
    }

    /// Zero until the request headers are written.
    pub fn stream_id(&self) -> StreamId {
        self.stats.borrow().stream_id
    }

    pub fn stats(&self) -> StreamStats {
        self.stats.borrow().clone()
    }

    /// Attaches the receiver of this stream's events. Events that arrived
    /// before are delivered right away.
    pub fn set_delegate<D>(&self, delegate: D) -> Result<(), UserError>
    where
        D: Delegate + 'static,
    {
        let session = self.session().ok_or(UserError::SessionGone)?;
        session.set_stream_delegate(self, Box::new(delegate))
    }

    pub fn send_request_headers(&self, headers: HeaderBlock, status: SendStatus) -> Result<(), UserError> {
        let key = self.key;
        self.session()
            .ok_or(UserError::SessionGone)?
            .update(|conn| conn.send_request_headers(key, headers, status))
    }

    /// Queues `data` for sending. The next chunk may only be queued after
    /// `on_data_sent`.
    pub fn send_data(&self, data: Bytes, status: SendStatus) -> Result<(), UserError> {
        let key = self.key;
        self.session()
            .ok_or(UserError::SessionGone)?
            .update(|conn| conn.send_data(key, data, status))
    }

    /// Abandons the stream, resetting it with `error` if the peer knows it.
    pub fn cancel(&self, error: Error) {
        let key = self.key;
        if let Some(session) = self.session() {
            session.update(|conn| conn.cancel_stream(key, error));
        }
    }

    /// Closes the stream without telling the peer.
    pub fn close(&self) {
        let key = self.key;
        if let Some(session) = self.session() {
            session.update(|conn| conn.close_stream(key));
        }
    }

    pub fn set_priority(&self, priority: Priority) {
        let key = self.key;
        if let Some(session) = self.session() {
            session.update(|conn| conn.set_stream_priority(key, priority));
        }
    }

    pub fn priority(&self) -> Option<Priority> {
        self.with_stream(|stream| stream.priority)
    }

    pub fn state(&self) -> StreamState {
        let key = self.key;
        match self.session() {
            Some(session) => session.read(|conn| conn.stream_state(key)),
            None => StreamState::Closed,
        }
    }

    pub fn is_locally_closed(&self) -> bool {
        self.state().is_locally_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    pub fn send_window_size(&self) -> Option<i32> {
        self.with_stream(|stream| stream.send_window.size())
    }

    pub fn recv_window_size(&self) -> Option<i32> {
        self.with_stream(|stream| stream.recv_window.size())
    }

    /// Credits the stream's send window as a WINDOW_UPDATE from the peer
    /// would.
    pub fn increase_send_window(&self, delta: WindowSize) {
        let key = self.key;
        if let Some(session) = self.session() {
            session.update(|conn| conn.increase_stream_send_window(key, delta));
        }
    }

    pub fn is_send_stalled_by_flow_control(&self) -> bool {
        self.with_stream(|stream| stream.send_stalled_by_flow_control)
            .unwrap_or(false)
    }

    pub fn url(&self) -> Option<Url> {
        self.with_stream(|stream| stream.url.clone())
    }

    pub fn kind(&self) -> Option<StreamType> {
        self.with_stream(|stream| stream.kind)
    }

    fn with_stream<R>(&self, f: impl FnOnce(&super::Stream) -> R) -> Option<R> {
        let key = self.key;
        self.session()?
            .read(|conn| conn.store.get(key).map(f))
    }
}

impl PartialEq for StreamHandle {
    fn eq(&self, other: &StreamHandle) -> bool {
        self.key == other.key && self.session.ptr_eq(&other.session)
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("StreamHandle")
            .field("stream_id", &self.stream_id())
            .field("key", &self.key)
            .finish()
    }
}
