use fnv::FnvHashMap;
use futures_util::task::{LocalFutureObj, LocalSpawn};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tracing_futures::Instrument;

use super::connection::{Availability, Connection, Event, Progress};
use super::streams::{Key, Pending, StreamEvent, StreamHandle};
use super::WindowSize;
use crate::codec::{FrameCodec, Framed, UserError};
use crate::config::PoolConfig;
use crate::delegate::Delegate;
use crate::frame::{Reason, StreamId};
use crate::pool::{Observer, PoolInner, SessionKey, SocketTag};
use crate::priority::Priority;
use crate::transport::Transport;
use crate::Error;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique session identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> SessionId {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// State of one session shared by its driver and every handle.
pub(crate) struct Shared {
    pub(super) inner: RefCell<Connection>,
    delegates: RefCell<FnvHashMap<Key, Registered>>,
    dispatching: Cell<bool>,
    pool: Weak<PoolInner>,
    observer: Option<Rc<dyn Observer>>,
}

struct Registered {
    handle: StreamHandle,
    delegate: Box<dyn Delegate>,
}

/// A reference to a live session.
///
/// Cloning is cheap. The session keeps running as long as its driver or its
/// pool holds it, regardless of handles.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Rc<Shared>,
}

/// Drives reads, writes and timers of one session.
struct Driver {
    session: SessionHandle,
}

/// Builds a session over `transport` and spawns its driver.
pub(crate) fn spawn(
    key: SessionKey,
    transport: Box<dyn Transport>,
    codec: Box<dyn FrameCodec>,
    config: &PoolConfig,
    pool: Weak<PoolInner>,
) -> Result<SessionHandle, Error> {
    let id = SessionId::next();
    let span = tracing::debug_span!("Session", key = %key, session.id = %id);
    let framed = Framed::new(transport, codec);

    let shared = Rc::new_cyclic(|me| Shared {
        inner: RefCell::new(Connection::new(
            id,
            key,
            framed,
            config.session.clone(),
            config.timer.clone(),
            config.link_monitor.clone(),
            me.clone(),
        )),
        delegates: RefCell::new(FnvHashMap::default()),
        dispatching: Cell::new(false),
        pool,
        observer: config.observer.clone(),
    });
    let session = SessionHandle { shared };

    let driver = Driver {
        session: session.clone(),
    }
    .instrument(span);
    config
        .spawner
        .spawn_local_obj(LocalFutureObj::new(Box::new(driver)))
        .map_err(|e| {
            tracing::warn!(error = ?e, "failed to spawn session driver");
            Error::Failed
        })?;

    Ok(session)
}

impl Future for Driver {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<()> {
        let shared = &self.session.shared;
        shared.inner.borrow_mut().begin_poll(cx);

        loop {
            let progress = shared.inner.borrow_mut().poll_step(cx);
            if progress != Progress::Continue {
                // callbacks below may queue writes; they must wake us
                shared.inner.borrow_mut().end_poll();
            }

            self.session.dispatch();

            match progress {
                Progress::Continue => continue,
                Progress::Pending => return Poll::Pending,
                Progress::Closed => return Poll::Ready(()),
            }
        }
    }
}

/// Clears the dispatching flag even if a callback panics.
struct DispatchGuard<'a>(&'a Cell<bool>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl SessionHandle {
    pub(crate) fn from_shared(shared: Rc<Shared>) -> SessionHandle {
        SessionHandle { shared }
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&Connection) -> R) -> R {
        f(&self.shared.inner.borrow())
    }

    /// Runs `f` against the connection, then hands out whatever it queued.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Connection) -> R) -> R {
        let ret = f(&mut self.shared.inner.borrow_mut());
        self.dispatch();
        ret
    }

    /// Delivers queued events. Never nests: events raised by a callback are
    /// delivered by the outer loop once that callback returns.
    fn dispatch(&self) {
        if self.shared.dispatching.replace(true) {
            return;
        }
        let _guard = DispatchGuard(&self.shared.dispatching);

        loop {
            let event = self.shared.inner.borrow_mut().take_events();
            match event {
                Some(Event::Stream(key, event)) => self.deliver(key, event),
                Some(Event::Observe(event)) => {
                    if let Some(ref observer) = self.shared.observer {
                        observer.on_event(&event);
                    }
                }
                Some(Event::MakeUnavailable) => {
                    if let Some(pool) = self.shared.pool.upgrade() {
                        pool.make_session_unavailable(self);
                    }
                }
                Some(Event::Remove) => {
                    self.shared.delegates.borrow_mut().clear();
                    if let Some(pool) = self.shared.pool.upgrade() {
                        pool.remove_unavailable_session(self);
                    }
                }
                None => break,
            }
        }
    }

    fn deliver(&self, key: Key, event: StreamEvent) {
        let registered = self.shared.delegates.borrow_mut().remove(&key);
        let mut registered = match registered {
            Some(registered) => registered,
            None => {
                // nobody to read it, the credit goes straight back
                if let StreamEvent::Data(Some(ref data)) = event {
                    let len = data.len() as WindowSize;
                    self.shared
                        .inner
                        .borrow_mut()
                        .on_read_buffer_consumed(key, len);
                }
                return;
            }
        };

        let mut consumed = 0;
        let mut closed = false;
        {
            let Registered {
                ref handle,
                ref mut delegate,
            } = registered;

            match event {
                StreamEvent::HeadersSent => delegate.on_headers_sent(handle),
                StreamEvent::HeadersReceived(block) => delegate.on_headers_received(handle, &block),
                StreamEvent::Data(data) => {
                    consumed = data.as_ref().map(|data| data.len()).unwrap_or(0);
                    delegate.on_data_received(handle, data);
                }
                StreamEvent::DataSent => delegate.on_data_sent(handle),
                StreamEvent::Trailers(block) => delegate.on_trailers(handle, &block),
                StreamEvent::Close(status) => {
                    closed = true;
                    delegate.on_close(handle, status);
                }
            }
        }

        if !closed {
            self.shared
                .delegates
                .borrow_mut()
                .entry(key)
                .or_insert(registered);
        }

        if consumed > 0 {
            self.shared
                .inner
                .borrow_mut()
                .on_read_buffer_consumed(key, consumed as WindowSize);
        }
    }

    pub(crate) fn set_stream_delegate(
        &self,
        handle: &StreamHandle,
        delegate: Box<dyn Delegate>,
    ) -> Result<(), UserError> {
        let key = handle.key();
        self.shared.inner.borrow_mut().set_delegate(key)?;
        self.shared.delegates.borrow_mut().insert(
            key,
            Registered {
                handle: handle.clone(),
                delegate,
            },
        );
        self.dispatch();
        Ok(())
    }

    pub(crate) fn ptr_eq(&self, other: &SessionHandle) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    // ===== identity and state =====

    pub fn id(&self) -> SessionId {
        self.read(|conn| conn.id)
    }

    pub fn key(&self) -> SessionKey {
        self.read(|conn| conn.key.clone())
    }

    pub fn availability(&self) -> Availability {
        self.read(|conn| conn.state)
    }

    pub fn is_available(&self) -> bool {
        self.read(|conn| conn.is_available())
    }

    pub fn is_going_away(&self) -> bool {
        self.read(|conn| conn.is_going_away())
    }

    pub fn is_draining(&self) -> bool {
        self.read(|conn| conn.is_draining())
    }

    /// The transport is closed and the session has left its pool.
    pub fn is_closed(&self) -> bool {
        self.read(|conn| conn.finished)
    }

    /// Status the session drained with, once it started draining.
    pub fn error_on_close(&self) -> Option<Result<(), Error>> {
        self.read(|conn| conn.error_on_close)
    }

    /// Whether any stream, activated or not, is open.
    pub fn is_active(&self) -> bool {
        self.read(|conn| conn.is_active())
    }

    pub fn num_active_streams(&self) -> usize {
        self.read(|conn| conn.active.len())
    }

    pub fn num_created_streams(&self) -> usize {
        self.read(|conn| conn.created.len())
    }

    pub fn pending_stream_request_count(&self) -> usize {
        self.read(|conn| conn.pending_stream_request_count())
    }

    pub fn max_concurrent_streams(&self) -> usize {
        self.read(|conn| conn.max_concurrent_streams)
    }

    pub fn is_stream_active(&self, id: StreamId) -> bool {
        self.read(|conn| conn.active.contains_key(&id))
    }

    pub fn streams_initiated(&self) -> u64 {
        self.read(|conn| conn.streams_initiated)
    }

    pub fn streams_abandoned(&self) -> u64 {
        self.read(|conn| conn.streams_abandoned)
    }

    // ===== flow control =====

    pub fn send_window_size(&self) -> i32 {
        self.read(|conn| conn.send_window.size())
    }

    pub fn recv_window_size(&self) -> i32 {
        self.read(|conn| conn.recv_window.size())
    }

    pub fn unacked_recv_window_bytes(&self) -> WindowSize {
        self.read(|conn| conn.recv_window.unacked())
    }

    pub fn stream_initial_send_window_size(&self) -> i32 {
        self.read(|conn| conn.stream_initial_send_window_size)
    }

    pub fn is_send_stalled(&self) -> bool {
        self.read(|conn| conn.is_send_stalled())
    }

    // ===== transport facts =====

    /// At least one frame has been received.
    pub fn is_reused(&self) -> bool {
        self.read(|conn| conn.is_reused())
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.read(|conn| conn.peer_addr)
    }

    pub fn negotiated_protocol(&self) -> Option<Vec<u8>> {
        self.read(|conn| {
            conn.framed
                .transport()
                .negotiated_protocol()
                .map(|proto| proto.to_vec())
        })
    }

    /// Extra keys this session serves through IP pooling.
    pub fn pooled_aliases(&self) -> Vec<SessionKey> {
        self.read(|conn| conn.pooled_aliases.iter().cloned().collect())
    }

    pub(crate) fn add_pooled_alias(&self, key: SessionKey) {
        self.shared.inner.borrow_mut().pooled_aliases.insert(key);
    }

    pub(crate) fn remove_pooled_alias(&self, key: &SessionKey) {
        self.shared.inner.borrow_mut().pooled_aliases.remove(key);
    }

    pub fn supports_websocket(&self) -> bool {
        self.read(|conn| conn.supports_websocket)
    }

    pub fn verify_domain_authentication(&self, host: &str) -> bool {
        self.read(|conn| conn.verify_domain_authentication(host))
    }

    /// Last stream id and error code of a GOAWAY from the peer.
    pub fn go_away_received(&self) -> Option<(StreamId, Reason)> {
        self.read(|conn| {
            conn.go_away
                .received
                .as_ref()
                .map(|received| (received.last_stream_id, received.reason))
        })
    }

    pub fn last_ping_rtt(&self) -> Option<Duration> {
        self.read(|conn| conn.ping_pong.last_rtt())
    }

    pub fn is_ping_in_flight(&self) -> bool {
        self.read(|conn| conn.ping_pong.is_in_flight())
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.read(|conn| conn.heartbeat.is_running())
    }

    // ===== lifecycle =====

    /// Fails every stream with `error` and closes the connection.
    pub fn close_session_on_error(&self, error: Error, description: &str) {
        self.update(|conn| conn.do_drain_session(Err(error), description));
    }

    /// Stops the pool from handing this session out; its streams keep
    /// running.
    pub fn make_unavailable(&self) {
        self.update(|conn| conn.make_unavailable());
    }

    /// Refuses new streams and closes those above `last_good_stream_id`.
    /// The session drains once the rest finish.
    pub fn start_going_away(&self, last_good_stream_id: StreamId, status: Error) {
        self.update(|conn| {
            conn.make_unavailable();
            conn.start_going_away(last_good_stream_id, status);
        });
    }

    /// Drains the session if it has no active streams. Never frees a slot
    /// right away.
    pub fn close_one_idle_connection(&self) -> bool {
        self.update(|conn| conn.close_one_idle_connection())
    }

    /// Re-tags an idle, available session. Returns whether it happened.
    pub fn change_socket_tag(&self, tag: SocketTag) -> bool {
        self.update(|conn| conn.change_socket_tag(tag))
    }

    /// Sets the id the next activated stream will get.
    #[doc(hidden)]
    pub fn set_stream_id_for_testing(&self, id: StreamId) {
        self.update(|conn| conn.next_stream_id = Some(id));
    }

    pub fn on_default_network_active(&self) {
        self.update(|conn| conn.on_default_network_active());
    }

    // ===== stream requests =====

    pub(crate) fn try_create_stream(
        &self,
        pending: &Rc<Pending>,
    ) -> Result<Option<StreamHandle>, Error> {
        self.update(|conn| conn.try_create_stream(pending))
    }

    pub(crate) fn cancel_stream_request(&self, pending: &Rc<Pending>) -> bool {
        self.update(|conn| conn.cancel_stream_request(pending))
    }

    pub(crate) fn change_stream_request_priority(&self, pending: &Rc<Pending>, priority: Priority) {
        self.update(|conn| conn.change_stream_request_priority(pending, priority));
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &SessionHandle) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for SessionHandle {}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self.shared.inner.try_borrow() {
            Ok(conn) => fmt
                .debug_struct("SessionHandle")
                .field("id", &conn.id)
                .field("key", &conn.key)
                .field("state", &conn.state)
                .finish(),
            Err(_) => fmt.debug_struct("SessionHandle").finish(),
        }
    }
}
