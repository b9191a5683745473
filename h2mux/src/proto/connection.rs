use bytes::Bytes;
use fnv::FnvHashSet;
use indexmap::IndexSet;
use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::ops::Bound;
use std::rc::{Rc, Weak};
use std::task::{Context, Waker};
use std::time::Instant;

use super::go_away::GoAway;
use super::ping_pong::{Heartbeat, PingPong};
use super::session::{SessionId, Shared};
use super::streams::{
    FlowControlWindow, Key, Pending, PendingWrite, Producer, RecvWindow, RequestOptions, Resume,
    SendStatus, Store, Stream, StreamEvent, StreamHandle, StreamState, StreamType, WriteQueue,
};
use super::WindowSize;
use crate::codec::{Framed, UserError};
use crate::config::{LinkMonitor, SessionConfig};
use crate::frame::{self, Frame, HeaderBlock, StreamId};
use crate::pool::{SessionEvent, SessionKey, SocketTag};
use crate::priority::{Priority, NUM_PRIORITIES};
use crate::time::Timer;
use crate::transport;
use crate::Error;

/// Whether a session takes new streams.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Availability {
    Available,
    /// No new streams; existing ones run to completion.
    GoingAway,
    /// Every stream is gone, the remaining writes are being flushed.
    Draining,
}

/// Work produced while the connection was borrowed, handed out once the
/// borrow is released.
#[derive(Debug)]
pub(crate) enum Event {
    Stream(Key, StreamEvent),
    Observe(SessionEvent),
    /// Drop the session from the pool's lookup tables.
    MakeUnavailable,
    /// The transport is closed; forget the session.
    Remove,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Progress {
    Continue,
    Pending,
    Closed,
}

/// The frame currently being written to the transport.
#[derive(Debug)]
pub(super) struct InFlight {
    pub buf: Bytes,
    pub kind: frame::Kind,
    pub payload_len: usize,
    /// Cleared if the stream goes away mid-write.
    pub stream: Option<Key>,
}

#[derive(Debug)]
pub(super) struct ReadBudget {
    pub started: Instant,
    pub bytes: usize,
}

pub(crate) struct Connection {
    pub(super) id: SessionId,

    pub(super) key: SessionKey,

    pub(super) config: SessionConfig,

    pub(super) timer: Rc<dyn Timer>,

    pub(super) link_monitor: Rc<dyn LinkMonitor>,

    pub(super) me: Weak<Shared>,

    pub(super) framed: Framed,

    pub(super) peer_addr: Option<SocketAddr>,

    pub(super) state: Availability,

    pub(super) error_on_close: Option<Result<(), Error>>,

    pub(super) store: Store,

    /// Streams with an id, by id.
    pub(super) active: BTreeMap<StreamId, Key>,

    /// Streams waiting for their first write, in creation order.
    pub(super) created: IndexSet<Key>,

    pub(super) pending_requests: [VecDeque<Rc<Pending>>; NUM_PRIORITIES],

    /// `None` once the id space is used up.
    pub(super) next_stream_id: Option<StreamId>,

    pub(super) max_concurrent_streams: usize,

    pub(super) stream_initial_send_window_size: i32,

    pub(super) send_window: FlowControlWindow,

    pub(super) recv_window: RecvWindow,

    pub(super) last_recv_window_update: Instant,

    /// Ids of streams blocked on the session send window.
    pub(super) stalled_streams: [VecDeque<StreamId>; NUM_PRIORITIES],

    pub(super) write_queue: WriteQueue,

    pub(super) in_flight: Option<InFlight>,

    pub(super) needs_flush: bool,

    pub(super) write_failed: bool,

    pub(super) ping_pong: PingPong,

    pub(super) heartbeat: Heartbeat,

    pub(super) go_away: GoAway,

    pub(super) pooled_aliases: FnvHashSet<SessionKey>,

    pub(super) supports_websocket: bool,

    pub(super) frames_received: u64,

    pub(super) streams_initiated: u64,

    pub(super) streams_abandoned: u64,

    pub(super) last_read_time: Instant,

    pub(super) read_budget: ReadBudget,

    pub(super) events: VecDeque<Event>,

    pub(super) waker: Option<Waker>,

    pub(super) polling: bool,

    pub(super) finished: bool,
}

impl Connection {
    pub(super) fn new(
        id: SessionId,
        key: SessionKey,
        framed: Framed,
        config: SessionConfig,
        timer: Rc<dyn Timer>,
        link_monitor: Rc<dyn LinkMonitor>,
        me: Weak<Shared>,
    ) -> Connection {
        let now = timer.now();
        let peer_addr = framed.transport().peer_addr().ok();

        let mut conn = Connection {
            id,
            key,
            timer,
            link_monitor,
            me,
            framed,
            peer_addr,
            state: Availability::Available,
            error_on_close: None,
            store: Store::new(),
            active: BTreeMap::new(),
            created: IndexSet::new(),
            pending_requests: Default::default(),
            next_stream_id: Some(StreamId::FIRST_CLIENT),
            max_concurrent_streams: config.initial_max_concurrent_streams,
            stream_initial_send_window_size: config.initial_stream_send_window_size as i32,
            send_window: FlowControlWindow::new(frame::DEFAULT_INITIAL_WINDOW_SIZE),
            recv_window: RecvWindow::with_initial(
                frame::DEFAULT_INITIAL_WINDOW_SIZE,
                config.session_max_recv_window_size,
            ),
            last_recv_window_update: now,
            stalled_streams: Default::default(),
            write_queue: WriteQueue::new(),
            in_flight: None,
            needs_flush: false,
            write_failed: false,
            ping_pong: PingPong::new(),
            heartbeat: Heartbeat::new(),
            go_away: GoAway::new(),
            pooled_aliases: FnvHashSet::default(),
            supports_websocket: false,
            frames_received: 0,
            streams_initiated: 0,
            streams_abandoned: 0,
            last_read_time: now,
            read_budget: ReadBudget {
                started: now,
                bytes: 0,
            },
            events: VecDeque::new(),
            waker: None,
            polling: false,
            finished: false,
            config,
        };

        if conn.config.send_connection_preface {
            conn.send_initial_data();
        }
        conn
    }

    /// Initial SETTINGS, then the receive window growth to the configured
    /// maximum.
    fn send_initial_data(&mut self) {
        let settings = self.config.initial_settings.clone();
        self.enqueue_session_write(Priority::Highest, settings.into());

        let delta = self.recv_window.expand_to_max();
        if delta > 0 {
            self.last_recv_window_update = self.timer.now();
            self.send_window_update(StreamId::ZERO, delta, Priority::Highest);
        }
    }

    pub(super) fn now(&self) -> Instant {
        self.timer.now()
    }

    pub(super) fn take_events(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub(super) fn observe(&mut self, event: SessionEvent) {
        self.events.push_back(Event::Observe(event));
    }

    pub(super) fn protocol_error(&mut self, stream_id: Option<StreamId>, error: Error) {
        self.observe(SessionEvent::ProtocolError {
            session: self.id,
            stream_id,
            error,
        });
    }

    /// Wakes the driver unless it is running right now.
    pub(super) fn wake(&self) {
        if self.polling {
            return;
        }
        if let Some(ref waker) = self.waker {
            waker.wake_by_ref();
        }
    }

    // ===== queries =====

    pub(super) fn is_available(&self) -> bool {
        self.state == Availability::Available
    }

    pub(super) fn is_going_away(&self) -> bool {
        self.state == Availability::GoingAway
    }

    pub(super) fn is_draining(&self) -> bool {
        self.state == Availability::Draining
    }

    /// Any stream, activated or not.
    pub(super) fn is_active(&self) -> bool {
        !self.active.is_empty() || !self.created.is_empty()
    }

    pub(super) fn is_send_stalled(&self) -> bool {
        self.send_window.is_exhausted()
    }

    pub(super) fn is_reused(&self) -> bool {
        self.frames_received > 0
    }

    pub(super) fn pending_stream_request_count(&self) -> usize {
        self.pending_requests.iter().map(VecDeque::len).sum()
    }

    /// Whether a connection authenticated for this session's host may also
    /// serve `host`.
    pub(super) fn verify_domain_authentication(&self, host: &str) -> bool {
        if self.is_draining() {
            return false;
        }

        match self.framed.transport().identity() {
            // cleartext, nothing to authenticate
            None => true,
            Some(identity) => transport::can_pool(identity, self.key.host_port_pair().host(), host),
        }
    }

    pub(super) fn stream_handle(&self, key: Key) -> StreamHandle {
        StreamHandle::new(self.me.clone(), key, self.store[key].stats.clone())
    }

    // ===== stream admission =====

    /// Creates a stream right away if a slot is free, otherwise queues
    /// `pending` by priority.
    pub(super) fn try_create_stream(
        &mut self,
        pending: &Rc<Pending>,
    ) -> Result<Option<StreamHandle>, Error> {
        let options = pending.options();

        if options.kind == StreamType::Push {
            return Err(Error::Failed);
        }

        match self.state {
            Availability::GoingAway => return Err(Error::Failed),
            Availability::Draining => return Err(Error::ConnectionClosed),
            Availability::Available => {}
        }

        if options.socket_tag != *self.key.socket_tag() {
            return Err(Error::Failed);
        }

        if self.active.len() + self.created.len() < self.max_concurrent_streams {
            return self.create_stream(&options).map(Some);
        }

        tracing::debug!(
            max_concurrent_streams = self.max_concurrent_streams,
            priority = ?options.priority,
            "stream request stalled on concurrency limit"
        );
        self.pending_requests[options.priority.index()].push_back(pending.clone());
        Ok(None)
    }

    pub(super) fn create_stream(&mut self, options: &RequestOptions) -> Result<StreamHandle, Error> {
        match self.state {
            Availability::GoingAway => return Err(Error::Failed),
            Availability::Draining => return Err(Error::ConnectionClosed),
            Availability::Available => {}
        }

        if !self.framed.transport().is_connected() {
            self.do_drain_session(
                Err(Error::ConnectionClosed),
                "tried to create stream on a closed transport",
            );
            return Err(Error::ConnectionClosed);
        }

        let send_window = self.stream_initial_send_window_size;
        let recv_window = self.config.stream_max_recv_window_size;
        let key = self.store.insert(|key| {
            Stream::new(
                key,
                options.kind,
                options.url.clone(),
                options.priority,
                send_window,
                recv_window,
            )
        });
        self.store[key].detect_broken_connection = options.detect_broken_connection;
        self.created.insert(key);

        if options.detect_broken_connection {
            self.enable_broken_connection_detection(options.heartbeat_interval);
        }

        tracing::trace!(url = %options.url, priority = ?options.priority, "created stream");
        Ok(self.stream_handle(key))
    }

    pub(super) fn cancel_stream_request(&mut self, pending: &Rc<Pending>) -> bool {
        let queue = &mut self.pending_requests[pending.priority().index()];
        match queue.iter().position(|queued| Rc::ptr_eq(queued, pending)) {
            Some(pos) => {
                queue.remove(pos);
                true
            }
            None => false,
        }
    }

    pub(super) fn change_stream_request_priority(&mut self, pending: &Rc<Pending>, priority: Priority) {
        if self.cancel_stream_request(pending) {
            self.pending_requests[priority.index()].push_back(pending.clone());
        }
    }

    fn next_pending_stream_request(&mut self) -> Option<Rc<Pending>> {
        for priority in Priority::descending() {
            if let Some(pending) = self.pending_requests[priority.index()].pop_front() {
                return Some(pending);
            }
        }
        None
    }

    /// Grants queued requests while slots are free.
    pub(super) fn process_pending_stream_requests(&mut self) {
        let in_use = self.active.len() + self.created.len();
        let free = self.max_concurrent_streams.saturating_sub(in_use);

        for _ in 0..free {
            let pending = match self.next_pending_stream_request() {
                Some(pending) => pending,
                None => break,
            };
            let result = self.create_stream(&pending.options());
            pending.complete(result);
        }
    }

    // ===== stream operations =====

    pub(super) fn set_delegate(&mut self, key: Key) -> Result<(), UserError> {
        let stream = match self.store.get_mut(key) {
            Some(stream) => stream,
            None => return Err(UserError::InactiveStreamId),
        };

        if stream.has_delegate {
            return Err(UserError::DelegateAlreadySet);
        }

        stream.has_delegate = true;
        stream.state.claim();

        let buffered: Vec<StreamEvent> = stream.pending_recv.drain(..).collect();
        for event in buffered {
            self.events.push_back(Event::Stream(key, event));
        }
        Ok(())
    }

    pub(super) fn send_request_headers(
        &mut self,
        key: Key,
        block: HeaderBlock,
        status: SendStatus,
    ) -> Result<(), UserError> {
        let stream = match self.store.get_mut(key) {
            Some(stream) => stream,
            None => return Err(UserError::InactiveStreamId),
        };

        if stream.kind == StreamType::Push {
            return Err(UserError::UnexpectedFrameType);
        }

        if stream.request_headers_sent || !stream.state.is_idle() {
            return Err(UserError::HeadersAlreadySent);
        }

        stream.request_headers_sent = true;
        stream.pending_send_status = status;
        let producer = Producer::Headers {
            block,
            end_stream: status == SendStatus::NoMoreDataToSend,
        };
        self.enqueue_stream_write(key, frame::Kind::Headers, producer);
        Ok(())
    }

    pub(super) fn send_data(
        &mut self,
        key: Key,
        data: Bytes,
        status: SendStatus,
    ) -> Result<(), UserError> {
        let stream = match self.store.get_mut(key) {
            Some(stream) => stream,
            None => return Err(UserError::InactiveStreamId),
        };

        if stream.kind == StreamType::Push {
            return Err(UserError::UnexpectedFrameType);
        }

        if !stream.state.can_send_data()
            || stream.pending_send_status == SendStatus::NoMoreDataToSend
        {
            return Err(UserError::SendWhileClosed);
        }

        if stream.pending_send_data.is_some() {
            return Err(UserError::SendInProgress);
        }

        stream.pending_send_status = status;
        stream.pending_send_data = Some(data);
        self.queue_next_data_frame(key);
        Ok(())
    }

    /// Resets an activated stream, drops one that never got an id.
    pub(super) fn cancel_stream(&mut self, key: Key, error: Error) {
        let (id, closed) = match self.store.get(key) {
            Some(stream) => (stream.id, stream.state.is_closed()),
            None => return,
        };
        if closed {
            return;
        }

        if id.is_zero() {
            self.close_created_stream(key, Err(error));
        } else {
            self.reset_stream(id, error, "cancelled by user");
        }
    }

    pub(super) fn close_stream(&mut self, key: Key) {
        let id = match self.store.get(key) {
            Some(stream) => stream.id,
            None => return,
        };

        if id.is_zero() {
            self.close_created_stream(key, Ok(()));
        } else {
            self.close_active_stream(id, Ok(()));
        }
    }

    pub(super) fn set_stream_priority(&mut self, key: Key, priority: Priority) {
        let stream = match self.store.get_mut(key) {
            Some(stream) => stream,
            None => return,
        };

        let old = stream.priority;
        if old == priority {
            return;
        }
        stream.priority = priority;
        let id = stream.id;

        self.write_queue
            .change_priority_of_writes_for_stream(key, old, priority);

        if !id.is_zero() {
            tracing::trace!(stream.id = ?id, ?old, new = ?priority, "reprioritizing stream");
            let frame = frame::Priority::new(id, priority);
            self.enqueue_session_write(Priority::Highest, frame.into());
        }
    }

    pub(super) fn stream_state(&self, key: Key) -> StreamState {
        self.store
            .get(key)
            .map(|stream| stream.state)
            .unwrap_or(StreamState::Closed)
    }

    // ===== closing streams =====

    pub(super) fn close_active_stream(&mut self, id: StreamId, status: Result<(), Error>) {
        let key = match self.active.get(&id) {
            Some(&key) => key,
            None => return,
        };

        tracing::trace!(stream.id = ?id, ?status, "closing active stream");
        self.delete_stream(key, status);

        if !self.is_active() {
            self.maybe_finish_going_away();
        }
    }

    pub(super) fn close_created_stream(&mut self, key: Key, status: Result<(), Error>) {
        if !self.created.contains(&key) {
            return;
        }

        tracing::trace!(?status, "closing created stream");
        self.delete_stream(key, status);
    }

    /// Sends RST_STREAM and closes the stream locally.
    pub(super) fn reset_stream(&mut self, id: StreamId, error: Error, description: &str) {
        let priority = match self.active.get(&id) {
            Some(&key) => self.store[key].priority,
            None => return,
        };

        tracing::debug!(stream.id = ?id, %error, description, "resetting stream");
        let frame = frame::Reset::new(id, error.reset_reason());
        self.enqueue_session_write(priority, frame.into());
        self.close_active_stream(id, Err(error));
    }

    fn delete_stream(&mut self, key: Key, status: Result<(), Error>) {
        if let Some(ref mut in_flight) = self.in_flight {
            if in_flight.stream == Some(key) {
                in_flight.stream = None;
            }
        }

        let removed = self.write_queue.remove_for_stream(key);
        self.discard_writes(removed);

        // a stream leaves the store and its id maps together
        let stream = match self.store.remove(key) {
            Some(stream) => stream,
            None => {
                debug_assert!(false, "closing a stream missing from the store");
                self.created.shift_remove(&key);
                self.active.retain(|_, stored| *stored != key);
                return;
            }
        };
        self.created.shift_remove(&key);
        if !stream.id.is_zero() {
            self.active.remove(&stream.id);
        }

        if stream.detect_broken_connection {
            self.maybe_disable_broken_connection_detection();
        }

        // body chunks nobody consumed still hold session receive credit
        let undelivered: usize = stream
            .pending_recv
            .iter()
            .map(|event| match *event {
                StreamEvent::Data(Some(ref data)) => data.len(),
                _ => 0,
            })
            .sum();
        if undelivered > 0 {
            self.increase_recv_window(undelivered as WindowSize);
        }

        let status = stream.close_status(status);
        self.observe(SessionEvent::StreamClosed {
            session: self.id,
            stream_id: stream.id,
            status,
        });
        if stream.has_delegate {
            self.events
                .push_back(Event::Stream(key, StreamEvent::Close(status)));
        }

        if self.is_available() {
            self.process_pending_stream_requests();
        }
    }

    /// Queued DATA dropped without being written gives its credit back.
    pub(super) fn discard_writes(&mut self, removed: Vec<PendingWrite>) {
        let credit: usize = removed.iter().map(PendingWrite::data_len).sum();
        if credit > 0 {
            self.increase_send_window(credit as WindowSize);
        }
    }

    // ===== going away =====

    pub(super) fn make_unavailable(&mut self) {
        if self.state == Availability::Available {
            tracing::debug!("session unavailable");
            self.state = Availability::GoingAway;
            self.events.push_back(Event::MakeUnavailable);
        }
    }

    /// Fails waiting requests and closes every stream the peer will not
    /// process.
    pub(super) fn start_going_away(&mut self, last_good_stream_id: StreamId, status: Error) {
        debug_assert_ne!(self.state, Availability::Available);
        tracing::debug!(?last_good_stream_id, %status, "going away");

        while let Some(pending) = self.next_pending_stream_request() {
            pending.complete(Err(status));
        }

        loop {
            let next = self
                .active
                .range((Bound::Excluded(last_good_stream_id), Bound::Unbounded))
                .next()
                .map(|(&id, _)| id);
            match next {
                Some(id) => {
                    self.streams_abandoned += 1;
                    self.close_active_stream(id, Err(status));
                }
                None => break,
            }
        }

        while let Some(key) = self.created.get_index(0).copied() {
            self.close_created_stream(key, Err(status));
        }

        let store = &self.store;
        let removed = self.write_queue.remove_if(|write| {
            match write.stream.and_then(|key| store.get(key)) {
                Some(stream) => stream.id > last_good_stream_id || stream.id.is_zero(),
                None => false,
            }
        });
        self.discard_writes(removed);

        self.maybe_finish_going_away();
    }

    pub(super) fn maybe_finish_going_away(&mut self) {
        if !self.is_active() && self.state == Availability::GoingAway {
            self.do_drain_session(Ok(()), "finished going away");
        }
    }

    pub(super) fn do_drain_session(&mut self, status: Result<(), Error>, description: &str) {
        if self.is_draining() {
            return;
        }
        self.make_unavailable();

        if let Err(err) = status {
            if !err.is_quiet_close() {
                let reason = err.go_away_reason();
                let frame = frame::GoAway::with_debug_data(
                    StreamId::ZERO,
                    reason,
                    Bytes::copy_from_slice(description.as_bytes()),
                );
                self.go_away.sent = Some(reason);
                self.enqueue_session_write(Priority::Highest, frame.into());
                // the write above may have tripped the capped frame limit
                if self.is_draining() {
                    return;
                }
            }
        }

        tracing::debug!(?status, description, "draining session");
        self.state = Availability::Draining;
        self.error_on_close = Some(status);
        self.observe(SessionEvent::SessionClosed {
            session: self.id,
            status,
        });

        if let Err(err) = status {
            self.start_going_away(StreamId::ZERO, err);
        }
        self.wake();
    }

    pub(super) fn close_one_idle_connection(&mut self) -> bool {
        if self.active.is_empty() {
            self.do_drain_session(Err(Error::ConnectionClosed), "closing idle connection");
        }
        // the session only leaves the pool once its writes are flushed
        false
    }

    pub(super) fn change_socket_tag(&mut self, tag: SocketTag) -> bool {
        if !self.is_available() || self.is_active() {
            return false;
        }

        self.framed.transport_mut().apply_socket_tag(&tag);
        self.key = self.key.with_socket_tag(tag);
        true
    }

    // ===== session flow control =====

    pub(super) fn increase_send_window(&mut self, delta: WindowSize) {
        if self.send_window.increase(delta).is_err() {
            proto_err!(conn: "session send window overflow; delta={}", delta);
            self.protocol_error(None, Error::Protocol);
            self.do_drain_session(Err(Error::Protocol), "session send window overflow");
            return;
        }

        self.resume_send_stalled_streams();
    }

    pub(super) fn decrease_send_window(&mut self, delta: WindowSize) {
        let res = self.send_window.decrease(delta);
        debug_assert!(res.is_ok(), "session send window underflow");
    }

    /// Charges bytes that arrived on the wire. Fails the session if the
    /// peer overran its credit.
    pub(super) fn decrease_recv_window(&mut self, delta: WindowSize) -> bool {
        if self.recv_window.decrease(delta).is_err() {
            proto_err!(conn: "session receive window exceeded; delta={}", delta);
            self.protocol_error(None, Error::FlowControl);
            self.do_drain_session(Err(Error::FlowControl), "session receive window exceeded");
            return false;
        }
        true
    }

    /// Returns consumed bytes, announcing them once enough piled up or they
    /// waited long enough.
    pub(super) fn increase_recv_window(&mut self, delta: WindowSize) {
        if delta == 0 || self.recv_window.increase(delta).is_err() {
            return;
        }

        let now = self.now();
        let waited = now.saturating_duration_since(self.last_recv_window_update);
        if self.recv_window.should_announce()
            || waited >= self.config.time_to_buffer_small_window_updates
        {
            self.last_recv_window_update = now;
            let unacked = self.recv_window.take_unacked();
            self.send_window_update(StreamId::ZERO, unacked, Priority::Highest);
        }
    }

    pub(super) fn send_window_update(&mut self, id: StreamId, delta: WindowSize, priority: Priority) {
        tracing::trace!(stream.id = ?id, delta, "sending WINDOW_UPDATE");
        let frame = frame::WindowUpdate::new(id, delta);
        self.enqueue_session_write(priority, frame.into());
    }

    pub(super) fn queue_send_stalled_stream(&mut self, id: StreamId, priority: Priority) {
        self.stalled_streams[priority.index()].push_back(id);
    }

    fn pop_stream_to_possibly_resume(&mut self) -> Option<StreamId> {
        for priority in Priority::descending() {
            if let Some(id) = self.stalled_streams[priority.index()].pop_front() {
                return Some(id);
            }
        }
        None
    }

    fn resume_send_stalled_streams(&mut self) {
        let mut requeue = Vec::new();

        while !self.is_send_stalled() {
            let id = match self.pop_stream_to_possibly_resume() {
                Some(id) => id,
                None => break,
            };
            let key = match self.active.get(&id) {
                Some(&key) => key,
                None => continue,
            };

            let session_stalled = self.is_send_stalled();
            match self.store[key].possibly_resume_if_send_stalled(session_stalled) {
                Resume::Requeue => requeue.push(key),
                Resume::Resume => self.queue_next_data_frame(key),
                Resume::DoNotRequeue => {}
            }
        }

        for key in requeue {
            if let Some(stream) = self.store.get(key) {
                let (id, priority) = (stream.id, stream.priority);
                self.queue_send_stalled_stream(id, priority);
            }
        }
    }

    // ===== stream flow control =====

    pub(super) fn increase_stream_send_window(&mut self, key: Key, delta: WindowSize) {
        let session_stalled = self.is_send_stalled();
        let stream = match self.store.get_mut(key) {
            Some(stream) => stream,
            None => return,
        };

        if stream.send_window.increase(delta).is_err() {
            let id = stream.id;
            proto_err!(stream: "stream send window overflow; stream={:?}", id);
            self.protocol_error(Some(id), Error::FlowControl);
            if id.is_zero() {
                self.close_created_stream(key, Err(Error::FlowControl));
            } else {
                self.reset_stream(id, Error::FlowControl, "stream send window overflow");
            }
            return;
        }

        if stream.possibly_resume_if_send_stalled(session_stalled) == Resume::Resume {
            self.queue_next_data_frame(key);
        }
    }

    /// Applies an INITIAL_WINDOW_SIZE change to every open stream.
    pub(super) fn update_streams_send_window_size(&mut self, delta: i32) {
        let keys: Vec<Key> = self
            .active
            .values()
            .copied()
            .chain(self.created.iter().copied())
            .collect();

        for key in keys {
            let session_stalled = self.is_send_stalled();
            let stream = match self.store.get_mut(key) {
                Some(stream) => stream,
                None => continue,
            };

            if stream.send_window.adjust(delta).is_err() {
                proto_err!(conn: "stream send window overflow on SETTINGS; delta={}", delta);
                self.protocol_error(None, Error::FlowControl);
                self.do_drain_session(
                    Err(Error::FlowControl),
                    "INITIAL_WINDOW_SIZE overflows a stream window",
                );
                return;
            }

            if stream.possibly_resume_if_send_stalled(session_stalled) == Resume::Resume {
                self.queue_next_data_frame(key);
            }
        }
    }

    /// The delegate consumed `delta` bytes of `key`'s body.
    pub(super) fn on_read_buffer_consumed(&mut self, key: Key, delta: WindowSize) {
        self.increase_recv_window(delta);

        let stream = match self.store.get_mut(key) {
            Some(stream) if stream.is_activated() => stream,
            _ => return,
        };

        if stream.recv_window.increase(delta).is_err() {
            return;
        }

        if stream.recv_window.should_announce() {
            let (id, priority) = (stream.id, stream.priority);
            let unacked = stream.recv_window.take_unacked();
            self.send_window_update(id, unacked, priority);
        }
    }

    // ===== write queue =====

    pub(super) fn enqueue_write(
        &mut self,
        priority: Priority,
        kind: frame::Kind,
        producer: Producer,
        stream: Option<Key>,
    ) {
        if self.is_draining() {
            return;
        }

        self.write_queue.enqueue(
            priority,
            PendingWrite {
                kind,
                producer,
                stream,
            },
        );
        self.wake();
    }

    pub(super) fn enqueue_session_write(&mut self, priority: Priority, frame: Frame) {
        let kind = frame.kind();
        if kind.is_write_capped()
            && self.write_queue.num_queued_capped_frames() > self.config.max_queued_capped_frames
        {
            tracing::warn!(
                queued = self.write_queue.num_queued_capped_frames(),
                "too many queued control frames"
            );
            self.do_drain_session(Err(Error::ConnectionClosed), "too many queued control frames");
            return;
        }

        self.enqueue_write(priority, kind, Producer::Frame(frame), None);
    }

    pub(super) fn enqueue_stream_write(&mut self, key: Key, kind: frame::Kind, producer: Producer) {
        let priority = match self.store.get(key) {
            Some(stream) => stream.priority,
            None => return,
        };
        self.enqueue_write(priority, kind, producer, Some(key));
    }

    /// Delivers a stream event now, or buffers it until a delegate shows up.
    pub(super) fn push_stream_event(&mut self, key: Key, event: StreamEvent) {
        let stream = match self.store.get_mut(key) {
            Some(stream) => stream,
            None => return,
        };

        if stream.has_delegate {
            self.events.push_back(Event::Stream(key, event));
        } else {
            stream.pending_recv.push_back(event);
        }
    }

    // ===== driver =====

    pub(super) fn begin_poll(&mut self, cx: &Context) {
        self.polling = true;
        match self.waker {
            Some(ref waker) if waker.will_wake(cx.waker()) => {}
            _ => self.waker = Some(cx.waker().clone()),
        }
        self.read_budget = ReadBudget {
            started: self.now(),
            bytes: 0,
        };
    }

    pub(super) fn end_poll(&mut self) {
        self.polling = false;
    }

    pub(crate) fn poll_step(&mut self, cx: &mut Context) -> Progress {
        if self.finished {
            return Progress::Closed;
        }

        let mut progress = self.poll_timers(cx);
        progress |= self.poll_read_step(cx);
        progress |= self.poll_write_step(cx);
        if progress {
            return Progress::Continue;
        }

        if self.is_draining() && self.in_flight.is_none() && self.write_queue.is_empty() {
            if self.framed.poll_close(cx).is_pending() {
                return Progress::Pending;
            }

            tracing::debug!(status = ?self.error_on_close, "session closed");
            self.finished = true;
            self.events.push_back(Event::Remove);
            return Progress::Closed;
        }

        Progress::Pending
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("Connection")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state)
            .field("active", &self.active.len())
            .field("created", &self.created.len())
            .field("send_window", &self.send_window)
            .field("write_queue", &self.write_queue)
            .finish()
    }
}
