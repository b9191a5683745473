#![allow(dead_code)]

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::executor::LocalPool;
use futures::io::{AsyncRead, AsyncWrite};
use http::{Method, StatusCode};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};
use url::Url;

use h2mux::codec::{FrameCodec, RecvError, SendError};
use h2mux::config::LinkMonitor;
use h2mux::frame::{self, Frame, HeaderBlock, StreamId};
use h2mux::pool::{HostCache, HostPortPair, Observer, SessionEvent, SessionKey, SocketTag};
use h2mux::time::{Sleep, Timer};
use h2mux::transport::{PeerIdentity, Transport, ALPN_H2};
use h2mux::{
    Delegate, Error, PoolConfig, Priority, RequestOptions, SendStatus, SessionConfig,
    SessionHandle, SessionPool, StreamHandle, StreamRequest, StreamType,
};

// ===== wire =====

/// Both directions of one mock connection.
///
/// The codec does not serialize anything: every frame crosses the
/// transport as a single token byte while the frame itself travels here.
#[derive(Default)]
struct Wire {
    inbound_bytes: VecDeque<u8>,
    inbound_frames: VecDeque<Result<Frame, RecvError>>,
    read_task: Option<Waker>,
    eof: bool,
    read_error: Option<io::ErrorKind>,
    write_error: Option<io::ErrorKind>,
    write_blocked: bool,
    write_task: Option<Waker>,
    written: Vec<Frame>,
    closed: bool,
    disconnected: bool,
    socket_tag: Option<SocketTag>,
}

impl Wire {
    fn wake_reader(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.wake();
        }
    }
}

pub struct MockTransport {
    wire: Rc<RefCell<Wire>>,
    addr: SocketAddr,
    alpn: Option<Vec<u8>>,
    identity: Option<MockIdentity>,
}

pub struct TokenCodec {
    wire: Rc<RefCell<Wire>>,
}

/// The test's side of a mock connection.
#[derive(Clone)]
pub struct MockPeer {
    wire: Rc<RefCell<Wire>>,
}

/// A certificate valid for a fixed list of names.
#[derive(Debug, Clone)]
pub struct MockIdentity {
    names: Vec<String>,
    client_cert_sent: bool,
}

pub fn mock(addr: SocketAddr) -> (MockTransport, TokenCodec, MockPeer) {
    let wire = Rc::new(RefCell::new(Wire::default()));
    let transport = MockTransport {
        wire: wire.clone(),
        addr,
        alpn: Some(ALPN_H2.to_vec()),
        identity: None,
    };
    let codec = TokenCodec { wire: wire.clone() };
    (transport, codec, MockPeer { wire })
}

impl MockTransport {
    pub fn alpn(mut self, protocol: Option<&[u8]>) -> Self {
        self.alpn = protocol.map(|p| p.to_vec());
        self
    }

    pub fn identity(mut self, names: &[&str]) -> Self {
        self.identity = Some(MockIdentity {
            names: names.iter().map(|name| name.to_string()).collect(),
            client_cert_sent: false,
        });
        self
    }

    pub fn client_cert_sent(mut self) -> Self {
        if let Some(ref mut identity) = self.identity {
            identity.client_cert_sent = true;
        }
        self
    }
}

impl AsyncRead for MockTransport {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        let mut wire = self.wire.borrow_mut();
        if let Some(kind) = wire.read_error.take() {
            return Poll::Ready(Err(kind.into()));
        }

        if !wire.inbound_bytes.is_empty() {
            let n = buf.len().min(wire.inbound_bytes.len());
            for (dst, src) in buf.iter_mut().zip(wire.inbound_bytes.drain(..n)) {
                *dst = src;
            }
            return Poll::Ready(Ok(n));
        }

        if wire.eof {
            return Poll::Ready(Ok(0));
        }

        wire.read_task = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl AsyncWrite for MockTransport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        let mut wire = self.wire.borrow_mut();
        if let Some(kind) = wire.write_error {
            return Poll::Ready(Err(kind.into()));
        }
        if wire.write_blocked {
            wire.write_task = Some(cx.waker().clone());
            return Poll::Pending;
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context) -> Poll<io::Result<()>> {
        self.wire.borrow_mut().closed = true;
        Poll::Ready(Ok(()))
    }
}

impl Transport for MockTransport {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }

    fn negotiated_protocol(&self) -> Option<&[u8]> {
        self.alpn.as_deref()
    }

    fn identity(&self) -> Option<&dyn PeerIdentity> {
        self.identity.as_ref().map(|identity| identity as &dyn PeerIdentity)
    }

    fn is_connected(&self) -> bool {
        !self.wire.borrow().disconnected
    }

    fn apply_socket_tag(&mut self, tag: &SocketTag) {
        self.wire.borrow_mut().socket_tag = Some(*tag);
    }
}

impl PeerIdentity for MockIdentity {
    fn verify_domain(&self, host: &str) -> bool {
        self.names.iter().any(|name| name == host)
    }

    fn client_cert_sent(&self) -> bool {
        self.client_cert_sent
    }
}

impl FrameCodec for TokenCodec {
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, RecvError> {
        if src.is_empty() {
            return Ok(None);
        }
        src.advance(1);
        match self.wire.borrow_mut().inbound_frames.pop_front() {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), SendError> {
        self.wire.borrow_mut().written.push(frame);
        dst.put_u8(0);
        Ok(())
    }
}

impl MockPeer {
    pub fn send<F: Into<Frame>>(&self, frame: F) {
        self.push(Ok(frame.into()));
    }

    pub fn send_error(&self, err: RecvError) {
        self.push(Err(err));
    }

    fn push(&self, item: Result<Frame, RecvError>) {
        let mut wire = self.wire.borrow_mut();
        wire.inbound_frames.push_back(item);
        wire.inbound_bytes.push_back(0);
        wire.wake_reader();
    }

    /// Half closes the connection from the peer's side.
    pub fn eof(&self) {
        let mut wire = self.wire.borrow_mut();
        wire.eof = true;
        wire.wake_reader();
    }

    pub fn fail_reads(&self, kind: io::ErrorKind) {
        let mut wire = self.wire.borrow_mut();
        wire.read_error = Some(kind);
        wire.wake_reader();
    }

    pub fn fail_writes(&self, kind: io::ErrorKind) {
        self.wire.borrow_mut().write_error = Some(kind);
    }

    /// Leaves every write pending until `unblock_writes`.
    pub fn block_writes(&self) {
        self.wire.borrow_mut().write_blocked = true;
    }

    pub fn unblock_writes(&self) {
        let mut wire = self.wire.borrow_mut();
        wire.write_blocked = false;
        if let Some(task) = wire.write_task.take() {
            task.wake();
        }
    }

    /// Makes the transport report itself as no longer connected.
    pub fn disconnect(&self) {
        self.wire.borrow_mut().disconnected = true;
    }

    /// Every frame the session wrote so far.
    pub fn frames(&self) -> Vec<Frame> {
        self.wire.borrow().written.clone()
    }

    /// Frames written since the last call.
    pub fn take_frames(&self) -> Vec<Frame> {
        std::mem::replace(&mut self.wire.borrow_mut().written, Vec::new())
    }

    pub fn is_closed(&self) -> bool {
        self.wire.borrow().closed
    }

    pub fn socket_tag(&self) -> Option<SocketTag> {
        self.wire.borrow().socket_tag
    }
}

// ===== frame helpers =====

pub fn response(id: u32, status: u16) -> frame::Headers {
    let status = StatusCode::from_u16(status).unwrap();
    frame::Headers::new(StreamId::from(id), HeaderBlock::response(status))
}

pub fn response_end(id: u32, status: u16) -> frame::Headers {
    let mut headers = response(id, status);
    headers.set_end_stream();
    headers
}

pub fn data(id: u32, payload: &'static [u8], end_stream: bool) -> frame::Data {
    let mut frame = frame::Data::new(StreamId::from(id), Bytes::from_static(payload));
    frame.set_end_stream(end_stream);
    frame
}

pub fn trailers(id: u32) -> frame::Headers {
    frame::Headers::trailers(StreamId::from(id), http::HeaderMap::new())
}

pub fn request_headers(url: &str) -> HeaderBlock {
    HeaderBlock::request(Method::GET, url.parse().unwrap())
}

/// Stream ids of the HEADERS frames in `frames`, in order.
pub fn headers_ids(frames: &[Frame]) -> Vec<u32> {
    frames
        .iter()
        .filter_map(|frame| match *frame {
            Frame::Headers(ref headers) => Some(u32::from(headers.stream_id())),
            _ => None,
        })
        .collect()
}

pub fn find_go_away(frames: &[Frame]) -> Option<frame::GoAway> {
    frames.iter().find_map(|frame| match *frame {
        Frame::GoAway(ref go_away) => Some(go_away.clone()),
        _ => None,
    })
}

pub fn find_reset(frames: &[Frame], id: u32) -> Option<frame::Reset> {
    frames.iter().find_map(|frame| match *frame {
        Frame::Reset(reset) if reset.stream_id() == id => Some(reset),
        _ => None,
    })
}

pub fn window_updates(frames: &[Frame]) -> Vec<(u32, u32)> {
    frames
        .iter()
        .filter_map(|frame| match *frame {
            Frame::WindowUpdate(update) => {
                Some((u32::from(update.stream_id()), update.size_increment()))
            }
            _ => None,
        })
        .collect()
}

// ===== delegate =====

#[derive(Debug, Clone, PartialEq)]
pub enum Ev {
    HeadersSent,
    Headers(StatusCode),
    Data(Option<Bytes>),
    DataSent,
    Trailers,
    Close(Result<(), Error>),
}

/// Records every callback. Clones share the record.
#[derive(Clone, Default)]
pub struct RecordingDelegate {
    events: Rc<RefCell<Vec<Ev>>>,
    close_on_headers: bool,
    cancel_on_data: Option<Error>,
}

impl RecordingDelegate {
    pub fn new() -> RecordingDelegate {
        RecordingDelegate::default()
    }

    /// Closes the stream from inside `on_headers_received`.
    pub fn close_on_headers(mut self) -> Self {
        self.close_on_headers = true;
        self
    }

    /// Cancels the stream from inside the first `on_data_received`.
    pub fn cancel_on_data(mut self, error: Error) -> Self {
        self.cancel_on_data = Some(error);
        self
    }

    pub fn events(&self) -> Vec<Ev> {
        self.events.borrow().clone()
    }

    pub fn close_status(&self) -> Option<Result<(), Error>> {
        self.events.borrow().iter().find_map(|ev| match *ev {
            Ev::Close(status) => Some(status),
            _ => None,
        })
    }

    pub fn close_count(&self) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|ev| matches!(ev, Ev::Close(_)))
            .count()
    }

    fn record(&self, ev: Ev) {
        self.events.borrow_mut().push(ev);
    }
}

impl Delegate for RecordingDelegate {
    fn on_headers_sent(&mut self, _: &StreamHandle) {
        self.record(Ev::HeadersSent);
    }

    fn on_headers_received(&mut self, stream: &StreamHandle, headers: &HeaderBlock) {
        let status = headers.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.record(Ev::Headers(status));
        if self.close_on_headers {
            stream.close();
        }
    }

    fn on_data_received(&mut self, stream: &StreamHandle, data: Option<Bytes>) {
        self.record(Ev::Data(data));
        if let Some(error) = self.cancel_on_data.take() {
            stream.cancel(error);
        }
    }

    fn on_data_sent(&mut self, _: &StreamHandle) {
        self.record(Ev::DataSent);
    }

    fn on_trailers(&mut self, _: &StreamHandle, _: &HeaderBlock) {
        self.record(Ev::Trailers);
    }

    fn on_close(&mut self, _: &StreamHandle, status: Result<(), Error>) {
        self.record(Ev::Close(status));
    }
}

// ===== observer, host cache, link =====

#[derive(Default)]
pub struct RecordingObserver {
    events: RefCell<Vec<SessionEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.borrow().clone()
    }
}

impl Observer for RecordingObserver {
    fn on_event(&self, event: &SessionEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

#[derive(Default)]
pub struct StaticHostCache {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticHostCache {
    pub fn with(mut self, host: &str, addrs: &[&str]) -> Self {
        let addrs = addrs.iter().map(|addr| addr.parse().unwrap()).collect();
        self.hosts.insert(host.to_owned(), addrs);
        self
    }
}

impl HostCache for StaticHostCache {
    fn lookup(&self, host: &str) -> Option<Vec<IpAddr>> {
        self.hosts.get(host).cloned()
    }
}

#[derive(Debug)]
pub struct ToggleLink {
    active: Cell<bool>,
}

impl ToggleLink {
    pub fn new(active: bool) -> ToggleLink {
        ToggleLink {
            active: Cell::new(active),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.set(active);
    }
}

impl LinkMonitor for ToggleLink {
    fn is_default_network_active(&self) -> bool {
        self.active.get()
    }
}

// ===== timer =====

/// A clock that only moves when told to.
#[derive(Clone)]
pub struct ManualTimer {
    inner: Rc<ManualClock>,
}

struct ManualClock {
    now: Cell<Instant>,
    sleeps: RefCell<Vec<Rc<SleepState>>>,
}

struct SleepState {
    deadline: Instant,
    task: RefCell<Option<Waker>>,
}

struct ManualSleep {
    state: Rc<SleepState>,
    clock: Rc<ManualClock>,
}

impl ManualTimer {
    pub fn new() -> ManualTimer {
        ManualTimer {
            inner: Rc::new(ManualClock {
                now: Cell::new(Instant::now()),
                sleeps: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Moves the clock forward and wakes every sleep that is now due.
    pub fn advance(&self, by: Duration) {
        let now = self.inner.now.get() + by;
        self.inner.now.set(now);

        let due: Vec<Rc<SleepState>> = {
            let mut sleeps = self.inner.sleeps.borrow_mut();
            let (due, rest): (Vec<_>, Vec<_>) = sleeps.drain(..).partition(|sleep| sleep.deadline <= now);
            *sleeps = rest;
            due
        };
        for sleep in due {
            if let Some(task) = sleep.task.borrow_mut().take() {
                task.wake();
            }
        }
    }
}

impl Timer for ManualTimer {
    fn now(&self) -> Instant {
        self.inner.now.get()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        let state = Rc::new(SleepState {
            deadline: self.inner.now.get() + duration,
            task: RefCell::new(None),
        });
        self.inner.sleeps.borrow_mut().push(state.clone());
        Box::pin(ManualSleep {
            state,
            clock: self.inner.clone(),
        })
    }
}

impl Future for ManualSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<()> {
        if self.clock.now.get() >= self.state.deadline {
            return Poll::Ready(());
        }
        *self.state.task.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

// ===== harness =====

pub const PEER: &str = "10.0.0.1:443";

pub fn key(host: &str) -> SessionKey {
    SessionKey::direct(HostPortPair::new(host, 443))
}

pub fn url(host: &str) -> Url {
    Url::parse(&format!("https://{}/", host)).unwrap()
}

/// Session config for tests: no preface, so nothing is written until a
/// test asks for it.
pub fn session_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.send_connection_preface = false;
    config
}

pub struct Harness {
    pub pool: SessionPool,
    pub executor: LocalPool,
    pub timer: ManualTimer,
    pub observer: Rc<RecordingObserver>,
}

impl Harness {
    pub fn new() -> Harness {
        Harness::with_config(|_| {})
    }

    pub fn with_config<F>(f: F) -> Harness
    where
        F: FnOnce(&mut PoolConfig),
    {
        let executor = LocalPool::new();
        let timer = ManualTimer::new();
        let observer = Rc::new(RecordingObserver::default());

        let mut config = PoolConfig::new(Rc::new(executor.spawner()))
            .session(session_config())
            .timer(Rc::new(timer.clone()))
            .observer(observer.clone());
        f(&mut config);

        Harness {
            pool: SessionPool::new(config),
            executor,
            timer,
            observer,
        }
    }

    pub fn run(&mut self) {
        self.executor.run_until_stalled();
    }

    pub fn advance(&mut self, by: Duration) {
        self.timer.advance(by);
        self.run();
    }

    /// Creates a session for `host` over a fresh mock connection to
    /// [`PEER`].
    pub fn connect(&mut self, host: &str) -> (SessionHandle, MockPeer) {
        let (transport, codec, peer) = mock(PEER.parse().unwrap());
        let session = self.connect_over(key(host), transport, codec);
        (session, peer)
    }

    pub fn connect_over(
        &mut self,
        key: SessionKey,
        transport: MockTransport,
        codec: TokenCodec,
    ) -> SessionHandle {
        let session = self
            .pool
            .create_session_from_handle(key, Box::new(transport), Box::new(codec))
            .unwrap();
        self.run();
        session
    }

    /// Opens a stream right away; panics if the session queues the request.
    pub fn open(&mut self, session: &SessionHandle, priority: Priority) -> (StreamHandle, RecordingDelegate) {
        self.open_with(session, RecordingDelegate::new(), priority)
    }

    pub fn open_with(
        &mut self,
        session: &SessionHandle,
        delegate: RecordingDelegate,
        priority: Priority,
    ) -> (StreamHandle, RecordingDelegate) {
        let host = session.key().host_port_pair().host().to_owned();
        let options = RequestOptions::new(StreamType::RequestResponse, url(&host)).priority(priority);
        let mut request = StreamRequest::new();
        let stream = match request.start_request(session, options) {
            Poll::Ready(Ok(stream)) => stream,
            other => panic!("stream not created right away: {:?}", other),
        };
        stream.set_delegate(delegate.clone()).unwrap();
        (stream, delegate)
    }

    /// Opens a stream and sends a body-less GET on it.
    pub fn get(&mut self, session: &SessionHandle) -> (StreamHandle, RecordingDelegate) {
        let (stream, delegate) = self.open(session, Priority::Medium);
        let host = session.key().host_port_pair().host().to_owned();
        stream
            .send_request_headers(
                request_headers(&format!("https://{}/", host)),
                SendStatus::NoMoreDataToSend,
            )
            .unwrap();
        self.run();
        (stream, delegate)
    }
}
