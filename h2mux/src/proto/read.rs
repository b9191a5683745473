use bytes::Bytes;
use std::task::{Context, Poll};

use super::connection::Connection;
use super::streams::{Key, RecvClose, RecvHeaders, ResponseState, StreamEvent, StreamState};
use super::{WindowSize, MAX_WINDOW_SIZE};
use crate::codec::RecvError;
use crate::frame::{self, Frame, Reason, StreamId};
use crate::priority::Priority;
use crate::Error;

impl Connection {
    /// Handles one buffered frame, or reads more bytes. Returns whether
    /// anything happened.
    pub(super) fn poll_read_step(&mut self, cx: &mut Context) -> bool {
        if self.is_draining() {
            return false;
        }

        match self.framed.decode() {
            Ok(Some((frame, len))) => {
                self.frames_received += 1;
                self.recv_frame(frame, len);
                return true;
            }
            Ok(None) => {}
            Err(e) => {
                self.recv_error(e);
                return true;
            }
        }

        if self.read_budget_exhausted() {
            tracing::trace!(bytes = self.read_budget.bytes, "yielding read loop");
            cx.waker().wake_by_ref();
            return false;
        }

        match self.framed.poll_fill(cx) {
            Poll::Pending => false,
            Poll::Ready(Ok(0)) => {
                self.do_drain_session(Err(Error::ConnectionClosed), "connection closed by peer");
                true
            }
            Poll::Ready(Ok(n)) => {
                self.last_read_time = self.now();
                self.read_budget.bytes += n;
                true
            }
            Poll::Ready(Err(e)) => {
                self.do_drain_session(Err(Error::from(e)), "read failed");
                true
            }
        }
    }

    fn read_budget_exhausted(&self) -> bool {
        self.read_budget.bytes > self.config.yield_after_bytes_read
            || self.now().saturating_duration_since(self.read_budget.started)
                > self.config.yield_after_duration
    }

    fn recv_frame(&mut self, frame: Frame, len: usize) {
        tracing::debug!(?frame, "received");

        match frame {
            Frame::Data(frame) => self.recv_data(frame, len),
            Frame::Headers(frame) => self.recv_headers(frame, len),
            Frame::Reset(frame) => self.recv_reset(frame),
            Frame::Settings(frame) => self.recv_settings(frame),
            Frame::Ping(frame) => self.recv_ping(frame),
            Frame::GoAway(frame) => self.recv_go_away(frame),
            Frame::WindowUpdate(frame) => self.recv_window_update(frame),
            Frame::PushPromise(frame) => {
                proto_err!(conn: "received PUSH_PROMISE; stream={:?}", frame.stream_id());
                self.protocol_error(None, Error::Protocol);
                self.do_drain_session(Err(Error::Protocol), "push is not supported");
            }
            Frame::Priority(frame) => {
                tracing::trace!(stream.id = ?frame.stream_id(), "ignoring PRIORITY");
            }
        }
    }

    fn recv_error(&mut self, err: RecvError) {
        match err {
            RecvError::Connection(reason) => {
                proto_err!(conn: "codec error; reason={:?}", reason);
                let err = Error::from_reason(reason);
                self.protocol_error(None, err);
                self.do_drain_session(Err(err), "frame decoding failed");
            }
            RecvError::Stream { id, reason } => {
                proto_err!(stream: "codec error; stream={:?} reason={:?}", id, reason);
                self.protocol_error(Some(id), Error::Protocol);
                if self.active.contains_key(&id) {
                    self.reset_stream(id, Error::Protocol, "frame decoding failed");
                } else {
                    let frame = frame::Reset::new(id, Reason::PROTOCOL_ERROR);
                    self.enqueue_session_write(Priority::Idle, frame.into());
                }
            }
            RecvError::Io(e) => {
                self.do_drain_session(Err(Error::from(e)), "read failed");
            }
        }
    }

    fn recv_data(&mut self, frame: frame::Data, wire_len: usize) {
        let id = frame.stream_id();
        let end_stream = frame.is_end_stream();
        let payload = frame.into_payload();

        if !payload.is_empty() {
            let len = payload.len() as WindowSize;
            if !self.decrease_recv_window(len) {
                return;
            }

            let key = match self.active.get(&id) {
                Some(&key) => key,
                None => {
                    tracing::debug!(stream.id = ?id, "DATA for unknown stream");
                    self.increase_recv_window(len);
                    return;
                }
            };

            let now = self.now();
            self.store[key].record_bytes_received(wire_len, now);
            self.stream_data_received(key, Some(payload));
        } else if let Some(&key) = self.active.get(&id) {
            let now = self.now();
            self.store[key].record_bytes_received(wire_len, now);
        }

        if end_stream {
            self.on_stream_end(id);
        }
    }

    fn on_stream_end(&mut self, id: StreamId) {
        if let Some(&key) = self.active.get(&id) {
            self.stream_data_received(key, None);
        }
    }

    /// Body bytes (or end of body) for an active stream.
    fn stream_data_received(&mut self, key: Key, data: Option<Bytes>) {
        let stream = &mut self.store[key];
        let id = stream.id;
        let len = data.as_ref().map(|data| data.len() as WindowSize).unwrap_or(0);

        let violation = if stream.response_state == ResponseState::ReadyForHeaders {
            Some((Error::Protocol, "DATA received before headers"))
        } else if stream.response_state == ResponseState::TrailersReceived && data.is_some()
        {
            Some((Error::Protocol, "DATA received after trailers"))
        } else if stream.state == StreamState::HalfClosedRemote {
            Some((Error::StreamClosed, "DATA received on half-closed (remote) stream"))
        } else {
            None
        };

        if let Some((err, description)) = violation {
            proto_err!(stream: "{}; stream={:?}", description, id);
            self.protocol_error(Some(id), err);
            self.reset_stream(id, err, description);
            self.increase_recv_window(len);
            return;
        }

        let data = match data {
            Some(data) => data,
            None => {
                match stream.state.recv_close() {
                    RecvClose::HalfClosed => self.push_stream_event(key, StreamEvent::Data(None)),
                    RecvClose::Closed => self.close_active_stream(id, Ok(())),
                    RecvClose::Invalid => {
                        proto_err!(stream: "end of stream in invalid state; stream={:?}", id);
                        self.reset_stream(id, Error::Protocol, "end of stream in invalid state");
                    }
                }
                return;
            }
        };

        if stream.recv_window.decrease(len).is_err() {
            proto_err!(stream: "stream receive window exceeded; stream={:?}", id);
            self.protocol_error(Some(id), Error::FlowControl);
            self.reset_stream(id, Error::FlowControl, "stream receive window exceeded");
            self.increase_recv_window(len);
            return;
        }

        self.push_stream_event(key, StreamEvent::Data(Some(data)));
    }

    fn recv_headers(&mut self, frame: frame::Headers, wire_len: usize) {
        let id = frame.stream_id();
        let end_stream = frame.is_end_stream();

        let key = match self.active.get(&id) {
            Some(&key) => key,
            None => {
                tracing::debug!(stream.id = ?id, "HEADERS for unknown stream");
                return;
            }
        };

        let now = self.now();
        let stream = &mut self.store[key];
        stream.record_bytes_received(wire_len, now);

        if stream.state == StreamState::HalfClosedRemote || stream.state == StreamState::Closed {
            let description = "HEADERS received on half-closed (remote) stream";
            proto_err!(stream: "{}; stream={:?}", description, id);
            self.protocol_error(Some(id), Error::StreamClosed);
            self.reset_stream(id, Error::StreamClosed, description);
            return;
        }

        match stream.recv_headers(frame.into_block()) {
            Ok(RecvHeaders::Skip) => {}
            Ok(RecvHeaders::Deliver(event)) => self.push_stream_event(key, event),
            Err(description) => {
                proto_err!(stream: "{}; stream={:?}", description, id);
                self.protocol_error(Some(id), Error::Protocol);
                self.reset_stream(id, Error::Protocol, description);
                return;
            }
        }

        if end_stream {
            self.on_stream_end(id);
        }
    }

    fn recv_reset(&mut self, frame: frame::Reset) {
        let id = frame.stream_id();
        if !self.active.contains_key(&id) {
            tracing::debug!(stream.id = ?id, "RST_STREAM for unknown stream");
            return;
        }

        match frame.reason() {
            Reason::NO_ERROR => self.close_active_stream(id, Err(Error::RstStreamNoErrorReceived)),
            Reason::REFUSED_STREAM => self.close_active_stream(id, Err(Error::ServerRefusedStream)),
            Reason::HTTP_1_1_REQUIRED => {
                self.do_drain_session(Err(Error::Http11Required), "HTTP/1.1 required")
            }
            reason => {
                tracing::debug!(stream.id = ?id, ?reason, "stream reset by peer");
                self.close_active_stream(id, Err(Error::Protocol));
            }
        }
    }

    fn recv_settings(&mut self, frame: frame::Settings) {
        if frame.is_ack() {
            tracing::trace!("received SETTINGS ack");
            return;
        }

        self.enqueue_session_write(Priority::Highest, frame::Settings::ack().into());

        if let Some(max) = frame.max_concurrent_streams() {
            let max = (max as usize).min(self.config.max_concurrent_stream_limit);
            tracing::debug!(max_concurrent_streams = max, "peer changed concurrency limit");
            self.max_concurrent_streams = max;
            self.process_pending_stream_requests();
        }

        if let Some(size) = frame.initial_window_size() {
            if size > MAX_WINDOW_SIZE {
                tracing::debug!(size, "ignoring oversized INITIAL_WINDOW_SIZE");
            } else {
                let delta = size as i64 - self.stream_initial_send_window_size as i64;
                self.stream_initial_send_window_size = size as i32;
                self.update_streams_send_window_size(delta as i32);
            }
        }

        if let Some(val) = frame.enable_connect_protocol() {
            if val > 1 || (val == 0 && self.supports_websocket) {
                proto_err!(conn: "invalid ENABLE_CONNECT_PROTOCOL; value={}", val);
                self.protocol_error(None, Error::Protocol);
                self.do_drain_session(Err(Error::Protocol), "invalid ENABLE_CONNECT_PROTOCOL");
                return;
            }
            self.supports_websocket = val == 1;
        }
    }

    fn recv_window_update(&mut self, frame: frame::WindowUpdate) {
        let id = frame.stream_id();
        let delta = frame.size_increment();

        if id.is_zero() {
            if delta < 1 {
                proto_err!(conn: "session WINDOW_UPDATE with zero delta");
                self.protocol_error(None, Error::Protocol);
                self.do_drain_session(Err(Error::Protocol), "invalid WINDOW_UPDATE delta");
                return;
            }
            self.increase_send_window(delta);
            return;
        }

        let key = match self.active.get(&id) {
            Some(&key) => key,
            None => {
                tracing::debug!(stream.id = ?id, "WINDOW_UPDATE for unknown stream");
                return;
            }
        };

        if delta < 1 {
            proto_err!(stream: "WINDOW_UPDATE with zero delta; stream={:?}", id);
            self.protocol_error(Some(id), Error::FlowControl);
            self.reset_stream(id, Error::FlowControl, "invalid WINDOW_UPDATE delta");
            return;
        }

        self.increase_stream_send_window(key, delta);
    }
}
