use std::cmp;
use std::task::{Context, Poll};

use super::connection::{Connection, InFlight};
use super::streams::{Key, PendingWrite, Producer, SendStatus, StreamEvent};
use super::WindowSize;
use crate::codec::SendError;
use crate::frame::{self, Frame, Headers, StreamId, MAX_FRAME_CHUNK_SIZE};
use crate::pool::SessionEvent;
use crate::Error;

impl Connection {
    /// Moves the write loop forward by at most one frame. Returns whether
    /// anything happened.
    pub(super) fn poll_write_step(&mut self, cx: &mut Context) -> bool {
        if self.write_failed {
            return false;
        }

        if self.in_flight.is_none() {
            match self.dequeue_write() {
                Some(in_flight) => self.in_flight = Some(in_flight),
                None => return self.poll_flush_step(cx),
            }
        }

        let (res, stream) = match self.in_flight {
            Some(ref mut in_flight) => (
                self.framed.poll_write(cx, &mut in_flight.buf),
                in_flight.stream,
            ),
            None => return false,
        };

        match res {
            Poll::Pending => false,
            Poll::Ready(Ok(0)) => {
                self.on_write_error(Error::ConnectionClosed);
                true
            }
            Poll::Ready(Ok(n)) => {
                self.needs_flush = true;
                if let Some(stream) = stream.and_then(|key| self.store.get(key)) {
                    stream.record_bytes_sent(n);
                }

                let done = self
                    .in_flight
                    .as_ref()
                    .map(|in_flight| in_flight.buf.is_empty())
                    .unwrap_or(false);
                if done {
                    if let Some(in_flight) = self.in_flight.take() {
                        self.on_write_complete(in_flight);
                    }
                }
                true
            }
            Poll::Ready(Err(e)) => {
                self.on_write_error(Error::from(e));
                true
            }
        }
    }

    fn poll_flush_step(&mut self, cx: &mut Context) -> bool {
        if !self.needs_flush {
            return false;
        }

        match self.framed.poll_flush(cx) {
            Poll::Pending => false,
            Poll::Ready(Ok(())) => {
                self.needs_flush = false;
                true
            }
            Poll::Ready(Err(e)) => {
                self.on_write_error(Error::from(e));
                true
            }
        }
    }

    fn on_write_error(&mut self, err: Error) {
        tracing::debug!(%err, "write failed");
        self.in_flight = None;
        self.write_failed = true;
        self.needs_flush = false;
        self.do_drain_session(Err(err), "write failed");
        // nothing queued can reach the peer any more
        self.write_queue.clear();
    }

    /// Takes the next queued write and encodes it.
    fn dequeue_write(&mut self) -> Option<InFlight> {
        loop {
            let PendingWrite {
                kind,
                producer,
                stream,
            } = self.write_queue.dequeue()?;

            let frame = match producer {
                Producer::Frame(frame) => frame,
                Producer::Headers { block, end_stream } => {
                    let key = match stream {
                        Some(key) => key,
                        None => continue,
                    };
                    let id = match self.activate_stream(key) {
                        Some(id) => id,
                        None => continue,
                    };
                    self.maybe_send_preface_ping();

                    let mut headers = Headers::new(id, block);
                    headers.set_priority(self.store[key].priority);
                    if end_stream {
                        headers.set_end_stream();
                    }
                    headers.into()
                }
            };

            let payload_len = match frame {
                Frame::Data(ref data) => data.len(),
                _ => 0,
            };

            match self.framed.encode(frame) {
                Ok(buf) => {
                    return Some(InFlight {
                        buf,
                        kind,
                        payload_len,
                        stream,
                    })
                }
                Err(e) => {
                    let err = match e {
                        SendError::Connection(reason) => Error::from_reason(reason),
                        SendError::Io(e) => Error::from(e),
                    };
                    self.do_drain_session(Err(err), "failed to encode frame");
                    return None;
                }
            }
        }
    }

    /// Gives a created stream the next id and moves it to the active set.
    fn activate_stream(&mut self, key: Key) -> Option<StreamId> {
        let id = match self.next_stream_id {
            Some(id) => id,
            None => {
                self.close_created_stream(key, Err(Error::Protocol));
                return None;
            }
        };

        if !self.created.shift_remove(&key) {
            return None;
        }

        let stream = &mut self.store[key];
        stream.id = id;
        stream.stats.borrow_mut().stream_id = id;
        self.active.insert(id, key);
        self.streams_initiated += 1;

        tracing::trace!(stream.id = ?id, "activated stream");
        self.observe(SessionEvent::StreamOpened {
            session: self.id,
            stream_id: id,
        });

        match id.next_id() {
            Ok(next) => self.next_stream_id = Some(next),
            Err(_) => {
                tracing::debug!(stream.id = ?id, "stream id space exhausted");
                self.next_stream_id = None;
                self.make_unavailable();
                self.start_going_away(StreamId::MAX, Error::Protocol);
            }
        }
        Some(id)
    }

    fn on_write_complete(&mut self, in_flight: InFlight) {
        tracing::trace!(kind = ?in_flight.kind, payload_len = in_flight.payload_len, "write complete");

        let key = match in_flight.stream {
            Some(key) => key,
            None => return,
        };
        if !self.store.contains(key) {
            return;
        }

        self.on_frame_write_complete(key, in_flight.kind);
    }

    fn on_frame_write_complete(&mut self, key: Key, kind: frame::Kind) {
        let now = self.now();
        let stream = &mut self.store[key];

        let event = match kind {
            frame::Kind::Headers => {
                stream.state.send_open();
                stream.stats.borrow_mut().send_time = Some(now);
                StreamEvent::HeadersSent
            }
            frame::Kind::Data => {
                if stream.has_pending_data() {
                    self.queue_next_data_frame(key);
                    return;
                }
                stream.pending_send_data = None;
                StreamEvent::DataSent
            }
            _ => return,
        };

        if stream.pending_send_status == SendStatus::NoMoreDataToSend {
            stream.state.send_close();
        }
        let id = stream.id;
        let closed = stream.state.is_closed();

        self.push_stream_event(key, event);
        if closed {
            self.close_active_stream(id, Ok(()));
        }
    }

    /// Cuts the next DATA frame off the stream's pending body, bounded by
    /// both send windows.
    pub(super) fn queue_next_data_frame(&mut self, key: Key) {
        if self.is_draining() {
            return;
        }

        let session_stalled = self.is_send_stalled();
        let session_available = self.send_window.available() as usize;

        let stream = match self.store.get_mut(key) {
            Some(stream) => stream,
            None => return,
        };
        let mut data = match stream.pending_send_data.take() {
            Some(data) => data,
            None => return,
        };

        let len = data.len();
        let mut effective = cmp::min(len, MAX_FRAME_CHUNK_SIZE);

        if stream.send_window.is_exhausted() || session_stalled {
            tracing::debug!(
                stream.id = ?stream.id,
                stream_window = stream.send_window.size(),
                session_stalled,
                "stream send stalled by flow control"
            );
            stream.pending_send_data = Some(data);
            stream.send_stalled_by_flow_control = true;
            let (id, priority) = (stream.id, stream.priority);
            self.queue_send_stalled_stream(id, priority);
            return;
        }

        effective = cmp::min(effective, stream.send_window.available() as usize);
        effective = cmp::min(effective, session_available);

        let end_stream =
            stream.pending_send_status == SendStatus::NoMoreDataToSend && effective == len;
        let chunk = data.split_to(effective);
        stream.pending_send_data = Some(data);

        if effective > 0 {
            let res = stream.send_window.decrease(effective as WindowSize);
            debug_assert!(res.is_ok());
        }

        let mut frame = frame::Data::new(stream.id, chunk);
        frame.set_end_stream(end_stream);

        if effective > 0 {
            self.maybe_send_preface_ping();
            self.decrease_send_window(effective as WindowSize);
        }

        self.enqueue_stream_write(key, frame::Kind::Data, Producer::Frame(frame.into()));
    }
}
