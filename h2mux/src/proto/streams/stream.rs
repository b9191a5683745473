use bytes::Bytes;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;
use url::Url;

use super::flow_control::{FlowControlWindow, RecvWindow};
use super::state::{ResponseState, StreamState};
use super::store::Key;
use crate::frame::{HeaderBlock, StreamId};
use crate::priority::Priority;
use crate::Error;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StreamType {
    /// Long lived, both sides stream freely.
    Bidirectional,
    RequestResponse,
    /// Opened by the server.
    Push,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SendStatus {
    MoreDataToSend,
    NoMoreDataToSend,
}

/// Byte counts and timing of a stream, readable after it closes.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub stream_id: StreamId,
    pub raw_bytes_sent: u64,
    pub raw_bytes_received: u64,
    /// When the request headers finished writing.
    pub send_time: Option<Instant>,
    pub first_byte_time: Option<Instant>,
    pub last_byte_time: Option<Instant>,
}

/// Delegate notification waiting to be delivered.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    HeadersSent,
    HeadersReceived(HeaderBlock),
    Data(Option<Bytes>),
    DataSent,
    Trailers(HeaderBlock),
    Close(Result<(), Error>),
}

/// What a stream wants after its send window grew.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Resume {
    DoNotRequeue,
    Requeue,
    Resume,
}

/// Result of validating a received header block.
#[derive(Debug)]
pub(crate) enum RecvHeaders {
    /// Informational block, dropped.
    Skip,
    Deliver(StreamEvent),
}

#[derive(Debug)]
pub(crate) struct Stream {
    pub key: Key,

    /// Zero until the stream is activated.
    pub id: StreamId,

    pub kind: StreamType,

    pub url: Url,

    pub priority: Priority,

    pub state: StreamState,

    pub response_state: ResponseState,

    pub send_window: FlowControlWindow,

    pub recv_window: RecvWindow,

    pub send_stalled_by_flow_control: bool,

    pub pending_send_status: SendStatus,

    /// Request headers are queued; no more may be sent.
    pub request_headers_sent: bool,

    /// Body not yet handed to the write queue.
    pub pending_send_data: Option<Bytes>,

    /// Events that arrived before a delegate was attached.
    pub pending_recv: VecDeque<StreamEvent>,

    pub has_delegate: bool,

    pub detect_broken_connection: bool,

    pub stats: Rc<RefCell<StreamStats>>,
}

impl Stream {
    pub fn new(
        key: Key,
        kind: StreamType,
        url: Url,
        priority: Priority,
        send_window: i32,
        recv_window: u32,
    ) -> Stream {
        let mut window = FlowControlWindow::new(0);
        let res = window.adjust(send_window);
        debug_assert!(res.is_ok());

        let mut state = StreamState::Idle;
        if kind == StreamType::Push {
            state.reserve_remote();
        }

        Stream {
            key,
            id: StreamId::ZERO,
            kind,
            url,
            priority,
            state,
            response_state: ResponseState::ReadyForHeaders,
            send_window: window,
            recv_window: RecvWindow::new(recv_window),
            send_stalled_by_flow_control: false,
            pending_send_status: SendStatus::MoreDataToSend,
            request_headers_sent: false,
            pending_send_data: None,
            pending_recv: VecDeque::new(),
            has_delegate: false,
            detect_broken_connection: false,
            stats: Rc::new(RefCell::new(StreamStats::default())),
        }
    }

    pub fn is_activated(&self) -> bool {
        !self.id.is_zero()
    }

    pub fn has_pending_data(&self) -> bool {
        self.pending_send_data
            .as_ref()
            .map(|data| !data.is_empty())
            .unwrap_or(false)
    }

    /// Decides whether a stalled stream can send again once its session
    /// (or its own window) has credit.
    pub fn possibly_resume_if_send_stalled(&mut self, session_stalled: bool) -> Resume {
        if self.state.is_locally_closed() || !self.send_stalled_by_flow_control {
            return Resume::DoNotRequeue;
        }

        if session_stalled || self.send_window.is_exhausted() {
            return Resume::Requeue;
        }

        tracing::trace!(stream.id = ?self.id, "resuming stalled stream");
        self.send_stalled_by_flow_control = false;
        Resume::Resume
    }

    /// Validates a header block against the response state machine.
    pub fn recv_headers(&mut self, block: HeaderBlock) -> Result<RecvHeaders, &'static str> {
        match self.response_state {
            ResponseState::ReadyForHeaders => {
                let status = match block.status() {
                    Some(status) => status,
                    None => return Err("response headers do not include :status"),
                };

                if status.as_u16() == 101 {
                    return Err("101 Switching Protocols is not allowed");
                }

                if status.is_informational() {
                    tracing::trace!(stream.id = ?self.id, %status, "skipping informational headers");
                    return Ok(RecvHeaders::Skip);
                }

                if self.kind != StreamType::Push && self.state.is_idle() {
                    return Err("response received before request sent");
                }

                if block.fields.contains_key(http::header::TRANSFER_ENCODING) {
                    return Err("received transfer-encoding header");
                }

                if self.kind == StreamType::Push {
                    self.state.recv_push_headers();
                }

                self.response_state = ResponseState::ReadyForDataOrTrailers;
                Ok(RecvHeaders::Deliver(StreamEvent::HeadersReceived(block)))
            }
            ResponseState::ReadyForDataOrTrailers => {
                if self.kind == StreamType::Push {
                    return Err("trailers not supported for push stream");
                }
                self.response_state = ResponseState::TrailersReceived;
                Ok(RecvHeaders::Deliver(StreamEvent::Trailers(block)))
            }
            ResponseState::TrailersReceived => Err("header block received after trailers"),
        }
    }

    /// Maps the status a stream is closed with to the one its delegate sees.
    pub fn close_status(&self, status: Result<(), Error>) -> Result<(), Error> {
        match status {
            Err(Error::RstStreamNoErrorReceived) => {
                if self.response_state == ResponseState::ReadyForHeaders {
                    Err(Error::Protocol)
                } else {
                    Ok(())
                }
            }
            other => other,
        }
    }

    pub fn record_bytes_received(&self, len: usize, now: Instant) {
        let mut stats = self.stats.borrow_mut();
        stats.raw_bytes_received += len as u64;
        if stats.first_byte_time.is_none() {
            stats.first_byte_time = Some(now);
        }
        stats.last_byte_time = Some(now);
    }

    pub fn record_bytes_sent(&self, len: usize) {
        self.stats.borrow_mut().raw_bytes_sent += len as u64;
    }
}
