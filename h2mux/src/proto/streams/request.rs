use futures_util::future::poll_fn;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;
use url::Url;

use super::stream::StreamType;
use crate::pool::SocketTag;
use crate::priority::Priority;
use crate::proto::{SessionHandle, StreamHandle};
use crate::Error;

/// What kind of stream to open, and where.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub kind: StreamType,
    pub url: Url,
    pub priority: Priority,
    pub socket_tag: SocketTag,
    /// Keep probing the connection with PINGs while this stream lives.
    pub detect_broken_connection: bool,
    pub heartbeat_interval: Duration,
}

impl RequestOptions {
    pub fn new(kind: StreamType, url: Url) -> RequestOptions {
        RequestOptions {
            kind,
            url,
            priority: Priority::default(),
            socket_tag: SocketTag::default(),
            detect_broken_connection: false,
            heartbeat_interval: Duration::from_secs(10),
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn socket_tag(mut self, tag: SocketTag) -> Self {
        self.socket_tag = tag;
        self
    }

    pub fn detect_broken_connection(mut self, interval: Duration) -> Self {
        self.detect_broken_connection = true;
        self.heartbeat_interval = interval;
        self
    }
}

/// State shared between a queued request and the session holding it.
pub(crate) struct Pending {
    options: RefCell<RequestOptions>,
    result: RefCell<Option<Result<StreamHandle, Error>>>,
    waker: RefCell<Option<Waker>>,
}

impl Pending {
    fn new(options: RequestOptions) -> Pending {
        Pending {
            options: RefCell::new(options),
            result: RefCell::new(None),
            waker: RefCell::new(None),
        }
    }

    pub fn options(&self) -> RequestOptions {
        self.options.borrow().clone()
    }

    pub fn priority(&self) -> Priority {
        self.options.borrow().priority
    }

    pub fn complete(&self, result: Result<StreamHandle, Error>) {
        *self.result.borrow_mut() = Some(result);
        if let Some(waker) = self.waker.borrow_mut().take() {
            waker.wake();
        }
    }
}

/// A request for a new stream on a session.
///
/// When the session is at its concurrency limit the request waits in a
/// per-priority queue; poll it (or await [`StreamRequest::stream`]) for the
/// outcome. Dropping a waiting request withdraws it.
#[derive(Default)]
pub struct StreamRequest {
    session: Option<SessionHandle>,
    pending: Option<Rc<Pending>>,
}

impl StreamRequest {
    pub fn new() -> StreamRequest {
        StreamRequest::default()
    }

    /// `Ready` if a stream was created (or refused) right away.
    pub fn start_request(
        &mut self,
        session: &SessionHandle,
        options: RequestOptions,
    ) -> Poll<Result<StreamHandle, Error>> {
        debug_assert!(self.pending.is_none(), "request already started");
        self.cancel();

        let pending = Rc::new(Pending::new(options));
        match session.try_create_stream(&pending) {
            Ok(Some(stream)) => Poll::Ready(Ok(stream)),
            Ok(None) => {
                self.session = Some(session.clone());
                self.pending = Some(pending);
                Poll::Pending
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    pub fn poll_stream(&mut self, cx: &mut Context) -> Poll<Result<StreamHandle, Error>> {
        let pending = match self.pending {
            Some(ref pending) => pending,
            None => return Poll::Ready(Err(Error::Failed)),
        };

        let result = pending.result.borrow_mut().take();
        match result {
            Some(result) => {
                self.session = None;
                self.pending = None;
                Poll::Ready(result)
            }
            None => {
                *pending.waker.borrow_mut() = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    pub async fn stream(&mut self) -> Result<StreamHandle, Error> {
        poll_fn(|cx| self.poll_stream(cx)).await
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn priority(&self) -> Option<Priority> {
        self.pending.as_ref().map(|pending| pending.priority())
    }

    /// Moves a waiting request to the back of the queue for `priority`.
    pub fn set_priority(&mut self, priority: Priority) {
        let pending = match self.pending {
            Some(ref pending) => pending,
            None => return,
        };

        if pending.priority() == priority {
            return;
        }

        let granted = match *pending.result.borrow() {
            Some(Ok(ref stream)) => Some(stream.clone()),
            _ => None,
        };
        if let Some(stream) = granted {
            stream.set_priority(priority);
        } else if let Some(ref session) = self.session {
            session.change_stream_request_priority(pending, priority);
        }
        pending.options.borrow_mut().priority = priority;
    }

    pub fn cancel(&mut self) {
        let pending = match self.pending.take() {
            Some(pending) => pending,
            None => return,
        };

        if let Some(session) = self.session.take() {
            session.cancel_stream_request(&pending);
        }

        // a stream granted but never picked up would hold a slot forever
        let granted = pending.result.borrow_mut().take();
        if let Some(Ok(stream)) = granted {
            stream.cancel(Error::Aborted);
        }
    }
}

impl Drop for StreamRequest {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for StreamRequest {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("StreamRequest")
            .field("pending", &self.pending.is_some())
            .field("priority", &self.priority())
            .finish()
    }
}
