use http::{uri, HeaderMap, Method, StatusCode, Uri};
use std::fmt;

use crate::frame::{Frame, StreamId};
use crate::priority::Priority;

/// A decoded (or not yet encoded) HEADERS frame.
///
/// Header compression belongs to the codec, so the block is kept as plain
/// pseudo headers plus a field map.
#[derive(Clone, Eq, PartialEq)]
pub struct Headers {
    stream_id: StreamId,

    priority: Option<Priority>,

    block: HeaderBlock,

    end_stream: bool,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct HeaderBlock {
    pub pseudo: Pseudo,

    pub fields: HeaderMap,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Pseudo {
    pub method: Option<Method>,
    pub scheme: Option<String>,
    pub authority: Option<String>,
    pub path: Option<String>,

    pub status: Option<StatusCode>,
}

#[derive(Clone, Eq, PartialEq)]
pub struct PushPromise {
    stream_id: StreamId,

    promised_id: StreamId,

    block: HeaderBlock,
}

impl Headers {
    pub fn new(stream_id: StreamId, block: HeaderBlock) -> Self {
        Headers {
            stream_id,
            priority: None,
            block,
            end_stream: false,
        }
    }

    pub fn trailers(stream_id: StreamId, fields: HeaderMap) -> Self {
        Headers {
            stream_id,
            priority: None,
            block: HeaderBlock::trailers(fields),
            end_stream: true,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = Some(priority);
    }

    pub fn is_end_stream(&self) -> bool {
        self.end_stream
    }

    pub fn set_end_stream(&mut self) {
        self.end_stream = true;
    }

    pub fn block(&self) -> &HeaderBlock {
        &self.block
    }

    pub fn into_block(self) -> HeaderBlock {
        self.block
    }
}

impl From<Headers> for Frame {
    fn from(src: Headers) -> Self {
        Frame::Headers(src)
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("Headers");
        builder
            .field("stream_id", &self.stream_id)
            .field("end_stream", &self.end_stream);

        if let Some(ref priority) = self.priority {
            builder.field("priority", priority);
        }

        if let Some(status) = self.block.pseudo.status {
            builder.field("status", &status);
        }

        builder.finish()
    }
}

impl HeaderBlock {
    pub fn new(pseudo: Pseudo, fields: HeaderMap) -> Self {
        HeaderBlock { pseudo, fields }
    }

    pub fn request(method: Method, uri: Uri) -> Self {
        HeaderBlock::new(Pseudo::request(method, uri), HeaderMap::new())
    }

    pub fn response(status: StatusCode) -> Self {
        HeaderBlock::new(Pseudo::response(status), HeaderMap::new())
    }

    pub fn trailers(fields: HeaderMap) -> Self {
        HeaderBlock::new(Pseudo::default(), fields)
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.pseudo.status
    }

    /// `1xx` blocks precede the final response headers and may repeat.
    pub fn is_informational(&self) -> bool {
        self.pseudo
            .status
            .map(|status| status.is_informational())
            .unwrap_or(false)
    }
}

impl Pseudo {
    pub fn request(method: Method, uri: Uri) -> Self {
        let parts = uri::Parts::from(uri);

        let mut path = parts
            .path_and_query
            .map(|v| v.as_str().to_owned())
            .unwrap_or_default();

        if path.is_empty() && method != Method::OPTIONS {
            path = "/".to_owned();
        }

        Pseudo {
            method: Some(method),
            scheme: parts.scheme.map(|s| s.as_str().to_owned()),
            authority: parts.authority.map(|a| a.as_str().to_owned()),
            path: Some(path),
            status: None,
        }
    }

    pub fn response(status: StatusCode) -> Self {
        Pseudo {
            method: None,
            scheme: None,
            authority: None,
            path: None,
            status: Some(status),
        }
    }
}

impl PushPromise {
    pub fn new(stream_id: StreamId, promised_id: StreamId, block: HeaderBlock) -> Self {
        PushPromise {
            stream_id,
            promised_id,
            block,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn promised_id(&self) -> StreamId {
        self.promised_id
    }

    pub fn block(&self) -> &HeaderBlock {
        &self.block
    }
}

impl From<PushPromise> for Frame {
    fn from(src: PushPromise) -> Self {
        Frame::PushPromise(src)
    }
}

impl fmt::Debug for PushPromise {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PushPromise")
            .field("stream_id", &self.stream_id)
            .field("promised_id", &self.promised_id)
            .finish()
    }
}
