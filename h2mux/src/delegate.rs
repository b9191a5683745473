use bytes::Bytes;

use crate::frame::HeaderBlock;
use crate::proto::StreamHandle;
use crate::Error;

/// Receives the events of one stream.
///
/// Calls arrive in the order `on_headers_sent`, `on_headers_received`,
/// `on_data_received`*, `on_trailers`, then exactly one `on_close`; a stream
/// that fails early skips straight to `on_close`. Any method may call back
/// into the stream or its session, including closing the stream.
pub trait Delegate {
    fn on_headers_sent(&mut self, _stream: &StreamHandle) {}

    fn on_headers_received(&mut self, stream: &StreamHandle, headers: &HeaderBlock);

    /// `None` marks the end of the response body.
    fn on_data_received(&mut self, stream: &StreamHandle, data: Option<Bytes>);

    fn on_data_sent(&mut self, _stream: &StreamHandle) {}

    fn on_trailers(&mut self, _stream: &StreamHandle, _trailers: &HeaderBlock) {}

    fn on_close(&mut self, stream: &StreamHandle, status: Result<(), Error>);
}
