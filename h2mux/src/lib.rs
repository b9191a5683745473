//! An HTTP/2 session layer.
//!
//! A [`SessionPool`] hands out [`SessionHandle`]s, each multiplexing many
//! streams over one [`Transport`]. Streams are opened with a
//! [`StreamRequest`], driven through a [`StreamHandle`] and report back to
//! a [`Delegate`].
//!
//! Frame byte layout and header compression are left to a
//! [`FrameCodec`](codec::FrameCodec) supplied with each transport. Sessions
//! are `!Send`: every session runs as a task on the local spawner given in
//! [`PoolConfig`].

macro_rules! proto_err {
    (conn: $($msg:tt)+) => {
        tracing::debug!("connection error PROTOCOL_ERROR -- {};", format_args!($($msg)+))
    };
    (stream: $($msg:tt)+) => {
        tracing::debug!("stream error PROTOCOL_ERROR -- {};", format_args!($($msg)+))
    };
}

macro_rules! ready {
    ($e:expr) => {
        match $e {
            ::std::task::Poll::Ready(r) => r,
            ::std::task::Poll::Pending => return ::std::task::Poll::Pending,
        }
    };
}

pub mod codec;
pub mod config;
mod delegate;
mod error;
pub mod frame;
pub mod pool;
mod priority;
mod proto;
pub mod time;
pub mod transport;

pub use crate::config::{PoolConfig, SessionConfig};
pub use crate::delegate::Delegate;
pub use crate::error::Error;
pub use crate::frame::{HeaderBlock, Reason, StreamId};
pub use crate::pool::{SessionKey, SessionPool};
pub use crate::priority::Priority;
pub use crate::proto::{
    Availability, FlowControlWindow, RequestOptions, ResponseState, SendStatus, SessionHandle,
    SessionId, StreamHandle, StreamRequest, StreamState, StreamStats, StreamType, WindowError,
    WindowSize, MAX_WINDOW_SIZE,
};
pub use crate::transport::Transport;
