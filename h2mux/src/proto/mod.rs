mod connection;
mod go_away;
mod ping_pong;
mod read;
mod session;
pub(crate) mod streams;
mod write;

pub use self::connection::Availability;
pub use self::session::{SessionHandle, SessionId};
pub use self::streams::{
    FlowControlWindow, RequestOptions, ResponseState, SendStatus, StreamHandle, StreamRequest,
    StreamState, StreamStats, StreamType, WindowError,
};

pub(crate) use self::session::spawn;

pub type WindowSize = u32;

pub const MAX_WINDOW_SIZE: WindowSize = (1 << 31) - 1;
