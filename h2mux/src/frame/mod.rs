//! Logical HTTP/2 frames exchanged with the codec.
//!
//! Byte layout and header compression live behind [`crate::codec::FrameCodec`];
//! everything in here is the already-decoded form.

use std::fmt;

mod data;
mod go_away;
mod headers;
mod ping;
mod priority;
mod reason;
mod reset;
mod settings;
mod stream_id;
mod window_update;

pub use self::data::Data;
pub use self::go_away::GoAway;
pub use self::headers::{HeaderBlock, Headers, Pseudo, PushPromise};
pub use self::ping::Ping;
pub use self::priority::Priority;
pub use self::reason::Reason;
pub use self::reset::Reset;
pub use self::settings::Settings;
pub use self::stream_id::{StreamId, StreamIdOverflow};
pub use self::window_update::WindowUpdate;

pub use self::settings::{
    DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, DEFAULT_SETTINGS_HEADER_TABLE_SIZE,
    MAX_INITIAL_WINDOW_SIZE,
};

pub const HEADER_LEN: usize = 9;

/// Largest DATA payload queued per frame.
pub const MAX_FRAME_CHUNK_SIZE: usize = 16 * 1024 - HEADER_LEN;

#[derive(Clone, Eq, PartialEq)]
pub enum Frame {
    Data(Data),
    Headers(Headers),
    Priority(Priority),
    PushPromise(PushPromise),
    Settings(Settings),
    Ping(Ping),
    GoAway(GoAway),
    WindowUpdate(WindowUpdate),
    Reset(Reset),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Kind {
    Data,
    Headers,
    Priority,
    Reset,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
}

impl Kind {
    /// Session control frames count against the queued-frame cap.
    pub fn is_write_capped(&self) -> bool {
        match *self {
            Kind::Reset | Kind::Settings | Kind::WindowUpdate | Kind::Ping | Kind::GoAway => true,
            _ => false,
        }
    }
}

impl Frame {
    pub fn kind(&self) -> Kind {
        match *self {
            Frame::Data(_) => Kind::Data,
            Frame::Headers(_) => Kind::Headers,
            Frame::Priority(_) => Kind::Priority,
            Frame::PushPromise(_) => Kind::PushPromise,
            Frame::Settings(_) => Kind::Settings,
            Frame::Ping(_) => Kind::Ping,
            Frame::GoAway(_) => Kind::GoAway,
            Frame::WindowUpdate(_) => Kind::WindowUpdate,
            Frame::Reset(_) => Kind::Reset,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        match *self {
            Frame::Data(ref frame) => frame.stream_id(),
            Frame::Headers(ref frame) => frame.stream_id(),
            Frame::Priority(ref frame) => frame.stream_id(),
            Frame::PushPromise(ref frame) => frame.stream_id(),
            Frame::WindowUpdate(ref frame) => frame.stream_id(),
            Frame::Reset(ref frame) => frame.stream_id(),
            Frame::Settings(_) | Frame::Ping(_) | Frame::GoAway(_) => StreamId::ZERO,
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::Frame::*;

        match *self {
            Data(ref frame) => fmt::Debug::fmt(frame, fmt),
            Headers(ref frame) => fmt::Debug::fmt(frame, fmt),
            Priority(ref frame) => fmt::Debug::fmt(frame, fmt),
            PushPromise(ref frame) => fmt::Debug::fmt(frame, fmt),
            Settings(ref frame) => fmt::Debug::fmt(frame, fmt),
            Ping(ref frame) => fmt::Debug::fmt(frame, fmt),
            GoAway(ref frame) => fmt::Debug::fmt(frame, fmt),
            WindowUpdate(ref frame) => fmt::Debug::fmt(frame, fmt),
            Reset(ref frame) => fmt::Debug::fmt(frame, fmt),
        }
    }
}
