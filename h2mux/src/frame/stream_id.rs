use std::fmt;
use std::u32;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct StreamId(u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct StreamIdOverflow;

const STREAM_ID_MASK: u32 = 1 << 31;

impl StreamId {
    pub const ZERO: StreamId = StreamId(0);

    pub const MAX: StreamId = StreamId(u32::MAX >> 1);

    /// First id a client may open a stream with.
    pub const FIRST_CLIENT: StreamId = StreamId(1);

    pub fn zero() -> StreamId {
        StreamId::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_client_initiated(&self) -> bool {
        let id = self.0;
        id != 0 && id % 2 == 1
    }

    pub fn is_server_initiated(&self) -> bool {
        let id = self.0;
        id != 0 && id % 2 == 0
    }

    pub fn next_id(&self) -> Result<StreamId, StreamIdOverflow> {
        let next = self.0 + 2;
        if next > StreamId::MAX.0 {
            Err(StreamIdOverflow)
        } else {
            Ok(StreamId(next))
        }
    }
}

impl From<u32> for StreamId {
    fn from(src: u32) -> Self {
        debug_assert_eq!(src & STREAM_ID_MASK, 0, "invalid stream ID -- MSB is set");
        StreamId(src & !STREAM_ID_MASK)
    }
}

impl From<StreamId> for u32 {
    fn from(src: StreamId) -> Self {
        src.0
    }
}

impl PartialEq<u32> for StreamId {
    fn eq(&self, other: &u32) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ids_are_odd() {
        assert!(StreamId::FIRST_CLIENT.is_client_initiated());
        assert!(StreamId::from(2).is_server_initiated());
        assert!(!StreamId::ZERO.is_client_initiated());
        assert!(!StreamId::ZERO.is_server_initiated());
    }

    #[test]
    fn test_next_id_overflow() {
        assert_eq!(StreamId::from(1).next_id(), Ok(StreamId::from(3)));
        assert_eq!(StreamId::MAX.next_id(), Err(StreamIdOverflow));
        assert_eq!(StreamId::from(StreamId::MAX.0 - 2).next_id(), Ok(StreamId::MAX));
    }
}
