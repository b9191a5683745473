use crate::frame::{Frame, StreamId};
use crate::priority;

/// PRIORITY frame announcing a stream's new scheduling weight.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub struct Priority {
    stream_id: StreamId,
    priority: priority::Priority,
}

impl Priority {
    pub fn new(stream_id: StreamId, priority: priority::Priority) -> Self {
        Priority {
            stream_id,
            priority,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn priority(&self) -> priority::Priority {
        self.priority
    }
}

impl From<Priority> for Frame {
    fn from(src: Priority) -> Self {
        Frame::Priority(src)
    }
}
