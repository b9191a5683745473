use std::collections::VecDeque;
use std::fmt;

use super::store::Key;
use crate::frame::{self, Frame, HeaderBlock};
use crate::priority::{Priority, NUM_PRIORITIES};

/// Produces the bytes of one queued write when it reaches the socket.
pub(crate) enum Producer {
    /// A fully formed frame.
    Frame(Frame),
    /// Request headers of a stream that has no id yet; the id is assigned
    /// when this entry is dequeued.
    Headers { block: HeaderBlock, end_stream: bool },
}

pub(crate) struct PendingWrite {
    pub kind: frame::Kind,
    pub producer: Producer,
    pub stream: Option<Key>,
}

impl PendingWrite {
    /// DATA payload that was charged to the send windows.
    pub fn data_len(&self) -> usize {
        match self.producer {
            Producer::Frame(Frame::Data(ref data)) => data.len(),
            _ => 0,
        }
    }
}

/// Strict priority, FIFO within a priority.
pub(crate) struct WriteQueue {
    queues: [VecDeque<PendingWrite>; NUM_PRIORITIES],
    num_capped: usize,
}

impl WriteQueue {
    pub fn new() -> WriteQueue {
        WriteQueue {
            queues: Default::default(),
            num_capped: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    pub fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    /// Queued session control frames.
    pub fn num_queued_capped_frames(&self) -> usize {
        self.num_capped
    }

    pub fn enqueue(&mut self, priority: Priority, write: PendingWrite) {
        if write.kind.is_write_capped() {
            self.num_capped += 1;
        }
        self.queues[priority.index()].push_back(write);
    }

    pub fn dequeue(&mut self) -> Option<PendingWrite> {
        for priority in Priority::descending() {
            if let Some(write) = self.queues[priority.index()].pop_front() {
                if write.kind.is_write_capped() {
                    self.num_capped -= 1;
                }
                return Some(write);
            }
        }
        None
    }

    /// Removes every entry of `stream`, returning them in queue order.
    pub fn remove_for_stream(&mut self, stream: Key) -> Vec<PendingWrite> {
        self.remove_if(|write| write.stream == Some(stream))
    }

    pub fn remove_if<F>(&mut self, mut pred: F) -> Vec<PendingWrite>
    where
        F: FnMut(&PendingWrite) -> bool,
    {
        let mut removed = Vec::new();
        for queue in self.queues.iter_mut() {
            let mut kept = VecDeque::with_capacity(queue.len());
            for write in queue.drain(..) {
                if pred(&write) {
                    removed.push(write);
                } else {
                    kept.push_back(write);
                }
            }
            *queue = kept;
        }

        for write in &removed {
            if write.kind.is_write_capped() {
                self.num_capped -= 1;
            }
        }
        removed
    }

    pub fn clear(&mut self) -> Vec<PendingWrite> {
        self.remove_if(|_| true)
    }

    /// Moves the writes of `stream` to the back of the `new` bucket,
    /// keeping their relative order.
    pub fn change_priority_of_writes_for_stream(&mut self, stream: Key, old: Priority, new: Priority) {
        if old == new {
            return;
        }

        let queue = &mut self.queues[old.index()];
        let mut kept = VecDeque::with_capacity(queue.len());
        let mut moved = Vec::new();
        for write in queue.drain(..) {
            if write.stream == Some(stream) {
                moved.push(write);
            } else {
                kept.push_back(write);
            }
        }
        *queue = kept;
        self.queues[new.index()].extend(moved);
    }
}

impl fmt::Debug for WriteQueue {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("WriteQueue")
            .field("len", &self.len())
            .field("num_capped", &self.num_capped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Ping, Reset, StreamId, WindowUpdate};
    use crate::frame::Reason;

    fn ping(payload: u64) -> PendingWrite {
        PendingWrite {
            kind: frame::Kind::Ping,
            producer: Producer::Frame(Ping::new(payload).into()),
            stream: None,
        }
    }

    fn payload(write: &PendingWrite) -> u64 {
        match write.producer {
            Producer::Frame(Frame::Ping(ref ping)) => ping.payload(),
            _ => panic!("unexpected producer"),
        }
    }

    #[test]
    fn test_strict_priority_then_fifo() {
        let mut queue = WriteQueue::new();
        queue.enqueue(Priority::Low, ping(1));
        queue.enqueue(Priority::Highest, ping(2));
        queue.enqueue(Priority::Low, ping(3));
        queue.enqueue(Priority::Highest, ping(4));
        queue.enqueue(Priority::Idle, ping(5));

        let order: Vec<u64> = std::iter::from_fn(|| queue.dequeue())
            .map(|write| payload(&write))
            .collect();
        assert_eq!(order, vec![2, 4, 1, 3, 5]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_capped_frame_count() {
        let mut queue = WriteQueue::new();
        queue.enqueue(Priority::Highest, ping(1));
        queue.enqueue(
            Priority::Highest,
            PendingWrite {
                kind: frame::Kind::WindowUpdate,
                producer: Producer::Frame(WindowUpdate::new(StreamId::ZERO, 10).into()),
                stream: None,
            },
        );
        queue.enqueue(
            Priority::Medium,
            PendingWrite {
                kind: frame::Kind::Headers,
                producer: Producer::Headers {
                    block: HeaderBlock::default(),
                    end_stream: true,
                },
                stream: None,
            },
        );
        assert_eq!(queue.num_queued_capped_frames(), 2);

        queue.dequeue();
        assert_eq!(queue.num_queued_capped_frames(), 1);

        queue.clear();
        assert_eq!(queue.num_queued_capped_frames(), 0);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_remove_if_keeps_order_of_survivors() {
        let mut queue = WriteQueue::new();
        for n in 0..6 {
            queue.enqueue(Priority::Medium, ping(n));
        }
        queue.enqueue(
            Priority::Medium,
            PendingWrite {
                kind: frame::Kind::Reset,
                producer: Producer::Frame(Reset::new(StreamId::from(1), Reason::CANCEL).into()),
                stream: None,
            },
        );

        let removed = queue.remove_if(|write| match write.producer {
            Producer::Frame(Frame::Ping(ref ping)) => ping.payload() % 2 == 0,
            _ => false,
        });
        assert_eq!(removed.len(), 3);
        assert_eq!(queue.num_queued_capped_frames(), 4);

        let rest: Vec<frame::Kind> = std::iter::from_fn(|| queue.dequeue())
            .map(|write| write.kind)
            .collect();
        assert_eq!(
            rest,
            vec![
                frame::Kind::Ping,
                frame::Kind::Ping,
                frame::Kind::Ping,
                frame::Kind::Reset
            ]
        );
    }

    #[test]
    fn test_change_priority_moves_stream_writes() {
        use super::super::store::Store;
        use super::super::stream::{Stream, StreamType};
        use bytes::Bytes;
        use crate::frame::Data;

        let mut store = Store::new();
        let key = store.insert(|key| {
            Stream::new(
                key,
                StreamType::RequestResponse,
                url::Url::parse("https://www.example.org/").unwrap(),
                Priority::Low,
                65_535,
                65_535,
            )
        });
        let data = |n: u32| PendingWrite {
            kind: frame::Kind::Data,
            producer: Producer::Frame(Data::new(StreamId::from(1), Bytes::from(vec![0; n as usize])).into()),
            stream: Some(key),
        };

        let mut queue = WriteQueue::new();
        queue.enqueue(Priority::Low, data(1));
        queue.enqueue(Priority::Medium, ping(7));
        queue.enqueue(Priority::Low, data(2));

        queue.change_priority_of_writes_for_stream(key, Priority::Low, Priority::Highest);

        let lens: Vec<usize> = std::iter::from_fn(|| queue.dequeue())
            .map(|write| write.data_len())
            .collect();
        assert_eq!(lens, vec![1, 2, 0]);
    }
}
