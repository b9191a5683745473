use slab::Slab;
use std::ops;

use super::stream::Stream;

/// Storage for the streams of one session.
///
/// A slot is reused once its stream is gone, so a `Key` also carries the
/// serial of the stream it was issued for. Stale keys resolve to nothing.
#[derive(Debug)]
pub(crate) struct Store {
    slab: Slab<Stream>,
    next_serial: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Key {
    index: usize,
    serial: u64,
}

impl Store {
    pub fn new() -> Self {
        Store {
            slab: Slab::new(),
            next_serial: 0,
        }
    }

    pub fn insert<F>(&mut self, f: F) -> Key
    where
        F: FnOnce(Key) -> Stream,
    {
        self.next_serial += 1;
        let entry = self.slab.vacant_entry();
        let key = Key {
            index: entry.key(),
            serial: self.next_serial,
        };
        entry.insert(f(key));
        key
    }

    pub fn get(&self, key: Key) -> Option<&Stream> {
        self.slab
            .get(key.index)
            .filter(|stream| stream.key == key)
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut Stream> {
        self.slab
            .get_mut(key.index)
            .filter(|stream| stream.key == key)
    }

    pub fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: Key) -> Option<Stream> {
        if self.contains(key) {
            Some(self.slab.remove(key.index))
        } else {
            None
        }
    }
}

impl ops::Index<Key> for Store {
    type Output = Stream;

    fn index(&self, key: Key) -> &Stream {
        match self.get(key) {
            Some(stream) => stream,
            None => panic!("dangling store key for stream serial={}", key.serial),
        }
    }
}

impl ops::IndexMut<Key> for Store {
    fn index_mut(&mut self, key: Key) -> &mut Stream {
        match self.get_mut(key) {
            Some(stream) => stream,
            None => panic!("dangling store key for stream serial={}", key.serial),
        }
    }
}
