use crate::frame::Frame;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Ping {
    ack: bool,
    payload: u64,
}

impl Ping {
    pub fn new(payload: u64) -> Ping {
        Ping {
            ack: false,
            payload,
        }
    }

    pub fn pong(payload: u64) -> Ping {
        Ping { ack: true, payload }
    }

    pub fn is_ack(&self) -> bool {
        self.ack
    }

    pub fn payload(&self) -> u64 {
        self.payload
    }
}

impl From<Ping> for Frame {
    fn from(src: Ping) -> Frame {
        Frame::Ping(src)
    }
}
