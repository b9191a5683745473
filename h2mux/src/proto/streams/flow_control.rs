use std::fmt;

use crate::proto::{WindowSize, MAX_WINDOW_SIZE};

/// Rejected window change. The window is left untouched.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WindowError {
    Overflow,
    Underflow,
}

/// A credit counter bounded by `MAX_WINDOW_SIZE`.
///
/// Increases and decreases never leave the window outside `[0, max]`; the
/// only way below zero is a SETTINGS change to the initial window size,
/// applied through `adjust`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlowControlWindow {
    size: i32,
}

impl FlowControlWindow {
    pub fn new(size: WindowSize) -> FlowControlWindow {
        debug_assert!(size <= MAX_WINDOW_SIZE);
        FlowControlWindow { size: size as i32 }
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    /// No credit left to send with.
    pub fn is_exhausted(&self) -> bool {
        self.size <= 0
    }

    /// Usable credit, zero while negative.
    pub fn available(&self) -> WindowSize {
        if self.size < 0 {
            0
        } else {
            self.size as WindowSize
        }
    }

    pub fn increase(&mut self, delta: WindowSize) -> Result<(), WindowError> {
        let val = self.size as i64 + delta as i64;
        if val > MAX_WINDOW_SIZE as i64 {
            return Err(WindowError::Overflow);
        }

        tracing::trace!(delta, old = self.size, new = val, "inc_window");
        self.size = val as i32;
        Ok(())
    }

    pub fn decrease(&mut self, delta: WindowSize) -> Result<(), WindowError> {
        if delta as i64 > self.size as i64 {
            return Err(WindowError::Underflow);
        }

        tracing::trace!(delta, old = self.size, "dec_window");
        self.size -= delta as i32;
        Ok(())
    }

    /// Applies a change of the peer's initial window size.
    pub fn adjust(&mut self, delta: i32) -> Result<(), WindowError> {
        let val = self.size as i64 + delta as i64;
        if val > MAX_WINDOW_SIZE as i64 {
            return Err(WindowError::Overflow);
        }
        if val < i32::MIN as i64 {
            return Err(WindowError::Underflow);
        }

        self.size = val as i32;
        Ok(())
    }
}

impl fmt::Display for FlowControlWindow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.size, f)
    }
}

/// Receive side bookkeeping: the advertised window plus credit consumed by
/// the application but not yet returned to the peer.
#[derive(Copy, Clone, Debug)]
pub(crate) struct RecvWindow {
    window: FlowControlWindow,
    unacked: WindowSize,
    max: WindowSize,
}

impl RecvWindow {
    pub fn new(max: WindowSize) -> RecvWindow {
        RecvWindow {
            window: FlowControlWindow::new(max),
            unacked: 0,
            max,
        }
    }

    /// Starts at the protocol default; the preface raises it to `max`.
    pub fn with_initial(initial: WindowSize, max: WindowSize) -> RecvWindow {
        RecvWindow {
            window: FlowControlWindow::new(initial),
            unacked: 0,
            max,
        }
    }

    pub fn size(&self) -> i32 {
        self.window.size()
    }

    pub fn unacked(&self) -> WindowSize {
        self.unacked
    }

    /// Bytes the peer may still send before violating flow control.
    pub fn receiving(&self) -> i64 {
        self.window.size() as i64 - self.unacked as i64
    }

    /// Charges newly arrived bytes.
    pub fn decrease(&mut self, delta: WindowSize) -> Result<(), WindowError> {
        if delta as i64 > self.receiving() {
            return Err(WindowError::Underflow);
        }
        self.window.decrease(delta)
    }

    /// Returns consumed bytes to the window. They stay unacknowledged until
    /// `take_unacked` hands them to a WINDOW_UPDATE.
    pub fn increase(&mut self, delta: WindowSize) -> Result<(), WindowError> {
        self.window.increase(delta)?;
        self.unacked += delta;
        Ok(())
    }

    /// Over half the window consumed and not yet announced.
    pub fn should_announce(&self) -> bool {
        self.unacked > self.max / 2
    }

    pub fn take_unacked(&mut self) -> WindowSize {
        std::mem::replace(&mut self.unacked, 0)
    }

    /// Grows the window to `max` without counting the growth as unacked
    /// credit. Returns the growth, to be announced by the caller.
    pub fn expand_to_max(&mut self) -> WindowSize {
        let delta = self.max as i64 - self.window.size() as i64;
        if delta <= 0 {
            return 0;
        }
        let delta = delta as WindowSize;
        let res = self.window.increase(delta);
        debug_assert!(res.is_ok());
        delta
    }
}
