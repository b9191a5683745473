//! Clock and sleep source for liveness checks and flow-control timing.

use futures_timer::Delay;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

pub type Sleep = Pin<Box<dyn Future<Output = ()>>>;

/// A session never reads the system clock directly; it asks its `Timer`.
pub trait Timer {
    fn now(&self) -> Instant;

    /// Resolves once `duration` has elapsed on this timer's clock.
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// Wall clock timer backed by `futures_timer::Delay`. Dropping a sleep
/// cancels it.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallTimer;

impl Timer for WallTimer {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(Delay::new(duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_timer_sleep_completes() {
        let timer = WallTimer;
        let start = timer.now();
        futures::executor::block_on(timer.sleep(Duration::from_millis(5)));
        assert!(timer.now() - start >= Duration::from_millis(5));
    }
}
