use std::fmt;
use std::future::Future;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use super::connection::Connection;
use crate::frame::Ping;
use crate::priority::Priority;
use crate::time::Sleep;
use crate::Error;

/// Liveness probing state.
pub(super) struct PingPong {
    next_ping_id: u64,
    in_flight: bool,
    last_ping_sent: Option<Instant>,
    check: Option<PingCheck>,
    last_rtt: Option<Duration>,
}

/// A scheduled look at whether the outstanding PING was answered.
struct PingCheck {
    sleep: Sleep,
    last_check: Instant,
}

/// Periodic probing requested by streams that want broken connections
/// detected early.
pub(super) struct Heartbeat {
    requests: usize,
    interval: Duration,
    sleep: Option<Sleep>,
    check_on_radio_wakeup: bool,
}

impl PingPong {
    pub(super) fn new() -> PingPong {
        PingPong {
            next_ping_id: 1,
            in_flight: false,
            last_ping_sent: None,
            check: None,
            last_rtt: None,
        }
    }

    pub(super) fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub(super) fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }
}

impl Heartbeat {
    pub(super) fn new() -> Heartbeat {
        Heartbeat {
            requests: 0,
            interval: Duration::from_secs(0),
            sleep: None,
            check_on_radio_wakeup: false,
        }
    }

    pub(super) fn is_running(&self) -> bool {
        self.sleep.is_some()
    }
}

impl Connection {
    pub(super) fn recv_ping(&mut self, ping: Ping) {
        if !ping.is_ack() {
            tracing::trace!(payload = ping.payload(), "answering PING");
            self.write_ping(ping.payload(), true);
            return;
        }

        if !self.ping_pong.in_flight {
            proto_err!(conn: "unexpected PING ack; payload={}", ping.payload());
            self.protocol_error(None, Error::Protocol);
            self.do_drain_session(Err(Error::Protocol), "unexpected PING ack");
            return;
        }

        self.ping_pong.in_flight = false;
        if let Some(sent) = self.ping_pong.last_ping_sent {
            let rtt = self.now().saturating_duration_since(sent);
            tracing::trace!(?rtt, "PING acked");
            self.ping_pong.last_rtt = Some(rtt);
        }
    }

    fn write_ping(&mut self, payload: u64, ack: bool) {
        let frame = if ack {
            Ping::pong(payload)
        } else {
            Ping::new(payload)
        };
        self.enqueue_session_write(Priority::Highest, frame.into());

        if ack {
            return;
        }

        self.ping_pong.in_flight = true;
        self.ping_pong.next_ping_id += 2;
        self.plan_to_check_ping_status();
        self.ping_pong.last_ping_sent = Some(self.now());
    }

    /// Probes an idle connection before trusting it with a new frame.
    pub(super) fn maybe_send_preface_ping(&mut self) {
        if !self.config.enable_ping_based_connection_checking
            || self.ping_pong.in_flight
            || self.ping_pong.check.is_some()
        {
            return;
        }

        let idle = self.now().saturating_duration_since(self.last_read_time);
        if idle > self.config.connection_at_risk_of_loss_time {
            tracing::debug!(?idle, "sending preface PING");
            self.write_ping(self.ping_pong.next_ping_id, false);
        }
    }

    fn plan_to_check_ping_status(&mut self) {
        if self.ping_pong.check.is_some() {
            return;
        }

        self.ping_pong.check = Some(PingCheck {
            sleep: self.timer.sleep(self.config.hung_interval),
            last_check: self.now(),
        });
    }

    fn check_ping_status(&mut self, last_check: Instant) {
        if !self.ping_pong.in_flight {
            return;
        }

        let now = self.now();
        let deadline = self.last_read_time + self.config.hung_interval;
        if now > deadline || self.last_read_time < last_check {
            tracing::debug!(last_read = ?self.last_read_time, "PING not answered in time");
            self.do_drain_session(Err(Error::PingFailed), "failed ping");
            return;
        }

        // something was read since; look again once the deadline passes
        let delay = deadline.saturating_duration_since(now);
        self.ping_pong.check = Some(PingCheck {
            sleep: self.timer.sleep(delay),
            last_check: now,
        });
    }

    pub(super) fn enable_broken_connection_detection(&mut self, interval: Duration) {
        self.heartbeat.requests += 1;
        if self.heartbeat.requests > 1 {
            return;
        }

        tracing::debug!(?interval, "starting heartbeat");
        self.heartbeat.interval = interval;
        self.heartbeat.sleep = Some(self.timer.sleep(interval));
        self.wake();
    }

    pub(super) fn maybe_disable_broken_connection_detection(&mut self) {
        debug_assert!(self.heartbeat.requests > 0);
        self.heartbeat.requests = self.heartbeat.requests.saturating_sub(1);
        if self.heartbeat.requests == 0 {
            tracing::debug!("stopping heartbeat");
            self.heartbeat.sleep = None;
            self.heartbeat.check_on_radio_wakeup = false;
        }
    }

    fn check_connection_status(&mut self) {
        if self.link_monitor.is_default_network_active() {
            self.maybe_send_preface_ping();
            self.heartbeat.sleep = Some(self.timer.sleep(self.heartbeat.interval));
        } else {
            tracing::trace!("link inactive, deferring heartbeat");
            self.heartbeat.check_on_radio_wakeup = true;
        }
    }

    pub(super) fn on_default_network_active(&mut self) {
        if !self.heartbeat.check_on_radio_wakeup {
            return;
        }

        self.heartbeat.check_on_radio_wakeup = false;
        self.check_connection_status();
    }

    /// Polls the ping check and heartbeat sleeps. Returns whether either
    /// fired.
    pub(super) fn poll_timers(&mut self, cx: &mut Context) -> bool {
        let mut fired = false;

        let check = match self.ping_pong.check {
            Some(ref mut check) => match check.sleep.as_mut().poll(cx) {
                Poll::Ready(()) => Some(check.last_check),
                Poll::Pending => None,
            },
            None => None,
        };
        if let Some(last_check) = check {
            self.ping_pong.check = None;
            self.check_ping_status(last_check);
            fired = true;
        }

        let beat = match self.heartbeat.sleep {
            Some(ref mut sleep) => sleep.as_mut().poll(cx).is_ready(),
            None => false,
        };
        if beat {
            self.heartbeat.sleep = None;
            self.check_connection_status();
            fired = true;
        }

        fired
    }
}

impl fmt::Debug for PingPong {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("PingPong")
            .field("next_ping_id", &self.next_ping_id)
            .field("in_flight", &self.in_flight)
            .field("check_pending", &self.check.is_some())
            .field("last_rtt", &self.last_rtt)
            .finish()
    }
}

impl fmt::Debug for Heartbeat {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Heartbeat")
            .field("requests", &self.requests)
            .field("interval", &self.interval)
            .field("running", &self.sleep.is_some())
            .finish()
    }
}
