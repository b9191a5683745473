use futures_util::task::LocalSpawn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::frame::{self, Settings};
use crate::pool::{HostCache, Observer};
use crate::time::{Timer, WallTimer};

pub const DEFAULT_SESSION_MAX_RECV_WINDOW_SIZE: u32 = 15 * 1024 * 1024;

pub const DEFAULT_STREAM_MAX_RECV_WINDOW_SIZE: u32 = 6 * 1024 * 1024;

pub const INITIAL_MAX_CONCURRENT_STREAMS: usize = 100;

pub const MAX_CONCURRENT_STREAM_LIMIT: usize = 256;

pub const DEFAULT_MAX_QUEUED_CAPPED_FRAMES: usize = 10_000;

/// Tunables of a single session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub initial_stream_send_window_size: u32,
    pub session_max_recv_window_size: u32,
    pub stream_max_recv_window_size: u32,
    pub initial_max_concurrent_streams: usize,
    pub max_concurrent_stream_limit: usize,

    /// Unacknowledged receive credit is flushed after this long even if
    /// it is below half the window.
    pub time_to_buffer_small_window_updates: Duration,

    /// Idle time after which the next request is preceded by a PING.
    pub connection_at_risk_of_loss_time: Duration,
    pub hung_interval: Duration,
    pub enable_ping_based_connection_checking: bool,

    pub yield_after_bytes_read: usize,
    pub yield_after_duration: Duration,

    pub max_queued_capped_frames: usize,

    #[serde(skip)]
    pub initial_settings: Settings,

    pub send_connection_preface: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let mut initial_settings = Settings::default();
        initial_settings.set_header_table_size(Some(frame::DEFAULT_SETTINGS_HEADER_TABLE_SIZE as u32));
        initial_settings.set_max_concurrent_streams(Some(1000));
        initial_settings.set_initial_window_size(Some(DEFAULT_STREAM_MAX_RECV_WINDOW_SIZE));
        initial_settings.set_enable_push(false);

        SessionConfig {
            initial_stream_send_window_size: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            session_max_recv_window_size: DEFAULT_SESSION_MAX_RECV_WINDOW_SIZE,
            stream_max_recv_window_size: DEFAULT_STREAM_MAX_RECV_WINDOW_SIZE,
            initial_max_concurrent_streams: INITIAL_MAX_CONCURRENT_STREAMS,
            max_concurrent_stream_limit: MAX_CONCURRENT_STREAM_LIMIT,
            time_to_buffer_small_window_updates: Duration::from_secs(5),
            connection_at_risk_of_loss_time: Duration::from_secs(10),
            hung_interval: Duration::from_secs(10),
            enable_ping_based_connection_checking: true,
            yield_after_bytes_read: 32 * 1024,
            yield_after_duration: Duration::from_millis(20),
            max_queued_capped_frames: DEFAULT_MAX_QUEUED_CAPPED_FRAMES,
            initial_settings,
            send_connection_preface: true,
        }
    }
}

/// Reports whether the default network link is up, so heartbeats can avoid
/// waking an idle radio.
pub trait LinkMonitor {
    fn is_default_network_active(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysActive;

impl LinkMonitor for AlwaysActive {
    fn is_default_network_active(&self) -> bool {
        true
    }
}

/// Everything a [`SessionPool`](crate::SessionPool) needs to create sessions.
#[derive(Clone)]
pub struct PoolConfig {
    pub session: SessionConfig,
    pub enable_ip_pooling: bool,
    /// On an IP address change, let sessions finish their streams instead of
    /// closing them.
    pub go_away_on_ip_change: bool,
    pub timer: Rc<dyn Timer>,
    pub spawner: Rc<dyn LocalSpawn>,
    pub host_cache: Option<Rc<dyn HostCache>>,
    pub observer: Option<Rc<dyn Observer>>,
    pub link_monitor: Rc<dyn LinkMonitor>,
}

impl PoolConfig {
    pub fn new(spawner: Rc<dyn LocalSpawn>) -> PoolConfig {
        PoolConfig {
            session: SessionConfig::default(),
            enable_ip_pooling: true,
            go_away_on_ip_change: true,
            timer: Rc::new(WallTimer),
            spawner,
            host_cache: None,
            observer: None,
            link_monitor: Rc::new(AlwaysActive),
        }
    }

    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn timer(mut self, timer: Rc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    pub fn host_cache(mut self, cache: Rc<dyn HostCache>) -> Self {
        self.host_cache = Some(cache);
        self
    }

    pub fn observer(mut self, observer: Rc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn link_monitor(mut self, monitor: Rc<dyn LinkMonitor>) -> Self {
        self.link_monitor = monitor;
        self
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("PoolConfig")
            .field("session", &self.session)
            .field("enable_ip_pooling", &self.enable_ip_pooling)
            .field("go_away_on_ip_change", &self.go_away_on_ip_change)
            .field("host_cache", &self.host_cache.is_some())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
