//! Session pooling.
//!
//! The pool maps [`SessionKey`]s to live sessions, lets one session serve
//! several hosts that share an IP address and certificate, and tears
//! sessions down on network or TLS configuration changes.
//!
//! Sessions call back into the pool as they become unavailable or finish
//! closing. The pool never holds its own state borrowed while it calls
//! into a session, so those callbacks are always safe.

mod key;
mod observer;
mod resolver;

pub use self::key::{HostPortPair, PrivacyMode, ProxyChain, ProxyServer, SessionKey, SocketTag};
pub use self::observer::{Observer, SessionEvent};
pub use self::resolver::HostCache;

use fnv::FnvHashMap;
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use crate::codec::FrameCodec;
use crate::config::PoolConfig;
use crate::frame::StreamId;
use crate::proto::{self, SessionHandle, SessionId};
use crate::transport::{Transport, ALPN_H2};
use crate::Error;

/// Registry of the sessions created through it.
///
/// Dropping the pool aborts every session it still owns.
pub struct SessionPool {
    inner: Rc<PoolInner>,
}

pub(crate) struct PoolInner {
    config: PoolConfig,
    state: RefCell<State>,
}

#[derive(Default)]
struct State {
    /// Sessions handed out for a key, including IP pooled aliases.
    available: FnvHashMap<SessionKey, SessionHandle>,

    /// Peer address of direct sessions to the key they were created for.
    aliases: FnvHashMap<SocketAddr, Vec<SessionKey>>,

    /// Every session not yet closed, available or not.
    sessions: IndexMap<SessionId, SessionHandle>,

    /// Callers waiting for someone else's connection attempt, by key.
    pending: FnvHashMap<SessionKey, Vec<Rc<Waiter>>>,
}

/// Outcome of [`SessionPool::start_request`].
#[derive(Debug)]
pub enum StartRequest {
    /// Nobody else is connecting for this key; the caller should.
    Connect,
    /// Another caller is connecting. Resolves once the pool is told the
    /// attempt finished; look the session up again then.
    Wait(SessionWait),
}

/// Waits for [`SessionPool::resume_pending_requests`] on one key.
pub struct SessionWait {
    key: SessionKey,
    waiter: Rc<Waiter>,
    pool: Weak<PoolInner>,
}

#[derive(Default)]
struct Waiter {
    resumed: Cell<bool>,
    task: RefCell<Option<Waker>>,
}

impl SessionPool {
    pub fn new(config: PoolConfig) -> SessionPool {
        SessionPool {
            inner: Rc::new(PoolInner {
                config,
                state: RefCell::new(State::default()),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Finds a session that can serve `key` without connecting.
    ///
    /// An exact key match always wins. Otherwise, with IP pooling enabled,
    /// any direct session whose peer address the host cache lists for the
    /// key's host is reused, provided it is authenticated for that host.
    pub fn find_available_session(
        &self,
        key: &SessionKey,
        enable_ip_pooling: bool,
    ) -> Option<SessionHandle> {
        let enable_ip_pooling = enable_ip_pooling && self.inner.config.enable_ip_pooling;

        let found = self.inner.state.borrow().available.get(key).cloned();
        if let Some(session) = found {
            if session.key() == *key {
                tracing::trace!(%key, session.id = %session.id(), "found session");
                self.inner.observe(SessionEvent::SessionFound {
                    session: session.id(),
                    key: key.clone(),
                    via_alias: false,
                });
                return Some(session);
            }

            if enable_ip_pooling {
                tracing::trace!(%key, session.id = %session.id(), "found session through alias");
                self.inner.observe(SessionEvent::SessionFound {
                    session: session.id(),
                    key: key.clone(),
                    via_alias: true,
                });
                return Some(session);
            }

            // free the key so a dedicated session can be created for it
            tracing::debug!(%key, "dropping pooled alias");
            session.remove_pooled_alias(key);
            let mut state = self.inner.state.borrow_mut();
            state.unmap_key(key, &session);
            state.remove_aliases(key);
            return None;
        }

        if !enable_ip_pooling {
            return None;
        }
        self.find_matching_ip_session(key)
    }

    fn find_matching_ip_session(&self, key: &SessionKey) -> Option<SessionHandle> {
        let cache = self.inner.config.host_cache.as_ref()?;
        let addresses = cache.lookup(key.host_port_pair().host())?;
        let host = key.host_port_pair().host();

        for ip in addresses {
            let endpoint = SocketAddr::new(ip, key.host_port_pair().port());
            let candidates = match self.inner.state.borrow().aliases.get(&endpoint) {
                Some(keys) => keys.clone(),
                None => continue,
            };

            for alias_key in candidates {
                let session = self.inner.state.borrow().available.get(&alias_key).cloned();
                let session = match session {
                    Some(session) => session,
                    None => {
                        debug_assert!(false, "alias for unmapped key {}", alias_key);
                        continue;
                    }
                };

                if !key.compare_for_aliasing(&alias_key) {
                    continue;
                }

                if !session.verify_domain_authentication(host) {
                    tracing::trace!(%key, %alias_key, "pooling candidate not authenticated for host");
                    continue;
                }

                if alias_key.socket_tag() != key.socket_tag() {
                    let old_key = session.key();
                    let new_key = old_key.with_socket_tag(*key.socket_tag());
                    if self.inner.state.borrow().available.contains_key(&new_key) {
                        continue;
                    }
                    if !session.change_socket_tag(*key.socket_tag()) {
                        continue;
                    }

                    tracing::debug!(old = %old_key, new = %new_key, "re-tagged pooled session");
                    let pooled = session.pooled_aliases();
                    let retagged = self
                        .inner
                        .state
                        .borrow_mut()
                        .rekey(&old_key, &new_key, &session, &pooled);
                    for alias in &pooled {
                        session.remove_pooled_alias(alias);
                    }
                    for alias in retagged {
                        session.add_pooled_alias(alias);
                    }

                    if new_key == *key {
                        self.inner.observe(SessionEvent::SessionFound {
                            session: session.id(),
                            key: key.clone(),
                            via_alias: false,
                        });
                        return Some(session);
                    }
                }

                tracing::debug!(%key, %alias_key, session.id = %session.id(), "IP pooling hit");
                self.inner
                    .state
                    .borrow_mut()
                    .map_key(key.clone(), session.clone());
                session.add_pooled_alias(key.clone());
                self.inner.observe(SessionEvent::SessionFound {
                    session: session.id(),
                    key: key.clone(),
                    via_alias: true,
                });
                return Some(session);
            }
        }

        None
    }

    pub fn has_available_session(&self, key: &SessionKey) -> bool {
        self.inner.state.borrow().available.contains_key(key)
    }

    /// Sessions not yet closed, available or not.
    pub fn session_count(&self) -> usize {
        self.inner.state.borrow().sessions.len()
    }

    pub fn available_session_count(&self) -> usize {
        self.inner.state.borrow().available.len()
    }

    /// Starts a session over an established transport and makes it
    /// available under `key`.
    ///
    /// Callers waiting on `key` are resumed.
    pub fn create_session_from_handle(
        &self,
        key: SessionKey,
        transport: Box<dyn Transport>,
        codec: Box<dyn FrameCodec>,
    ) -> Result<SessionHandle, Error> {
        if let Some(protocol) = transport.negotiated_protocol() {
            if protocol != ALPN_H2 {
                tracing::debug!(%key, protocol = ?String::from_utf8_lossy(protocol), "refusing non-h2 transport");
                self.resume_pending_requests(&key);
                return Err(Error::Failed);
            }
        }

        let session = proto::spawn(
            key.clone(),
            transport,
            codec,
            &self.inner.config,
            Rc::downgrade(&self.inner),
        )?;
        let id = session.id();
        tracing::debug!(%key, session.id = %id, "created session");

        {
            let mut state = self.inner.state.borrow_mut();
            state.sessions.insert(id, session.clone());
            state.map_key(key.clone(), session.clone());

            // a proxied session reports the proxy's address
            if key.proxy_chain().is_direct() {
                if let Some(addr) = session.peer_addr() {
                    state.aliases.entry(addr).or_default().push(key.clone());
                }
            }
        }

        self.inner.observe(SessionEvent::SessionCreated {
            session: id,
            key: key.clone(),
        });
        self.resume_pending_requests(&key);
        Ok(session)
    }

    /// Registers interest in a session for `key`. Only the first caller
    /// is told to connect; the rest wait for it.
    pub fn start_request(&self, key: &SessionKey) -> StartRequest {
        let mut state = self.inner.state.borrow_mut();
        match state.pending.get_mut(key) {
            Some(waiters) => {
                let waiter = Rc::new(Waiter::default());
                waiters.push(waiter.clone());
                tracing::trace!(%key, waiting = waiters.len(), "waiting for session");
                StartRequest::Wait(SessionWait {
                    key: key.clone(),
                    waiter,
                    pool: Rc::downgrade(&self.inner),
                })
            }
            None => {
                state.pending.insert(key.clone(), Vec::new());
                StartRequest::Connect
            }
        }
    }

    /// Wakes everyone waiting on `key`, whether the connection attempt
    /// succeeded or not. The next `start_request` connects again.
    pub fn resume_pending_requests(&self, key: &SessionKey) {
        let waiters = self.inner.state.borrow_mut().pending.remove(key);
        let waiters = match waiters {
            Some(waiters) => waiters,
            None => return,
        };

        tracing::trace!(%key, waiters = waiters.len(), "resuming pending requests");
        for waiter in waiters {
            waiter.resumed.set(true);
            if let Some(task) = waiter.task.borrow_mut().take() {
                task.wake();
            }
        }
    }

    /// Takes `session` out of the lookup tables. Its streams keep running.
    pub fn make_session_unavailable(&self, session: &SessionHandle) {
        session.make_unavailable();
    }

    /// Closes every session with `error`.
    pub fn close_current_sessions(&self, error: Error) {
        self.close_current_sessions_helper(error, "closing current sessions", false);
    }

    /// Closes every session without streams.
    pub fn close_current_idle_sessions(&self, description: &str) {
        self.close_current_sessions_helper(Error::Aborted, description, true);
    }

    /// Closes every session, including those already going away.
    pub fn close_all_sessions(&self) {
        self.close_current_sessions_helper(Error::Aborted, "closing all sessions", false);
        loop {
            let before = self.available_session_count();
            if before == 0 {
                break;
            }
            self.close_current_sessions_helper(Error::Aborted, "closing all sessions", false);
            // sessions closed from inside one of their own callbacks leave
            // the tables only once that callback returns
            if self.available_session_count() >= before {
                tracing::debug!(available = before, "sessions still available after close");
                break;
            }
        }
    }

    fn close_current_sessions_helper(&self, error: Error, description: &str, idle_only: bool) {
        // closing a session calls back into the pool
        for session in self.current_sessions() {
            if idle_only && session.is_active() {
                continue;
            }
            session.close_session_on_error(error, description);
        }
    }

    /// Lets every session finish its streams, then close.
    pub fn make_current_sessions_going_away(&self, error: Error) {
        for session in self.current_sessions() {
            session.start_going_away(StreamId::MAX, error);
        }
    }

    /// Closes the first session without active streams. Returns whether one
    /// was found; its slot frees up only once it finishes closing.
    pub fn close_one_idle_connection(&self) -> bool {
        for session in self.current_sessions() {
            if session.num_active_streams() == 0 && !session.is_draining() {
                tracing::debug!(session.id = %session.id(), "closing idle session");
                session.close_one_idle_connection();
                return true;
            }
        }
        false
    }

    pub fn on_ip_address_changed(&self) {
        tracing::debug!(go_away = self.inner.config.go_away_on_ip_change, "IP address changed");
        if self.inner.config.go_away_on_ip_change {
            self.make_current_sessions_going_away(Error::NetworkChanged);
        } else {
            self.close_current_sessions(Error::NetworkChanged);
        }
    }

    pub fn on_ssl_config_changed(&self) {
        self.close_current_sessions(Error::NetworkChanged);
    }

    /// Retires sessions to any of `servers`, directly or through one of
    /// them as a proxy.
    pub fn on_ssl_config_for_servers_changed(&self, servers: &[HostPortPair]) {
        for session in self.current_sessions() {
            let key = session.key();
            let matches = servers.contains(key.host_port_pair())
                || key
                    .proxy_chain()
                    .proxies()
                    .iter()
                    .any(|proxy| servers.contains(proxy.host_port_pair()));

            if matches {
                tracing::debug!(%key, "SSL config changed for server");
                session.start_going_away(StreamId::MAX, Error::NetworkChanged);
            }
        }
    }

    pub fn on_cert_db_changed(&self) {
        self.close_current_sessions(Error::CertDatabaseChanged);
    }

    pub fn on_default_network_active(&self) {
        for session in self.current_sessions() {
            session.on_default_network_active();
        }
    }

    fn current_sessions(&self) -> Vec<SessionHandle> {
        self.inner.state.borrow().sessions.values().cloned().collect()
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        self.close_all_sessions();
    }
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let state = self.inner.state.borrow();
        fmt.debug_struct("SessionPool")
            .field("sessions", &state.sessions.len())
            .field("available", &state.available.len())
            .field("aliases", &state.aliases.len())
            .finish()
    }
}

impl PoolInner {
    fn observe(&self, event: SessionEvent) {
        if let Some(ref observer) = self.config.observer {
            observer.on_event(&event);
        }
    }

    /// Called by a session that stopped taking new streams.
    pub(crate) fn make_session_unavailable(&self, session: &SessionHandle) {
        let key = session.key();
        let aliases = session.pooled_aliases();
        tracing::debug!(%key, session.id = %session.id(), "session unavailable");

        let mut state = self.state.borrow_mut();
        state.unmap_key(&key, session);
        state.remove_aliases(&key);
        for alias in &aliases {
            state.unmap_key(alias, session);
            state.remove_aliases(alias);
        }
    }

    /// Called by a session whose transport is closed.
    pub(crate) fn remove_unavailable_session(&self, session: &SessionHandle) {
        let id = session.id();
        let mut state = self.state.borrow_mut();
        debug_assert!(
            !state.available.values().any(|available| available.ptr_eq(session)),
            "removing a session that is still available"
        );
        if state.sessions.shift_remove(&id).is_some() {
            tracing::debug!(session.id = %id, "session removed from pool");
        }
    }
}

impl State {
    fn map_key(&mut self, key: SessionKey, session: SessionHandle) {
        if let Some(previous) = self.available.insert(key, session) {
            tracing::debug!(session.id = %previous.id(), "replaced available session");
        }
    }

    /// Unmaps `key` only if it still points at `session`.
    fn unmap_key(&mut self, key: &SessionKey, session: &SessionHandle) {
        let mapped = self
            .available
            .get(key)
            .map(|available| available.ptr_eq(session))
            .unwrap_or(false);
        if mapped {
            self.available.remove(key);
        }
    }

    fn remove_aliases(&mut self, key: &SessionKey) {
        self.aliases.retain(|_, keys| {
            keys.retain(|alias| alias != key);
            !keys.is_empty()
        });
    }

    /// Moves `session` and its pooled aliases over to the socket tag of
    /// `new`. Returns the aliases that are still mapped afterwards; an
    /// alias whose re-tagged key already has a session is dropped.
    fn rekey(
        &mut self,
        old: &SessionKey,
        new: &SessionKey,
        session: &SessionHandle,
        pooled: &[SessionKey],
    ) -> Vec<SessionKey> {
        self.unmap_key(old, session);
        self.available.insert(new.clone(), session.clone());

        let mut retagged = Vec::with_capacity(pooled.len());
        for alias in pooled {
            self.unmap_key(alias, session);
            let alias = alias.with_socket_tag(*new.socket_tag());
            if self.available.contains_key(&alias) {
                continue;
            }
            self.available.insert(alias.clone(), session.clone());
            retagged.push(alias);
        }

        for keys in self.aliases.values_mut() {
            for alias in keys.iter_mut() {
                if alias == old {
                    *alias = new.clone();
                }
            }
        }
        retagged
    }
}

impl Future for SessionWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<()> {
        if self.waiter.resumed.get() {
            return Poll::Ready(());
        }
        *self.waiter.task.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl SessionWait {
    pub fn is_resumed(&self) -> bool {
        self.waiter.resumed.get()
    }
}

impl Drop for SessionWait {
    fn drop(&mut self) {
        if self.waiter.resumed.get() {
            return;
        }
        let pool = match self.pool.upgrade() {
            Some(pool) => pool,
            None => return,
        };
        let mut state = pool.state.borrow_mut();
        if let Some(waiters) = state.pending.get_mut(&self.key) {
            waiters.retain(|waiter| !Rc::ptr_eq(waiter, &self.waiter));
        }
    }
}

impl fmt::Debug for SessionWait {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("SessionWait")
            .field("key", &self.key)
            .field("resumed", &self.waiter.resumed.get())
            .finish()
    }
}
