use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// A destination host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostPortPair {
    host: String,
    port: u16,
}

impl HostPortPair {
    pub fn new(host: impl Into<String>, port: u16) -> HostPortPair {
        HostPortPair {
            host: host.into(),
            port,
        }
    }

    /// Host and port of `url`, using the scheme's default port if none is
    /// given.
    pub fn from_url(url: &Url) -> Option<HostPortPair> {
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(HostPortPair::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for HostPortPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProxyServer {
    Http(HostPortPair),
    Https(HostPortPair),
    Socks5(HostPortPair),
}

impl ProxyServer {
    pub fn host_port_pair(&self) -> &HostPortPair {
        match *self {
            ProxyServer::Http(ref hp) | ProxyServer::Https(ref hp) | ProxyServer::Socks5(ref hp) => hp,
        }
    }
}

impl fmt::Display for ProxyServer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ProxyServer::Http(ref hp) => write!(f, "http://{}", hp),
            ProxyServer::Https(ref hp) => write!(f, "https://{}", hp),
            ProxyServer::Socks5(ref hp) => write!(f, "socks5://{}", hp),
        }
    }
}

/// The proxies a connection is tunnelled through, in order. Empty means
/// direct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyChain {
    proxies: Vec<ProxyServer>,
}

impl ProxyChain {
    pub fn direct() -> ProxyChain {
        ProxyChain::default()
    }

    pub fn new(proxies: Vec<ProxyServer>) -> ProxyChain {
        ProxyChain { proxies }
    }

    pub fn is_direct(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn proxies(&self) -> &[ProxyServer] {
        &self.proxies
    }
}

impl fmt::Display for ProxyChain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_direct() {
            return f.write_str("direct://");
        }
        for (i, proxy) in self.proxies.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", proxy)?;
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrivacyMode {
    Disabled,
    Enabled,
}

impl Default for PrivacyMode {
    fn default() -> PrivacyMode {
        PrivacyMode::Disabled
    }
}

/// Accounting tag applied to a connection's socket. Sessions only pool
/// with requests carrying the same tag.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocketTag {
    uid: Option<u32>,
    traffic_stats_tag: Option<u32>,
}

impl SocketTag {
    pub fn new(uid: u32, traffic_stats_tag: u32) -> SocketTag {
        SocketTag {
            uid: Some(uid),
            traffic_stats_tag: Some(traffic_stats_tag),
        }
    }

    pub fn is_untagged(&self) -> bool {
        self.uid.is_none() && self.traffic_stats_tag.is_none()
    }
}

/// What a session is pooled under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    host_port_pair: HostPortPair,
    proxy_chain: ProxyChain,
    privacy_mode: PrivacyMode,
    socket_tag: SocketTag,
}

impl SessionKey {
    pub fn new(
        host_port_pair: HostPortPair,
        proxy_chain: ProxyChain,
        privacy_mode: PrivacyMode,
        socket_tag: SocketTag,
    ) -> SessionKey {
        SessionKey {
            host_port_pair,
            proxy_chain,
            privacy_mode,
            socket_tag,
        }
    }

    /// Direct, non-private, untagged.
    pub fn direct(host_port_pair: HostPortPair) -> SessionKey {
        SessionKey::new(
            host_port_pair,
            ProxyChain::direct(),
            PrivacyMode::Disabled,
            SocketTag::default(),
        )
    }

    pub fn host_port_pair(&self) -> &HostPortPair {
        &self.host_port_pair
    }

    pub fn proxy_chain(&self) -> &ProxyChain {
        &self.proxy_chain
    }

    pub fn privacy_mode(&self) -> PrivacyMode {
        self.privacy_mode
    }

    pub fn socket_tag(&self) -> &SocketTag {
        &self.socket_tag
    }

    /// Whether a session for `other` could serve this key, host and socket
    /// tag aside.
    pub fn compare_for_aliasing(&self, other: &SessionKey) -> bool {
        self.proxy_chain == other.proxy_chain && self.privacy_mode == other.privacy_mode
    }

    pub fn with_socket_tag(&self, socket_tag: SocketTag) -> SessionKey {
        SessionKey {
            socket_tag,
            ..self.clone()
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.host_port_pair)?;
        if !self.proxy_chain.is_direct() {
            write!(f, " via {}", self.proxy_chain)?;
        }
        if self.privacy_mode == PrivacyMode::Enabled {
            f.write_str(" [private]")?;
        }
        Ok(())
    }
}
