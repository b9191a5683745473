//! The connected byte stream a session runs over.

use futures_util::io::{AsyncRead, AsyncWrite};
use std::io;
use std::net::SocketAddr;

use crate::pool::SocketTag;

/// ALPN token a session expects.
pub const ALPN_H2: &[u8] = b"h2";

/// An established, already-negotiated connection.
///
/// TLS, proxy tunnels and socket setup happen before a transport reaches
/// the pool; the session only needs bytes plus a few facts about the peer.
pub trait Transport: AsyncRead + AsyncWrite + Unpin {
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Protocol chosen by ALPN, if any.
    fn negotiated_protocol(&self) -> Option<&[u8]> {
        None
    }

    /// Certificate facts for secure transports, `None` for cleartext.
    fn identity(&self) -> Option<&dyn PeerIdentity> {
        None
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn apply_socket_tag(&mut self, _tag: &SocketTag) {}
}

pub trait PeerIdentity {
    /// Whether the peer's certificate is valid for `host`.
    fn verify_domain(&self, host: &str) -> bool;

    fn client_cert_sent(&self) -> bool {
        false
    }

    fn has_cert_errors(&self) -> bool {
        false
    }
}

/// Whether a connection authenticated for `old_host` may also carry
/// requests for `new_host`.
pub(crate) fn can_pool(identity: &dyn PeerIdentity, old_host: &str, new_host: &str) -> bool {
    if old_host == new_host {
        return true;
    }

    if identity.has_cert_errors() || identity.client_cert_sent() {
        return false;
    }

    identity.verify_domain(new_host)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Cert {
        names: Vec<&'static str>,
        client_cert: bool,
    }

    impl PeerIdentity for Cert {
        fn verify_domain(&self, host: &str) -> bool {
            self.names.iter().any(|name| *name == host)
        }

        fn client_cert_sent(&self) -> bool {
            self.client_cert
        }
    }

    #[test]
    fn test_can_pool() {
        let cert = Cert {
            names: vec!["www.example.org", "mail.example.org"],
            client_cert: false,
        };
        assert!(can_pool(&cert, "www.example.org", "mail.example.org"));
        assert!(!can_pool(&cert, "www.example.org", "mail.example.com"));
        assert!(can_pool(&cert, "other", "other"));
    }

    #[test]
    fn test_client_cert_prevents_pooling() {
        let cert = Cert {
            names: vec!["www.example.org", "mail.example.org"],
            client_cert: true,
        };
        assert!(!can_pool(&cert, "www.example.org", "mail.example.org"));
    }
}
