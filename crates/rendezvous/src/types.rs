//! Identity and addressing types shared by every stage.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// How a stream to the peer is obtained. Selects the connector and the
/// timeout applied to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Direct connect to the peer's internal (LAN) address.
    Lan,
    /// Direct connect to the peer's external address.
    Internet,
    /// Wait for the peer to connect to us.
    Incoming,
    /// Relay through a rendezvous proxy.
    Proxy,
}

/// Which side sent the original rendezvous invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiator {
    Me,
    Buddy,
}

/// Candidate addresses learned from the signaling exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub internal_ip: Option<IpAddr>,
    pub external_ip: Option<IpAddr>,
    pub proxy_ip: Option<IpAddr>,
    pub port: Option<u16>,
    pub proxied: bool,
}

impl ConnectionInfo {
    /// Address a connector of type `ct` should dial, if the info carries one.
    pub fn address_for(&self, ct: ConnectionType) -> Option<SocketAddr> {
        let ip = match ct {
            ConnectionType::Lan => self.internal_ip,
            ConnectionType::Internet => self.external_ip,
            ConnectionType::Proxy => self.proxy_ip,
            ConnectionType::Incoming => None,
        }?;
        Some(SocketAddr::new(ip, self.port?))
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn info() -> ConnectionInfo {
        ConnectionInfo {
            internal_ip: Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5))),
            external_ip: Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7))),
            proxy_ip: None,
            port: Some(4443),
            proxied: false,
        }
    }

    #[test]
    fn picks_address_by_type() {
        let info = info();
        assert_eq!(
            info.address_for(ConnectionType::Lan),
            Some("192.168.1.5:4443".parse().unwrap())
        );
        assert_eq!(
            info.address_for(ConnectionType::Internet),
            Some("203.0.113.7:4443".parse().unwrap())
        );
        assert_eq!(info.address_for(ConnectionType::Proxy), None);
        assert_eq!(info.address_for(ConnectionType::Incoming), None);
    }

    #[test]
    fn no_port_no_address() {
        let mut info = info();
        info.port = None;
        assert_eq!(info.address_for(ConnectionType::Lan), None);
    }
}
