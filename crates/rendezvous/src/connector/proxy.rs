use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, PoisonError};

use oscar_protocol::{CAP_FILE_TRANSFER, ProxyPacket};
use tracing::{debug, info, warn};

use super::{Connector, open_tcp};
use crate::connection::RvConnection;
use crate::error::RendezvousError;
use crate::events::RvEvent;
use crate::stream::StreamInfo;
use crate::types::{ConnectionInfo, ConnectionType};

/// Which side of a proxied session this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    /// Open a new session on the configured relay and advertise the
    /// relay-assigned address to the peer.
    Initiate,
    /// Join a session the peer opened; the relay address and port come from
    /// the connection info.
    Accept,
}

/// Meets the peer on a rendezvous proxy relay.
#[derive(Debug)]
pub struct ProxyConnector {
    mode: ProxyMode,
    resolved: Mutex<Option<SocketAddr>>,
}

impl ProxyConnector {
    pub fn new(mode: ProxyMode) -> Self {
        Self {
            mode,
            resolved: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> ProxyMode {
        self.mode
    }

    /// Relay address found while preparing. `None` when a SOCKS proxy
    /// resolves the relay name instead.
    fn resolved(&self) -> Option<SocketAddr> {
        *self.resolved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn host(&self, conn: &RvConnection) -> Option<String> {
        match self.mode {
            ProxyMode::Initiate => Some(conn.settings().proxy_host.clone()),
            ProxyMode::Accept => conn.connection_info().proxy_ip.map(|ip| ip.to_string()),
        }
    }

    fn init_packet(&self, conn: &RvConnection) -> Result<ProxyPacket, RendezvousError> {
        Ok(match self.mode {
            ProxyMode::Initiate => ProxyPacket::InitSend {
                screen_name: conn.screen_name().to_owned(),
                cookie: conn.cookie(),
                capability: CAP_FILE_TRANSFER,
            },
            ProxyMode::Accept => ProxyPacket::InitRecv {
                screen_name: conn.screen_name().to_owned(),
                port: conn.connection_info().port.ok_or(RendezvousError::MissingPort)?,
                cookie: conn.cookie(),
                capability: CAP_FILE_TRANSFER,
            },
        })
    }
}

impl Connector for ProxyConnector {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Proxy
    }

    fn check_connection_info(&self, conn: &RvConnection) -> Result<(), RendezvousError> {
        if self.mode == ProxyMode::Initiate {
            return Ok(());
        }
        let info = conn.connection_info();
        if info.proxy_ip.is_none() {
            return Err(RendezvousError::MissingAddress(ConnectionType::Proxy));
        }
        if info.port.is_none() {
            return Err(RendezvousError::MissingPort);
        }
        Ok(())
    }

    fn target_host(&self, conn: &RvConnection) -> String {
        self.host(conn).unwrap_or_default()
    }

    async fn prepare_stream(&self, conn: &RvConnection) -> Result<(), RendezvousError> {
        let port = conn.settings().proxy_port;
        let addr = match self.mode {
            ProxyMode::Accept => {
                let ip = conn
                    .connection_info()
                    .proxy_ip
                    .ok_or(RendezvousError::MissingAddress(ConnectionType::Proxy))?;
                Some(SocketAddr::new(ip, port))
            }
            // The SOCKS proxy resolves the relay name itself.
            ProxyMode::Initiate if conn.settings().socks_proxy.is_some() => None,
            ProxyMode::Initiate => {
                let host = conn.settings().proxy_host.clone();
                let addr = tokio::net::lookup_host((host.as_str(), port))
                    .await?
                    .next()
                    .ok_or_else(|| RendezvousError::Unresolved(host.clone()))?;
                debug!(%host, %addr, "proxy relay resolved");
                Some(addr)
            }
        };
        *self.resolved.lock().unwrap_or_else(PoisonError::into_inner) = addr;
        Ok(())
    }

    fn endpoint(&self, conn: &RvConnection) -> (String, u16) {
        match self.resolved() {
            Some(addr) => (addr.ip().to_string(), addr.port()),
            None => (
                self.host(conn).unwrap_or_default(),
                conn.settings().proxy_port,
            ),
        }
    }

    async fn create_stream(&self, conn: &RvConnection) -> Result<StreamInfo, RendezvousError> {
        let (host, port) = match self.resolved() {
            Some(addr) => (addr.ip().to_string(), addr.port()),
            None => (
                self.host(conn)
                    .ok_or(RendezvousError::MissingAddress(ConnectionType::Proxy))?,
                conn.settings().proxy_port,
            ),
        };
        let mut stream = open_tcp(conn.settings(), &host, port).await?;

        let init = self.init_packet(conn)?;
        debug!(mode = ?self.mode, cookie = %conn.cookie(), "sending proxy init");
        init.write_to(&mut stream).await?;

        loop {
            match ProxyPacket::read_from(&mut stream).await? {
                ProxyPacket::Ack { port, ip } => {
                    let ip = IpAddr::V4(ip);
                    info!(%ip, port, "proxy acknowledged session");
                    if self.mode == ProxyMode::Initiate {
                        conn.mark_redirected();
                        conn.set_connection_info(ConnectionInfo {
                            proxy_ip: Some(ip),
                            port: Some(port),
                            proxied: true,
                            ..conn.connection_info()
                        });
                    }
                    conn.post(RvEvent::ProxyAcknowledged { ip, port });
                }
                ProxyPacket::Ready => {
                    info!(%host, "proxy session ready");
                    return Ok(StreamInfo::new(stream)?);
                }
                ProxyPacket::Error(code) => {
                    warn!(%code, "proxy refused session");
                    return Err(RendezvousError::Proxy(code));
                }
                ProxyPacket::InitSend { .. } => {
                    return Err(RendezvousError::UnexpectedProxyPacket("INIT_SEND"));
                }
                ProxyPacket::InitRecv { .. } => {
                    return Err(RendezvousError::UnexpectedProxyPacket("INIT_RECV"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    use oscar_protocol::{IcbmCookie, ProxyErrorCode};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::events::EventPost;
    use crate::settings::{Settings, SocksProxy};
    use crate::types::Initiator;

    const COOKIE: IcbmCookie = IcbmCookie::new([7, 6, 5, 4, 3, 2, 1, 0]);

    /// Relay stand-in: reads the init packet, then replies with `script`.
    async fn fake_relay(script: Vec<ProxyPacket>) -> (u16, tokio::task::JoinHandle<ProxyPacket>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let (mut sock, _): (TcpStream, _) = listener.accept().await.unwrap();
            let init = ProxyPacket::read_from(&mut sock).await.unwrap();
            for packet in script {
                packet.write_to(&mut sock).await.unwrap();
            }
            init
        });
        (port, task)
    }

    fn conn(port: u16, events: EventPost) -> RvConnection {
        let settings = Settings {
            proxy_host: "127.0.0.1".into(),
            proxy_port: port,
            ..Settings::default()
        };
        RvConnection::new("alice", "bob", COOKIE, Initiator::Me, Arc::new(settings), events)
    }

    #[tokio::test]
    async fn initiate_posts_ack_then_ready() {
        let (port, relay) = fake_relay(vec![
            ProxyPacket::Ack {
                port: 4321,
                ip: Ipv4Addr::new(64, 12, 1, 2),
            },
            ProxyPacket::Ready,
        ])
        .await;
        let (events, mut rx) = EventPost::channel();
        let conn = conn(port, events);

        let connector = ProxyConnector::new(ProxyMode::Initiate);
        connector.check_connection_info(&conn).unwrap();
        connector.prepare_stream(&conn).await.unwrap();
        assert_eq!(connector.resolved().unwrap().port(), port);
        connector.create_stream(&conn).await.unwrap();

        let init = relay.await.unwrap();
        assert_eq!(
            init,
            ProxyPacket::InitSend {
                screen_name: "alice".into(),
                cookie: COOKIE,
                capability: CAP_FILE_TRANSFER,
            }
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            RvEvent::ProxyAcknowledged { port: 4321, .. }
        ));
        assert!(conn.is_redirected());
        let info = conn.connection_info();
        assert_eq!(info.proxy_ip, Some(IpAddr::V4(Ipv4Addr::new(64, 12, 1, 2))));
        assert_eq!(info.port, Some(4321));
        assert!(info.proxied);
    }

    #[tokio::test]
    async fn accept_sends_init_recv_with_port() {
        let (port, relay) = fake_relay(vec![ProxyPacket::Ready]).await;
        let conn = conn(port, EventPost::discard());
        conn.set_connection_info(ConnectionInfo {
            proxy_ip: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            port: Some(4321),
            proxied: true,
            ..Default::default()
        });

        let connector = ProxyConnector::new(ProxyMode::Accept);
        connector.check_connection_info(&conn).unwrap();
        connector.prepare_stream(&conn).await.unwrap();
        connector.create_stream(&conn).await.unwrap();

        assert_eq!(
            relay.await.unwrap(),
            ProxyPacket::InitRecv {
                screen_name: "alice".into(),
                port: 4321,
                cookie: COOKIE,
                capability: CAP_FILE_TRANSFER,
            }
        );
        assert!(!conn.is_redirected());
    }

    #[tokio::test]
    async fn socks_endpoint_is_unresolved_relay_name() {
        let settings = Settings {
            proxy_host: "ars.example.net".into(),
            proxy_port: 443,
            socks_proxy: Some(SocksProxy {
                host: "127.0.0.1".into(),
                port: 1080,
                username: None,
                password: None,
            }),
            ..Settings::default()
        };
        let conn = RvConnection::new(
            "alice",
            "bob",
            COOKIE,
            Initiator::Me,
            Arc::new(settings),
            EventPost::discard(),
        );

        let connector = ProxyConnector::new(ProxyMode::Initiate);
        connector.prepare_stream(&conn).await.unwrap();
        assert!(connector.resolved().is_none());
        assert_eq!(connector.endpoint(&conn), ("ars.example.net".to_owned(), 443));
    }

    #[tokio::test]
    async fn accept_requires_proxy_address() {
        let conn = conn(5190, EventPost::discard());
        let connector = ProxyConnector::new(ProxyMode::Accept);
        assert!(matches!(
            connector.check_connection_info(&conn),
            Err(RendezvousError::MissingAddress(ConnectionType::Proxy))
        ));
    }

    #[tokio::test]
    async fn error_packet_is_proxy_error() {
        let (port, _relay) =
            fake_relay(vec![ProxyPacket::Error(ProxyErrorCode::AcceptPeriodTimedOut)]).await;
        let conn = conn(port, EventPost::discard());
        let connector = ProxyConnector::new(ProxyMode::Initiate);
        connector.prepare_stream(&conn).await.unwrap();

        let err = connector.create_stream(&conn).await.unwrap_err();
        assert!(matches!(
            err,
            RendezvousError::Proxy(ProxyErrorCode::AcceptPeriodTimedOut)
        ));
        assert_eq!(err.failure_reason(), crate::error::FailureReason::ProxyTimedOut);
    }
}
