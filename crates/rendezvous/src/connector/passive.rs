use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use super::Connector;
use crate::connection::RvConnection;
use crate::error::RendezvousError;
use crate::events::RvEvent;
use crate::stream::StreamInfo;
use crate::types::ConnectionType;

/// Binds a local port and waits for the peer to connect.
///
/// The bound port is published through [`local_port`](Self::local_port) so
/// the signaling layer can advertise it. The timeout clock is not started
/// automatically; call `start_timeout_timer` on the controller handle once
/// the peer has been told where to connect.
#[derive(Debug)]
pub struct PassiveConnector {
    listener: Mutex<Option<TcpListener>>,
    port: watch::Sender<Option<u16>>,
}

impl Default for PassiveConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl PassiveConnector {
    pub fn new() -> Self {
        let (port, _) = watch::channel(None);
        Self {
            listener: Mutex::new(None),
            port,
        }
    }

    /// Watches the bound port. `None` until the listener is bound.
    pub fn local_port(&self) -> watch::Receiver<Option<u16>> {
        self.port.subscribe()
    }
}

impl Connector for PassiveConnector {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Incoming
    }

    fn check_connection_info(&self, _conn: &RvConnection) -> Result<(), RendezvousError> {
        Ok(())
    }

    fn target_host(&self, conn: &RvConnection) -> String {
        conn.settings().passive_bind.ip().to_string()
    }

    fn starts_timer_automatically(&self) -> bool {
        false
    }

    async fn prepare_stream(&self, conn: &RvConnection) -> Result<(), RendezvousError> {
        let listener = TcpListener::bind(conn.settings().passive_bind).await?;
        let port = listener.local_addr()?.port();
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
        self.port.send_replace(Some(port));

        let addresses = local_ipv4_addresses();
        info!(port, ?addresses, "waiting for incoming rendezvous connection");
        conn.post(RvEvent::WaitingForConnection { port, addresses });
        Ok(())
    }

    fn endpoint(&self, conn: &RvConnection) -> (String, u16) {
        let bind = conn.settings().passive_bind;
        let port = (*self.port.borrow()).unwrap_or(bind.port());
        (bind.ip().to_string(), port)
    }

    async fn create_stream(&self, _conn: &RvConnection) -> Result<StreamInfo, RendezvousError> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(RendezvousError::NotPrepared)?;

        let (stream, addr) = listener.accept().await?;
        info!(%addr, "incoming rendezvous connection accepted");
        // One connection per attempt.
        drop(listener);
        Ok(StreamInfo::new(stream)?)
    }
}

/// Local non-loopback IPv4 addresses, excluding link-local.
fn local_ipv4_addresses() -> Vec<IpAddr> {
    if_addrs::get_if_addrs()
        .unwrap_or_default()
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.ip() {
            IpAddr::V4(ip) if !ip.is_link_local() && !ip.is_loopback() => Some(IpAddr::V4(ip)),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use oscar_protocol::IcbmCookie;
    use tokio::net::TcpStream;

    use super::*;
    use crate::events::EventPost;
    use crate::settings::Settings;
    use crate::types::Initiator;

    #[tokio::test]
    async fn binds_advertises_and_accepts() {
        let settings = Settings {
            passive_bind: "127.0.0.1:0".parse().unwrap(),
            ..Settings::default()
        };
        let (events, mut rx) = EventPost::channel();
        let conn = RvConnection::new(
            "alice",
            "bob",
            IcbmCookie::new([2; 8]),
            Initiator::Me,
            Arc::new(settings),
            events,
        );

        let connector = PassiveConnector::new();
        let port_rx = connector.local_port();
        assert_eq!(*port_rx.borrow(), None);

        connector.prepare_stream(&conn).await.unwrap();
        let port = port_rx.borrow().unwrap();
        match rx.try_recv().unwrap() {
            RvEvent::WaitingForConnection { port: advertised, addresses } => {
                assert_eq!(advertised, port);
                assert!(addresses.iter().all(|a| !a.is_loopback()));
            }
            other => panic!("unexpected event {other:?}"),
        }

        let (stream, client) =
            tokio::join!(connector.create_stream(&conn), TcpStream::connect(("127.0.0.1", port)));
        let stream = stream.unwrap();
        let client = client.unwrap();
        assert_eq!(stream.peer_addr(), client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn create_before_prepare_fails() {
        let conn = RvConnection::new(
            "alice",
            "bob",
            IcbmCookie::new([2; 8]),
            Initiator::Me,
            Arc::new(Settings::default()),
            EventPost::discard(),
        );
        let err = PassiveConnector::new().create_stream(&conn).await.unwrap_err();
        assert!(matches!(err, RendezvousError::NotPrepared));
    }

    #[test]
    fn timer_is_manual() {
        assert!(!PassiveConnector::new().starts_timer_automatically());
    }
}
