//! Strategies for obtaining a stream to the peer.
//!
//! - [`OutgoingConnector`]: dial the peer's LAN or Internet address.
//! - [`PassiveConnector`]: listen and wait for the peer to dial us.
//! - [`ProxyConnector`]: meet the peer on a rendezvous proxy relay.

mod outgoing;
mod passive;
mod proxy;

pub use outgoing::OutgoingConnector;
pub use passive::PassiveConnector;
pub use proxy::{ProxyConnector, ProxyMode};

use std::future::Future;

use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;

use crate::connection::RvConnection;
use crate::error::RendezvousError;
use crate::settings::Settings;
use crate::stream::StreamInfo;
use crate::types::ConnectionType;

/// One way of producing a stream to the peer.
///
/// The controller calls [`check_connection_info`](Self::check_connection_info)
/// first, then [`prepare_stream`](Self::prepare_stream) and
/// [`create_stream`](Self::create_stream) on a worker task.
pub trait Connector: Send + Sync + 'static {
    fn connection_type(&self) -> ConnectionType;

    /// Fails fast when the connection info lacks what this connector needs.
    fn check_connection_info(&self, conn: &RvConnection) -> Result<(), RendezvousError>;

    /// Host reported in the resolving event.
    fn target_host(&self, conn: &RvConnection) -> String;

    /// Whether the controller starts the timeout clock on its own. Connectors
    /// that wait for the peer leave it to the caller.
    fn starts_timer_automatically(&self) -> bool {
        true
    }

    /// Work done before connecting: name resolution, binding a port. Nothing
    /// here is visible to the peer.
    fn prepare_stream(
        &self,
        conn: &RvConnection,
    ) -> impl Future<Output = Result<(), RendezvousError>> + Send;

    /// Endpoint reported in the connecting event, once prepared: the address
    /// about to be dialled, or the local address a listener waits on.
    fn endpoint(&self, conn: &RvConnection) -> (String, u16);

    fn create_stream(
        &self,
        conn: &RvConnection,
    ) -> impl Future<Output = Result<StreamInfo, RendezvousError>> + Send;
}

/// Opens a TCP connection, through the configured SOCKS5 proxy if any.
pub(crate) async fn open_tcp(
    settings: &Settings,
    host: &str,
    port: u16,
) -> Result<TcpStream, RendezvousError> {
    let Some(socks) = &settings.socks_proxy else {
        return Ok(TcpStream::connect((host, port)).await?);
    };

    let proxy = socks.address();
    tracing::debug!(%proxy, host, port, "connecting through SOCKS5 proxy");
    let stream = match (&socks.username, &socks.password) {
        (Some(username), Some(password)) => {
            Socks5Stream::connect_with_password(
                proxy.as_str(),
                (host, port),
                username.as_str(),
                password.as_str(),
            )
            .await?
        }
        _ => Socks5Stream::connect(proxy.as_str(), (host, port)).await?,
    };
    Ok(stream.into_inner())
}
