use std::net::SocketAddr;

use tracing::info;

use super::{Connector, open_tcp};
use crate::connection::RvConnection;
use crate::error::RendezvousError;
use crate::stream::StreamInfo;
use crate::types::ConnectionType;

/// Dials the peer directly, once, at the address matching its type.
#[derive(Debug, Clone)]
pub struct OutgoingConnector {
    connection_type: ConnectionType,
}

impl OutgoingConnector {
    /// `connection_type` must be [`ConnectionType::Lan`] or
    /// [`ConnectionType::Internet`].
    pub fn new(connection_type: ConnectionType) -> Result<Self, RendezvousError> {
        match connection_type {
            ConnectionType::Lan | ConnectionType::Internet => Ok(Self { connection_type }),
            other => Err(RendezvousError::UnsupportedConnectionType(other)),
        }
    }

    fn address(&self, conn: &RvConnection) -> Result<SocketAddr, RendezvousError> {
        let info = conn.connection_info();
        if info.port.is_none() {
            return Err(RendezvousError::MissingPort);
        }
        info.address_for(self.connection_type)
            .ok_or(RendezvousError::MissingAddress(self.connection_type))
    }
}

impl Connector for OutgoingConnector {
    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    fn check_connection_info(&self, conn: &RvConnection) -> Result<(), RendezvousError> {
        self.address(conn).map(|_| ())
    }

    fn target_host(&self, conn: &RvConnection) -> String {
        self.address(conn)
            .map(|a| a.ip().to_string())
            .unwrap_or_default()
    }

    async fn prepare_stream(&self, _conn: &RvConnection) -> Result<(), RendezvousError> {
        Ok(())
    }

    fn endpoint(&self, conn: &RvConnection) -> (String, u16) {
        self.address(conn)
            .map(|addr| (addr.ip().to_string(), addr.port()))
            .unwrap_or_default()
    }

    async fn create_stream(&self, conn: &RvConnection) -> Result<StreamInfo, RendezvousError> {
        let addr = self.address(conn)?;
        let stream = open_tcp(conn.settings(), &addr.ip().to_string(), addr.port()).await?;
        info!(%addr, connection_type = ?self.connection_type, "outgoing connection established");
        Ok(StreamInfo::new(stream)?)
    }
}
