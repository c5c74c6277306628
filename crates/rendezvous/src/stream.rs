use std::net::SocketAddr;

use tokio::net::TcpStream;

/// An open stream to the peer plus the socket details behind it.
#[derive(Debug)]
pub struct StreamInfo {
    stream: TcpStream,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl StreamInfo {
    pub fn new(stream: TcpStream) -> std::io::Result<Self> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        // Headers are small and sent one at a time.
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            local_addr,
            peer_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address of the other end of the TCP connection. For proxied streams
    /// this is the relay.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}
