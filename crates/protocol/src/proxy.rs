//! Rendezvous proxy relay packets.
//!
//! # Wire format
//!
//! ```text
//! [2] length of everything after this field
//! [2] version 0x044a
//! [2] command
//! [4] unknown (0)
//! [2] flags
//! [..] body
//!
//! INIT_SEND: [1 + n] screen name  [8] cookie  TLV(0x0001, capability)
//! INIT_RECV: [1 + n] screen name  [2] port  [8] cookie  TLV(0x0001, capability)
//! ACK:       [2] port  [4] IPv4 address
//! ERROR:     [2] error code
//! READY:     (empty)
//! ```

use std::fmt;
use std::net::Ipv4Addr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::codec::ByteReader;
use crate::cookie::IcbmCookie;
use crate::error::ProtocolError;

pub const PROXY_VERSION: u16 = 0x044a;

/// Default rendezvous proxy relay.
pub const DEFAULT_PROXY_HOST: &str = "ars.oscar.aol.com";
pub const DEFAULT_PROXY_PORT: u16 = 5190;

const CMD_ERROR: u16 = 0x0001;
const CMD_INIT_SEND: u16 = 0x0002;
const CMD_ACK: u16 = 0x0003;
const CMD_INIT_RECV: u16 = 0x0004;
const CMD_READY: u16 = 0x0005;

const TLV_CAPABILITY: u16 = 0x0001;

/// Bytes after the length field that every packet carries.
const HEADER_AFTER_LEN: usize = 10;

/// Largest packet body accepted from a relay.
const MAX_PACKET_LEN: usize = 2048;

/// Error codes a relay reports in an ERROR packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyErrorCode {
    BadRequest,
    InitialRequestTimedOut,
    AcceptPeriodTimedOut,
    Unknown(u16),
}

impl ProxyErrorCode {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x000d => Self::BadRequest,
            0x0010 => Self::InitialRequestTimedOut,
            0x001a => Self::AcceptPeriodTimedOut,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::BadRequest => 0x000d,
            Self::InitialRequestTimedOut => 0x0010,
            Self::AcceptPeriodTimedOut => 0x001a,
            Self::Unknown(code) => code,
        }
    }

    /// Whether the relay gave up waiting on one of the peers.
    pub fn is_timeout(self) -> bool {
        matches!(
            self,
            Self::InitialRequestTimedOut | Self::AcceptPeriodTimedOut
        )
    }
}

impl fmt::Display for ProxyErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest => f.write_str("bad request"),
            Self::InitialRequestTimedOut => f.write_str("initial request timed out"),
            Self::AcceptPeriodTimedOut => f.write_str("accept period timed out"),
            Self::Unknown(code) => write!(f, "unknown error 0x{code:04x}"),
        }
    }
}

/// A packet exchanged with a rendezvous proxy relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyPacket {
    /// Ask the relay to open a new proxied session for `cookie`.
    InitSend {
        screen_name: String,
        cookie: IcbmCookie,
        capability: Uuid,
    },
    /// Join the session the peer opened on relay port `port`.
    InitRecv {
        screen_name: String,
        port: u16,
        cookie: IcbmCookie,
        capability: Uuid,
    },
    /// Relay-assigned address to advertise to the peer.
    Ack { port: u16, ip: Ipv4Addr },
    /// Both ends are attached; the stream now carries peer traffic.
    Ready,
    Error(ProxyErrorCode),
}

impl ProxyPacket {
    fn command(&self) -> u16 {
        match self {
            Self::InitSend { .. } => CMD_INIT_SEND,
            Self::InitRecv { .. } => CMD_INIT_RECV,
            Self::Ack { .. } => CMD_ACK,
            Self::Ready => CMD_READY,
            Self::Error(_) => CMD_ERROR,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut body = Vec::new();
        match self {
            Self::InitSend {
                screen_name,
                cookie,
                capability,
            } => {
                put_screen_name(&mut body, screen_name)?;
                body.extend_from_slice(cookie.as_bytes());
                put_capability(&mut body, capability);
            }
            Self::InitRecv {
                screen_name,
                port,
                cookie,
                capability,
            } => {
                put_screen_name(&mut body, screen_name)?;
                body.extend_from_slice(&port.to_be_bytes());
                body.extend_from_slice(cookie.as_bytes());
                put_capability(&mut body, capability);
            }
            Self::Ack { port, ip } => {
                body.extend_from_slice(&port.to_be_bytes());
                body.extend_from_slice(&ip.octets());
            }
            Self::Ready => {}
            Self::Error(code) => body.extend_from_slice(&code.code().to_be_bytes()),
        }

        let len = HEADER_AFTER_LEN + body.len();
        let mut buf = Vec::with_capacity(2 + len);
        // Screen names are capped at 255 bytes, so this always fits.
        buf.extend_from_slice(&(len as u16).to_be_bytes());
        buf.extend_from_slice(&PROXY_VERSION.to_be_bytes());
        buf.extend_from_slice(&self.command().to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decodes a packet from the bytes following its length field.
    pub fn decode(packet: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = ByteReader::new(packet, "proxy packet");
        let version = r.u16()?;
        if version != PROXY_VERSION {
            return Err(ProtocolError::BadProxyVersion(version));
        }
        let command = r.u16()?;
        let _unknown = r.u32()?;
        let _flags = r.u16()?;

        Ok(match command {
            CMD_INIT_SEND => {
                let screen_name = get_screen_name(&mut r)?;
                let cookie = IcbmCookie::new(r.array()?);
                let capability = get_capability(&mut r)?;
                Self::InitSend {
                    screen_name,
                    cookie,
                    capability,
                }
            }
            CMD_INIT_RECV => {
                let screen_name = get_screen_name(&mut r)?;
                let port = r.u16()?;
                let cookie = IcbmCookie::new(r.array()?);
                let capability = get_capability(&mut r)?;
                Self::InitRecv {
                    screen_name,
                    port,
                    cookie,
                    capability,
                }
            }
            CMD_ACK => {
                let port = r.u16()?;
                let ip = Ipv4Addr::from(r.u32()?);
                Self::Ack { port, ip }
            }
            CMD_READY => Self::Ready,
            CMD_ERROR => Self::Error(ProxyErrorCode::from_code(r.u16()?)),
            other => return Err(ProtocolError::UnknownProxyCommand(other)),
        })
    }

    /// Reads one packet from the relay.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, ProtocolError> {
        let len = usize::from(reader.read_u16().await?);
        if !(HEADER_AFTER_LEN..=MAX_PACKET_LEN).contains(&len) {
            return Err(ProtocolError::BadHeaderLength(len));
        }
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        Self::decode(&buf)
    }

    /// Writes this packet and flushes.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let buf = self.encode()?;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }
}

fn put_screen_name(buf: &mut Vec<u8>, screen_name: &str) -> Result<(), ProtocolError> {
    let bytes = screen_name.as_bytes();
    let len = u8::try_from(bytes.len()).map_err(|_| ProtocolError::TooLong {
        field: "screen name",
        len: bytes.len(),
        max: u8::MAX as usize,
    })?;
    buf.push(len);
    buf.extend_from_slice(bytes);
    Ok(())
}

fn get_screen_name(r: &mut ByteReader<'_>) -> Result<String, ProtocolError> {
    let len = usize::from(r.u8()?);
    Ok(String::from_utf8_lossy(r.bytes(len)?).into_owned())
}

fn put_capability(buf: &mut Vec<u8>, capability: &Uuid) {
    buf.extend_from_slice(&TLV_CAPABILITY.to_be_bytes());
    buf.extend_from_slice(&16u16.to_be_bytes());
    buf.extend_from_slice(capability.as_bytes());
}

/// Scans the trailing TLVs for the capability block.
fn get_capability(r: &mut ByteReader<'_>) -> Result<Uuid, ProtocolError> {
    while r.remaining() > 0 {
        let tlv_type = r.u16()?;
        let len = usize::from(r.u16()?);
        let value = r.bytes(len)?;
        if tlv_type == TLV_CAPABILITY && len == 16 {
            return Uuid::from_slice(value).map_err(|_| ProtocolError::Truncated("capability"));
        }
    }
    Err(ProtocolError::Truncated("capability"))
}
