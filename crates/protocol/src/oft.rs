//! OFT2 file-transfer headers.
//!
//! # Wire format
//!
//! ```text
//! [4]  magic "OFT2"
//! [2]  header length (192 + padded name length, normally 256)
//! [2]  header type
//! [8]  ICBM cookie
//! [2]  encryption          [2] compression
//! [2]  total files         [2] files left
//! [2]  total parts         [2] parts left
//! [4]  total size          [4] file size
//! [4]  last modified       [4] checksum
//! [4]  rfork recv checksum [4] rfork size
//! [4]  created             [4] rfork checksum
//! [4]  bytes received      [4] received checksum
//! [32] id string (NUL padded)
//! [1]  flags  [1] list-name offset  [1] list-size offset
//! [69] dummy  [16] mac file info
//! [2]  charset             [2] charsubset
//! [n]  filename, segments joined by 0x01, NUL padded to >= 64 bytes
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::ByteReader;
use crate::cookie::IcbmCookie;
use crate::error::ProtocolError;
use crate::filename::SegmentedFilename;

pub const MAGIC: &[u8; 4] = b"OFT2";

/// Checksum value of an empty byte range.
pub const CHECKSUM_EMPTY: u32 = 0xffff_0000;

/// Flag set on ordinary headers.
pub const FLAG_DEFAULT: u8 = 0x20;

/// Flag set on the `RECEIVED` header once a file is complete.
pub const FLAG_DONE: u8 = 0x01;

pub const DEFAULT_ID_STRING: &str = "Cool FileXfer";

/// Bytes preceding the filename field.
const FIXED_LEN: usize = 192;
const MIN_NAME_LEN: usize = 64;
const ID_STRING_LEN: usize = 32;
const DUMMY_LEN: usize = 69;
const MAC_INFO_LEN: usize = 16;

/// The protocol step a header represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderType {
    /// Sender announces a file (`SENDHEADER`).
    Send,
    /// Receiver accepts from offset zero.
    Ack,
    /// Receiver confirms the whole file arrived intact.
    Received,
    /// Receiver asks to continue from its existing partial file.
    Resume,
    /// Sender answers a resume request with the offset it will honor.
    ResumeSendHeader,
    /// Receiver echoes the offset it will write from.
    ResumeAck,
}

impl HeaderType {
    pub fn code(self) -> u16 {
        match self {
            Self::Send => 0x0101,
            Self::Ack => 0x0202,
            Self::Received => 0x0204,
            Self::Resume => 0x0205,
            Self::ResumeSendHeader => 0x0106,
            Self::ResumeAck => 0x0207,
        }
    }

    pub fn from_code(code: u16) -> Result<Self, ProtocolError> {
        Ok(match code {
            0x0101 => Self::Send,
            0x0202 => Self::Ack,
            0x0204 => Self::Received,
            0x0205 => Self::Resume,
            0x0106 => Self::ResumeSendHeader,
            0x0207 => Self::ResumeAck,
            other => return Err(ProtocolError::UnknownHeaderType(other)),
        })
    }
}

/// Encoding of the filename field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Ascii,
    Ucs2Be,
    Iso8859_1,
    Other(u16),
}

impl Charset {
    pub fn code(self) -> u16 {
        match self {
            Self::Ascii => 0x0000,
            Self::Ucs2Be => 0x0002,
            Self::Iso8859_1 => 0x0003,
            Self::Other(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => Self::Ascii,
            0x0002 => Self::Ucs2Be,
            0x0003 => Self::Iso8859_1,
            other => Self::Other(other),
        }
    }

    /// Narrowest charset able to carry `name` without loss.
    pub fn for_name(name: &str) -> Self {
        if name.is_ascii() {
            Self::Ascii
        } else {
            Self::Ucs2Be
        }
    }

    fn terminator_len(self) -> usize {
        match self {
            Self::Ucs2Be => 2,
            _ => 1,
        }
    }

    fn encode(self, s: &str) -> Vec<u8> {
        match self {
            Self::Ucs2Be => s.encode_utf16().flat_map(u16::to_be_bytes).collect(),
            Self::Iso8859_1 => s
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
            Self::Ascii | Self::Other(_) => s
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
        }
    }

    fn decode(self, raw: &[u8]) -> String {
        match self {
            Self::Ucs2Be => {
                let units: Vec<u16> = raw
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .take_while(|&unit| unit != 0)
                    .collect();
                String::from_utf16_lossy(&units)
            }
            Self::Iso8859_1 => raw
                .iter()
                .take_while(|&&b| b != 0)
                .map(|&b| char::from(b))
                .collect(),
            Self::Ascii | Self::Other(_) => String::from_utf8_lossy(until_nul(raw)).into_owned(),
        }
    }
}

fn until_nul(raw: &[u8]) -> &[u8] {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    &raw[..end]
}

/// One OFT2 header.
///
/// Sizes, offsets and checksums are `u32` because that is their width on the
/// wire; they are not widened in memory. Files of 4 GiB or more cannot be
/// described and are refused before a header is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferHeader {
    pub header_type: HeaderType,
    pub cookie: IcbmCookie,
    pub encryption: u16,
    pub compression: u16,
    pub total_files: u16,
    pub files_left: u16,
    pub total_parts: u16,
    pub parts_left: u16,
    pub total_size: u32,
    pub file_size: u32,
    pub last_modified: u32,
    pub checksum: u32,
    pub res_fork_received_checksum: u32,
    pub res_fork_size: u32,
    pub created: u32,
    pub res_fork_checksum: u32,
    pub bytes_received: u32,
    pub received_checksum: u32,
    pub id_string: String,
    pub flags: u8,
    pub list_name_offset: u8,
    pub list_size_offset: u8,
    pub charset: Charset,
    pub charsubset: u16,
    pub filename: SegmentedFilename,
}

impl FileTransferHeader {
    /// Creates a header with the defaults every client fills in.
    pub fn new(header_type: HeaderType, cookie: IcbmCookie) -> Self {
        Self {
            header_type,
            cookie,
            encryption: 0,
            compression: 0,
            total_files: 1,
            files_left: 1,
            total_parts: 1,
            parts_left: 1,
            total_size: 0,
            file_size: 0,
            last_modified: 0,
            checksum: CHECKSUM_EMPTY,
            res_fork_received_checksum: CHECKSUM_EMPTY,
            res_fork_size: 0,
            created: 0,
            res_fork_checksum: CHECKSUM_EMPTY,
            bytes_received: 0,
            received_checksum: CHECKSUM_EMPTY,
            id_string: DEFAULT_ID_STRING.into(),
            flags: FLAG_DEFAULT,
            list_name_offset: 0x1c,
            list_size_offset: 0x11,
            charset: Charset::Ascii,
            charsubset: 0,
            filename: SegmentedFilename::default(),
        }
    }

    /// Copy of this header retyped for the next protocol step. Peers expect
    /// replies to echo the fields of the header they answer.
    pub fn reply(&self, header_type: HeaderType) -> Self {
        Self {
            header_type,
            ..self.clone()
        }
    }

    /// Sets the filename and picks a charset that can carry it.
    pub fn set_filename(&mut self, filename: SegmentedFilename) {
        self.charset = Charset::for_name(&filename.to_wire());
        self.filename = filename;
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let name = self.charset.encode(&self.filename.to_wire());
        let padded_name = MIN_NAME_LEN.max(name.len() + self.charset.terminator_len());
        let total = FIXED_LEN + padded_name;
        let header_len = u16::try_from(total).map_err(|_| ProtocolError::TooLong {
            field: "filename",
            len: name.len(),
            max: u16::MAX as usize - FIXED_LEN - self.charset.terminator_len(),
        })?;
        if self.id_string.len() > ID_STRING_LEN {
            return Err(ProtocolError::TooLong {
                field: "id string",
                len: self.id_string.len(),
                max: ID_STRING_LEN,
            });
        }

        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&header_len.to_be_bytes());
        buf.extend_from_slice(&self.header_type.code().to_be_bytes());
        buf.extend_from_slice(self.cookie.as_bytes());
        for v in [
            self.encryption,
            self.compression,
            self.total_files,
            self.files_left,
            self.total_parts,
            self.parts_left,
        ] {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        for v in [
            self.total_size,
            self.file_size,
            self.last_modified,
            self.checksum,
            self.res_fork_received_checksum,
            self.res_fork_size,
            self.created,
            self.res_fork_checksum,
            self.bytes_received,
            self.received_checksum,
        ] {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        let mut id = [0u8; ID_STRING_LEN];
        id[..self.id_string.len()].copy_from_slice(self.id_string.as_bytes());
        buf.extend_from_slice(&id);
        buf.push(self.flags);
        buf.push(self.list_name_offset);
        buf.push(self.list_size_offset);
        buf.extend_from_slice(&[0u8; DUMMY_LEN]);
        buf.extend_from_slice(&[0u8; MAC_INFO_LEN]);
        buf.extend_from_slice(&self.charset.code().to_be_bytes());
        buf.extend_from_slice(&self.charsubset.to_be_bytes());
        buf.extend_from_slice(&name);
        buf.resize(total, 0);
        Ok(buf)
    }

    /// Decodes a complete header, magic and length included.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut prefix = ByteReader::new(buf, "OFT header");
        let magic: [u8; 4] = prefix.array()?;
        if &magic != MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }
        let len = usize::from(prefix.u16()?);
        if len < FIXED_LEN {
            return Err(ProtocolError::BadHeaderLength(len));
        }
        if buf.len() < len {
            return Err(ProtocolError::Truncated("OFT header"));
        }

        let mut r = ByteReader::new(&buf[6..len], "OFT header");
        let header_type = HeaderType::from_code(r.u16()?)?;
        let cookie = IcbmCookie::new(r.array()?);
        let encryption = r.u16()?;
        let compression = r.u16()?;
        let total_files = r.u16()?;
        let files_left = r.u16()?;
        let total_parts = r.u16()?;
        let parts_left = r.u16()?;
        let total_size = r.u32()?;
        let file_size = r.u32()?;
        let last_modified = r.u32()?;
        let checksum = r.u32()?;
        let res_fork_received_checksum = r.u32()?;
        let res_fork_size = r.u32()?;
        let created = r.u32()?;
        let res_fork_checksum = r.u32()?;
        let bytes_received = r.u32()?;
        let received_checksum = r.u32()?;
        let id_string = String::from_utf8_lossy(until_nul(r.bytes(ID_STRING_LEN)?)).into_owned();
        let flags = r.u8()?;
        let list_name_offset = r.u8()?;
        let list_size_offset = r.u8()?;
        r.bytes(DUMMY_LEN)?;
        r.bytes(MAC_INFO_LEN)?;
        let charset = Charset::from_code(r.u16()?);
        let charsubset = r.u16()?;
        let filename = SegmentedFilename::from_wire(&charset.decode(r.rest()));

        Ok(Self {
            header_type,
            cookie,
            encryption,
            compression,
            total_files,
            files_left,
            total_parts,
            parts_left,
            total_size,
            file_size,
            last_modified,
            checksum,
            res_fork_received_checksum,
            res_fork_size,
            created,
            res_fork_checksum,
            bytes_received,
            received_checksum,
            id_string,
            flags,
            list_name_offset,
            list_size_offset,
            charset,
            charsubset,
            filename,
        })
    }

    /// Reads one header from the stream.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, ProtocolError> {
        let mut prefix = [0u8; 6];
        reader.read_exact(&mut prefix).await?;
        if &prefix[..4] != MAGIC {
            let mut magic = [0u8; 4];
            magic.copy_from_slice(&prefix[..4]);
            return Err(ProtocolError::BadMagic(magic));
        }
        let len = usize::from(u16::from_be_bytes([prefix[4], prefix[5]]));
        if len < FIXED_LEN {
            return Err(ProtocolError::BadHeaderLength(len));
        }
        let mut buf = vec![0u8; len];
        buf[..6].copy_from_slice(&prefix);
        reader.read_exact(&mut buf[6..]).await?;
        Self::decode(&buf)
    }

    /// Writes this header and flushes.
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

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie() -> IcbmCookie {
        IcbmCookie::new([1, 2, 3, 4, 5, 6, 7, 8])
    }

    fn send_header() -> FileTransferHeader {
        let mut h = FileTransferHeader::new(HeaderType::Send, cookie());
        h.total_size = 10_000;
        h.file_size = 10_000;
        h.checksum = 0x1234_0000;
        h.last_modified = 1_100_000_000;
        h.set_filename(SegmentedFilename::from_segments(["notes.txt"]));
        h
    }

    #[test]
    fn header_type_codes() {
        for t in [
            HeaderType::Send,
            HeaderType::Ack,
            HeaderType::Received,
            HeaderType::Resume,
            HeaderType::ResumeSendHeader,
            HeaderType::ResumeAck,
        ] {
            assert_eq!(HeaderType::from_code(t.code()).unwrap(), t);
        }
        assert!(matches!(
            HeaderType::from_code(0x0999),
            Err(ProtocolError::UnknownHeaderType(0x0999))
        ));
    }

    #[test]
    fn short_name_encodes_to_256_bytes() {
        let buf = send_header().encode().unwrap();
        assert_eq!(buf.len(), 256);
        assert_eq!(&buf[..4], b"OFT2");
        assert_eq!(&buf[4..6], &[0x01, 0x00]);
        assert_eq!(&buf[6..8], &[0x01, 0x01]);
        assert_eq!(&buf[8..16], &[1, 2, 3, 4, 5, 6, 7, 8]);
        // file size at offset 32
        assert_eq!(&buf[32..36], &10_000u32.to_be_bytes());
        assert_eq!(&buf[68..81], b"Cool FileXfer");
        assert_eq!(buf[100], FLAG_DEFAULT);
        assert_eq!(&buf[192..201], b"notes.txt");
        assert_eq!(buf[201], 0);
    }

    #[test]
    fn decode_reads_back_fields() {
        let original = send_header();
        let decoded = FileTransferHeader::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn long_name_grows_header() {
        let mut h = send_header();
        h.set_filename(SegmentedFilename::from_segments(["x".repeat(100)]));
        let buf = h.encode().unwrap();
        assert_eq!(buf.len(), 192 + 101);
        assert_eq!(u16::from_be_bytes([buf[4], buf[5]]) as usize, buf.len());
        assert_eq!(FileTransferHeader::decode(&buf).unwrap().filename, h.filename);
    }

    #[test]
    fn non_ascii_name_uses_ucs2() {
        let mut h = send_header();
        h.set_filename(SegmentedFilename::from_segments(["résumé.pdf"]));
        assert_eq!(h.charset, Charset::Ucs2Be);
        let buf = h.encode().unwrap();
        assert_eq!(&buf[188..190], &[0x00, 0x02]);
        let decoded = FileTransferHeader::decode(&buf).unwrap();
        assert_eq!(decoded.filename.to_string(), "résumé.pdf");
    }

    #[test]
    fn latin1_name_decodes() {
        let mut h = send_header();
        h.charset = Charset::Iso8859_1;
        h.filename = SegmentedFilename::from_segments(["café"]);
        let buf = h.encode().unwrap();
        assert_eq!(&buf[192..197], &[b'c', b'a', b'f', 0xe9, 0]);
        assert_eq!(FileTransferHeader::decode(&buf).unwrap().filename.to_string(), "café");
    }

    #[test]
    fn reply_keeps_fields() {
        let h = send_header();
        let ack = h.reply(HeaderType::Ack);
        assert_eq!(ack.header_type, HeaderType::Ack);
        assert_eq!(ack.file_size, h.file_size);
        assert_eq!(ack.cookie, h.cookie);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut buf = send_header().encode().unwrap();
        buf[0] = b'X';
        assert!(matches!(
            FileTransferHeader::decode(&buf),
            Err(ProtocolError::BadMagic(_))
        ));
    }

    #[test]
    fn truncated_buffer_rejected() {
        let buf = send_header().encode().unwrap();
        assert!(matches!(
            FileTransferHeader::decode(&buf[..200]),
            Err(ProtocolError::Truncated(_))
        ));
    }

    #[tokio::test]
    async fn stream_read_write() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let h = send_header();
        h.write_to(&mut a).await.unwrap();
        h.reply(HeaderType::Received).write_to(&mut a).await.unwrap();

        let first = FileTransferHeader::read_from(&mut b).await.unwrap();
        let second = FileTransferHeader::read_from(&mut b).await.unwrap();
        assert_eq!(first, h);
        assert_eq!(second.header_type, HeaderType::Received);
    }

    #[tokio::test]
    async fn stream_read_rejects_short_length() {
        let mut buf = send_header().encode().unwrap();
        buf[4] = 0;
        buf[5] = 10;
        let mut cursor = &buf[..];
        assert!(matches!(
            FileTransferHeader::read_from(&mut cursor).await,
            Err(ProtocolError::BadHeaderLength(10))
        ));
    }
}
