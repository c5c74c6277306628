fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::net::Ipv4Addr;
    use std::path::PathBuf;

    use oscar_protocol::{
        CAP_FILE_TRANSFER, Charset, FileTransferHeader, HeaderType, IcbmCookie, ProxyErrorCode,
        ProxyPacket, SegmentedFilename,
    };
    use oscar_transfer::{OftChecksum, checksum_bytes};
    use serde::Deserialize;

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture file into `T`.
    fn load_fixture<T: serde::de::DeserializeOwned>(name: &str) -> T {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    fn fixture_bytes(name: &str, hex_str: &str) -> Vec<u8> {
        hex::decode(hex_str).unwrap_or_else(|e| panic!("bad hex in {name}: {e}"))
    }

    // --- OFT headers ---

    #[derive(Deserialize)]
    struct OftFixture {
        hex: String,
        header_type: u16,
        cookie: String,
        total_files: u16,
        files_left: u16,
        total_size: u32,
        file_size: u32,
        last_modified: u32,
        checksum: u32,
        bytes_received: u32,
        received_checksum: u32,
        flags: u8,
        charset: u16,
        filename: Vec<String>,
    }

    /// Decodes a captured header, checks the fields a peer acts on, then
    /// re-encodes it and compares byte for byte.
    fn header_roundtrip(name: &str) -> FileTransferHeader {
        let fixture: OftFixture = load_fixture(name);
        let bytes = fixture_bytes(name, &fixture.hex);

        let header = FileTransferHeader::decode(&bytes)
            .unwrap_or_else(|e| panic!("failed to decode {name}: {e}"));
        assert_eq!(header.header_type.code(), fixture.header_type, "{name}: type");
        assert_eq!(header.cookie, IcbmCookie::from_hex(&fixture.cookie).unwrap(), "{name}: cookie");
        assert_eq!(header.total_files, fixture.total_files, "{name}: total files");
        assert_eq!(header.files_left, fixture.files_left, "{name}: files left");
        assert_eq!(header.total_size, fixture.total_size, "{name}: total size");
        assert_eq!(header.file_size, fixture.file_size, "{name}: file size");
        assert_eq!(header.last_modified, fixture.last_modified, "{name}: mtime");
        assert_eq!(header.checksum, fixture.checksum, "{name}: checksum");
        assert_eq!(header.bytes_received, fixture.bytes_received, "{name}: bytes received");
        assert_eq!(
            header.received_checksum, fixture.received_checksum,
            "{name}: received checksum"
        );
        assert_eq!(header.flags, fixture.flags, "{name}: flags");
        assert_eq!(header.charset.code(), fixture.charset, "{name}: charset");
        assert_eq!(
            header.filename,
            SegmentedFilename::from_segments(fixture.filename.iter()),
            "{name}: filename"
        );

        let encoded = header
            .encode()
            .unwrap_or_else(|e| panic!("failed to encode {name}: {e}"));
        assert_eq!(
            hex::encode(&encoded),
            fixture.hex,
            "re-encoded bytes differ for {name}"
        );
        header
    }

    #[test]
    fn fixture_oft_send() {
        let header = header_roundtrip("oft_send.json");
        assert_eq!(header.header_type, HeaderType::Send);
        assert_eq!(header.id_string, "Cool FileXfer");
        assert_eq!(header.filename.to_string(), "photos/cat.jpg");
    }

    #[test]
    fn fixture_oft_ack() {
        assert_eq!(header_roundtrip("oft_ack.json").header_type, HeaderType::Ack);
    }

    #[test]
    fn fixture_oft_resume_exchange() {
        let resume = header_roundtrip("oft_resume.json");
        let send_header = header_roundtrip("oft_resume_sendheader.json");
        let ack = header_roundtrip("oft_resume_ack.json");

        assert_eq!(resume.header_type, HeaderType::Resume);
        assert_eq!(send_header.header_type, HeaderType::ResumeSendHeader);
        assert_eq!(ack.header_type, HeaderType::ResumeAck);
        // Each step echoes the previous one apart from its type.
        assert_eq!(resume.reply(HeaderType::ResumeSendHeader), send_header);
        assert_eq!(send_header.reply(HeaderType::ResumeAck), ack);
    }

    #[test]
    fn fixture_oft_received() {
        let header = header_roundtrip("oft_received.json");
        assert_eq!(header.header_type, HeaderType::Received);
        assert_ne!(header.flags & oscar_protocol::oft::FLAG_DONE, 0);
        assert_eq!(header.bytes_received, header.file_size);
    }

    #[test]
    fn fixture_oft_ucs2_filename() {
        let header = header_roundtrip("oft_send_ucs2.json");
        assert_eq!(header.charset, Charset::Ucs2Be);
        assert_eq!(header.filename.file_name(), Some("canción.txt"));
    }

    #[test]
    fn fixture_oft_long_filename_grows_header() {
        let fixture: OftFixture = load_fixture("oft_send_long_name.json");
        let bytes = fixture_bytes("oft_send_long_name.json", &fixture.hex);
        assert!(bytes.len() > 256);
        assert_eq!(usize::from(u16::from_be_bytes([bytes[4], bytes[5]])), bytes.len());
        header_roundtrip("oft_send_long_name.json");
    }

    // --- Proxy packets ---

    #[derive(Deserialize)]
    struct ProxyFixture {
        hex: String,
        #[serde(flatten)]
        packet: ExpectedPacket,
    }

    #[derive(Deserialize)]
    #[serde(tag = "command", rename_all = "snake_case")]
    enum ExpectedPacket {
        InitSend { screen_name: String, cookie: String },
        InitRecv { screen_name: String, port: u16, cookie: String },
        Ack { port: u16, ip: Ipv4Addr },
        Ready,
        Error { code: u16 },
    }

    impl ExpectedPacket {
        fn into_packet(self) -> ProxyPacket {
            match self {
                Self::InitSend { screen_name, cookie } => ProxyPacket::InitSend {
                    screen_name,
                    cookie: IcbmCookie::from_hex(&cookie).unwrap(),
                    capability: CAP_FILE_TRANSFER,
                },
                Self::InitRecv {
                    screen_name,
                    port,
                    cookie,
                } => ProxyPacket::InitRecv {
                    screen_name,
                    port,
                    cookie: IcbmCookie::from_hex(&cookie).unwrap(),
                    capability: CAP_FILE_TRANSFER,
                },
                Self::Ack { port, ip } => ProxyPacket::Ack { port, ip },
                Self::Ready => ProxyPacket::Ready,
                Self::Error { code } => ProxyPacket::Error(ProxyErrorCode::from_code(code)),
            }
        }
    }

    fn proxy_roundtrip(name: &str) -> ProxyPacket {
        let fixture: ProxyFixture = load_fixture(name);
        let bytes = fixture_bytes(name, &fixture.hex);
        let expected = fixture.packet.into_packet();

        let declared = usize::from(u16::from_be_bytes([bytes[0], bytes[1]]));
        assert_eq!(declared, bytes.len() - 2, "{name}: length prefix");

        let decoded = ProxyPacket::decode(&bytes[2..])
            .unwrap_or_else(|e| panic!("failed to decode {name}: {e}"));
        assert_eq!(decoded, expected, "{name}: decoded packet");

        let encoded = expected
            .encode()
            .unwrap_or_else(|e| panic!("failed to encode {name}: {e}"));
        assert_eq!(hex::encode(&encoded), fixture.hex, "re-encoded bytes differ for {name}");
        decoded
    }

    #[test]
    fn fixture_proxy_init_send() {
        proxy_roundtrip("proxy_init_send.json");
    }

    #[test]
    fn fixture_proxy_init_recv() {
        proxy_roundtrip("proxy_init_recv.json");
    }

    #[test]
    fn fixture_proxy_ack() {
        let packet = proxy_roundtrip("proxy_ack.json");
        assert_eq!(
            packet,
            ProxyPacket::Ack {
                port: 4321,
                ip: Ipv4Addr::new(205, 188, 9, 7)
            }
        );
    }

    #[test]
    fn fixture_proxy_ready() {
        assert_eq!(proxy_roundtrip("proxy_ready.json"), ProxyPacket::Ready);
    }

    #[test]
    fn fixture_proxy_error_is_timeout() {
        match proxy_roundtrip("proxy_error.json") {
            ProxyPacket::Error(code) => assert!(code.is_timeout()),
            other => panic!("expected error packet, got {other:?}"),
        }
    }

    // --- Checksums ---

    #[derive(Deserialize)]
    struct ChecksumVector {
        label: String,
        #[serde(default)]
        data_hex: Option<String>,
        #[serde(default)]
        pattern_len: Option<usize>,
        checksum: u32,
    }

    impl ChecksumVector {
        fn data(&self) -> Vec<u8> {
            match (&self.data_hex, self.pattern_len) {
                (Some(h), _) => fixture_bytes(&self.label, h),
                (None, Some(len)) => (0..len).map(|i| (i % 251) as u8).collect(),
                (None, None) => panic!("vector {} has no data", self.label),
            }
        }
    }

    #[test]
    fn fixture_checksum_vectors() {
        let vectors: Vec<ChecksumVector> = load_fixture("checksums.json");
        assert!(!vectors.is_empty());
        for vector in &vectors {
            let data = vector.data();
            assert_eq!(
                checksum_bytes(&data),
                vector.checksum,
                "checksum mismatch for {}",
                vector.label
            );

            let mut bytewise = OftChecksum::new();
            for byte in &data {
                bytewise.update(std::slice::from_ref(byte));
            }
            assert_eq!(bytewise.value(), vector.checksum, "bytewise checksum for {}", vector.label);

            // Any two-way split agrees with the single pass.
            let step = (data.len() / 64).max(1);
            for split in (0..=data.len()).step_by(step) {
                let mut state = OftChecksum::new();
                state.update(&data[..split]);
                state.update(&data[split..]);
                assert_eq!(
                    state.value(),
                    vector.checksum,
                    "checksum split at {split} for {}",
                    vector.label
                );
            }
        }
    }

    #[test]
    fn fixture_resume_checksums_match_vectors() {
        let vectors: Vec<ChecksumVector> = load_fixture("checksums.json");
        let prefix = vectors
            .iter()
            .find(|v| v.pattern_len == Some(4000))
            .map(|v| v.checksum);
        let full = vectors
            .iter()
            .find(|v| v.pattern_len == Some(10000))
            .map(|v| v.checksum);

        let fixture: OftFixture = load_fixture("oft_resume.json");
        assert_eq!(Some(fixture.received_checksum), prefix);
        assert_eq!(Some(fixture.checksum), full);
        assert_eq!(fixture.bytes_received, 4000);
    }
}
