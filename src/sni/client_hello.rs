//! TLS record and ClientHello parsing.
//!
//! Only the first handshake flight is read: records are consumed until one
//! complete ClientHello message has been assembled, and not a byte further.
//! A ClientHello may be fragmented over several handshake records.
//!
//! ClientHello body layout:
//! - 2 bytes: legacy version
//! - 32 bytes: random
//! - 1 byte + n: session id
//! - 2 bytes + n: cipher suites
//! - 1 byte + n: compression methods
//! - 2 bytes + n: extensions (optional)

use crate::error::PeekError;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const RECORD_HEADER_LEN: usize = 5;
/// Largest plaintext record a peer may send
pub const MAX_RECORD_LEN: usize = 16 * 1024;

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const HANDSHAKE_HEADER_LEN: usize = 4;

const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
const EXT_EC_POINT_FORMATS: u16 = 0x000b;
const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000d;
const EXT_ALPN: u16 = 0x0010;
const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;

const NAME_TYPE_HOST_NAME: u8 = 0x00;

pub const VERSION_TLS10: u16 = 0x0301;
pub const VERSION_TLS11: u16 = 0x0302;
pub const VERSION_TLS12: u16 = 0x0303;
pub const VERSION_TLS13: u16 = 0x0304;

/// Negotiation offer extracted from a ClientHello.
///
/// Only `server_name` drives routing; the remaining fields are kept for
/// logging and for callers that want to make finer decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHelloInfo {
    /// SNI host name, empty when the client sent none
    pub server_name: String,
    pub legacy_version: u16,
    /// From the supported_versions extension, or derived from the legacy version
    pub supported_versions: Vec<u16>,
    pub cipher_suites: Vec<u16>,
    pub alpn_protocols: Vec<String>,
    pub supported_curves: Vec<u16>,
    pub supported_points: Vec<u8>,
    pub signature_schemes: Vec<u16>,
}

impl ClientHelloInfo {
    /// Parse a ClientHello handshake body (without the 4-byte handshake header)
    pub fn parse(body: &[u8]) -> Result<Self, PeekError> {
        let mut r = Reader::new(body);

        let legacy_version = r.u16().ok_or(PeekError::Malformed("truncated version"))?;
        r.take(32).ok_or(PeekError::Malformed("truncated random"))?;

        let session_id = r
            .vec8()
            .ok_or(PeekError::Malformed("truncated session id"))?;
        if session_id.len() > 32 {
            return Err(PeekError::Malformed("session id longer than 32 bytes"));
        }

        let suites = r
            .vec16()
            .ok_or(PeekError::Malformed("truncated cipher suites"))?;
        if suites.is_empty() || suites.len() % 2 != 0 {
            return Err(PeekError::Malformed("invalid cipher suite list"));
        }
        let cipher_suites = u16_list(suites);

        let compression = r
            .vec8()
            .ok_or(PeekError::Malformed("truncated compression methods"))?;
        if compression.is_empty() {
            return Err(PeekError::Malformed("empty compression methods"));
        }

        let mut info = ClientHelloInfo {
            legacy_version,
            cipher_suites,
            ..Default::default()
        };

        if !r.is_empty() {
            let extensions = r
                .vec16()
                .ok_or(PeekError::Malformed("truncated extensions"))?;
            if !r.is_empty() {
                return Err(PeekError::Malformed("trailing data after extensions"));
            }
            info.parse_extensions(extensions)?;
        }

        if info.supported_versions.is_empty() {
            info.supported_versions = [VERSION_TLS13, VERSION_TLS12, VERSION_TLS11, VERSION_TLS10]
                .into_iter()
                .filter(|v| *v <= legacy_version)
                .collect();
        }

        Ok(info)
    }

    fn parse_extensions(&mut self, data: &[u8]) -> Result<(), PeekError> {
        let mut r = Reader::new(data);
        let mut seen = Vec::new();

        while !r.is_empty() {
            let ext_type = r
                .u16()
                .ok_or(PeekError::Malformed("truncated extension header"))?;
            let body = r
                .vec16()
                .ok_or(PeekError::Malformed("truncated extension body"))?;
            if seen.contains(&ext_type) {
                return Err(PeekError::Malformed("duplicate extension"));
            }
            seen.push(ext_type);

            match ext_type {
                EXT_SERVER_NAME => self.server_name = parse_server_name(body)?,
                EXT_SUPPORTED_GROUPS => {
                    let groups = Reader::new(body)
                        .exact_vec16()
                        .ok_or(PeekError::Malformed("invalid supported_groups"))?;
                    self.supported_curves = u16_list(groups);
                }
                EXT_EC_POINT_FORMATS => {
                    let points = Reader::new(body)
                        .exact_vec8()
                        .ok_or(PeekError::Malformed("invalid ec_point_formats"))?;
                    self.supported_points = points.to_vec();
                }
                EXT_SIGNATURE_ALGORITHMS => {
                    let schemes = Reader::new(body)
                        .exact_vec16()
                        .ok_or(PeekError::Malformed("invalid signature_algorithms"))?;
                    self.signature_schemes = u16_list(schemes);
                }
                EXT_ALPN => self.alpn_protocols = parse_alpn(body)?,
                EXT_SUPPORTED_VERSIONS => {
                    let versions = Reader::new(body)
                        .exact_vec8()
                        .ok_or(PeekError::Malformed("invalid supported_versions"))?;
                    if versions.len() % 2 != 0 {
                        return Err(PeekError::Malformed("invalid supported_versions"));
                    }
                    self.supported_versions = u16_list(versions);
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn parse_server_name(body: &[u8]) -> Result<String, PeekError> {
    let list = Reader::new(body)
        .exact_vec16()
        .ok_or(PeekError::Malformed("invalid server_name extension"))?;
    if list.is_empty() {
        return Err(PeekError::Malformed("empty server_name list"));
    }

    let mut r = Reader::new(list);
    let mut server_name: Option<String> = None;
    while !r.is_empty() {
        let name_type = r
            .u8()
            .ok_or(PeekError::Malformed("truncated server name entry"))?;
        let name = r
            .vec16()
            .ok_or(PeekError::Malformed("truncated server name entry"))?;
        if name_type != NAME_TYPE_HOST_NAME {
            continue;
        }
        if server_name.is_some() {
            return Err(PeekError::Malformed("multiple host names"));
        }
        if !is_dns_host_name(name) {
            return Err(PeekError::Malformed("server name is not a DNS host name"));
        }
        // Only ASCII passed the check above
        server_name = Some(String::from_utf8_lossy(name).into_owned());
    }

    Ok(server_name.unwrap_or_default())
}

/// Longest DNS name in its dotted text form
pub const MAX_HOST_NAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// ASCII letters, digits, `-` and `_` in dot-separated labels of 1 to 63
/// bytes, no trailing dot.
pub fn is_dns_host_name(name: &[u8]) -> bool {
    if name.is_empty() || name.len() > MAX_HOST_NAME_LEN {
        return false;
    }
    name.split(|b| *b == b'.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && label
                .iter()
                .all(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_')
    })
}

fn parse_alpn(body: &[u8]) -> Result<Vec<String>, PeekError> {
    let list = Reader::new(body)
        .exact_vec16()
        .ok_or(PeekError::Malformed("invalid ALPN extension"))?;
    if list.is_empty() {
        return Err(PeekError::Malformed("empty ALPN list"));
    }

    let mut r = Reader::new(list);
    let mut protocols = Vec::new();
    while !r.is_empty() {
        let proto = r
            .vec8()
            .ok_or(PeekError::Malformed("truncated ALPN protocol"))?;
        if proto.is_empty() {
            return Err(PeekError::Malformed("empty ALPN protocol"));
        }
        protocols.push(String::from_utf8_lossy(proto).into_owned());
    }
    Ok(protocols)
}

fn u16_list(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// Bounds-checked big-endian cursor over a byte slice
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.buf.len() < n {
            return None;
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Some(head)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn vec8(&mut self) -> Option<&'a [u8]> {
        let len = self.u8()? as usize;
        self.take(len)
    }

    fn vec16(&mut self) -> Option<&'a [u8]> {
        let len = self.u16()? as usize;
        self.take(len)
    }

    /// Length-prefixed vector that must span the whole remaining input
    fn exact_vec8(mut self) -> Option<&'a [u8]> {
        let v = self.vec8()?;
        self.is_empty().then_some(v)
    }

    fn exact_vec16(mut self) -> Option<&'a [u8]> {
        let v = self.vec16()?;
        self.is_empty().then_some(v)
    }
}

/// Read handshake records until one complete ClientHello is available.
///
/// Consumes exactly the records that carry the ClientHello, including any
/// handshake bytes that follow it inside the last of them. `max_bytes`
/// bounds the total number of bytes read, headers included.
pub async fn read_client_hello<R>(
    reader: &mut R,
    max_bytes: usize,
) -> Result<ClientHelloInfo, PeekError>
where
    R: AsyncRead + Unpin,
{
    let mut handshake: Vec<u8> = Vec::new();
    let mut consumed = 0usize;

    loop {
        let mut header = [0u8; RECORD_HEADER_LEN];
        read_full(reader, &mut header).await?;

        if header[0] != CONTENT_TYPE_HANDSHAKE {
            return Err(if consumed == 0 {
                PeekError::NotTls
            } else {
                PeekError::Malformed("interleaved non-handshake record")
            });
        }
        // Every record version since SSL 3.0 has a major byte of 3
        if header[1] != 0x03 {
            return Err(if consumed == 0 {
                PeekError::NotTls
            } else {
                PeekError::Malformed("unexpected record version")
            });
        }

        let record_len = u16::from_be_bytes([header[3], header[4]]) as usize;
        if record_len == 0 {
            return Err(PeekError::Malformed("empty handshake record"));
        }
        if record_len > MAX_RECORD_LEN {
            return Err(PeekError::Malformed("oversized record"));
        }

        consumed += RECORD_HEADER_LEN + record_len;
        if consumed > max_bytes {
            return Err(PeekError::TooLarge { limit: max_bytes });
        }

        let start = handshake.len();
        handshake.resize(start + record_len, 0);
        read_full(reader, &mut handshake[start..]).await?;

        if handshake.len() < HANDSHAKE_HEADER_LEN {
            continue;
        }
        if handshake[0] != HANDSHAKE_CLIENT_HELLO {
            return Err(PeekError::UnexpectedMessage(handshake[0]));
        }

        let message_len = ((handshake[1] as usize) << 16)
            | ((handshake[2] as usize) << 8)
            | handshake[3] as usize;
        if HANDSHAKE_HEADER_LEN + message_len > max_bytes {
            return Err(PeekError::TooLarge { limit: max_bytes });
        }

        let message_end = HANDSHAKE_HEADER_LEN + message_len;
        // Handshake bytes sharing the final record stay in the captured
        // flight and reach the backend with the hello.
        if handshake.len() >= message_end {
            return ClientHelloInfo::parse(&handshake[HANDSHAKE_HEADER_LEN..message_end]);
        }
    }
}

async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<(), PeekError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(PeekError::Incomplete),
        Err(e) => Err(PeekError::Io(e)),
    }
}
