//! Captured packet records.

use std::fmt::{self, Write as _};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sniff::{detect_protocol, extract_ascii_strings, is_printable, Protocol};

/// Number of leading bytes rendered in the hex preview.
pub const HEX_PREVIEW_BYTES: usize = 200;

/// Timestamp format used for everything surfaced to callers.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Direction of a captured chunk relative to the proxied connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "Client->Server")]
    ClientToServer,
    #[serde(rename = "Server->Client")]
    ServerToClient,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToServer => "Client->Server",
            Direction::ServerToClient => "Server->Client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One read chunk as seen by the relay.
///
/// `raw` is kept for byte-budget accounting in the capture buffer and is
/// never handed to callers.
#[derive(Debug, Clone)]
pub struct CapturedPacket {
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    /// Length of the chunk as read from the socket.
    pub bytes: usize,
    pub hex_dump: String,
    pub ascii_strings: Vec<String>,
    pub detected_protocol: Protocol,
    pub(crate) raw: Vec<u8>,
}

impl CapturedPacket {
    /// Build a record for a chunk read at the current time.
    pub fn from_chunk(direction: Direction, data: &[u8]) -> Self {
        Self::with_timestamp(Utc::now(), direction, data)
    }

    pub fn with_timestamp(timestamp: DateTime<Utc>, direction: Direction, data: &[u8]) -> Self {
        let preview = &data[..data.len().min(HEX_PREVIEW_BYTES)];

        Self {
            timestamp,
            direction,
            bytes: data.len(),
            hex_dump: hex_dump(preview),
            ascii_strings: extract_ascii_strings(data),
            detected_protocol: detect_protocol(data),
            raw: data.to_vec(),
        }
    }

    /// Bytes this packet counts against a buffer budget.
    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// Render a timestamp with millisecond precision in UTC.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Canonical hex+ASCII dump, 16 bytes per line.
///
/// ```text
/// 00000000  47 45 54 20 2f 20 48 54  54 50 2f 31 2e 31 0d 0a  |GET / HTTP/1.1..|
/// ```
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(16) * 79);

    for (line, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", line * 16);

        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, "{:02x} ", b);
                }
                None => out.push_str("   "),
            }
            if i == 7 {
                out.push(' ');
            }
        }

        out.push_str(" |");
        out.extend(
            chunk
                .iter()
                .map(|&b| if is_printable(b) { b as char } else { '.' }),
        );
        out.push_str("|\n");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hex_dump_full_line() {
        assert_eq!(
            hex_dump(b"GET / HTTP/1.1\r\n"),
            "00000000  47 45 54 20 2f 20 48 54  54 50 2f 31 2e 31 0d 0a  |GET / HTTP/1.1..|\n"
        );
    }

    #[test]
    fn hex_dump_short_line_is_padded() {
        assert_eq!(
            hex_dump(b"hi\x00"),
            "00000000  68 69 00                                          |hi.|\n"
        );
    }

    #[test]
    fn hex_dump_offsets() {
        let dump = hex_dump(&[0u8; 20]);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("00000010  00 00 00 00"));
    }

    #[test]
    fn hex_dump_empty() {
        assert_eq!(hex_dump(b""), "");
    }

    #[test]
    fn from_chunk_fills_metadata() {
        let packet = CapturedPacket::from_chunk(Direction::ClientToServer, b"GET / HTTP/1.1\r\n");
        assert_eq!(packet.bytes, 16);
        assert_eq!(packet.raw_len(), 16);
        assert_eq!(packet.detected_protocol, Protocol::Http1);
        assert_eq!(packet.ascii_strings, vec!["GET / HTTP/1.1"]);
    }

    #[test]
    fn preview_is_limited() {
        let data = vec![b'a'; 1000];
        let packet = CapturedPacket::from_chunk(Direction::ServerToClient, &data);
        // 200 bytes -> 12 full lines + one line of 8
        assert_eq!(packet.hex_dump.lines().count(), 13);
        assert_eq!(packet.bytes, 1000);
    }

    #[test]
    fn fixed_timestamp_and_labels() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap();
        let packet = CapturedPacket::with_timestamp(ts, Direction::ServerToClient, b"hello world");

        assert_eq!(format_timestamp(&packet.timestamp), "2024-03-01T12:30:45.000Z");
        assert_eq!(
            serde_json::to_value(packet.direction).unwrap(),
            "Server->Client"
        );
        assert_eq!(packet.detected_protocol, Protocol::Unknown);
        assert_eq!(packet.raw(), b"hello world");
    }
}
