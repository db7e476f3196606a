//! Protocol sniffing for captured chunks.
//!
//! Classification looks at a single chunk only. There is no per-connection
//! state, so a signature split across two reads is not recognized.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Request-line and status-line prefixes that identify HTTP/1.x.
const HTTP1_PREFIXES: &[&[u8]] = &[
    b"GET ",
    b"POST ",
    b"PUT ",
    b"DELETE ",
    b"HEAD ",
    b"OPTIONS ",
    b"HTTP/1.",
];

/// HTTP/2 client connection preface (first line).
const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0";

/// Substrings commonly found in gRPC method paths.
const GRPC_MARKERS: &[&[u8]] = &[b"/grpc.", b".proto."];

/// Minimum length of a printable run to be reported.
pub const MIN_ASCII_RUN: usize = 5;

/// Maximum number of printable runs reported per chunk.
pub const MAX_ASCII_RUNS: usize = 10;

/// Coarse protocol label for a captured chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "HTTP/1.x")]
    Http1,
    #[serde(rename = "HTTP/2")]
    Http2,
    #[serde(rename = "gRPC")]
    Grpc,
    #[serde(rename = "TLS")]
    Tls,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http1 => "HTTP/1.x",
            Protocol::Http2 => "HTTP/2",
            Protocol::Grpc => "gRPC",
            Protocol::Tls => "TLS",
            Protocol::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a chunk. Rules are checked in order and the first match wins.
pub fn detect_protocol(data: &[u8]) -> Protocol {
    if HTTP1_PREFIXES.iter().any(|prefix| data.starts_with(prefix)) {
        return Protocol::Http1;
    }

    if data.starts_with(HTTP2_PREFACE) {
        return Protocol::Http2;
    }

    if GRPC_MARKERS.iter().any(|marker| contains(data, marker)) {
        return Protocol::Grpc;
    }

    // TLS record header: content type 0x16 (handshake), major version 0x03
    if data.len() > 5 && data[0] == 0x16 && data[1] == 0x03 {
        return Protocol::Tls;
    }

    Protocol::Unknown
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}

/// Extract maximal runs of printable ASCII (0x20..=0x7E).
///
/// Runs shorter than [`MIN_ASCII_RUN`] are skipped and at most
/// [`MAX_ASCII_RUNS`] runs are returned, in the order they appear.
pub fn extract_ascii_strings(data: &[u8]) -> Vec<String> {
    data.split(|b| !is_printable(*b))
        .filter(|run| run.len() >= MIN_ASCII_RUN)
        .take(MAX_ASCII_RUNS)
        .map(|run| String::from_utf8_lossy(run).into_owned())
        .collect()
}

pub(crate) fn is_printable(b: u8) -> bool {
    (0x20..=0x7e).contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::get(b"GET / HTTP/1.1\r\n", Protocol::Http1)]
    #[case::post(b"POST /api HTTP/1.1\r\n", Protocol::Http1)]
    #[case::put(b"PUT /x HTTP/1.1", Protocol::Http1)]
    #[case::delete(b"DELETE /x HTTP/1.1", Protocol::Http1)]
    #[case::head(b"HEAD / HTTP/1.0", Protocol::Http1)]
    #[case::options(b"OPTIONS * HTTP/1.1", Protocol::Http1)]
    #[case::response(b"HTTP/1.1 200 OK\r\n", Protocol::Http1)]
    #[case::h2_preface(b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n", Protocol::Http2)]
    #[case::grpc_path(b"\x00\x00/grpc.health.v1.Health/Check", Protocol::Grpc)]
    #[case::proto_marker(b"xx.proto.yy", Protocol::Grpc)]
    #[case::tls_hello(&[0x16, 0x03, 0x01, 0x00, 0xa5, 0x01], Protocol::Tls)]
    #[case::plain(b"hello world", Protocol::Unknown)]
    #[case::empty(b"", Protocol::Unknown)]
    fn detects_protocol(#[case] data: &[u8], #[case] expected: Protocol) {
        assert_eq!(detect_protocol(data), expected);
    }

    #[test]
    fn tls_header_needs_more_than_five_bytes() {
        assert_eq!(
            detect_protocol(&[0x16, 0x03, 0x01, 0x00, 0xa5]),
            Protocol::Unknown
        );
    }

    #[test]
    fn lowercase_method_is_not_http() {
        assert_eq!(detect_protocol(b"get / HTTP/1.1"), Protocol::Unknown);
    }

    #[test]
    fn http1_wins_over_grpc_marker() {
        assert_eq!(
            detect_protocol(b"POST /grpc.health.v1.Health/Check HTTP/1.1"),
            Protocol::Http1
        );
    }

    #[test]
    fn protocol_labels() {
        assert_eq!(Protocol::Http1.to_string(), "HTTP/1.x");
        assert_eq!(Protocol::Grpc.as_str(), "gRPC");
    }

    #[test]
    fn extracts_printable_runs() {
        assert_eq!(
            extract_ascii_strings(b"AAAAA\x00BBBBB\x01C"),
            vec!["AAAAA".to_string(), "BBBBB".to_string()]
        );
    }

    #[test]
    fn short_runs_are_skipped() {
        assert!(extract_ascii_strings(b"abcd\x00efgh\x7fijk").is_empty());
    }

    #[test]
    fn trailing_run_is_kept() {
        assert_eq!(extract_ascii_strings(b"\xffhello"), vec!["hello"]);
    }

    #[test]
    fn at_most_ten_runs() {
        let data = b"run01\x00run02\x00run03\x00run04\x00run05\x00run06\x00\
run07\x00run08\x00run09\x00run10\x00run11\x00run12";
        let runs = extract_ascii_strings(data);
        assert_eq!(runs.len(), MAX_ASCII_RUNS);
        assert_eq!(runs.first().map(String::as_str), Some("run01"));
        assert_eq!(runs.last().map(String::as_str), Some("run10"));
    }
}
