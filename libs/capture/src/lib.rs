//! Capture primitives for the nettools proxy.
//!
//! This library provides:
//! - Captured packet records with a hex preview and printable-string extraction
//! - Single-chunk protocol sniffing (HTTP/1.x, HTTP/2, gRPC, TLS)
//! - A byte-budgeted FIFO capture buffer safe for concurrent use
//!
//! Nothing here performs I/O; the proxy engine feeds chunks in as it relays them.

mod buffer;
mod packet;
mod sniff;

pub use buffer::{BufferStats, CaptureBuffer, DEFAULT_CAPTURE_LIMIT};
pub use packet::{
    format_timestamp, hex_dump, CapturedPacket, Direction, HEX_PREVIEW_BYTES, TIMESTAMP_FORMAT,
};
pub use sniff::{
    detect_protocol, extract_ascii_strings, Protocol, MAX_ASCII_RUNS, MIN_ASCII_RUN,
};
