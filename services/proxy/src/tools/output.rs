//! Result payloads returned by the tools.

use nettools_capture::{format_timestamp, CapturedPacket, Direction, Protocol};
use serde::Serialize;

use crate::proxy::ProxySummary;

/// Engine error surfaced as a normal result.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct StartOutput {
    pub status: &'static str,
    pub listen_port: u16,
    pub forward_to: String,
}

#[derive(Debug, Serialize)]
pub struct StopOutput {
    pub status: &'static str,
    pub listen_port: u16,
    pub bytes_captured: u64,
}

/// One capture as seen by callers; raw bytes stay inside the engine.
#[derive(Debug, Serialize)]
pub struct CaptureRecord {
    pub timestamp: String,
    pub direction: Direction,
    pub bytes: usize,
    pub hex_dump: String,
    pub ascii_strings: Vec<String>,
    pub detected_protocol: Protocol,
}

impl From<&CapturedPacket> for CaptureRecord {
    fn from(packet: &CapturedPacket) -> Self {
        Self {
            timestamp: format_timestamp(&packet.timestamp),
            direction: packet.direction,
            bytes: packet.bytes,
            hex_dump: packet.hex_dump.clone(),
            ascii_strings: packet.ascii_strings.clone(),
            detected_protocol: packet.detected_protocol,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProxyCaptures {
    pub listen_port: u16,
    pub forward_to: String,
    pub captures: Vec<CaptureRecord>,
    pub total_bytes_captured: u64,
    pub buffer_usage: String,
    pub buffer_bytes: usize,
}

#[derive(Debug, Serialize)]
pub struct OutputResult {
    pub proxies: Vec<ProxyCaptures>,
}

#[derive(Debug, Serialize)]
pub struct ProxyListing {
    pub listen_port: u16,
    pub forward_to: String,
    pub status: &'static str,
    pub active_connections: u64,
    pub total_connections: u64,
    pub bytes_captured: u64,
    pub buffer_usage: String,
    pub started_at: String,
}

impl From<&ProxySummary> for ProxyListing {
    fn from(summary: &ProxySummary) -> Self {
        Self {
            listen_port: summary.listen_port,
            forward_to: summary.forward_to.clone(),
            status: summary.state.as_str(),
            active_connections: summary.active_connections,
            total_connections: summary.total_connections,
            bytes_captured: summary.bytes_captured,
            buffer_usage: format_usage(summary.buffer.usage_percent),
            started_at: format_timestamp(&summary.started_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListResult {
    pub proxies: Vec<ProxyListing>,
}

/// One-decimal percentage, e.g. `"12.5%"`.
pub fn format_usage(percent: f64) -> String {
    format!("{:.1}%", percent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_formatting() {
        assert_eq!(format_usage(0.0), "0.0%");
        assert_eq!(format_usage(12.345), "12.3%");
        assert_eq!(format_usage(100.0), "100.0%");
    }

    #[test]
    fn capture_record_fields() {
        let packet = CapturedPacket::from_chunk(Direction::ClientToServer, b"GET / HTTP/1.1\r\n");
        let value = serde_json::to_value(CaptureRecord::from(&packet)).unwrap();
        let object = value.as_object().unwrap();

        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "ascii_strings",
                "bytes",
                "detected_protocol",
                "direction",
                "hex_dump",
                "timestamp"
            ]
        );
        assert_eq!(value["direction"], "Client->Server");
        assert_eq!(value["detected_protocol"], "HTTP/1.x");
        assert_eq!(value["bytes"], 16);
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }
}
