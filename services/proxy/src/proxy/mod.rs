//! Capturing TCP proxy engine.
//!
//! This module provides:
//! - A registry of proxy instances keyed by listen port
//! - Per-instance accept loops that dial the forward target per client
//! - Bidirectional relays that copy every chunk into the capture buffer
//! - A one-shot stop signal used for instance and connection shutdown
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> Accept Loop -> dial upstream -> Relay (x2) -> Upstream
//!                                                         |
//!                                          Capture Buffer (per instance)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let registry = ProxyRegistry::new(ProxyOptions::default());
//! registry.start(8080, "localhost", 3000, DEFAULT_CAPTURE_LIMIT).await?;
//!
//! let proxy = registry.get(8080).await.unwrap();
//! for packet in proxy.buffer().get_all() {
//!     println!("{} {} {}", packet.direction, packet.bytes, packet.detected_protocol);
//! }
//!
//! let bytes = registry.stop(8080).await?;
//! ```

mod instance;
mod registry;
mod relay;
mod signal;

pub use instance::{
    format_target, InstanceConfig, ProxyInstance, ProxyState, ProxyStats, ProxySummary,
    DEFAULT_DIAL_TIMEOUT,
};
pub use registry::{ProxyOptions, ProxyRegistry};
pub use relay::{copy_with_capture, CaptureSink, RelaySignals, RELAY_BUFFER_SIZE};
pub use signal::StopSignal;
