//! Error types for the proxy engine.

use std::io;

use thiserror::Error;

/// Errors surfaced by the proxy registry and connection handling.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// An instance already owns this listen port.
    #[error("proxy already running on port {port}")]
    AlreadyRunning { port: u16 },

    /// The OS refused the listen socket.
    #[error("failed to bind to port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    /// No instance owns this listen port.
    #[error("no proxy running on port {port}")]
    NotFound { port: u16 },

    /// Could not reach the forward target for one client connection.
    #[error("failed to connect to {target}: {source}")]
    UpstreamDial {
        target: String,
        #[source]
        source: io::Error,
    },
}

impl ProxyError {
    /// Short machine-readable code for logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ProxyError::AlreadyRunning { .. } => "already_running",
            ProxyError::Bind { .. } => "bind_failed",
            ProxyError::NotFound { .. } => "not_found",
            ProxyError::UpstreamDial { .. } => "upstream_dial_failed",
        }
    }
}

/// Whether an I/O error is just the peer or listener going away.
pub(crate) fn is_orderly_close(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::NotConnected
    )
}
