//! Capturing TCP proxy with a stdio tool interface.

pub mod config;
pub mod error;
pub mod logging;
pub mod mcp;
pub mod proxy;
pub mod tools;

pub use config::{Config, LogFormat};
pub use error::ProxyError;
pub use mcp::McpServer;
pub use proxy::{ProxyInstance, ProxyOptions, ProxyRegistry, ProxyState, StopSignal};
pub use tools::{ProxyTools, ToolDefaults, ToolError};
