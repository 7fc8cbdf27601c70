//! IPC (Inter-Process Communication) module
//!
//! This module provides a Unix socket-based IPC server for controlling
//! the proxy at runtime: rule CRUD, tunnel start/stop, statistics
//! snapshots, and speed-test triggers.
//!
//! # Protocol
//!
//! Messages are length-prefixed JSON:
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: JSON-encoded command or response
//!
//! # Example
//!
//! ```no_run
//! use smart_proxy::ipc::{IpcClient, IpcCommand, IpcResponse};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = IpcClient::new("/var/run/smart-proxy.sock");
//!
//! // Check if server is alive
//! if client.ping().await? {
//!     println!("Server is alive!");
//! }
//!
//! // Get server status
//! let response = client.send(IpcCommand::Status).await?;
//! if let IpcResponse::Status(status) = response {
//!     println!("Tunnel: {}, rules: {}", status.tunnel, status.rule_count);
//! }
//! # Ok(())
//! # }
//! ```

mod handler;
mod protocol;
mod server;

pub use handler::IpcHandler;
pub use protocol::{
    decode_message, encode_message, ErrorCode, IpcCommand, IpcError, IpcResponse, ServerStatus,
    LENGTH_PREFIX_SIZE, MAX_MESSAGE_SIZE,
};
pub use server::{IpcClient, IpcServer};
