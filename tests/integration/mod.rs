//! Integration tests for smart-proxy
//!
//! This module contains integration tests for verifying the behavior of various
//! smart-proxy components in realistic scenarios.
//!
//! # Test Organization
//!
//! - `routing_e2e`: full-path tests through the HTTP CONNECT and SOCKS5
//!   listeners, with a relaying mock upstream standing in for the tunnel
//! - `tunnel_fsm`: tunnel supervisor lifecycle and its interplay with the
//!   routing policy
//! - `ipc_roundtrip`: management commands over a real Unix socket
//!
//! # Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test --test integration_tests
//!
//! # Run specific test module
//! cargo test --test integration_tests routing
//!
//! # Run tests that rebind fixed ports (marked with #[ignore])
//! cargo test --test integration_tests -- --ignored
//! ```
//!
//! # Test Requirements
//!
//! - All servers bind `127.0.0.1:0`; no network access or privileges needed
//! - Tests marked with `#[ignore]` rebind a previously used port and can
//!   race other processes for it

pub mod ipc_roundtrip;
pub mod routing_e2e;
pub mod tunnel_fsm;
