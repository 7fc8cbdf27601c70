//! Outbound module
//!
//! Two ways out of the router: [`DirectOutbound`] dials the destination
//! itself, [`Socks5Outbound`] carries the connection through the
//! upstream tunnel's local SOCKS5 entry. Both implement [`Outbound`],
//! so the router picks a path per connection without caring which one
//! it got.
//!
//! # Example
//!
//! ```no_run
//! use smart_proxy::outbound::{DirectOutbound, Outbound, TargetAddr};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let outbound = DirectOutbound::new();
//! let target = TargetAddr::parse("example.com:443")?;
//!
//! let conn = outbound.connect(&target, Duration::from_secs(10)).await?;
//! println!("Connected via {}", conn.remote_addr());
//! # Ok(())
//! # }
//! ```

pub mod direct;
pub mod socks5;
pub mod socks5_common;
pub mod target;
pub mod traits;

pub use direct::DirectOutbound;
pub use socks5::Socks5Outbound;
pub use target::TargetAddr;
pub use traits::{Outbound, OutboundConnection};
