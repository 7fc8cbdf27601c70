//! I/O utilities
//!
//! The bidirectional relay that carries client traffic to its outbound
//! after a routing decision is made.

pub mod copy;

pub use copy::{relay_bidirectional, relay_with_buffer, RelayOutcome, RELAY_BUFFER_SIZE};
