//! Shared utilities.

pub mod clock;
pub mod hash;
pub mod telemetry;

pub use clock::{now_ns, now_unix};
pub use hash::sha1_hex;
pub use telemetry::init_tracing;
