//! MCU link layer: async serial transport, typed clients, clock sync.
//!
//! Each MCU port runs one transport task that owns the serial device,
//! extracts COBS frames, and fans decoded packets out over a broadcast
//! channel. The tick loop and the per-port clock-sync task subscribe;
//! clients are thin typed codecs over the shared write handle.
//!
//! # Module Structure
//!
//! - [`transport`] - Serial I/O task with reconnect backoff and counters
//! - [`motion`] - Motion MCU client (twist, faults, telemetry)
//! - [`face`] - Face MCU client (mood/gesture/system commands, events)
//! - [`clock`] - Per-MCU ping/pong offset + drift estimator

pub mod clock;
pub mod face;
pub mod motion;
pub mod transport;

pub use transport::{spawn_transport, TransportEvent, TransportHandle, TransportSnapshot};
