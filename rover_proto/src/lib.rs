//! Wire protocol for the motion and face MCU serial links.
//!
//! Packet structure (before COBS):
//!
//! ```text
//! v1: [type:u8] [seq:u8]                       [payload:N] [crc16:u16-LE]
//! v2: [type:u8] [seq:u32-LE] [t_src_us:u64-LE] [payload:N] [crc16:u16-LE]
//! ```
//!
//! On the wire each packet is COBS-encoded and terminated by a `0x00`
//! delimiter. All multi-byte values are little-endian. The envelope
//! version is negotiated per port via `SET_PROTOCOL_VERSION` (0x07).
//!
//! # Module Structure
//!
//! - [`frame`] - COBS + CRC16 framing, v1/v2 envelope encode/parse
//! - [`types`] - Packet type ids, fault/flag bitfields, wire enums
//! - [`motion`] - Motion MCU command builders and telemetry decoding
//! - [`face`] - Face MCU command builders and telemetry decoding
//! - [`time_sync`] - TIME_SYNC and protocol-version negotiation packets

pub mod face;
pub mod frame;
pub mod motion;
pub mod time_sync;
pub mod types;

pub use frame::{parse_frame, FrameError, ParsedPacket, ProtocolVersion};
pub use types::{Fault, FaceFlags, RangeStatus};
