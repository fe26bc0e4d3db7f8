//! Motion MCU client.
//!
//! Thin typed codec over the shared transport: command builders bump a
//! per-client sequence counter and hand frames to the write queue;
//! inbound packets decode into the latest telemetry snapshot.

use tracing::debug;

use rover_proto::motion::{
    build_clear_faults, build_estop, build_set_config, build_set_twist, build_stop, StatePayload,
};
use rover_proto::time_sync::build_set_protocol_version;
use rover_proto::types::MOTION_TEL_STATE;
use rover_proto::ParsedPacket;

use crate::transport::{TransportEvent, TransportHandle};

/// Latest decoded `STATE` telemetry plus receive metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotionTelemetry {
    pub state: StatePayload,
    pub seq: u32,
    pub rx_mono_ns: u64,
    /// Measured linear speed from wheel average [mm/s].
    pub v_meas_mm_s: f32,
    /// Measured yaw rate from gyro [mrad/s].
    pub w_meas_mrad_s: f32,
}

/// Send commands to and decode telemetry from the motion MCU.
pub struct MotionClient {
    transport: TransportHandle,
    seq: u8,
    latest: Option<MotionTelemetry>,
    rx_state_packets: u64,
    rx_bad_payload: u64,
    rx_unknown: u64,
}

impl MotionClient {
    pub fn new(transport: TransportHandle) -> Self {
        Self {
            transport,
            seq: 0,
            latest: None,
            rx_state_packets: 0,
            rx_bad_payload: 0,
            rx_unknown: 0,
        }
    }

    pub fn connected(&self) -> bool {
        self.transport.connected()
    }

    /// Latest telemetry, if any arrived since connect.
    pub fn telemetry(&self) -> Option<&MotionTelemetry> {
        self.latest.as_ref()
    }

    // ── Commands ─────────────────────────────────────────────────

    pub fn send_twist(&mut self, v_mm_s: i16, w_mrad_s: i16) -> bool {
        let seq = self.next_seq();
        self.transport.write(build_set_twist(seq, v_mm_s, w_mrad_s))
    }

    pub fn send_stop(&mut self, reason: u8) -> bool {
        let seq = self.next_seq();
        self.transport.write(build_stop(seq, reason))
    }

    pub fn send_estop(&mut self) -> bool {
        let seq = self.next_seq();
        self.transport.write(build_estop(seq))
    }

    pub fn send_clear_faults(&mut self, mask: u16) -> bool {
        let seq = self.next_seq();
        self.transport.write(build_clear_faults(seq, mask))
    }

    pub fn send_set_config(&mut self, param_id: u8, value: [u8; 4]) -> bool {
        let seq = self.next_seq();
        self.transport.write(build_set_config(seq, param_id, value))
    }

    // ── Event handling ───────────────────────────────────────────

    /// Feed one transport event; called by the tick loop's drain.
    pub fn on_transport_event(&mut self, event: &TransportEvent) {
        match event {
            TransportEvent::Connected => {
                // Offer the v2 envelope; firmware that ignores it keeps v1.
                let seq = self.next_seq();
                self.transport.write(build_set_protocol_version(seq, 2));
            }
            TransportEvent::Disconnected => {
                self.latest = None;
            }
            TransportEvent::Packet(pkt) => self.on_packet(pkt),
        }
    }

    fn on_packet(&mut self, pkt: &ParsedPacket) {
        match pkt.pkt_type {
            MOTION_TEL_STATE => match StatePayload::parse(&pkt.payload) {
                Some(state) => {
                    self.rx_state_packets += 1;
                    let v_meas =
                        f32::from(state.speed_l_mm_s) * 0.5 + f32::from(state.speed_r_mm_s) * 0.5;
                    self.latest = Some(MotionTelemetry {
                        state,
                        seq: pkt.seq,
                        rx_mono_ns: pkt.t_rx_ns,
                        v_meas_mm_s: v_meas,
                        w_meas_mrad_s: f32::from(state.gyro_z_mrad_s),
                    });
                }
                None => self.rx_bad_payload += 1,
            },
            rover_proto::types::PROTOCOL_VERSION_ACK => {
                if pkt.payload.first().copied() == Some(2) {
                    self.transport
                        .set_protocol_version(rover_proto::ProtocolVersion::V2);
                }
            }
            rover_proto::types::TIME_SYNC_RESP => {
                // Consumed by the clock-sync task on its own subscription.
            }
            other => {
                self.rx_unknown += 1;
                debug!("motion: unknown packet type 0x{:02X}", other);
            }
        }
    }

    pub fn rx_counters(&self) -> (u64, u64, u64) {
        (self.rx_state_packets, self.rx_bad_payload, self.rx_unknown)
    }

    fn next_seq(&mut self) -> u8 {
        let s = self.seq;
        self.seq = self.seq.wrapping_add(1);
        s
    }
}
