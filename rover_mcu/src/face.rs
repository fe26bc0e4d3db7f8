//! Face MCU client.
//!
//! Commands: mood/intensity/gaze state, one-shot gestures, system overlay,
//! talking animation, renderer flags, conversation border phase.
//! Telemetry: status mirror, touch events, button events, heartbeat.
//! Touch/button events are buffered and drained by the tick loop once per
//! tick instead of invoking callbacks from the transport task.

use std::collections::VecDeque;

use tracing::debug;

use rover_common::time::mono_ns;
use rover_proto::face::{
    build_gesture, build_set_conv_state, build_set_flags, build_set_state, build_set_system,
    build_set_talking, ButtonEventPayload, FaceStatusPayload, HeartbeatPayload, TouchEventPayload,
};
use rover_proto::time_sync::build_set_protocol_version;
use rover_proto::types::{
    FaceFlags, FACE_TEL_BUTTON, FACE_TEL_HEARTBEAT, FACE_TEL_STATUS, FACE_TEL_TOUCH,
};
use rover_proto::ParsedPacket;

use crate::transport::{TransportEvent, TransportHandle};

/// Cap on buffered input events between tick drains.
const EVENT_QUEUE_CAP: usize = 32;

/// Latest status mirror from the face MCU.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaceTelemetry {
    pub status: FaceStatusPayload,
    pub seq: u32,
    pub rx_mono_ns: u64,
}

/// A touch event with host receive timestamp.
#[derive(Debug, Clone, Copy)]
pub struct TouchEvent {
    pub event_type: u8,
    pub x: u16,
    pub y: u16,
    pub t_mono_ms: f64,
}

/// A button event with host receive timestamp.
#[derive(Debug, Clone, Copy)]
pub struct ButtonEvent {
    pub button_id: u8,
    pub event_type: u8,
    pub state: u8,
    pub t_mono_ms: f64,
}

/// Buffered face input event.
#[derive(Debug, Clone, Copy)]
pub enum FaceInput {
    Touch(TouchEvent),
    Button(ButtonEvent),
}

/// Send commands to and receive telemetry from the face MCU.
pub struct FaceClient {
    transport: TransportHandle,
    seq: u8,
    latest: Option<FaceTelemetry>,
    last_heartbeat: Option<HeartbeatPayload>,
    inputs: VecDeque<FaceInput>,
    rx_status: u64,
    rx_touch: u64,
    rx_button: u64,
    rx_heartbeat: u64,
    rx_bad_payload: u64,
    rx_unknown: u64,
    dropped_inputs: u64,
}

impl FaceClient {
    pub fn new(transport: TransportHandle) -> Self {
        Self {
            transport,
            seq: 0,
            latest: None,
            last_heartbeat: None,
            inputs: VecDeque::new(),
            rx_status: 0,
            rx_touch: 0,
            rx_button: 0,
            rx_heartbeat: 0,
            rx_bad_payload: 0,
            rx_unknown: 0,
            dropped_inputs: 0,
        }
    }

    pub fn connected(&self) -> bool {
        self.transport.connected()
    }

    pub fn telemetry(&self) -> Option<&FaceTelemetry> {
        self.latest.as_ref()
    }

    pub fn last_heartbeat(&self) -> Option<&HeartbeatPayload> {
        self.last_heartbeat.as_ref()
    }

    /// Drain buffered touch/button events in arrival order.
    pub fn take_inputs(&mut self) -> Vec<FaceInput> {
        self.inputs.drain(..).collect()
    }

    // ── Commands ─────────────────────────────────────────────────

    pub fn send_state(
        &mut self,
        mood_id: u8,
        intensity: f32,
        gaze_x: f32,
        gaze_y: f32,
        brightness: f32,
    ) -> bool {
        let seq = self.next_seq();
        self.transport.write(build_set_state(
            seq, mood_id, intensity, gaze_x, gaze_y, brightness,
        ))
    }

    pub fn send_gesture(&mut self, gesture_id: u8, duration_ms: u16) -> bool {
        let seq = self.next_seq();
        self.transport.write(build_gesture(seq, gesture_id, duration_ms))
    }

    pub fn send_system_mode(&mut self, mode: u8, param: u8) -> bool {
        let seq = self.next_seq();
        self.transport.write(build_set_system(seq, mode, 0, param))
    }

    pub fn send_talking(&mut self, talking: bool, energy: u8) -> bool {
        let seq = self.next_seq();
        self.transport.write(build_set_talking(seq, talking, energy))
    }

    pub fn send_flags(&mut self, flags: FaceFlags) -> bool {
        let seq = self.next_seq();
        self.transport.write(build_set_flags(seq, flags))
    }

    pub fn send_conv_state(&mut self, phase: u8) -> bool {
        let seq = self.next_seq();
        self.transport.write(build_set_conv_state(seq, phase))
    }

    // ── Event handling ───────────────────────────────────────────

    pub fn on_transport_event(&mut self, event: &TransportEvent) {
        match event {
            TransportEvent::Connected => {
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
        let t_mono_ms = pkt.t_rx_ns as f64 / 1e6;
        match pkt.pkt_type {
            FACE_TEL_STATUS => match FaceStatusPayload::parse(&pkt.payload) {
                Some(status) => {
                    self.rx_status += 1;
                    self.latest = Some(FaceTelemetry {
                        status,
                        seq: pkt.seq,
                        rx_mono_ns: if pkt.t_rx_ns > 0 { pkt.t_rx_ns } else { mono_ns() },
                    });
                }
                None => self.rx_bad_payload += 1,
            },
            FACE_TEL_TOUCH => match TouchEventPayload::parse(&pkt.payload) {
                Some(touch) => {
                    self.rx_touch += 1;
                    self.push_input(FaceInput::Touch(TouchEvent {
                        event_type: touch.event_type,
                        x: touch.x,
                        y: touch.y,
                        t_mono_ms,
                    }));
                }
                None => self.rx_bad_payload += 1,
            },
            FACE_TEL_BUTTON => match ButtonEventPayload::parse(&pkt.payload) {
                Some(btn) => {
                    self.rx_button += 1;
                    self.push_input(FaceInput::Button(ButtonEvent {
                        button_id: btn.button_id,
                        event_type: btn.event_type,
                        state: btn.state,
                        t_mono_ms,
                    }));
                }
                None => self.rx_bad_payload += 1,
            },
            FACE_TEL_HEARTBEAT => match HeartbeatPayload::parse(&pkt.payload) {
                Some(hb) => {
                    self.rx_heartbeat += 1;
                    self.last_heartbeat = Some(hb);
                }
                None => self.rx_bad_payload += 1,
            },
            rover_proto::types::PROTOCOL_VERSION_ACK => {
                if pkt.payload.first().copied() == Some(2) {
                    self.transport
                        .set_protocol_version(rover_proto::ProtocolVersion::V2);
                }
            }
            rover_proto::types::TIME_SYNC_RESP => {}
            other => {
                self.rx_unknown += 1;
                debug!("face: unknown packet type 0x{:02X}", other);
            }
        }
    }

    fn push_input(&mut self, input: FaceInput) {
        if self.inputs.len() >= EVENT_QUEUE_CAP {
            self.inputs.pop_front();
            self.dropped_inputs += 1;
        }
        self.inputs.push_back(input);
    }

    pub fn rx_counters(&self) -> FaceRxCounters {
        FaceRxCounters {
            status: self.rx_status,
            touch: self.rx_touch,
            button: self.rx_button,
            heartbeat: self.rx_heartbeat,
            bad_payload: self.rx_bad_payload,
            unknown: self.rx_unknown,
            dropped_inputs: self.dropped_inputs,
        }
    }

    fn next_seq(&mut self) -> u8 {
        let s = self.seq;
        self.seq = self.seq.wrapping_add(1);
        s
    }
}

/// Receive-side counters for telemetry.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaceRxCounters {
    pub status: u64,
    pub touch: u64,
    pub button: u64,
    pub heartbeat: u64,
    pub bad_payload: u64,
    pub unknown: u64,
    pub dropped_inputs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::spawn_transport;

    fn client() -> FaceClient {
        let handle = spawn_transport("/dev/null-face".into(), 115_200, "face");
        FaceClient::new(handle)
    }

    #[tokio::test]
    async fn status_updates_latest() {
        let mut c = client();
        c.on_packet(&ParsedPacket {
            pkt_type: FACE_TEL_STATUS,
            seq: 4,
            payload: vec![2, 0xFF, 0, 0x02],
            t_src_us: 0,
            t_rx_ns: 100,
        });
        let tel = c.telemetry().unwrap();
        assert_eq!(tel.status.mood_id, 2);
        assert!(tel.status.talking());
        assert_eq!(tel.seq, 4);
    }

    #[tokio::test]
    async fn button_events_buffered_in_order() {
        let mut c = client();
        for (id, evt) in [(0u8, 2u8), (1, 3)] {
            c.on_packet(&ParsedPacket {
                pkt_type: FACE_TEL_BUTTON,
                seq: 0,
                payload: vec![id, evt, 1, 0],
                t_src_us: 0,
                t_rx_ns: 5,
            });
        }
        let inputs = c.take_inputs();
        assert_eq!(inputs.len(), 2);
        assert!(matches!(inputs[0], FaceInput::Button(b) if b.button_id == 0));
        assert!(matches!(inputs[1], FaceInput::Button(b) if b.event_type == 3));
        assert!(c.take_inputs().is_empty());
    }

    #[tokio::test]
    async fn input_queue_is_bounded() {
        let mut c = client();
        for i in 0..(EVENT_QUEUE_CAP as u16 + 8) {
            c.on_packet(&ParsedPacket {
                pkt_type: FACE_TEL_TOUCH,
                seq: 0,
                payload: vec![0, i as u8, 0, 0, 0],
                t_src_us: 0,
                t_rx_ns: 0,
            });
        }
        assert_eq!(c.take_inputs().len(), EVENT_QUEUE_CAP);
        assert_eq!(c.rx_counters().dropped_inputs, 8);
    }

    #[tokio::test]
    async fn bad_payload_counted() {
        let mut c = client();
        c.on_packet(&ParsedPacket {
            pkt_type: FACE_TEL_TOUCH,
            seq: 0,
            payload: vec![0, 1],
            t_src_us: 0,
            t_rx_ns: 0,
        });
        assert_eq!(c.rx_counters().bad_payload, 1);
        assert!(c.take_inputs().is_empty());
    }
}
