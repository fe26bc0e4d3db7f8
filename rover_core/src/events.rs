//! Event bus: edge detection with hysteresis over state snapshots.
//!
//! Raw telemetry transitions become typed events in a bounded ring:
//! mode changes, ball acquired/lost, obstacle close/cleared, vision
//! stale/healthy, fault raised/cleared, plus face button/touch events
//! forwarded from the face client with timestamp dedup.

use std::collections::VecDeque;

use serde_json::{json, Value};

use rover_common::state::Mode;
use rover_mcu::face::{ButtonEvent, TouchEvent};
use rover_proto::types::RangeStatus;

use crate::state::{RobotState, WorldState};

/// One high-level event derived from telemetry edges.
#[derive(Debug, Clone)]
pub struct PlannerEvent {
    pub event_type: String,
    pub payload: Value,
    pub t_mono_ms: f64,
    pub seq: u64,
}

/// Thresholds for the edge detectors.
#[derive(Debug, Clone)]
pub struct EventBusParams {
    pub max_events: usize,
    pub ball_acquire_conf: f32,
    pub ball_lost_conf: f32,
    pub ball_clear_min_conf: f32,
    pub obstacle_close_mm: u16,
    pub obstacle_clear_mm: u16,
    pub vision_stale_ms: f64,
}

impl Default for EventBusParams {
    fn default() -> Self {
        Self {
            max_events: 100,
            ball_acquire_conf: 0.60,
            ball_lost_conf: 0.35,
            ball_clear_min_conf: 0.20,
            obstacle_close_mm: 450,
            obstacle_clear_mm: 650,
            vision_stale_ms: 500.0,
        }
    }
}

/// Accumulates high-level events from raw telemetry transitions.
pub struct EventBus {
    params: EventBusParams,
    events: VecDeque<PlannerEvent>,
    next_seq: u64,

    ball_visible: bool,
    obstacle_close: bool,
    vision_healthy: Option<bool>,
    last_fault_flags: u16,
    last_mode: Option<Mode>,
    last_button_ts: f64,
    last_touch_ts: f64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusParams::default())
    }
}

impl EventBus {
    pub fn new(params: EventBusParams) -> Self {
        Self {
            params,
            events: VecDeque::new(),
            next_seq: 1,
            ball_visible: false,
            obstacle_close: false,
            vision_healthy: None,
            last_fault_flags: 0,
            last_mode: None,
            last_button_ts: -1.0,
            last_touch_ts: -1.0,
        }
    }

    pub fn emit(&mut self, event_type: impl Into<String>, payload: Value, t_mono_ms: f64) {
        if self.events.len() == self.params.max_events {
            self.events.pop_front();
        }
        self.events.push_back(PlannerEvent {
            event_type: event_type.into(),
            payload,
            t_mono_ms,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }

    /// Forward a face button event, deduped by receive timestamp.
    pub fn on_face_button(&mut self, evt: &ButtonEvent) {
        if evt.t_mono_ms <= self.last_button_ts {
            return;
        }
        self.last_button_ts = evt.t_mono_ms;
        let name = match evt.event_type {
            0 => "press",
            1 => "release",
            2 => "toggle",
            3 => "click",
            _ => "unknown",
        };
        self.emit(
            format!("face.button.{name}"),
            json!({
                "button_id": evt.button_id,
                "event_type": evt.event_type,
                "state": evt.state,
            }),
            evt.t_mono_ms,
        );
    }

    /// Forward a face touch event, deduped by receive timestamp.
    pub fn on_face_touch(&mut self, evt: &TouchEvent) {
        if evt.t_mono_ms <= self.last_touch_ts {
            return;
        }
        self.last_touch_ts = evt.t_mono_ms;
        let name = match evt.event_type {
            0 => "press",
            1 => "release",
            2 => "drag",
            _ => "unknown",
        };
        self.emit(
            format!("face.touch.{name}"),
            json!({"event_type": evt.event_type, "x": evt.x, "y": evt.y}),
            evt.t_mono_ms,
        );
    }

    /// Run edge detection against the combined state. Called each tick.
    pub fn ingest(&mut self, robot: &RobotState, world: &WorldState) {
        let now_ms = robot.tick_mono_ms;

        // Mode transitions
        match self.last_mode {
            None => self.last_mode = Some(robot.mode),
            Some(last) if last != robot.mode => {
                self.emit(
                    "mode.changed",
                    json!({"from": last.as_str(), "to": robot.mode.as_str()}),
                    now_ms,
                );
                self.last_mode = Some(robot.mode);
            }
            _ => {}
        }

        // Ball detection with hysteresis over an effective confidence that
        // is zeroed whenever the signal is untrustworthy.
        let vision_age = world.vision_age_ms(now_ms);
        let effective_conf = if self.ball_signal_valid(robot, world, vision_age) {
            world.ball_confidence
        } else {
            0.0
        };

        if !self.ball_visible && effective_conf >= self.params.ball_acquire_conf {
            self.ball_visible = true;
            self.emit(
                "vision.ball_acquired",
                json!({
                    "confidence": effective_conf,
                    "bearing_deg": world.ball_bearing_deg,
                }),
                now_ms,
            );
        } else if self.ball_visible && effective_conf < self.params.ball_lost_conf {
            self.ball_visible = false;
            self.emit("vision.ball_lost", json!({"confidence": effective_conf}), now_ms);
        }

        // Obstacle detection
        let obstacle_now = robot.range_status == RangeStatus::Ok
            && robot.range_mm > 0
            && robot.range_mm < self.params.obstacle_close_mm;
        let obstacle_clear_now = robot.range_status != RangeStatus::Ok
            || robot.range_mm == 0
            || robot.range_mm > self.params.obstacle_clear_mm;
        if !self.obstacle_close && obstacle_now {
            self.obstacle_close = true;
            self.emit("safety.obstacle_close", json!({"range_mm": robot.range_mm}), now_ms);
        } else if self.obstacle_close && obstacle_clear_now {
            self.obstacle_close = false;
            self.emit("safety.obstacle_cleared", json!({"range_mm": robot.range_mm}), now_ms);
        }

        // Vision staleness
        let healthy_now = vision_age >= 0.0 && vision_age <= self.params.vision_stale_ms;
        match self.vision_healthy {
            None => self.vision_healthy = Some(healthy_now),
            Some(prev) if prev != healthy_now => {
                self.vision_healthy = Some(healthy_now);
                self.emit(
                    if healthy_now { "vision.healthy" } else { "vision.stale" },
                    json!({"vision_age_ms": vision_age}),
                    now_ms,
                );
            }
            _ => {}
        }

        // Fault transitions
        let flags = robot.fault_flags.bits();
        if self.last_fault_flags == 0 && flags != 0 {
            self.emit(
                "fault.raised",
                json!({"flags": flags, "faults": robot.fault_flags.names()}),
                now_ms,
            );
        } else if self.last_fault_flags != 0 && flags == 0 {
            let prev = rover_proto::types::Fault::from_bits_truncate(self.last_fault_flags);
            self.emit(
                "fault.cleared",
                json!({"flags": self.last_fault_flags, "faults": prev.names()}),
                now_ms,
            );
        }
        self.last_fault_flags = flags;
    }

    /// Most recent events, oldest first.
    pub fn latest(&self, limit: usize) -> Vec<PlannerEvent> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn last_seq(&self) -> u64 {
        self.events.back().map_or(0, |e| e.seq)
    }

    fn ball_signal_valid(&self, robot: &RobotState, world: &WorldState, vision_age: f64) -> bool {
        let vision_fresh = (0.0..=self.params.vision_stale_ms).contains(&vision_age);
        let clear_ok = world.clear_confidence < 0.0
            || world.clear_confidence >= self.params.ball_clear_min_conf;
        vision_fresh && clear_ok && !robot.any_fault()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_proto::types::Fault;

    fn fresh_world(ball_conf: f32) -> WorldState {
        let mut world = WorldState::default();
        world.ball_confidence = ball_conf;
        world.clear_confidence = 0.8;
        world.vision_rx_mono_ms = 990.0;
        world
    }

    fn robot_now() -> RobotState {
        RobotState { tick_mono_ms: 1000.0, ..Default::default() }
    }

    fn types(bus: &EventBus) -> Vec<String> {
        bus.latest(100).iter().map(|e| e.event_type.clone()).collect()
    }

    #[test]
    fn mode_change_emits_once() {
        let mut bus = EventBus::default();
        let mut robot = robot_now();
        bus.ingest(&robot, &WorldState::default());
        robot.mode = Mode::Idle;
        bus.ingest(&robot, &WorldState::default());
        bus.ingest(&robot, &WorldState::default());
        let evts = types(&bus);
        assert_eq!(evts.iter().filter(|t| *t == "mode.changed").count(), 1);
    }

    #[test]
    fn ball_hysteresis() {
        let mut bus = EventBus::default();
        let robot = robot_now();

        bus.ingest(&robot, &fresh_world(0.7));
        assert!(types(&bus).contains(&"vision.ball_acquired".to_string()));

        // Falling into the 0.35–0.60 band keeps the ball "visible".
        bus.ingest(&robot, &fresh_world(0.5));
        assert!(!types(&bus).contains(&"vision.ball_lost".to_string()));

        bus.ingest(&robot, &fresh_world(0.2));
        assert!(types(&bus).contains(&"vision.ball_lost".to_string()));
    }

    #[test]
    fn ball_requires_clean_signal() {
        let mut bus = EventBus::default();
        let mut robot = robot_now();
        robot.fault_flags = Fault::STALL;
        bus.ingest(&robot, &fresh_world(0.9));
        assert!(!types(&bus).contains(&"vision.ball_acquired".to_string()));

        // Low clear-path confidence suppresses acquisition too.
        let mut bus = EventBus::default();
        let robot = robot_now();
        let mut world = fresh_world(0.9);
        world.clear_confidence = 0.1;
        bus.ingest(&robot, &world);
        assert!(!types(&bus).contains(&"vision.ball_acquired".to_string()));
    }

    #[test]
    fn obstacle_close_then_cleared() {
        let mut bus = EventBus::default();
        let mut robot = robot_now();
        robot.range_status = RangeStatus::Ok;

        robot.range_mm = 440;
        bus.ingest(&robot, &WorldState::default());
        assert!(types(&bus).contains(&"safety.obstacle_close".to_string()));

        // 500 mm is inside the hysteresis band: still close.
        robot.range_mm = 500;
        bus.ingest(&robot, &WorldState::default());
        assert!(!types(&bus).contains(&"safety.obstacle_cleared".to_string()));

        robot.range_mm = 700;
        bus.ingest(&robot, &WorldState::default());
        assert!(types(&bus).contains(&"safety.obstacle_cleared".to_string()));
    }

    #[test]
    fn vision_stale_and_healthy_edges() {
        let mut bus = EventBus::default();
        let mut robot = robot_now();
        let mut world = fresh_world(0.0);

        bus.ingest(&robot, &world); // healthy baseline, no event
        assert!(types(&bus).is_empty());

        robot.tick_mono_ms = 2000.0; // age jumps past 500 ms
        bus.ingest(&robot, &world);
        assert!(types(&bus).contains(&"vision.stale".to_string()));

        world.vision_rx_mono_ms = 1990.0;
        bus.ingest(&robot, &world);
        assert!(types(&bus).contains(&"vision.healthy".to_string()));
    }

    #[test]
    fn fault_raise_and_clear() {
        let mut bus = EventBus::default();
        let mut robot = robot_now();
        bus.ingest(&robot, &WorldState::default());

        robot.fault_flags = Fault::ESTOP | Fault::TILT;
        bus.ingest(&robot, &WorldState::default());
        let raised = bus
            .latest(10)
            .into_iter()
            .find(|e| e.event_type == "fault.raised")
            .unwrap();
        assert_eq!(raised.payload["faults"], json!(["ESTOP", "TILT"]));

        robot.fault_flags = Fault::empty();
        bus.ingest(&robot, &WorldState::default());
        assert!(types(&bus).contains(&"fault.cleared".to_string()));
    }

    #[test]
    fn button_dedup_by_timestamp() {
        let mut bus = EventBus::default();
        let evt = ButtonEvent { button_id: 1, event_type: 3, state: 1, t_mono_ms: 10.0 };
        bus.on_face_button(&evt);
        bus.on_face_button(&evt); // same timestamp, dropped
        assert_eq!(bus.event_count(), 1);
        assert_eq!(bus.latest(1)[0].event_type, "face.button.click");
    }

    #[test]
    fn ring_is_bounded_and_seq_monotonic() {
        let mut bus = EventBus::new(EventBusParams { max_events: 10, ..Default::default() });
        for i in 0..25 {
            bus.emit("x", json!({}), i as f64);
        }
        assert_eq!(bus.event_count(), 10);
        let events = bus.latest(10);
        assert_eq!(events.first().unwrap().seq, 16);
        assert_eq!(bus.last_seq(), 25);
    }
}
