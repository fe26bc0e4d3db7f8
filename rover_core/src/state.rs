//! Split state model: `RobotState` (MCU hardware, rebuilt each tick) and
//! `WorldState` (worker perception, updated asynchronously by the router).
//!
//! Both are owned by the tick loop; nothing else holds a reference across
//! a suspension point.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use rover_common::state::{ClockSyncState, Mode, SpeedCap, Twist};
use rover_common::time::mono_ms;
use rover_proto::types::{Fault, RangeStatus};

use crate::skills::Skill;

/// Maximum speed caps one tick can accumulate (cascade has 9 layers).
pub const MAX_SPEED_CAPS: usize = 12;

// ─── RobotState ─────────────────────────────────────────────────────

/// MCU hardware snapshot, rebuilt each tick from client telemetry.
#[derive(Debug, Clone, Default)]
pub struct RobotState {
    pub mode: Mode,

    // Motion
    pub twist_cmd: Twist,
    pub twist_capped: Twist,

    // Motion MCU telemetry
    pub speed_l_mm_s: i16,
    pub speed_r_mm_s: i16,
    pub gyro_z_mrad_s: i16,
    pub accel_x_mg: i16,
    pub accel_y_mg: i16,
    pub accel_z_mg: i16,
    pub battery_mv: u16,
    pub fault_flags: Fault,
    pub range_mm: u16,
    pub range_status: RangeStatus,
    pub motion_seq: u32,
    pub motion_rx_mono_ms: f64,

    // Derived from IMU (computed each telemetry snapshot)
    /// Forward tilt: atan2(accel_x, accel_z), degrees.
    pub tilt_angle_deg: f32,
    /// |accel|, should sit near 1000 mg at rest.
    pub accel_magnitude_mg: f32,

    // Computed from wheel speeds / gyro
    pub v_meas_mm_s: f32,
    pub w_meas_mrad_s: f32,

    // Connection state
    pub motion_connected: bool,
    pub face_connected: bool,

    // Face telemetry mirror
    pub face_mood: u8,
    pub face_gesture: u8,
    pub face_system_mode: u8,
    pub face_touch_active: bool,
    pub face_listening: bool,
    pub face_talking: bool,
    pub face_talking_energy: u8,
    pub face_manual_lock: bool,
    pub face_last_button_id: i16,
    pub face_last_button_event: i16,
    pub face_last_button_state: u8,
    pub face_conv_state: u8,
    pub face_conv_timer_ms: f64,
    pub face_seq_phase: u8,
    pub face_seq_mood_id: u8,
    pub face_seq_intensity: f32,
    pub face_choreo_active: bool,
    pub face_seq: u32,
    pub face_rx_mono_ms: f64,

    // Clock sync
    pub motion_clock: ClockSyncState,
    pub face_clock: ClockSyncState,

    // Safety
    pub speed_caps: heapless::Vec<SpeedCap, MAX_SPEED_CAPS>,

    // Timing
    pub tick_mono_ms: f64,
    pub tick_dt_ms: f64,
}

impl RobotState {
    #[inline]
    pub fn any_fault(&self) -> bool {
        !self.fault_flags.is_empty()
    }

    #[inline]
    pub fn has_fault(&self, f: Fault) -> bool {
        self.fault_flags.intersects(f)
    }

    /// Serialize for the merged telemetry broadcast.
    pub fn to_json(&self) -> Map<String, Value> {
        let mut d = Map::new();
        d.insert("mode".into(), json!(self.mode.as_str()));
        d.insert("v_cmd".into(), json!(self.twist_cmd.v_mm_s));
        d.insert("w_cmd".into(), json!(self.twist_cmd.w_mrad_s));
        d.insert("v_capped".into(), json!(self.twist_capped.v_mm_s));
        d.insert("w_capped".into(), json!(self.twist_capped.w_mrad_s));
        d.insert("v_meas".into(), json!(self.v_meas_mm_s));
        d.insert("w_meas".into(), json!(self.w_meas_mrad_s));
        d.insert("speed_l".into(), json!(self.speed_l_mm_s));
        d.insert("speed_r".into(), json!(self.speed_r_mm_s));
        d.insert("gyro_z".into(), json!(self.gyro_z_mrad_s));
        d.insert("accel_x".into(), json!(self.accel_x_mg));
        d.insert("accel_y".into(), json!(self.accel_y_mg));
        d.insert("accel_z".into(), json!(self.accel_z_mg));
        d.insert("tilt_angle_deg".into(), json!(self.tilt_angle_deg));
        d.insert("accel_magnitude_mg".into(), json!(self.accel_magnitude_mg));
        d.insert("battery_mv".into(), json!(self.battery_mv));
        d.insert("fault_flags".into(), json!(self.fault_flags.bits()));
        d.insert("faults".into(), json!(self.fault_flags.names()));
        d.insert("range_mm".into(), json!(self.range_mm));
        d.insert("range_status".into(), json!(self.range_status as u8));
        d.insert("motion_connected".into(), json!(self.motion_connected));
        d.insert("face_connected".into(), json!(self.face_connected));
        d.insert("face_mood".into(), json!(self.face_mood));
        d.insert("face_gesture".into(), json!(self.face_gesture));
        d.insert("face_system_mode".into(), json!(self.face_system_mode));
        d.insert("face_touch_active".into(), json!(self.face_touch_active));
        d.insert("face_listening".into(), json!(self.face_listening));
        d.insert("face_talking".into(), json!(self.face_talking));
        d.insert("face_conv_state".into(), json!(self.face_conv_state));
        d.insert("face_seq_phase".into(), json!(self.face_seq_phase));
        d.insert("face_seq_mood_id".into(), json!(self.face_seq_mood_id));
        d.insert("face_seq_intensity".into(), json!(self.face_seq_intensity));
        d.insert("face_choreo_active".into(), json!(self.face_choreo_active));
        d.insert(
            "speed_caps".into(),
            Value::Array(
                self.speed_caps
                    .iter()
                    .map(|c| json!({"scale": c.scale, "reason": c.reason}))
                    .collect(),
            ),
        );
        d.insert("tick_dt_ms".into(), json!(self.tick_dt_ms));
        d.insert(
            "clock_sync".into(),
            json!({
                "motion": clock_json(&self.motion_clock),
                "face": clock_json(&self.face_clock),
            }),
        );
        d
    }
}

fn clock_json(c: &ClockSyncState) -> Value {
    json!({
        "state": c.status,
        "offset_ns": c.offset_ns,
        "rtt_min_us": c.rtt_min_us,
        "drift_us_per_s": c.drift_us_per_s,
        "samples": c.samples,
    })
}

// ─── WorldState ─────────────────────────────────────────────────────

/// Liveness record for one managed worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerLiveness {
    pub alive: bool,
    pub last_heartbeat_ms: f64,
}

/// Perception state from workers, updated asynchronously.
#[derive(Debug, Clone)]
pub struct WorldState {
    // Vision
    /// Clear-path confidence in `[-1, 1]`; −1 means no data yet.
    pub clear_confidence: f32,
    pub ball_confidence: f32,
    pub ball_bearing_deg: f32,
    pub vision_fps: f32,
    pub vision_rx_mono_ms: f64,
    pub vision_frame_seq: u64,
    /// Latest encoded camera frame (opaque bytes, dashboard only).
    pub latest_frame_b64: String,

    // Audio / speech
    pub speaking: bool,
    pub current_energy: u8,
    pub ptt_active: bool,
    pub speech_source: String,
    pub speech_priority: u8,
    pub mic_link_up: bool,
    pub spk_link_up: bool,

    // Planner
    pub planner_connected: bool,
    pub planner_enabled: bool,
    pub active_skill: Skill,
    pub last_plan_mono_ms: f64,
    pub last_plan_actions: usize,
    pub last_plan_id: String,
    pub plan_seq_last_accepted: i64,
    pub plan_dropped_stale: u64,
    pub plan_dropped_cooldown: u64,
    pub plan_dropped_out_of_order: u64,
    pub plan_dropped_duplicate: u64,
    pub say_requested: u64,
    pub say_enqueued: u64,
    pub say_dropped_reason: BTreeMap<String, u64>,
    pub event_count: usize,

    // Worker health
    pub workers: BTreeMap<String, WorkerLiveness>,

    // Conversation
    pub session_id: String,
    pub turn_id: u64,
    pub ai_state: String,
    /// "ptt" | "wake_word" | ""
    pub conversation_trigger: String,

    // Personality snapshot
    pub personality_mood: String,
    pub personality_intensity: f32,
    pub personality_valence: f32,
    pub personality_arousal: f32,
    pub personality_layer: u8,
    pub personality_idle_state: String,
    pub personality_snapshot_ts_ms: f64,
    pub personality_conversation_active: bool,
    pub personality_session_time_s: f64,
    pub personality_daily_time_s: f64,
    pub personality_session_limit_reached: bool,
    pub personality_daily_limit_reached: bool,
}

impl Default for WorldState {
    fn default() -> Self {
        Self {
            clear_confidence: -1.0,
            ball_confidence: 0.0,
            ball_bearing_deg: 0.0,
            vision_fps: 0.0,
            vision_rx_mono_ms: 0.0,
            vision_frame_seq: 0,
            latest_frame_b64: String::new(),
            speaking: false,
            current_energy: 0,
            ptt_active: false,
            speech_source: String::new(),
            speech_priority: 3,
            mic_link_up: false,
            spk_link_up: false,
            planner_connected: false,
            planner_enabled: false,
            active_skill: Skill::PatrolDrift,
            last_plan_mono_ms: 0.0,
            last_plan_actions: 0,
            last_plan_id: String::new(),
            plan_seq_last_accepted: -1,
            plan_dropped_stale: 0,
            plan_dropped_cooldown: 0,
            plan_dropped_out_of_order: 0,
            plan_dropped_duplicate: 0,
            say_requested: 0,
            say_enqueued: 0,
            say_dropped_reason: BTreeMap::new(),
            event_count: 0,
            workers: BTreeMap::new(),
            session_id: String::new(),
            turn_id: 0,
            ai_state: "idle".into(),
            conversation_trigger: String::new(),
            personality_mood: "neutral".into(),
            personality_intensity: 0.0,
            personality_valence: 0.0,
            personality_arousal: 0.0,
            personality_layer: 0,
            personality_idle_state: "awake".into(),
            personality_snapshot_ts_ms: 0.0,
            personality_conversation_active: false,
            personality_session_time_s: 0.0,
            personality_daily_time_s: 0.0,
            personality_session_limit_reached: false,
            personality_daily_limit_reached: false,
        }
    }
}

impl WorldState {
    /// Milliseconds since the last vision snapshot, or −1 if none yet.
    pub fn vision_age_ms(&self, now_ms: f64) -> f64 {
        if self.vision_rx_mono_ms <= 0.0 {
            return -1.0;
        }
        now_ms - self.vision_rx_mono_ms
    }

    /// Vision age against the live clock.
    pub fn vision_age_now_ms(&self) -> f64 {
        self.vision_age_ms(mono_ms())
    }

    #[inline]
    pub fn both_audio_links_up(&self) -> bool {
        self.mic_link_up && self.spk_link_up
    }

    pub fn count_say_drop(&mut self, reason: impl Into<String>) {
        *self.say_dropped_reason.entry(reason.into()).or_insert(0) += 1;
    }

    /// Serialize for the merged telemetry broadcast.
    pub fn to_json(&self, now_ms: f64) -> Map<String, Value> {
        let mut d = Map::new();
        d.insert("clear_conf".into(), json!(self.clear_confidence));
        d.insert("ball_conf".into(), json!(self.ball_confidence));
        d.insert("ball_bearing".into(), json!(self.ball_bearing_deg));
        d.insert("vision_fps".into(), json!(self.vision_fps));
        d.insert("vision_age_ms".into(), json!(self.vision_age_ms(now_ms)));
        d.insert("speaking".into(), json!(self.speaking));
        d.insert("current_energy".into(), json!(self.current_energy));
        d.insert("ptt_active".into(), json!(self.ptt_active));
        d.insert("planner_connected".into(), json!(self.planner_connected));
        d.insert("planner_enabled".into(), json!(self.planner_enabled));
        d.insert("active_skill".into(), json!(self.active_skill.as_str()));
        d.insert("last_plan_actions".into(), json!(self.last_plan_actions));
        d.insert("plan_dropped_stale".into(), json!(self.plan_dropped_stale));
        d.insert("plan_dropped_cooldown".into(), json!(self.plan_dropped_cooldown));
        d.insert(
            "plan_dropped_out_of_order".into(),
            json!(self.plan_dropped_out_of_order),
        );
        d.insert(
            "plan_dropped_duplicate".into(),
            json!(self.plan_dropped_duplicate),
        );
        d.insert("say_requested".into(), json!(self.say_requested));
        d.insert("say_enqueued".into(), json!(self.say_enqueued));
        d.insert("say_dropped".into(), json!(self.say_dropped_reason));
        d.insert("event_count".into(), json!(self.event_count));
        d.insert(
            "worker_alive".into(),
            Value::Object(
                self.workers
                    .iter()
                    .map(|(k, v)| (k.clone(), json!(v.alive)))
                    .collect(),
            ),
        );
        d.insert("mic_link_up".into(), json!(self.mic_link_up));
        d.insert("spk_link_up".into(), json!(self.spk_link_up));
        d.insert("session_id".into(), json!(self.session_id));
        d.insert("ai_state".into(), json!(self.ai_state));
        d.insert("personality_mood".into(), json!(self.personality_mood));
        d.insert("personality_intensity".into(), json!(self.personality_intensity));
        d.insert("personality_valence".into(), json!(self.personality_valence));
        d.insert("personality_arousal".into(), json!(self.personality_arousal));
        d.insert("personality_layer".into(), json!(self.personality_layer));
        d.insert("personality_idle_state".into(), json!(self.personality_idle_state));
        d.insert(
            "personality_session_limit_reached".into(),
            json!(self.personality_session_limit_reached),
        );
        d.insert(
            "personality_daily_limit_reached".into(),
            json!(self.personality_daily_limit_reached),
        );
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vision_age_sentinel_before_first_frame() {
        let world = WorldState::default();
        assert_eq!(world.vision_age_ms(1000.0), -1.0);
    }

    #[test]
    fn vision_age_tracks_receipt() {
        let mut world = WorldState::default();
        world.vision_rx_mono_ms = 400.0;
        assert_eq!(world.vision_age_ms(1000.0), 600.0);
    }

    #[test]
    fn audio_links_both_required() {
        let mut world = WorldState::default();
        assert!(!world.both_audio_links_up());
        world.mic_link_up = true;
        assert!(!world.both_audio_links_up());
        world.spk_link_up = true;
        assert!(world.both_audio_links_up());
    }

    #[test]
    fn robot_state_fault_helpers() {
        let mut robot = RobotState::default();
        assert!(!robot.any_fault());
        robot.fault_flags = Fault::STALL;
        assert!(robot.any_fault());
        assert!(robot.has_fault(Fault::STALL));
        assert!(!robot.has_fault(Fault::ESTOP));
    }

    #[test]
    fn telemetry_json_has_core_fields() {
        let robot = RobotState::default();
        let d = robot.to_json();
        assert_eq!(d.get("mode").unwrap(), "BOOT");
        assert!(d.contains_key("clock_sync"));

        let world = WorldState::default();
        let w = world.to_json(0.0);
        assert_eq!(w.get("active_skill").unwrap(), "patrol_drift");
    }
}
