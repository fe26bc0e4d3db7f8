//! Layered speed-cap cascade applied to the desired twist each tick.
//!
//! Defense-in-depth above the motion MCU's own reflexes (hard range stop,
//! tilt cutoff). Gate layers (mode, faults, link) zero the twist outright;
//! governor layers multiply a scale into the running product. Every layer
//! records a `SpeedCap{scale, reason}` on the robot state for telemetry.

use rover_common::state::{SpeedCap, Twist};
use rover_proto::types::RangeStatus;

use crate::state::{RobotState, WorldState};

/// Vision-governor thresholds, reconfigurable at runtime via the param
/// registry.
#[derive(Debug, Clone, Copy)]
pub struct VisionPolicy {
    pub stale_ms: f64,
    pub clear_low: f32,
    pub clear_high: f32,
}

impl Default for VisionPolicy {
    fn default() -> Self {
        Self { stale_ms: 500.0, clear_low: 0.3, clear_high: 0.6 }
    }
}

/// The safety cascade. Owns its tunables; no global state.
#[derive(Debug, Default)]
pub struct SafetyGate {
    vision: VisionPolicy,
}

impl SafetyGate {
    pub fn new(vision: VisionPolicy) -> Self {
        Self { vision }
    }

    /// Update vision thresholds (called when params change).
    pub fn configure_vision(&mut self, vision: VisionPolicy) {
        self.vision = vision;
    }

    pub fn vision_policy(&self) -> VisionPolicy {
        self.vision
    }

    /// Apply the cascade, populating `robot.speed_caps` and returning the
    /// capped twist.
    pub fn apply(&self, desired: Twist, robot: &mut RobotState, world: &WorldState) -> Twist {
        robot.speed_caps.clear();
        let mut scale = 1.0f32;

        // 1. Mode gate: no motion outside motion modes.
        if !robot.mode.is_motion() {
            push_cap(robot, 0.0, format!("mode={}", robot.mode.as_str()));
            return Twist::ZERO;
        }

        // 2. Fault gate: zero on any active fault.
        if robot.any_fault() {
            push_cap(robot, 0.0, format!("fault=0x{:04X}", robot.fault_flags.bits()));
            return Twist::ZERO;
        }

        // 3. Motion link gate.
        if !robot.motion_connected {
            push_cap(robot, 0.0, "motion_disconnected".to_string());
            return Twist::ZERO;
        }

        // 4/5. Ultrasonic speed governor.
        if robot.range_status == RangeStatus::Ok && robot.range_mm > 0 {
            if robot.range_mm < 300 {
                scale *= 0.25;
                push_cap(robot, 0.25, format!("range={}mm<300", robot.range_mm));
            } else if robot.range_mm < 500 {
                scale *= 0.50;
                push_cap(robot, 0.50, format!("range={}mm<500", robot.range_mm));
            }
        }

        // 6. Unusable range reading: be conservative.
        if matches!(robot.range_status, RangeStatus::Timeout | RangeStatus::NotReady) {
            scale *= 0.50;
            push_cap(robot, 0.50, format!("range_stale={:?}", robot.range_status));
        }

        // 7–9. Vision clear-path governor. The −1 sentinel means no vision
        // worker has reported yet; that alone does not cap speed.
        if world.clear_confidence >= 0.0 {
            let age_ms = world.vision_age_ms(robot.tick_mono_ms);
            if age_ms > self.vision.stale_ms || age_ms < 0.0 {
                scale *= 0.50;
                push_cap(robot, 0.50, "vision_stale".to_string());
            } else if world.clear_confidence < self.vision.clear_low {
                scale *= 0.25;
                push_cap(
                    robot,
                    0.25,
                    format!(
                        "clear_conf={:.2}<{}",
                        world.clear_confidence, self.vision.clear_low
                    ),
                );
            } else if world.clear_confidence < self.vision.clear_high {
                scale *= 0.50;
                push_cap(
                    robot,
                    0.50,
                    format!(
                        "clear_conf={:.2}<{}",
                        world.clear_confidence, self.vision.clear_high
                    ),
                );
            }
        }

        Twist::new(
            (f32::from(desired.v_mm_s) * scale).round() as i16,
            (f32::from(desired.w_mrad_s) * scale).round() as i16,
        )
    }
}

fn push_cap(robot: &mut RobotState, scale: f32, reason: String) {
    let _ = robot.speed_caps.push(SpeedCap { scale, reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_common::state::Mode;
    use rover_proto::types::Fault;

    fn motion_robot() -> RobotState {
        RobotState {
            mode: Mode::Teleop,
            motion_connected: true,
            range_status: RangeStatus::Ok,
            range_mm: 2000,
            ..Default::default()
        }
    }

    fn apply(robot: &mut RobotState, world: &WorldState) -> Twist {
        SafetyGate::default().apply(Twist::new(200, 100), robot, world)
    }

    #[test]
    fn non_motion_mode_zeroes() {
        let mut robot = motion_robot();
        robot.mode = Mode::Idle;
        let capped = apply(&mut robot, &WorldState::default());
        assert_eq!(capped, Twist::ZERO);
        assert_eq!(robot.speed_caps[0].reason, "mode=IDLE");
    }

    #[test]
    fn fault_zeroes() {
        let mut robot = motion_robot();
        robot.fault_flags = Fault::STALL;
        let capped = apply(&mut robot, &WorldState::default());
        assert_eq!(capped, Twist::ZERO);
        assert_eq!(robot.speed_caps[0].reason, "fault=0x0008");
    }

    #[test]
    fn disconnect_zeroes() {
        let mut robot = motion_robot();
        robot.motion_connected = false;
        assert_eq!(apply(&mut robot, &WorldState::default()), Twist::ZERO);
    }

    #[test]
    fn range_cap_boundaries() {
        let world = WorldState::default();
        for (range, expect_v) in [(299u16, 50i16), (300, 100), (499, 100), (500, 200)] {
            let mut robot = motion_robot();
            robot.range_mm = range;
            let capped = apply(&mut robot, &world);
            assert_eq!(capped.v_mm_s, expect_v, "range={range}");
        }
    }

    #[test]
    fn close_range_cap_records_reason() {
        let mut robot = motion_robot();
        robot.range_mm = 250;
        let capped = apply(&mut robot, &WorldState::default());
        assert_eq!(capped, Twist::new(50, 25));
        assert_eq!(robot.speed_caps[0].scale, 0.25);
        assert_eq!(robot.speed_caps[0].reason, "range=250mm<300");
    }

    #[test]
    fn unusable_range_halves() {
        for status in [RangeStatus::Timeout, RangeStatus::NotReady] {
            let mut robot = motion_robot();
            robot.range_status = status;
            let capped = apply(&mut robot, &WorldState::default());
            assert_eq!(capped, Twist::new(100, 50));
        }
        // OUT_OF_RANGE is a valid "nothing near" reading: no cap.
        let mut robot = motion_robot();
        robot.range_status = RangeStatus::OutOfRange;
        assert_eq!(apply(&mut robot, &WorldState::default()), Twist::new(200, 100));
    }

    #[test]
    fn vision_sentinel_means_no_cap() {
        let mut robot = motion_robot();
        let world = WorldState::default(); // clear_confidence = -1
        assert_eq!(apply(&mut robot, &world), Twist::new(200, 100));
    }

    #[test]
    fn vision_stale_halves() {
        let mut robot = motion_robot();
        robot.tick_mono_ms = 2000.0;
        let mut world = WorldState::default();
        world.clear_confidence = 0.9;
        world.vision_rx_mono_ms = 1000.0; // 1000 ms old
        let capped = apply(&mut robot, &world);
        assert_eq!(capped, Twist::new(100, 50));
        assert_eq!(robot.speed_caps[0].reason, "vision_stale");
    }

    #[test]
    fn clear_confidence_bands() {
        let mut world = WorldState::default();
        world.vision_rx_mono_ms = 1.0;
        for (conf, expect_v) in [(0.2f32, 50i16), (0.45, 100), (0.8, 200)] {
            let mut robot = motion_robot();
            robot.tick_mono_ms = 100.0;
            world.clear_confidence = conf;
            let capped = apply(&mut robot, &world);
            assert_eq!(capped.v_mm_s, expect_v, "conf={conf}");
        }
    }

    #[test]
    fn caps_compound_multiplicatively() {
        let mut robot = motion_robot();
        robot.range_mm = 400; // ×0.50
        robot.tick_mono_ms = 100.0;
        let mut world = WorldState::default();
        world.clear_confidence = 0.45; // ×0.50
        world.vision_rx_mono_ms = 1.0;
        let capped = apply(&mut robot, &world);
        assert_eq!(capped, Twist::new(50, 25));
        assert_eq!(robot.speed_caps.len(), 2);
    }

    #[test]
    fn capped_never_exceeds_commanded() {
        let gate = SafetyGate::default();
        let world = WorldState::default();
        for range in [100u16, 350, 600, 5000] {
            let mut robot = motion_robot();
            robot.range_mm = range;
            let desired = Twist::new(-180, 90);
            let capped = gate.apply(desired, &mut robot, &world);
            assert!(capped.v_mm_s.abs() <= desired.v_mm_s.abs());
            assert!(capped.w_mrad_s.abs() <= desired.w_mrad_s.abs());
        }
    }

    #[test]
    fn runtime_reconfiguration() {
        let mut gate = SafetyGate::default();
        gate.configure_vision(VisionPolicy { stale_ms: 500.0, clear_low: 0.5, clear_high: 0.9 });
        let mut robot = motion_robot();
        robot.tick_mono_ms = 100.0;
        let mut world = WorldState::default();
        world.clear_confidence = 0.45;
        world.vision_rx_mono_ms = 1.0;
        let capped = gate.apply(Twist::new(200, 100), &mut robot, &world);
        assert_eq!(capped.v_mm_s, 50); // now under clear_low
    }
}
