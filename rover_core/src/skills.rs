//! Deterministic motion skills for WANDER mode.
//!
//! Each skill is a pure state-driven policy: given the current robot and
//! world snapshots plus time-in-skill, produce a desired twist. Obstacle
//! proximity overrides most skills with `avoid_obstacle`; the retreat and
//! approach policies manage range themselves.

use rover_common::state::Twist;
use rover_proto::types::RangeStatus;

use crate::state::{RobotState, WorldState};

/// The closed set of skills a plan may activate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skill {
    PatrolDrift,
    ScanForTarget,
    InvestigateBall,
    ApproachUntilRange,
    RetreatAndRecover,
    AvoidObstacle,
    GreetOnButton,
}

impl Skill {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PatrolDrift => "patrol_drift",
            Self::ScanForTarget => "scan_for_target",
            Self::InvestigateBall => "investigate_ball",
            Self::ApproachUntilRange => "approach_until_range",
            Self::RetreatAndRecover => "retreat_and_recover",
            Self::AvoidObstacle => "avoid_obstacle",
            Self::GreetOnButton => "greet_on_button",
        }
    }

    /// Parse a (validated) skill name. This doubles as the allow-list for
    /// the plan validator: anything unparseable is dropped.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "patrol_drift" => Some(Self::PatrolDrift),
            "scan_for_target" => Some(Self::ScanForTarget),
            "investigate_ball" => Some(Self::InvestigateBall),
            "approach_until_range" => Some(Self::ApproachUntilRange),
            "retreat_and_recover" => Some(Self::RetreatAndRecover),
            "avoid_obstacle" => Some(Self::AvoidObstacle),
            "greet_on_button" => Some(Self::GreetOnButton),
            _ => None,
        }
    }
}

/// Tunable parameters for every skill policy.
#[derive(Debug, Clone)]
pub struct SkillParams {
    pub patrol_v_mm_s: i16,
    pub patrol_w_mrad_s: i16,
    pub patrol_turn_flip_ms: f64,

    pub scan_turn_mrad_s: i16,
    pub scan_flip_ms: f64,

    pub investigate_v_mm_s: i16,
    pub investigate_turn_gain: f32,
    pub investigate_turn_deadband_deg: f32,
    pub investigate_min_conf: f32,

    pub approach_v_mm_s: i16,
    pub approach_v_cautious_mm_s: i16,
    pub approach_turn_gain: f32,
    pub approach_turn_deadband_deg: f32,
    pub approach_min_conf: f32,
    pub approach_range_min_mm: u16,
    pub approach_range_max_mm: u16,
    pub approach_hard_stop_mm: u16,
    pub approach_backoff_mm_s: i16,

    pub retreat_reverse_mm_s: i16,
    pub retreat_reverse_ms: f64,
    pub retreat_turn_mrad_s: i16,
    pub retreat_turn_ms: f64,
    pub retreat_pause_ms: f64,

    pub obstacle_close_mm: u16,
    pub obstacle_very_close_mm: u16,
    pub avoid_reverse_mm_s: i16,
    pub avoid_turn_mrad_s: i16,
}

impl Default for SkillParams {
    fn default() -> Self {
        Self {
            patrol_v_mm_s: 80,
            patrol_w_mrad_s: 120,
            patrol_turn_flip_ms: 4000.0,
            scan_turn_mrad_s: 260,
            scan_flip_ms: 1400.0,
            investigate_v_mm_s: 120,
            investigate_turn_gain: 22.0,
            investigate_turn_deadband_deg: 12.0,
            investigate_min_conf: 0.80,
            approach_v_mm_s: 110,
            approach_v_cautious_mm_s: 70,
            approach_turn_gain: 18.0,
            approach_turn_deadband_deg: 8.0,
            approach_min_conf: 0.70,
            approach_range_min_mm: 380,
            approach_range_max_mm: 650,
            approach_hard_stop_mm: 260,
            approach_backoff_mm_s: -80,
            retreat_reverse_mm_s: -120,
            retreat_reverse_ms: 900.0,
            retreat_turn_mrad_s: 420,
            retreat_turn_ms: 1100.0,
            retreat_pause_ms: 350.0,
            obstacle_close_mm: 450,
            obstacle_very_close_mm: 300,
            avoid_reverse_mm_s: -120,
            avoid_turn_mrad_s: 400,
        }
    }
}

/// Computes desired twist for the active autonomous skill.
pub struct SkillExecutor {
    params: SkillParams,
    active: Skill,
    active_since_ms: f64,
}

impl Default for SkillExecutor {
    fn default() -> Self {
        Self::new(SkillParams::default())
    }
}

impl SkillExecutor {
    pub fn new(params: SkillParams) -> Self {
        Self {
            params,
            active: Skill::PatrolDrift,
            active_since_ms: 0.0,
        }
    }

    /// One tick of the active skill policy.
    pub fn step(&mut self, robot: &RobotState, world: &WorldState, active: Skill) -> Twist {
        let elapsed_ms = self.on_skill_tick(active, robot.tick_mono_ms);

        match active {
            Skill::GreetOnButton => Twist::ZERO,
            Skill::RetreatAndRecover => self.retreat_and_recover(elapsed_ms),
            Skill::ApproachUntilRange => self.approach_until_range(robot, world, elapsed_ms),
            _ if self.obstacle_close(robot) => self.avoid_obstacle(robot),
            Skill::AvoidObstacle => self.avoid_obstacle(robot),
            Skill::ScanForTarget => self.scan_for_target(robot, world, elapsed_ms),
            Skill::InvestigateBall
                if world.ball_confidence >= self.params.investigate_min_conf =>
            {
                self.investigate_ball(world)
            }
            _ => self.patrol_drift(robot),
        }
    }

    fn obstacle_close(&self, robot: &RobotState) -> bool {
        robot.range_status == RangeStatus::Ok
            && robot.range_mm > 0
            && robot.range_mm < self.params.obstacle_close_mm
    }

    fn avoid_obstacle(&self, robot: &RobotState) -> Twist {
        if robot.range_mm > 0 && robot.range_mm < self.params.obstacle_very_close_mm {
            return Twist::new(self.params.avoid_reverse_mm_s, self.params.avoid_turn_mrad_s);
        }
        Twist::new(0, self.params.avoid_turn_mrad_s)
    }

    fn scan_for_target(&self, _robot: &RobotState, world: &WorldState, elapsed_ms: f64) -> Twist {
        if world.ball_confidence >= self.params.investigate_min_conf {
            return self.investigate_ball(world);
        }
        let phase = (elapsed_ms / self.params.scan_flip_ms) as i64 % 2;
        let sign: i16 = if phase == 0 { 1 } else { -1 };
        Twist::new(0, sign * self.params.scan_turn_mrad_s)
    }

    fn investigate_ball(&self, world: &WorldState) -> Twist {
        let bearing = world.ball_bearing_deg.abs();
        let turn = self.bearing_turn(world, self.params.investigate_turn_gain, 600);
        if bearing > self.params.investigate_turn_deadband_deg {
            return Twist::new(0, turn);
        }
        Twist::new(self.params.investigate_v_mm_s, turn)
    }

    fn approach_until_range(
        &self,
        robot: &RobotState,
        world: &WorldState,
        elapsed_ms: f64,
    ) -> Twist {
        if world.ball_confidence < self.params.approach_min_conf {
            return self.scan_for_target(robot, world, elapsed_ms);
        }

        let turn = self.bearing_turn(world, self.params.approach_turn_gain, 500);
        let bearing = world.ball_bearing_deg.abs();

        if robot.range_status == RangeStatus::Ok && robot.range_mm > 0 {
            if robot.range_mm <= self.params.approach_hard_stop_mm {
                return Twist::new(self.params.approach_backoff_mm_s, turn);
            }
            if robot.range_mm < self.params.approach_range_min_mm {
                return Twist::new(self.params.approach_backoff_mm_s / 2, turn);
            }
            if robot.range_mm <= self.params.approach_range_max_mm {
                if bearing <= self.params.approach_turn_deadband_deg {
                    return Twist::ZERO;
                }
                return Twist::new(0, turn);
            }
            let forward = if bearing > self.params.approach_turn_deadband_deg {
                self.params.approach_v_cautious_mm_s
            } else {
                self.params.approach_v_mm_s
            };
            return Twist::new(forward, turn);
        }

        // No usable range: creep only when aligned.
        if bearing > self.params.approach_turn_deadband_deg {
            return Twist::new(0, turn);
        }
        Twist::new(self.params.approach_v_cautious_mm_s, turn)
    }

    fn retreat_and_recover(&self, elapsed_ms: f64) -> Twist {
        let cycle_ms =
            self.params.retreat_reverse_ms + self.params.retreat_turn_ms + self.params.retreat_pause_ms;
        if cycle_ms <= 0.0 {
            return Twist::ZERO;
        }

        let phase_ms = elapsed_ms % cycle_ms;
        let cycle_idx = (elapsed_ms / cycle_ms) as i64;
        let turn_sign: i16 = if cycle_idx % 2 == 0 { 1 } else { -1 };

        if phase_ms < self.params.retreat_reverse_ms {
            return Twist::new(self.params.retreat_reverse_mm_s, 0);
        }
        if phase_ms < self.params.retreat_reverse_ms + self.params.retreat_turn_ms {
            return Twist::new(0, turn_sign * self.params.retreat_turn_mrad_s);
        }
        Twist::ZERO
    }

    fn patrol_drift(&self, robot: &RobotState) -> Twist {
        let phase = (robot.tick_mono_ms / self.params.patrol_turn_flip_ms) as i64 % 2;
        let sign: i16 = if phase == 0 { 1 } else { -1 };
        Twist::new(self.params.patrol_v_mm_s, sign * self.params.patrol_w_mrad_s)
    }

    fn bearing_turn(&self, world: &WorldState, gain: f32, max_abs: i16) -> i16 {
        let turn = world.ball_bearing_deg * gain;
        turn.clamp(f32::from(-max_abs), f32::from(max_abs)) as i16
    }

    fn on_skill_tick(&mut self, active: Skill, tick_mono_ms: f64) -> f64 {
        if active != self.active {
            self.active = active;
            self.active_since_ms = tick_mono_ms;
        }
        (tick_mono_ms - self.active_since_ms).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn robot_at(tick_mono_ms: f64, range_mm: u16, range_status: RangeStatus) -> RobotState {
        RobotState {
            tick_mono_ms,
            range_mm,
            range_status,
            ..Default::default()
        }
    }

    #[test]
    fn skill_names_roundtrip() {
        for s in [
            Skill::PatrolDrift,
            Skill::ScanForTarget,
            Skill::InvestigateBall,
            Skill::ApproachUntilRange,
            Skill::RetreatAndRecover,
            Skill::AvoidObstacle,
            Skill::GreetOnButton,
        ] {
            assert_eq!(Skill::parse(s.as_str()), Some(s));
        }
        assert!(Skill::parse("self_destruct").is_none());
    }

    #[test]
    fn greet_is_stationary() {
        let mut ex = SkillExecutor::default();
        let robot = robot_at(0.0, 100, RangeStatus::Ok);
        let twist = ex.step(&robot, &WorldState::default(), Skill::GreetOnButton);
        assert_eq!(twist, Twist::ZERO);
    }

    #[test]
    fn patrol_flips_turn_sign() {
        let mut ex = SkillExecutor::default();
        let world = WorldState::default();
        let t1 = ex.step(&robot_at(0.0, 0, RangeStatus::NotReady), &world, Skill::PatrolDrift);
        let t2 = ex.step(&robot_at(4500.0, 0, RangeStatus::NotReady), &world, Skill::PatrolDrift);
        assert_eq!(t1.v_mm_s, 80);
        assert_eq!(t2.v_mm_s, 80);
        assert_eq!(t1.w_mrad_s, -t2.w_mrad_s);
    }

    #[test]
    fn obstacle_overrides_patrol() {
        let mut ex = SkillExecutor::default();
        let robot = robot_at(0.0, 400, RangeStatus::Ok);
        let twist = ex.step(&robot, &WorldState::default(), Skill::PatrolDrift);
        // 400 mm is close but not very close: yaw only.
        assert_eq!(twist.v_mm_s, 0);
        assert_eq!(twist.w_mrad_s, 400);

        let robot = robot_at(0.0, 250, RangeStatus::Ok);
        let twist = ex.step(&robot, &WorldState::default(), Skill::PatrolDrift);
        assert_eq!(twist.v_mm_s, -120);
    }

    #[test]
    fn obstacle_needs_valid_range() {
        let mut ex = SkillExecutor::default();
        let robot = robot_at(0.0, 100, RangeStatus::Timeout);
        let twist = ex.step(&robot, &WorldState::default(), Skill::PatrolDrift);
        assert_eq!(twist.v_mm_s, 80); // patrol, not avoid
    }

    #[test]
    fn scan_alternates_and_escalates() {
        let mut ex = SkillExecutor::default();
        let mut world = WorldState::default();
        let t1 = ex.step(&robot_at(0.0, 0, RangeStatus::NotReady), &world, Skill::ScanForTarget);
        let t2 = ex.step(&robot_at(1500.0, 0, RangeStatus::NotReady), &world, Skill::ScanForTarget);
        assert_eq!(t1.w_mrad_s, 260);
        assert_eq!(t2.w_mrad_s, -260);
        assert_eq!(t1.v_mm_s, 0);

        // High-confidence ball flips scan into investigate.
        world.ball_confidence = 0.85;
        world.ball_bearing_deg = 2.0;
        let t3 = ex.step(&robot_at(1600.0, 0, RangeStatus::NotReady), &world, Skill::ScanForTarget);
        assert_eq!(t3.v_mm_s, 120);
    }

    #[test]
    fn investigate_turns_before_driving() {
        let mut ex = SkillExecutor::default();
        let mut world = WorldState::default();
        world.ball_confidence = 0.9;
        world.ball_bearing_deg = 20.0;
        let robot = robot_at(0.0, 0, RangeStatus::NotReady);
        let twist = ex.step(&robot, &world, Skill::InvestigateBall);
        assert_eq!(twist.v_mm_s, 0);
        assert_eq!(twist.w_mrad_s, 440); // 20 * 22

        world.ball_bearing_deg = 30.0;
        let twist = ex.step(&robot, &world, Skill::InvestigateBall);
        assert_eq!(twist.w_mrad_s, 600); // clamped
    }

    #[test]
    fn investigate_falls_back_to_patrol_on_low_conf() {
        let mut ex = SkillExecutor::default();
        let mut world = WorldState::default();
        world.ball_confidence = 0.5;
        let robot = robot_at(0.0, 0, RangeStatus::NotReady);
        let twist = ex.step(&robot, &world, Skill::InvestigateBall);
        assert_eq!(twist.v_mm_s, 80);
    }

    #[test]
    fn approach_range_schedule() {
        let mut ex = SkillExecutor::default();
        let mut world = WorldState::default();
        world.ball_confidence = 0.9;
        world.ball_bearing_deg = 0.0;

        // Far: full speed.
        let t = ex.step(&robot_at(0.0, 700, RangeStatus::Ok), &world, Skill::ApproachUntilRange);
        assert_eq!(t.v_mm_s, 110);
        // In band and aligned: hold.
        let t = ex.step(&robot_at(10.0, 500, RangeStatus::Ok), &world, Skill::ApproachUntilRange);
        assert_eq!(t, Twist::ZERO);
        // Below min: soft back-off.
        let t = ex.step(&robot_at(20.0, 350, RangeStatus::Ok), &world, Skill::ApproachUntilRange);
        assert_eq!(t.v_mm_s, -40);
        // At hard stop: hard back-off.
        let t = ex.step(&robot_at(30.0, 250, RangeStatus::Ok), &world, Skill::ApproachUntilRange);
        assert_eq!(t.v_mm_s, -80);
    }

    #[test]
    fn approach_misaligned_in_band_turns_only() {
        let mut ex = SkillExecutor::default();
        let mut world = WorldState::default();
        world.ball_confidence = 0.9;
        world.ball_bearing_deg = 15.0;
        let t = ex.step(&robot_at(0.0, 500, RangeStatus::Ok), &world, Skill::ApproachUntilRange);
        assert_eq!(t.v_mm_s, 0);
        assert!(t.w_mrad_s > 0);
    }

    #[test]
    fn retreat_cycle_phases() {
        let mut ex = SkillExecutor::default();
        let world = WorldState::default();

        // Phase boundaries measured from skill activation at t=1000.
        let t = ex.step(&robot_at(1000.0, 0, RangeStatus::NotReady), &world, Skill::RetreatAndRecover);
        assert_eq!(t.v_mm_s, -120); // reversing
        let t = ex.step(&robot_at(2000.0, 0, RangeStatus::NotReady), &world, Skill::RetreatAndRecover);
        assert_eq!(t.v_mm_s, 0);
        assert_eq!(t.w_mrad_s, 420); // turning, first cycle positive
        let t = ex.step(&robot_at(3100.0, 0, RangeStatus::NotReady), &world, Skill::RetreatAndRecover);
        assert_eq!(t, Twist::ZERO); // pausing
        // Second cycle turn flips sign (2350..3450 ms into cycle 2).
        let t = ex.step(&robot_at(1000.0 + 2350.0 + 1000.0, 0, RangeStatus::NotReady), &world, Skill::RetreatAndRecover);
        assert_eq!(t.w_mrad_s, -420);
    }
}
