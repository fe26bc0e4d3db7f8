//! Mode-gated twist source selection.
//!
//! TELEOP takes the operator twist verbatim; WANDER delegates to the
//! active skill; every other mode commands zero motion.

use rover_common::state::{Mode, Twist};

use crate::skills::SkillExecutor;
use crate::state::{RobotState, WorldState};

/// Picks the twist source for the current mode.
pub struct BehaviorEngine {
    skills: SkillExecutor,
    teleop_twist: Twist,
}

impl BehaviorEngine {
    pub fn new(skills: SkillExecutor) -> Self {
        Self { skills, teleop_twist: Twist::ZERO }
    }

    /// Store the operator's teleop command (applied while in TELEOP).
    pub fn set_teleop_twist(&mut self, v_mm_s: i16, w_mrad_s: i16) {
        self.teleop_twist = Twist::new(v_mm_s, w_mrad_s);
    }

    /// Return the desired twist for this tick.
    pub fn step(&mut self, robot: &RobotState, world: &WorldState) -> Twist {
        match robot.mode {
            Mode::Teleop => self.teleop_twist,
            Mode::Wander => self.skills.step(robot, world, world.active_skill),
            // BOOT, IDLE, ERROR: no motion.
            _ => Twist::ZERO,
        }
    }
}
