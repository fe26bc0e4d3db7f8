//! Supervisor mode state machine.
//!
//! Transitions:
//! ```text
//! BOOT  → IDLE    (motion MCU connected and healthy)
//! IDLE  → TELEOP  (mode request)
//! IDLE  → WANDER  (mode request)
//! Any   → ERROR   (MCU disconnect, severe fault)
//! ERROR → IDLE    (clear_error: faults cleared + MCU connected)
//! ```

use tracing::info;

use rover_common::state::Mode;
use rover_proto::types::Fault;

/// Guard-gated mode state machine.
#[derive(Debug)]
pub struct ModeStateMachine {
    mode: Mode,
}

impl Default for ModeStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeStateMachine {
    pub fn new() -> Self {
        Self { mode: Mode::Boot }
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Called each tick. Evaluates auto-transitions from system health.
    pub fn update(&mut self, motion_connected: bool, faults: Fault) -> Mode {
        if !motion_connected && self.mode != Mode::Boot {
            self.transition(Mode::Error, "motion MCU disconnected");
        } else if faults.intersects(Fault::SEVERE) {
            self.transition(Mode::Error, &format!("severe fault 0x{:04X}", faults.bits()));
        } else if self.mode == Mode::Boot && motion_connected && faults.is_empty() {
            self.transition(Mode::Idle, "motion MCU ready");
        }
        self.mode
    }

    /// Handle an explicit mode change request.
    pub fn request_mode(
        &mut self,
        target: Mode,
        motion_connected: bool,
        faults: Fault,
    ) -> Result<(), String> {
        if target == self.mode {
            return Ok(()); // accepted no-op
        }

        if self.mode == Mode::Error {
            return Err("must clear errors first".into());
        }

        if target.is_motion() {
            if self.mode != Mode::Idle {
                return Err(format!("can only enter {} from IDLE", target.as_str()));
            }
            if !motion_connected {
                return Err("motion MCU not connected".into());
            }
            if !faults.is_empty() {
                return Err(format!("faults active: 0x{:04X}", faults.bits()));
            }
            self.transition(target, "user request");
            return Ok(());
        }

        if target == Mode::Idle {
            if self.mode.is_motion() {
                self.transition(Mode::Idle, "user request");
                return Ok(());
            }
            return Err(format!("cannot go to IDLE from {}", self.mode.as_str()));
        }

        Err(format!("unsupported mode: {}", target.as_str()))
    }

    /// Attempt to exit ERROR mode.
    pub fn clear_error(&mut self, motion_connected: bool, faults: Fault) -> Result<(), String> {
        if self.mode != Mode::Error {
            return Err("not in ERROR mode".into());
        }
        if !motion_connected {
            return Err("motion MCU not connected".into());
        }
        if faults.intersects(Fault::SEVERE) {
            return Err(format!(
                "severe faults still active: 0x{:04X}",
                faults.bits()
            ));
        }
        self.transition(Mode::Idle, "error cleared");
        Ok(())
    }

    fn transition(&mut self, target: Mode, reason: &str) {
        if target != self.mode {
            info!("mode: {} -> {} ({})", self.mode.as_str(), target.as_str(), reason);
            self.mode = target;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_to_idle_when_healthy() {
        let mut sm = ModeStateMachine::new();
        assert_eq!(sm.update(false, Fault::empty()), Mode::Boot);
        assert_eq!(sm.update(true, Fault::empty()), Mode::Idle);
    }

    #[test]
    fn boot_stays_on_faults() {
        let mut sm = ModeStateMachine::new();
        assert_eq!(sm.update(true, Fault::STALL), Mode::Boot);
    }

    #[test]
    fn disconnect_forces_error() {
        let mut sm = ModeStateMachine::new();
        sm.update(true, Fault::empty());
        assert_eq!(sm.update(false, Fault::empty()), Mode::Error);
    }

    #[test]
    fn severe_fault_forces_error() {
        let mut sm = ModeStateMachine::new();
        sm.update(true, Fault::empty());
        assert_eq!(sm.update(true, Fault::TILT), Mode::Error);
        // Non-severe faults do not.
        let mut sm2 = ModeStateMachine::new();
        sm2.update(true, Fault::empty());
        assert_eq!(sm2.update(true, Fault::STALL), Mode::Idle);
    }

    #[test]
    fn motion_mode_only_from_idle() {
        let mut sm = ModeStateMachine::new();
        assert!(sm.request_mode(Mode::Wander, true, Fault::empty()).is_err());
        sm.update(true, Fault::empty());
        assert!(sm.request_mode(Mode::Wander, true, Fault::empty()).is_ok());
        assert_eq!(sm.mode(), Mode::Wander);
        // Wander → Teleop must pass through IDLE.
        assert!(sm.request_mode(Mode::Teleop, true, Fault::empty()).is_err());
        assert!(sm.request_mode(Mode::Idle, true, Fault::empty()).is_ok());
        assert!(sm.request_mode(Mode::Teleop, true, Fault::empty()).is_ok());
    }

    #[test]
    fn motion_mode_blocked_on_fault_or_disconnect() {
        let mut sm = ModeStateMachine::new();
        sm.update(true, Fault::empty());
        assert!(sm.request_mode(Mode::Teleop, false, Fault::empty()).is_err());
        assert!(sm.request_mode(Mode::Teleop, true, Fault::STALL).is_err());
    }

    #[test]
    fn same_mode_request_is_noop_ok() {
        let mut sm = ModeStateMachine::new();
        sm.update(true, Fault::empty());
        assert!(sm.request_mode(Mode::Idle, true, Fault::empty()).is_ok());
    }

    #[test]
    fn error_exits_only_via_clear() {
        let mut sm = ModeStateMachine::new();
        sm.update(true, Fault::empty());
        sm.update(true, Fault::ESTOP);
        assert_eq!(sm.mode(), Mode::Error);
        assert!(sm.request_mode(Mode::Idle, true, Fault::empty()).is_err());
        // Clear refused while severe bits remain.
        assert!(sm.clear_error(true, Fault::ESTOP).is_err());
        assert!(sm.clear_error(true, Fault::empty()).is_ok());
        assert_eq!(sm.mode(), Mode::Idle);
    }
}
