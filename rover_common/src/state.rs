//! Supervisor mode and small value types shared across crates.

use serde::{Deserialize, Serialize};

/// High-level operational state of the robot.
///
/// `Teleop` and `Wander` are the motion modes; outside them the commanded
/// and capped twists are forced to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Boot,
    Idle,
    Teleop,
    Wander,
    Error,
}

impl Mode {
    /// True for modes in which motion commands are allowed.
    #[inline]
    pub const fn is_motion(&self) -> bool {
        matches!(self, Self::Teleop | Self::Wander)
    }

    /// Wire/telemetry name, matching the serde representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Boot => "BOOT",
            Self::Idle => "IDLE",
            Self::Teleop => "TELEOP",
            Self::Wander => "WANDER",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BOOT" => Some(Self::Boot),
            "IDLE" => Some(Self::Idle),
            "TELEOP" => Some(Self::Teleop),
            "WANDER" => Some(Self::Wander),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

impl Default for Mode {
    fn default() -> Self {
        Self::Boot
    }
}

/// A commanded motion: linear mm/s, angular mrad/s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Twist {
    pub v_mm_s: i16,
    pub w_mrad_s: i16,
}

impl Twist {
    pub const ZERO: Twist = Twist { v_mm_s: 0, w_mrad_s: 0 };

    #[inline]
    pub const fn new(v_mm_s: i16, w_mrad_s: i16) -> Self {
        Self { v_mm_s, w_mrad_s }
    }
}

/// One speed limitation applied by the safety cascade, with its reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedCap {
    pub scale: f32,
    pub reason: String,
}

impl SpeedCap {
    pub fn new(scale: f32, reason: impl Into<String>) -> Self {
        Self { scale, reason: reason.into() }
    }
}

// ─── Clock sync state ───────────────────────────────────────────────

/// Clock sync quality for one MCU link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Unsynced,
    Synced,
    Degraded,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::Unsynced
    }
}

/// Per-MCU clock sync estimate, published by the sync engine and mirrored
/// into telemetry each tick.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ClockSyncState {
    pub status: SyncStatus,
    pub offset_ns: i64,
    pub rtt_min_us: u32,
    pub drift_us_per_s: f64,
    pub samples: u64,
    pub last_sync_mono_ns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_motion_classification() {
        assert!(Mode::Teleop.is_motion());
        assert!(Mode::Wander.is_motion());
        assert!(!Mode::Boot.is_motion());
        assert!(!Mode::Idle.is_motion());
        assert!(!Mode::Error.is_motion());
    }

    #[test]
    fn mode_name_roundtrip() {
        for m in [Mode::Boot, Mode::Idle, Mode::Teleop, Mode::Wander, Mode::Error] {
            assert_eq!(Mode::parse(m.as_str()), Some(m));
        }
        assert!(Mode::parse("FLY").is_none());
    }

    #[test]
    fn sync_status_serializes_lowercase() {
        let s = serde_json::to_string(&SyncStatus::Degraded).unwrap();
        assert_eq!(s, "\"degraded\"");
    }
}
