//! Packet type ids, fault bits, and wire enums shared by both MCU links.
//!
//! All enums use `#[repr(u8)]` for direct wire transport and provide a
//! const `from_u8` that rejects out-of-range values.

use bitflags::bitflags;

// ─── Common packet types (shared by motion + face MCUs) ─────────────

pub const TIME_SYNC_REQ: u8 = 0x06;
pub const SET_PROTOCOL_VERSION: u8 = 0x07;
pub const TIME_SYNC_RESP: u8 = 0x86;
pub const PROTOCOL_VERSION_ACK: u8 = 0x87;

// ─── Motion MCU packet types ────────────────────────────────────────

/// Host → motion MCU command types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MotionCmd {
    SetTwist = 0x10,
    Stop = 0x11,
    Estop = 0x12,
    SetLimits = 0x13,
    ClearFaults = 0x14,
    SetConfig = 0x15,
}

/// Motion MCU → host telemetry types.
pub const MOTION_TEL_STATE: u8 = 0x80;

// ─── Face MCU packet types ──────────────────────────────────────────

/// Host → face MCU command types (0x20–0x2F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FaceCmd {
    SetState = 0x20,
    Gesture = 0x21,
    SetSystem = 0x22,
    SetTalking = 0x23,
    SetFlags = 0x24,
    SetConvState = 0x25,
}

/// Face MCU → host telemetry types.
pub const FACE_TEL_STATUS: u8 = 0x90;
pub const FACE_TEL_TOUCH: u8 = 0x91;
pub const FACE_TEL_BUTTON: u8 = 0x92;
pub const FACE_TEL_HEARTBEAT: u8 = 0x93;

// ─── Fault flags (bitfield, mirrors motion MCU firmware) ────────────

bitflags! {
    /// Motion MCU fault bits. Any set bit forces capped twist to zero.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Fault: u16 {
        const CMD_TIMEOUT = 1 << 0;
        const ESTOP = 1 << 1;
        const TILT = 1 << 2;
        const STALL = 1 << 3;
        const IMU_FAIL = 1 << 4;
        const BROWNOUT = 1 << 5;
        const OBSTACLE = 1 << 6;
    }
}

impl Fault {
    /// Faults that force the supervisor mode to ERROR.
    pub const SEVERE: Fault = Fault::ESTOP.union(Fault::TILT).union(Fault::BROWNOUT);

    /// Human-readable names of the set bits, for telemetry and events.
    pub fn names(self) -> Vec<&'static str> {
        let mut out = Vec::new();
        for (name, flag) in [
            ("CMD_TIMEOUT", Fault::CMD_TIMEOUT),
            ("ESTOP", Fault::ESTOP),
            ("TILT", Fault::TILT),
            ("STALL", Fault::STALL),
            ("IMU_FAIL", Fault::IMU_FAIL),
            ("BROWNOUT", Fault::BROWNOUT),
            ("OBSTACLE", Fault::OBSTACLE),
        ] {
            if self.contains(flag) {
                out.push(name);
            }
        }
        out
    }
}

// ─── Range sensor status ────────────────────────────────────────────

/// Ultrasonic range measurement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RangeStatus {
    Ok = 0,
    Timeout = 1,
    OutOfRange = 2,
    NotReady = 3,
}

impl RangeStatus {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Timeout),
            2 => Some(Self::OutOfRange),
            3 => Some(Self::NotReady),
            _ => None,
        }
    }
}

impl Default for RangeStatus {
    fn default() -> Self {
        Self::NotReady
    }
}

// ─── Face wire enums ────────────────────────────────────────────────

/// Discrete face moods rendered by the face MCU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FaceMood {
    Neutral = 0,
    Happy = 1,
    Excited = 2,
    Curious = 3,
    Sad = 4,
    Scared = 5,
    Angry = 6,
    Surprised = 7,
    Sleepy = 8,
    Love = 9,
    Silly = 10,
    Thinking = 11,
    Confused = 12,
}

impl FaceMood {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Neutral),
            1 => Some(Self::Happy),
            2 => Some(Self::Excited),
            3 => Some(Self::Curious),
            4 => Some(Self::Sad),
            5 => Some(Self::Scared),
            6 => Some(Self::Angry),
            7 => Some(Self::Surprised),
            8 => Some(Self::Sleepy),
            9 => Some(Self::Love),
            10 => Some(Self::Silly),
            11 => Some(Self::Thinking),
            12 => Some(Self::Confused),
            _ => None,
        }
    }
}

impl Default for FaceMood {
    fn default() -> Self {
        Self::Neutral
    }
}

/// One-shot face gestures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FaceGesture {
    Blink = 0,
    WinkL = 1,
    WinkR = 2,
    Confused = 3,
    Laugh = 4,
    Surprise = 5,
    Heart = 6,
    XEyes = 7,
    Sleepy = 8,
    Rage = 9,
    Nod = 10,
    Headshake = 11,
    Wiggle = 12,
}

impl FaceGesture {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Blink),
            1 => Some(Self::WinkL),
            2 => Some(Self::WinkR),
            3 => Some(Self::Confused),
            4 => Some(Self::Laugh),
            5 => Some(Self::Surprise),
            6 => Some(Self::Heart),
            7 => Some(Self::XEyes),
            8 => Some(Self::Sleepy),
            9 => Some(Self::Rage),
            10 => Some(Self::Nod),
            11 => Some(Self::Headshake),
            12 => Some(Self::Wiggle),
            _ => None,
        }
    }
}

/// Full-screen system overlay modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FaceSystemMode {
    None = 0,
    Booting = 1,
    ErrorDisplay = 2,
    LowBattery = 3,
    Updating = 4,
    ShuttingDown = 5,
}

impl FaceSystemMode {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Booting),
            2 => Some(Self::ErrorDisplay),
            3 => Some(Self::LowBattery),
            4 => Some(Self::Updating),
            5 => Some(Self::ShuttingDown),
            _ => None,
        }
    }
}

impl Default for FaceSystemMode {
    fn default() -> Self {
        Self::None
    }
}

/// Conversation phase: drives border animation + gaze/flag overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FaceConvState {
    Idle = 0,
    Attention = 1,
    Listening = 2,
    Ptt = 3,
    Thinking = 4,
    Speaking = 5,
    Error = 6,
    Done = 7,
}

impl FaceConvState {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Attention),
            2 => Some(Self::Listening),
            3 => Some(Self::Ptt),
            4 => Some(Self::Thinking),
            5 => Some(Self::Speaking),
            6 => Some(Self::Error),
            7 => Some(Self::Done),
            _ => None,
        }
    }
}

impl Default for FaceConvState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Face buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FaceButtonId {
    Ptt = 0,
    Action = 1,
}

impl FaceButtonId {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Ptt),
            1 => Some(Self::Action),
            _ => None,
        }
    }
}

/// Button event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ButtonEventType {
    Press = 0,
    Release = 1,
    Toggle = 2,
    Click = 3,
}

impl ButtonEventType {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Press),
            1 => Some(Self::Release),
            2 => Some(Self::Toggle),
            3 => Some(Self::Click),
            _ => None,
        }
    }
}

/// Touchscreen event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TouchEventType {
    Press = 0,
    Release = 1,
    Drag = 2,
}

impl TouchEventType {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Press),
            1 => Some(Self::Release),
            2 => Some(Self::Drag),
            _ => None,
        }
    }
}

// ─── Face renderer feature flags ────────────────────────────────────

bitflags! {
    /// Renderer/animation feature toggles (7-bit mask).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaceFlags: u8 {
        const IDLE_WANDER = 1 << 0;
        const AUTOBLINK = 1 << 1;
        const SOLID_EYE = 1 << 2;
        const SHOW_MOUTH = 1 << 3;
        const EDGE_GLOW = 1 << 4;
        const SPARKLE = 1 << 5;
        const AFTERGLOW = 1 << 6;
    }
}

impl Default for FaceFlags {
    fn default() -> Self {
        Self::all()
    }
}
