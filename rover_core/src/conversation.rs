//! Conversation state tracker.
//!
//! Tracks the current conversation phase and provides per-state overrides
//! for gaze, renderer flags, and mood hints. Auto-transitions handle the
//! timed phases (ATTENTION→LISTENING/PTT, ERROR→fallback, DONE→IDLE);
//! backchannel nods fire during prolonged LISTENING.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rover_proto::types::{FaceConvState, FaceFlags, FaceMood};

// ─── Timing constants ───────────────────────────────────────────────

const ATTENTION_DURATION_MS: f64 = 400.0;
const ERROR_TOTAL_DURATION_MS: f64 = 800.0;
const DONE_FADE_DURATION_MS: f64 = 500.0;

const BACKCHANNEL_NOD_MIN_MS: f64 = 3000.0;
const BACKCHANNEL_NOD_RANGE_MS: f64 = 2000.0;
const BACKCHANNEL_INTEREST_ONSET_MS: f64 = 10_000.0;
const BACKCHANNEL_INTEREST_MAX_SCALE: f64 = 1.05;
const BACKCHANNEL_INTEREST_RAMP_MS: f64 = 20_000.0;

const ERROR_AVERSION_DURATION_MS: f64 = 200.0;
const ERROR_AVERSION_GAZE_X: f32 = -0.3;

/// Conversion from normalized gaze to the face client's float space
/// (client packs `i8 = gaze * 32`, the MCU maps i8 over its full range).
pub const GAZE_SEND_SCALE: f32 = 127.0 / 32.0;

const FLAGS_NO_WANDER: FaceFlags = FaceFlags::AUTOBLINK
    .union(FaceFlags::SOLID_EYE)
    .union(FaceFlags::SHOW_MOUTH)
    .union(FaceFlags::EDGE_GLOW)
    .union(FaceFlags::SPARKLE);

const FLAGS_NO_WANDER_NO_SPARKLE: FaceFlags = FaceFlags::AUTOBLINK
    .union(FaceFlags::SOLID_EYE)
    .union(FaceFlags::SHOW_MOUTH)
    .union(FaceFlags::EDGE_GLOW);

/// Conversation state machine with auto-transitions and backchannel.
pub struct ConvStateTracker {
    pub state: FaceConvState,
    pub prev_state: FaceConvState,
    pub timer_ms: f64,
    pub session_active: bool,
    pub ptt_held: bool,

    next_nod_ms: f64,
    nod_pending: bool,
    pub interest_scale: f64,

    changed: bool,
    rng: StdRng,
}

impl ConvStateTracker {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic construction for tests.
    pub fn with_rng(mut rng: StdRng) -> Self {
        let next_nod_ms = BACKCHANNEL_NOD_MIN_MS + rng.gen::<f64>() * BACKCHANNEL_NOD_RANGE_MS;
        Self {
            state: FaceConvState::Idle,
            prev_state: FaceConvState::Idle,
            timer_ms: 0.0,
            session_active: false,
            ptt_held: false,
            next_nod_ms,
            nod_pending: false,
            interest_scale: 1.0,
            changed: false,
            rng,
        }
    }

    /// Transition to a new conversation state.
    pub fn set_state(&mut self, new_state: FaceConvState) {
        if new_state == self.state {
            return;
        }
        self.prev_state = self.state;
        self.state = new_state;
        self.timer_ms = 0.0;
        self.changed = true;

        // Session lifecycle tracking
        if new_state == FaceConvState::Attention {
            self.session_active = true;
        } else if new_state == FaceConvState::Idle {
            self.session_active = false;
        }

        // Reset backchannel on any state change
        self.next_nod_ms =
            BACKCHANNEL_NOD_MIN_MS + self.rng.gen::<f64>() * BACKCHANNEL_NOD_RANGE_MS;
        self.nod_pending = false;
        self.interest_scale = 1.0;
    }

    /// True once per state transition, then resets.
    pub fn consume_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    /// Advance the timer and handle auto-transitions.
    pub fn update(&mut self, dt_ms: f64) {
        self.timer_ms += dt_ms;

        match self.state {
            FaceConvState::Attention if self.timer_ms >= ATTENTION_DURATION_MS => {
                if self.ptt_held {
                    self.set_state(FaceConvState::Ptt);
                } else {
                    self.set_state(FaceConvState::Listening);
                }
            }
            FaceConvState::Error if self.timer_ms >= ERROR_TOTAL_DURATION_MS => {
                if self.session_active {
                    self.set_state(FaceConvState::Listening);
                } else {
                    self.set_state(FaceConvState::Idle);
                }
            }
            FaceConvState::Done if self.timer_ms >= DONE_FADE_DURATION_MS => {
                self.set_state(FaceConvState::Idle);
            }
            _ => {}
        }

        if self.state == FaceConvState::Listening {
            // Periodic backchannel nod.
            if self.timer_ms >= self.next_nod_ms {
                self.nod_pending = true;
                self.next_nod_ms = self.timer_ms
                    + BACKCHANNEL_NOD_MIN_MS
                    + self.rng.gen::<f64>() * BACKCHANNEL_NOD_RANGE_MS;
            }

            // Interest escalation after prolonged listening.
            if self.timer_ms > BACKCHANNEL_INTEREST_ONSET_MS {
                let t = ((self.timer_ms - BACKCHANNEL_INTEREST_ONSET_MS)
                    / BACKCHANNEL_INTEREST_RAMP_MS)
                    .min(1.0);
                self.interest_scale = 1.0 + (BACKCHANNEL_INTEREST_MAX_SCALE - 1.0) * t;
            }
        }
    }

    /// Normalized gaze override for the current state, or `None`.
    pub fn gaze_override(&self) -> Option<(f32, f32)> {
        // Error micro-aversion during the first 200 ms.
        if self.state == FaceConvState::Error && self.timer_ms < ERROR_AVERSION_DURATION_MS {
            return Some((ERROR_AVERSION_GAZE_X, 0.0));
        }
        match self.state {
            FaceConvState::Attention | FaceConvState::Listening | FaceConvState::Ptt => {
                Some((0.0, 0.0))
            }
            FaceConvState::Thinking => Some((0.5, -0.3)),
            FaceConvState::Speaking => Some((0.0, 0.0)),
            _ => None,
        }
    }

    /// Gaze override scaled for `FaceClient::send_state`.
    pub fn gaze_for_send(&self) -> Option<(f32, f32)> {
        self.gaze_override()
            .map(|(x, y)| (x * GAZE_SEND_SCALE, y * GAZE_SEND_SCALE))
    }

    /// Renderer flag mask for the current state, or `None` for no change.
    pub fn flags(&self) -> Option<FaceFlags> {
        match self.state {
            FaceConvState::Idle | FaceConvState::Done => Some(FaceFlags::all()),
            FaceConvState::Attention
            | FaceConvState::Listening
            | FaceConvState::Ptt
            | FaceConvState::Speaking => Some(FLAGS_NO_WANDER),
            FaceConvState::Thinking => Some(FLAGS_NO_WANDER_NO_SPARKLE),
            FaceConvState::Error => None,
        }
    }

    /// Mood hint `(mood, intensity)` for the current state, or `None`.
    pub fn mood_hint(&self) -> Option<(FaceMood, f32)> {
        match self.state {
            FaceConvState::Listening | FaceConvState::Ptt => Some((FaceMood::Neutral, 0.3)),
            FaceConvState::Thinking => Some((FaceMood::Thinking, 0.5)),
            _ => None,
        }
    }

    /// True once when a backchannel nod should fire.
    pub fn consume_nod(&mut self) -> bool {
        std::mem::take(&mut self.nod_pending)
    }
}

impl Default for ConvStateTracker {
    fn default() -> Self {
        Self::new()
    }
}
