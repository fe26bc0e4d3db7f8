//! Conversation phase transition choreographer.
//!
//! Produces timed gesture/gaze actions when conversation state
//! transitions occur. Does not mutate face state directly; the tick loop
//! reads the outputs and drives the face client.

use rover_proto::types::{FaceConvState, FaceGesture, FaceMood};

// ─── Timing constants ───────────────────────────────────────────────

const LT_GAZE_RAMP_MS: f64 = 300.0;
const TS_BLINK_DELAY_MS: f64 = 0.0;
const TS_BLINK_DURATION_MS: u16 = 180;
const TS_GAZE_RAMP_DELAY_MS: f64 = 50.0;
const TS_GAZE_RAMP_MS: f64 = 300.0;
const SL_NOD_DELAY_MS: f64 = 100.0;
const SL_NOD_DURATION_MS: u16 = 350;
const SD_SUPPRESS_MS: f64 = 500.0;

const GAZE_CENTER: (f32, f32) = (0.0, 0.0);
const GAZE_THINKING: (f32, f32) = (0.5, -0.3);

/// A single action fired during a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionAction {
    Gesture { gesture: FaceGesture, duration_ms: u16 },
    MoodNudge { mood: FaceMood, intensity: f32 },
}

#[derive(Debug, Clone)]
struct ScheduledAction {
    delay_ms: f64,
    action: TransitionAction,
    fired: bool,
}

/// Linear-with-ease-out interpolation of the gaze target.
#[derive(Debug, Clone)]
struct GazeRamp {
    start: (f32, f32),
    end: (f32, f32),
    duration_ms: f64,
    delay_ms: f64,
    elapsed_ms: f64,
}

impl GazeRamp {
    fn at(&self) -> (f32, f32) {
        let active_ms = self.elapsed_ms - self.delay_ms;
        if active_ms <= 0.0 {
            return self.start;
        }
        let t = if self.duration_ms > 0.0 {
            (active_ms / self.duration_ms).min(1.0)
        } else {
            1.0
        };
        // Ease-out: t' = 1 − (1−t)²
        let t_ease = (1.0 - (1.0 - t) * (1.0 - t)) as f32;
        (
            self.start.0 + (self.end.0 - self.start.0) * t_ease,
            self.start.1 + (self.end.1 - self.start.1) * t_ease,
        )
    }

    fn done(&self) -> bool {
        self.elapsed_ms - self.delay_ms >= self.duration_ms
    }
}

/// Fires timed action sequences on conversation state transitions.
pub struct ConvChoreographer {
    timer_ms: f64,
    actions: Vec<ScheduledAction>,
    gaze_ramp: Option<GazeRamp>,
    suppress_mood_ms: f64,
    total_duration_ms: f64,
    has_blink: bool,
}

impl Default for ConvChoreographer {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvChoreographer {
    pub fn new() -> Self {
        Self {
            timer_ms: 0.0,
            actions: Vec::new(),
            gaze_ramp: None,
            suppress_mood_ms: 0.0,
            total_duration_ms: 0.0,
            has_blink: false,
        }
    }

    /// True while a transition sequence is still playing.
    pub fn active(&self) -> bool {
        if let Some(ramp) = &self.gaze_ramp {
            if !ramp.done() {
                return true;
            }
        }
        if self.suppress_mood_ms > 0.0 && self.timer_ms < self.suppress_mood_ms {
            return true;
        }
        self.timer_ms < self.total_duration_ms
    }

    /// True while the regular mood pipeline should be skipped.
    pub fn suppress_mood_pipeline(&self) -> bool {
        self.suppress_mood_ms > 0.0 && self.timer_ms < self.suppress_mood_ms
    }

    /// True if this transition's script includes a blink gesture.
    pub fn has_blink(&self) -> bool {
        self.has_blink
    }

    /// Load the choreography for a state transition.
    pub fn on_transition(&mut self, prev: FaceConvState, new: FaceConvState) {
        self.reset();
        match (prev, new) {
            (FaceConvState::Listening, FaceConvState::Thinking) => {
                self.gaze_ramp = Some(GazeRamp {
                    start: GAZE_CENTER,
                    end: GAZE_THINKING,
                    duration_ms: LT_GAZE_RAMP_MS,
                    delay_ms: 0.0,
                    elapsed_ms: 0.0,
                });
                self.total_duration_ms = LT_GAZE_RAMP_MS;
            }
            (FaceConvState::Thinking, FaceConvState::Speaking) => {
                self.actions.push(ScheduledAction {
                    delay_ms: TS_BLINK_DELAY_MS,
                    action: TransitionAction::Gesture {
                        gesture: FaceGesture::Blink,
                        duration_ms: TS_BLINK_DURATION_MS,
                    },
                    fired: false,
                });
                self.has_blink = true;
                self.gaze_ramp = Some(GazeRamp {
                    start: GAZE_THINKING,
                    end: GAZE_CENTER,
                    duration_ms: TS_GAZE_RAMP_MS,
                    delay_ms: TS_GAZE_RAMP_DELAY_MS,
                    elapsed_ms: 0.0,
                });
                self.total_duration_ms = TS_GAZE_RAMP_DELAY_MS + TS_GAZE_RAMP_MS;
            }
            (FaceConvState::Speaking, FaceConvState::Listening) => {
                self.actions.push(ScheduledAction {
                    delay_ms: SL_NOD_DELAY_MS,
                    action: TransitionAction::Gesture {
                        gesture: FaceGesture::Nod,
                        duration_ms: SL_NOD_DURATION_MS,
                    },
                    fired: false,
                });
                self.total_duration_ms = SL_NOD_DELAY_MS + f64::from(SL_NOD_DURATION_MS);
            }
            (FaceConvState::Speaking, FaceConvState::Done) => {
                self.actions.push(ScheduledAction {
                    delay_ms: 0.0,
                    action: TransitionAction::MoodNudge {
                        mood: FaceMood::Neutral,
                        intensity: 0.0,
                    },
                    fired: false,
                });
                self.suppress_mood_ms = SD_SUPPRESS_MS;
                self.total_duration_ms = SD_SUPPRESS_MS;
            }
            _ => {}
        }
    }

    /// Advance the timer; return actions ready to fire this tick.
    pub fn update(&mut self, dt_ms: f64) -> Vec<TransitionAction> {
        if self.actions.is_empty() && self.gaze_ramp.is_none() && self.suppress_mood_ms <= 0.0 {
            return Vec::new();
        }

        self.timer_ms += dt_ms;
        let mut fired = Vec::new();
        for scheduled in &mut self.actions {
            if !scheduled.fired && self.timer_ms >= scheduled.delay_ms {
                scheduled.fired = true;
                fired.push(scheduled.action.clone());
            }
        }

        if let Some(ramp) = &mut self.gaze_ramp {
            ramp.elapsed_ms += dt_ms;
        }

        fired
    }

    /// The interpolated gaze if a ramp is live, else `None`.
    pub fn gaze_override(&self) -> Option<(f32, f32)> {
        let ramp = self.gaze_ramp.as_ref()?;
        if ramp.done() {
            return None;
        }
        Some(ramp.at())
    }

    fn reset(&mut self) {
        self.timer_ms = 0.0;
        self.actions.clear();
        self.gaze_ramp = None;
        self.suppress_mood_ms = 0.0;
        self.total_duration_ms = 0.0;
        self.has_blink = false;
    }
}
