//! Mood transition sequencer: blink + crossfade choreography.
//!
//! 4-phase sequence on a mood change:
//!
//! ```text
//! ANTICIPATION (100 ms): trigger blink
//! RAMP_DOWN    (150 ms): linear intensity current → 0
//! SWITCH       (1 tick): apply new mood id at intensity 0
//! RAMP_UP      (200 ms): linear intensity 0 → target
//! ```
//!
//! Minimum hold between transitions is 500 ms; requests arriving during a
//! transition or the hold window go to a single queued slot
//! (last-write-wins). Same-mood intensity changes skip the choreography
//! and ramp directly.

/// Phase of the mood transition sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SeqPhase {
    Idle = 0,
    Anticipation = 1,
    RampDown = 2,
    Switch = 3,
    RampUp = 4,
}

const ANTICIPATION_S: f64 = 0.100;
const RAMP_DOWN_S: f64 = 0.150;
const RAMP_UP_S: f64 = 0.200;
const MIN_HOLD_S: f64 = 0.500;

/// Choreographs mood transitions with blink + crossfade.
pub struct MoodSequencer {
    pub phase: SeqPhase,
    timer: f64,
    pub mood_id: u8,
    pub intensity: f32,
    target_mood_id: u8,
    pub target_intensity: f32,
    hold_timer: f64,
    queued: Option<(u8, f32)>,
    start_intensity: f32,
    blink_pending: bool,
    changed: bool,
}

impl Default for MoodSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl MoodSequencer {
    pub fn new() -> Self {
        Self {
            phase: SeqPhase::Idle,
            timer: 0.0,
            mood_id: 0,
            intensity: 1.0,
            target_mood_id: 0,
            target_intensity: 1.0,
            hold_timer: MIN_HOLD_S, // ready for the first request
            queued: None,
            start_intensity: 1.0,
            blink_pending: false,
            changed: false,
        }
    }

    /// True during any non-IDLE phase.
    #[inline]
    pub fn transitioning(&self) -> bool {
        self.phase != SeqPhase::Idle
    }

    /// True once when the anticipation blink should fire.
    pub fn consume_blink(&mut self) -> bool {
        std::mem::take(&mut self.blink_pending)
    }

    /// True once when mood or intensity changed while IDLE.
    pub fn consume_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    /// Request a mood transition. Queues if busy or inside the hold.
    pub fn request_mood(&mut self, mood_id: u8, intensity: f32) {
        // Same mood, same intensity: no-op.
        if mood_id == self.mood_id && (intensity - self.target_intensity).abs() < 0.01 {
            return;
        }

        // Mid-transition: queue (last write wins).
        if self.phase != SeqPhase::Idle {
            self.queued = Some((mood_id, intensity));
            return;
        }

        // Hold window still open for a mood change: queue.
        if self.hold_timer < MIN_HOLD_S && mood_id != self.mood_id {
            self.queued = Some((mood_id, intensity));
            return;
        }

        // Same mood, intensity change only: skip choreography.
        if mood_id == self.mood_id {
            self.target_intensity = intensity;
            return;
        }

        self.start_transition(mood_id, intensity);
    }

    /// Advance one tick. `dt` is in seconds.
    pub fn update(&mut self, dt: f64) {
        self.hold_timer += dt;

        if self.phase == SeqPhase::Idle {
            // Intensity-only ramp toward the target.
            if (self.intensity - self.target_intensity).abs() > 0.01 {
                let ramp = (dt / RAMP_UP_S) as f32;
                if self.intensity < self.target_intensity {
                    self.intensity = (self.intensity + ramp).min(self.target_intensity);
                } else {
                    self.intensity = (self.intensity - ramp).max(self.target_intensity);
                }
                self.changed = true;
            }

            if let Some((mood, intensity)) = self.queued.take() {
                self.request_mood(mood, intensity);
            }
            return;
        }

        self.timer += dt;

        match self.phase {
            SeqPhase::Anticipation => {
                if self.timer == dt {
                    // First frame of the phase.
                    self.blink_pending = true;
                }
                if self.timer >= ANTICIPATION_S {
                    self.phase = SeqPhase::RampDown;
                    self.timer = 0.0;
                }
            }
            SeqPhase::RampDown => {
                let progress = (self.timer / RAMP_DOWN_S).min(1.0) as f32;
                self.intensity = self.start_intensity * (1.0 - progress);
                if self.timer >= RAMP_DOWN_S {
                    self.phase = SeqPhase::Switch;
                    self.timer = 0.0;
                }
            }
            SeqPhase::Switch => {
                self.mood_id = self.target_mood_id;
                self.intensity = 0.0;
                self.phase = SeqPhase::RampUp;
                self.timer = 0.0;
            }
            SeqPhase::RampUp => {
                let progress = (self.timer / RAMP_UP_S).min(1.0) as f32;
                self.intensity = self.target_intensity * progress;
                if self.timer >= RAMP_UP_S {
                    self.intensity = self.target_intensity;
                    self.phase = SeqPhase::Idle;
                    self.hold_timer = 0.0;
                    self.changed = true;

                    if let Some((mood, intensity)) = self.queued.take() {
                        self.start_transition(mood, intensity);
                    }
                }
            }
            SeqPhase::Idle => unreachable!(),
        }
    }

    fn start_transition(&mut self, mood_id: u8, intensity: f32) {
        self.target_mood_id = mood_id;
        self.target_intensity = intensity;
        self.start_intensity = self.intensity;
        self.phase = SeqPhase::Anticipation;
        self.timer = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.020; // 50 Hz tick

    fn run(seq: &mut MoodSequencer, seconds: f64) {
        let ticks = (seconds / DT).round() as usize;
        for _ in 0..ticks {
            seq.update(DT);
        }
    }

    #[test]
    fn full_phase_sequence() {
        let mut seq = MoodSequencer::new();
        seq.request_mood(1, 0.8); // HAPPY from NEUTRAL@1.0
        assert_eq!(seq.phase, SeqPhase::Anticipation);

        seq.update(DT);
        assert!(seq.consume_blink());
        assert!(!seq.consume_blink());

        run(&mut seq, 0.100);
        assert_eq!(seq.phase, SeqPhase::RampDown);
        let mid_intensity = seq.intensity;
        run(&mut seq, 0.080);
        assert!(seq.intensity < mid_intensity);

        run(&mut seq, 0.080); // finish ramp down → switch
        seq.update(DT); // switch applies mood
        assert_eq!(seq.mood_id, 1);
        assert_eq!(seq.phase, SeqPhase::RampUp);

        run(&mut seq, 0.250);
        assert_eq!(seq.phase, SeqPhase::Idle);
        assert!((seq.intensity - 0.8).abs() < 1e-6);
        assert!(seq.consume_changed());
    }

    #[test]
    fn timeline_matches_phase_durations() {
        // ANTICIPATION 100 + RAMP_DOWN 150 + SWITCH tick + RAMP_UP 200 ≈ 470 ms.
        let mut seq = MoodSequencer::new();
        seq.request_mood(2, 1.0);
        run(&mut seq, 0.120);
        assert_eq!(seq.phase, SeqPhase::RampDown);
        run(&mut seq, 0.130); // t=250 ms
        seq.update(DT);
        assert_eq!(seq.mood_id, 2);
        assert_eq!(seq.intensity, 0.0);
        run(&mut seq, 0.200); // t≈470 ms
        assert_eq!(seq.phase, SeqPhase::Idle);
    }

    #[test]
    fn same_mood_intensity_ramps_without_choreography() {
        let mut seq = MoodSequencer::new();
        seq.request_mood(0, 0.4);
        assert_eq!(seq.phase, SeqPhase::Idle);
        seq.update(DT);
        assert!(seq.intensity < 1.0);
        assert!(seq.consume_changed());
        run(&mut seq, 0.200);
        assert!((seq.intensity - 0.4).abs() < 0.011);
    }

    #[test]
    fn hold_window_queues_next_mood() {
        let mut seq = MoodSequencer::new();
        seq.request_mood(1, 0.8);
        run(&mut seq, 0.600); // complete transition, hold starts
        assert_eq!(seq.phase, SeqPhase::Idle);

        seq.request_mood(2, 0.5); // inside hold → queued
        assert_eq!(seq.phase, SeqPhase::Idle);
        assert_eq!(seq.mood_id, 1);

        run(&mut seq, 0.600); // hold elapses; queued request starts
        assert!(seq.transitioning() || seq.mood_id == 2);
        run(&mut seq, 0.600);
        assert_eq!(seq.mood_id, 2);
        assert_eq!(seq.phase, SeqPhase::Idle);
        assert!((seq.intensity - 0.5).abs() < 0.011);
    }

    #[test]
    fn mid_transition_request_is_last_write_wins() {
        let mut seq = MoodSequencer::new();
        seq.request_mood(1, 0.8);
        run(&mut seq, 0.050);
        seq.request_mood(2, 0.6);
        seq.request_mood(3, 0.4); // overwrites the queue slot
        run(&mut seq, 1.200);
        // After first transition + hold, queued (3, 0.4) runs.
        run(&mut seq, 1.000);
        assert_eq!(seq.mood_id, 3);
    }

    #[test]
    fn identical_request_is_noop() {
        let mut seq = MoodSequencer::new();
        seq.request_mood(0, 1.0);
        assert_eq!(seq.phase, SeqPhase::Idle);
        assert!(!seq.transitioning());
    }
}
