//! Negative-affect guardrails for the tick-loop fallback path.
//!
//! Three clamps, applied only when no fresh personality snapshot is
//! driving the face (the personality worker enforces its own copies):
//!
//! 1. Context gate: SAD/SCARED/ANGRY blocked outside a conversation.
//! 2. Intensity cap: per-mood maximum.
//! 3. Duration cap: auto-recovery to NEUTRAL after a mood lingers.

use rover_proto::types::FaceMood;

fn intensity_cap(mood: FaceMood) -> Option<f32> {
    match mood {
        FaceMood::Angry => Some(0.5),
        FaceMood::Scared => Some(0.6),
        FaceMood::Sad => Some(0.7),
        FaceMood::Surprised => Some(0.8),
        _ => None,
    }
}

fn max_duration_s(mood: FaceMood) -> Option<f64> {
    match mood {
        FaceMood::Angry | FaceMood::Scared => Some(2.0),
        FaceMood::Surprised => Some(3.0),
        FaceMood::Sad => Some(4.0),
        _ => None,
    }
}

fn is_negative(mood: FaceMood) -> bool {
    matches!(mood, FaceMood::Sad | FaceMood::Scared | FaceMood::Angry)
}

/// Enforces negative-affect limits before a mood reaches the face.
pub struct Guardrails {
    mood_start_s: f64,
    current_mood: FaceMood,
    fired: bool,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self::new()
    }
}

impl Guardrails {
    pub fn new() -> Self {
        Self { mood_start_s: 0.0, current_mood: FaceMood::Neutral, fired: false }
    }

    /// Apply all guardrails; returns the possibly-modified target.
    pub fn check(
        &mut self,
        mood: FaceMood,
        intensity: f32,
        conversation_active: bool,
        now_s: f64,
    ) -> (FaceMood, f32) {
        // Track mood changes for the duration cap.
        if mood != self.current_mood {
            self.current_mood = mood;
            self.mood_start_s = now_s;
            self.fired = false;
        }

        // 1. Context gate.
        if is_negative(mood) && !conversation_active {
            return (FaceMood::Neutral, 0.0);
        }

        // 2. Intensity cap.
        let mut intensity = intensity;
        if let Some(cap) = intensity_cap(mood) {
            intensity = intensity.min(cap);
        }

        // 3. Duration cap, fires once per mood spell.
        if let Some(max_dur) = max_duration_s(mood) {
            if !self.fired && now_s - self.mood_start_s > max_dur {
                self.fired = true;
                return (FaceMood::Neutral, 0.0);
            }
        }

        (mood, intensity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_gate_blocks_outside_conversation() {
        let mut g = Guardrails::new();
        assert_eq!(g.check(FaceMood::Angry, 1.0, false, 0.0), (FaceMood::Neutral, 0.0));
        assert_eq!(g.check(FaceMood::Sad, 0.5, false, 0.0), (FaceMood::Neutral, 0.0));
        // Positive moods pass regardless.
        assert_eq!(g.check(FaceMood::Happy, 0.9, false, 0.0), (FaceMood::Happy, 0.9));
    }

    #[test]
    fn intensity_caps_in_conversation() {
        let mut g = Guardrails::new();
        assert_eq!(g.check(FaceMood::Angry, 1.0, true, 0.0), (FaceMood::Angry, 0.5));
        assert_eq!(g.check(FaceMood::Scared, 1.0, true, 0.0), (FaceMood::Scared, 0.6));
        assert_eq!(g.check(FaceMood::Sad, 1.0, true, 0.0), (FaceMood::Sad, 0.7));
        assert_eq!(g.check(FaceMood::Surprised, 1.0, true, 0.0), (FaceMood::Surprised, 0.8));
        // Below the cap intensity passes unchanged.
        assert_eq!(g.check(FaceMood::Angry, 0.3, true, 10.0), (FaceMood::Angry, 0.3));
    }

    #[test]
    fn duration_cap_fires_once() {
        let mut g = Guardrails::new();
        assert_eq!(g.check(FaceMood::Angry, 0.4, true, 0.0), (FaceMood::Angry, 0.4));
        assert_eq!(g.check(FaceMood::Angry, 0.4, true, 1.9), (FaceMood::Angry, 0.4));
        // Past 2 s: recover to neutral, exactly once.
        assert_eq!(g.check(FaceMood::Angry, 0.4, true, 2.1), (FaceMood::Neutral, 0.0));
        // Latched until the mood id changes: continued ANGRY passes the
        // caps without re-firing.
        assert_eq!(g.check(FaceMood::Angry, 0.4, true, 2.2), (FaceMood::Angry, 0.4));
    }

    #[test]
    fn duration_cap_resets_on_mood_change() {
        let mut g = Guardrails::new();
        g.check(FaceMood::Surprised, 0.5, true, 0.0);
        g.check(FaceMood::Happy, 0.5, true, 2.0);
        // SURPRISED spell restarted at t=5, so no fire at t=6.5.
        g.check(FaceMood::Surprised, 0.5, true, 5.0);
        assert_eq!(g.check(FaceMood::Surprised, 0.5, true, 6.5), (FaceMood::Surprised, 0.5));
        assert_eq!(g.check(FaceMood::Surprised, 0.5, true, 8.1), (FaceMood::Neutral, 0.0));
    }
}
