//! Deterministic event-driven speech policy.
//!
//! Turns high-signal runtime events into bounded spoken lines: per-key
//! cooldowns, rotating phrase lists, at most one utterance per tick, and
//! nothing while the face is already listening or talking.

use std::collections::HashMap;

use rover_proto::types::FaceButtonId;

use crate::events::PlannerEvent;
use crate::state::RobotState;

/// A line of speech the policy wants spoken, tagged with its trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechIntent {
    pub text: String,
    pub source_event: String,
}

const PHRASES: &[(&str, f64, &[&str])] = &[
    (
        "vision.ball_acquired",
        5000.0,
        &["Ooh, I see a ball!", "Ball spotted!", "I found a ball!"],
    ),
    (
        "mode.changed:WANDER",
        7000.0,
        &[
            "Wander mode on. Let's explore!",
            "I am going exploring now.",
            "Patrol drift started.",
        ],
    ),
    (
        "mode.changed:IDLE",
        9000.0,
        &["Okay, I'll pause in idle mode.", "Taking a little rest in idle."],
    ),
    (
        "fault.raised",
        6000.0,
        &["Uh oh. I need to pause for safety.", "I found a fault, stopping now."],
    ),
    (
        "face.button.click",
        4000.0,
        &["Nice click!", "Button press detected.", "Boop!"],
    ),
];

/// Turns runtime events into bounded spoken lines.
pub struct SpeechPolicy {
    last_spoken_ms: HashMap<&'static str, f64>,
    phrase_index: HashMap<&'static str, usize>,
}

impl Default for SpeechPolicy {
    fn default() -> Self {
        Self { last_spoken_ms: HashMap::new(), phrase_index: HashMap::new() }
    }
}

impl SpeechPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan recent events and produce at most one intent. Returns the
    /// intents plus drop reasons for counters.
    pub fn generate(
        &mut self,
        robot: &RobotState,
        events: &[PlannerEvent],
        now_mono_ms: f64,
    ) -> (Vec<SpeechIntent>, Vec<&'static str>) {
        let mut intents = Vec::new();
        let mut drops = Vec::new();

        for evt in events {
            let Some(key) = Self::event_key(evt) else { continue };

            // ACTION clicks run the explicit greet routine instead.
            if key == "face.button.click" {
                let button_id = evt.payload.get("button_id").and_then(|v| v.as_i64());
                if button_id == Some(FaceButtonId::Action as i64) {
                    continue;
                }
            }

            if robot.face_listening || robot.face_talking {
                drops.push("policy_face_busy");
                continue;
            }
            if self.on_cooldown(key, now_mono_ms) {
                drops.push("policy_cooldown");
                continue;
            }
            let Some(phrase) = self.next_phrase(key) else {
                drops.push("policy_no_phrase");
                continue;
            };

            self.last_spoken_ms.insert(key, now_mono_ms);
            intents.push(SpeechIntent { text: phrase, source_event: evt.event_type.clone() });
            break; // one utterance per tick; event bursts stay quiet
        }

        (intents, drops)
    }

    fn event_key(evt: &PlannerEvent) -> Option<&'static str> {
        match evt.event_type.as_str() {
            "vision.ball_acquired" => Some("vision.ball_acquired"),
            "fault.raised" => Some("fault.raised"),
            "face.button.click" => Some("face.button.click"),
            "mode.changed" => {
                match evt.payload.get("to").and_then(|v| v.as_str()).unwrap_or("") {
                    "WANDER" => Some("mode.changed:WANDER"),
                    "IDLE" => Some("mode.changed:IDLE"),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn on_cooldown(&self, key: &str, now_ms: f64) -> bool {
        let cooldown = PHRASES
            .iter()
            .find(|(k, _, _)| *k == key)
            .map_or(0.0, |(_, cd, _)| *cd);
        match self.last_spoken_ms.get(key) {
            Some(&last) => now_ms - last < cooldown,
            None => false,
        }
    }

    fn next_phrase(&mut self, key: &'static str) -> Option<String> {
        let phrases = PHRASES.iter().find(|(k, _, _)| *k == key).map(|(_, _, p)| *p)?;
        if phrases.is_empty() {
            return None;
        }
        let idx = self.phrase_index.entry(key).or_insert(0);
        let phrase = phrases[*idx % phrases.len()];
        *idx += 1;
        Some(phrase.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(event_type: &str, payload: serde_json::Value) -> PlannerEvent {
        PlannerEvent { event_type: event_type.into(), payload, t_mono_ms: 0.0, seq: 1 }
    }

    #[test]
    fn ball_event_produces_phrase_once_per_cooldown() {
        let mut policy = SpeechPolicy::new();
        let robot = RobotState::default();
        let evts = vec![event("vision.ball_acquired", json!({}))];

        let (intents, _) = policy.generate(&robot, &evts, 0.0);
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].text, "Ooh, I see a ball!");

        let (intents, drops) = policy.generate(&robot, &evts, 3000.0);
        assert!(intents.is_empty());
        assert_eq!(drops, vec!["policy_cooldown"]);

        // Past cooldown: next phrase in rotation.
        let (intents, _) = policy.generate(&robot, &evts, 6000.0);
        assert_eq!(intents[0].text, "Ball spotted!");
    }

    #[test]
    fn one_utterance_per_tick() {
        let mut policy = SpeechPolicy::new();
        let robot = RobotState::default();
        let evts = vec![
            event("vision.ball_acquired", json!({})),
            event("fault.raised", json!({})),
        ];
        let (intents, _) = policy.generate(&robot, &evts, 0.0);
        assert_eq!(intents.len(), 1);
    }

    #[test]
    fn busy_face_suppresses() {
        let mut policy = SpeechPolicy::new();
        let mut robot = RobotState::default();
        robot.face_talking = true;
        let evts = vec![event("fault.raised", json!({}))];
        let (intents, drops) = policy.generate(&robot, &evts, 0.0);
        assert!(intents.is_empty());
        assert_eq!(drops, vec!["policy_face_busy"]);
    }

    #[test]
    fn action_click_excluded() {
        let mut policy = SpeechPolicy::new();
        let robot = RobotState::default();
        let evts = vec![event("face.button.click", json!({"button_id": 1}))];
        let (intents, drops) = policy.generate(&robot, &evts, 0.0);
        assert!(intents.is_empty());
        assert!(drops.is_empty());

        // PTT clicks do speak.
        let evts = vec![event("face.button.click", json!({"button_id": 0}))];
        let (intents, _) = policy.generate(&robot, &evts, 0.0);
        assert_eq!(intents.len(), 1);
    }

    #[test]
    fn mode_change_keys_on_target() {
        let mut policy = SpeechPolicy::new();
        let robot = RobotState::default();
        let evts = vec![event("mode.changed", json!({"from": "IDLE", "to": "WANDER"}))];
        let (intents, _) = policy.generate(&robot, &evts, 0.0);
        assert_eq!(intents[0].text, "Wander mode on. Let's explore!");

        // TELEOP transitions stay silent.
        let evts = vec![event("mode.changed", json!({"from": "IDLE", "to": "TELEOP"}))];
        let (intents, _) = policy.generate(&robot, &evts, 20_000.0);
        assert!(intents.is_empty());
    }
}
