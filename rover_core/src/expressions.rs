//! Canonical supervisor-side mappings for face emotions and gestures.
//!
//! Worker-provided names are normalized (trim, lowercase, alias fold)
//! before lookup; anything that does not normalize to a canonical name is
//! rejected by returning `None`.

use rover_proto::types::{FaceGesture, FaceMood};

/// Normalize an emotion name to a face mood id.
pub fn emotion_to_mood(name: &str) -> Option<FaceMood> {
    let key = name.trim().to_lowercase();
    let key = match key.as_str() {
        "tired" => "sleepy",
        other => other,
    };
    match key {
        "neutral" => Some(FaceMood::Neutral),
        "happy" => Some(FaceMood::Happy),
        "excited" => Some(FaceMood::Excited),
        "curious" => Some(FaceMood::Curious),
        "sad" => Some(FaceMood::Sad),
        "scared" => Some(FaceMood::Scared),
        "angry" => Some(FaceMood::Angry),
        "surprised" => Some(FaceMood::Surprised),
        "sleepy" => Some(FaceMood::Sleepy),
        "love" => Some(FaceMood::Love),
        "silly" => Some(FaceMood::Silly),
        "thinking" => Some(FaceMood::Thinking),
        "confused" => Some(FaceMood::Confused),
        _ => None,
    }
}

/// Telemetry name for a face mood id.
pub fn mood_name(mood_id: u8) -> &'static str {
    match FaceMood::from_u8(mood_id) {
        Some(FaceMood::Neutral) => "neutral",
        Some(FaceMood::Happy) => "happy",
        Some(FaceMood::Excited) => "excited",
        Some(FaceMood::Curious) => "curious",
        Some(FaceMood::Sad) => "sad",
        Some(FaceMood::Scared) => "scared",
        Some(FaceMood::Angry) => "angry",
        Some(FaceMood::Surprised) => "surprised",
        Some(FaceMood::Sleepy) => "sleepy",
        Some(FaceMood::Love) => "love",
        Some(FaceMood::Silly) => "silly",
        Some(FaceMood::Thinking) => "thinking",
        Some(FaceMood::Confused) => "confused",
        None => "unknown",
    }
}

/// Normalize a gesture name to a face gesture id.
pub fn gesture_to_id(name: &str) -> Option<FaceGesture> {
    let key = name.trim().to_lowercase();
    let key = match key.as_str() {
        "head_shake" | "head-shake" => "headshake",
        "xeyes" | "x-eyes" => "x_eyes",
        other => other,
    };
    match key {
        "blink" => Some(FaceGesture::Blink),
        "wink_l" => Some(FaceGesture::WinkL),
        "wink_r" => Some(FaceGesture::WinkR),
        "confused" => Some(FaceGesture::Confused),
        "laugh" => Some(FaceGesture::Laugh),
        "surprise" => Some(FaceGesture::Surprise),
        "heart" => Some(FaceGesture::Heart),
        "x_eyes" => Some(FaceGesture::XEyes),
        "sleepy" => Some(FaceGesture::Sleepy),
        "rage" => Some(FaceGesture::Rage),
        "nod" => Some(FaceGesture::Nod),
        "headshake" => Some(FaceGesture::Headshake),
        "wiggle" => Some(FaceGesture::Wiggle),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_fold() {
        assert_eq!(emotion_to_mood("Tired "), Some(FaceMood::Sleepy));
        assert_eq!(gesture_to_id("head-shake"), Some(FaceGesture::Headshake));
        assert_eq!(gesture_to_id("XEYES"), Some(FaceGesture::XEyes));
    }

    #[test]
    fn unknown_names_rejected() {
        assert_eq!(emotion_to_mood("rage"), None);
        assert_eq!(gesture_to_id("backflip"), None);
    }

    #[test]
    fn mood_name_roundtrip() {
        // Every mood id maps to a name, and every name maps back.
        for id in 0..=12u8 {
            let name = mood_name(id);
            assert_ne!(name, "unknown");
            assert_eq!(emotion_to_mood(name), FaceMood::from_u8(id));
        }
        assert_eq!(mood_name(200), "unknown");
    }
}
