//! Envelope type-string constants.
//!
//! Naming convention: `<domain>.<category>.<name>`. The reserved suffixes
//! `*.status.health` and `*.lifecycle.{started,stopped,error}` are
//! recognized by the worker supervisor as heartbeats regardless of domain.

/// Source id used by the core on outbound envelopes.
pub const SRC_CORE: &str = "core";

// ─── System ─────────────────────────────────────────────────────────

pub const SYSTEM_LIFECYCLE_SHUTDOWN: &str = "system.lifecycle.shutdown";
pub const SYSTEM_AUDIO_LINK_UP: &str = "system.audio.link_up";
pub const SYSTEM_AUDIO_LINK_DOWN: &str = "system.audio.link_down";

// ─── Vision worker ──────────────────────────────────────────────────

pub const VISION_DETECTION_SNAPSHOT: &str = "vision.detection.snapshot";
pub const VISION_FRAME_JPEG: &str = "vision.frame.jpeg";
pub const VISION_STATUS_HEALTH: &str = "vision.status.health";

// ─── Speech-out (TTS) worker ────────────────────────────────────────

pub const TTS_CMD_SPEAK: &str = "tts.cmd.speak";
pub const TTS_CMD_CANCEL: &str = "tts.cmd.cancel";
pub const TTS_CMD_PLAY_CHIME: &str = "tts.cmd.play_chime";
pub const TTS_EVENT_STARTED: &str = "tts.event.started";
pub const TTS_EVENT_ENERGY: &str = "tts.event.energy";
pub const TTS_EVENT_FINISHED: &str = "tts.event.finished";
pub const TTS_EVENT_CANCELLED: &str = "tts.event.cancelled";
pub const TTS_EVENT_ERROR: &str = "tts.event.error";
pub const TTS_STATUS_HEALTH: &str = "tts.status.health";

// ─── Speech-in (ear) worker ─────────────────────────────────────────

pub const EAR_CMD_START_LISTENING: &str = "ear.cmd.start_listening";
pub const EAR_CMD_STOP_LISTENING: &str = "ear.cmd.stop_listening";
pub const EAR_CMD_PAUSE_VAD: &str = "ear.cmd.pause_vad";
pub const EAR_CMD_RESUME_VAD: &str = "ear.cmd.resume_vad";
pub const EAR_EVENT_WAKE_WORD: &str = "ear.event.wake_word";
pub const EAR_EVENT_END_OF_UTTERANCE: &str = "ear.event.end_of_utterance";
pub const EAR_STATUS_HEALTH: &str = "ear.status.health";

// ─── AI (planner + conversation) worker ─────────────────────────────

pub const AI_CMD_REQUEST_PLAN: &str = "ai.cmd.request_plan";
pub const AI_CMD_START_CONVERSATION: &str = "ai.cmd.start_conversation";
pub const AI_CMD_END_CONVERSATION: &str = "ai.cmd.end_conversation";
pub const AI_CMD_END_UTTERANCE: &str = "ai.cmd.end_utterance";
pub const AI_PLAN_RECEIVED: &str = "ai.plan.received";
pub const AI_CONVERSATION_EMOTION: &str = "ai.conversation.emotion";
pub const AI_CONVERSATION_GESTURE: &str = "ai.conversation.gesture";
pub const AI_CONVERSATION_DONE: &str = "ai.conversation.done";
pub const AI_STATE_CHANGED: &str = "ai.state.changed";
pub const AI_STATUS_HEALTH: &str = "ai.status.health";
pub const AI_LIFECYCLE_STARTED: &str = "ai.lifecycle.started";
pub const AI_LIFECYCLE_ERROR: &str = "ai.lifecycle.error";

// ─── Personality worker ─────────────────────────────────────────────

pub const PERSONALITY_CONFIG_INIT: &str = "personality.config.init";
pub const PERSONALITY_EVENT_SYSTEM_STATE: &str = "personality.event.system_state";
pub const PERSONALITY_EVENT_CONV_STARTED: &str = "personality.event.conv_started";
pub const PERSONALITY_EVENT_CONV_ENDED: &str = "personality.event.conv_ended";
pub const PERSONALITY_EVENT_SPEECH_ACTIVITY: &str = "personality.event.speech_activity";
pub const PERSONALITY_EVENT_BUTTON_PRESS: &str = "personality.event.button_press";
pub const PERSONALITY_EVENT_AI_EMOTION: &str = "personality.event.ai_emotion";
pub const PERSONALITY_EVENT_MEMORY_EXTRACT: &str = "personality.event.memory_extract";
pub const PERSONALITY_EVENT_GUARDRAIL_TRIGGERED: &str = "personality.event.guardrail_triggered";
pub const PERSONALITY_CMD_OVERRIDE_AFFECT: &str = "personality.cmd.override_affect";
pub const PERSONALITY_STATE_SNAPSHOT: &str = "personality.state.snapshot";
pub const PERSONALITY_STATUS_HEALTH: &str = "personality.status.health";

// ─── Reserved suffixes ──────────────────────────────────────────────

/// Any envelope type ending with this refreshes the worker heartbeat.
pub const SUFFIX_STATUS_HEALTH: &str = ".status.health";
/// Lifecycle-started also counts as a heartbeat.
pub const SUFFIX_LIFECYCLE_STARTED: &str = ".lifecycle.started";
