//! Routes inbound worker envelopes to `WorldState` updates and plan
//! acceptance.
//!
//! The core stamps receive time on plan arrival and is authoritative for
//! dedup, sequence ordering, TTL enforcement, validation, and scheduling.

use std::collections::VecDeque;

use serde_json::Value;
use tracing::{debug, info, warn};

use rover_common::envelope::Envelope;
use rover_common::messages as msg;

use crate::plan::{ActionScheduler, PlanValidator};
use crate::state::{WorkerLiveness, WorldState};

/// Plan dedup window bounds.
const PLAN_DEDUP_WINDOW: usize = 256;
const PLAN_DEDUP_TTL_MS: f64 = 60_000.0;

/// Update `WorldState` from inbound worker events.
pub struct EventRouter {
    validator: PlanValidator,
    /// plan_id → receive time, oldest first.
    seen_plans: VecDeque<(String, f64)>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        Self { validator: PlanValidator, seen_plans: VecDeque::new() }
    }

    /// Dispatch one inbound worker event.
    pub fn route(
        &mut self,
        worker_name: &str,
        env: &Envelope,
        world: &mut WorldState,
        scheduler: &mut ActionScheduler,
        now_ms: f64,
    ) {
        match env.msg_type.as_str() {
            // ── Vision ───────────────────────────────────────────
            msg::VISION_DETECTION_SNAPSHOT => {
                world.clear_confidence = env.f64_field("clear_confidence", -1.0) as f32;
                world.ball_confidence = env.f64_field("ball_confidence", 0.0) as f32;
                world.ball_bearing_deg = env.f64_field("ball_bearing_deg", 0.0) as f32;
                world.vision_fps = env.f64_field("fps", 0.0) as f32;
                world.vision_rx_mono_ms = now_ms;
                world.vision_frame_seq = env.i64_field("frame_seq", 0).max(0) as u64;
            }
            msg::VISION_FRAME_JPEG => {
                world.latest_frame_b64 = env.str_field("data_b64").to_string();
            }
            msg::VISION_STATUS_HEALTH => heartbeat(world, "vision", now_ms),

            // ── Speech-out ───────────────────────────────────────
            msg::TTS_EVENT_STARTED => {
                world.speaking = true;
                world.current_energy = 0;
            }
            msg::TTS_EVENT_ENERGY => {
                world.current_energy = env.i64_field("energy", 0).clamp(0, 255) as u8;
            }
            msg::TTS_EVENT_FINISHED | msg::TTS_EVENT_CANCELLED | msg::TTS_EVENT_ERROR => {
                world.speaking = false;
                world.current_energy = 0;
            }
            msg::TTS_STATUS_HEALTH => heartbeat(world, "tts", now_ms),

            // ── AI (planner + conversation) ──────────────────────
            msg::AI_PLAN_RECEIVED => self.handle_plan(env, world, scheduler, now_ms),
            msg::AI_STATE_CHANGED => {
                world.ai_state = {
                    let s = env.str_field("state");
                    if s.is_empty() { "idle".into() } else { s.to_string() }
                };
            }
            msg::AI_STATUS_HEALTH => {
                heartbeat(world, "ai", now_ms);
                world.planner_connected = env.bool_field("connected", false);
            }
            msg::AI_LIFECYCLE_STARTED => heartbeat(world, "ai", now_ms),
            msg::AI_LIFECYCLE_ERROR => world.planner_connected = false,
            // Emotion, gesture, transcription, and done are conversation
            // events composed by the tick loop, not world-state updates.
            msg::AI_CONVERSATION_EMOTION
            | msg::AI_CONVERSATION_GESTURE
            | msg::AI_CONVERSATION_DONE => {}

            // ── Speech-in ────────────────────────────────────────
            msg::EAR_EVENT_WAKE_WORD | msg::EAR_EVENT_END_OF_UTTERANCE => {}
            msg::EAR_STATUS_HEALTH => heartbeat(world, "ear", now_ms),

            // ── Audio links ──────────────────────────────────────
            msg::SYSTEM_AUDIO_LINK_UP => {
                match env.str_field("socket") {
                    "mic" => world.mic_link_up = true,
                    "spk" => world.spk_link_up = true,
                    other => debug!("audio link up for unknown socket {:?}", other),
                }
                info!("audio link up: {} (from {})", env.str_field("socket"), worker_name);
            }
            msg::SYSTEM_AUDIO_LINK_DOWN => {
                match env.str_field("socket") {
                    "mic" => world.mic_link_up = false,
                    "spk" => world.spk_link_up = false,
                    _ => {}
                }
                warn!(
                    "audio link down: {} (from {}, reason={})",
                    env.str_field("socket"),
                    worker_name,
                    env.str_field("reason"),
                );
            }

            // ── Personality ──────────────────────────────────────
            msg::PERSONALITY_STATE_SNAPSHOT => {
                world.personality_mood = {
                    let m = env.str_field("mood");
                    if m.is_empty() { "neutral".into() } else { m.to_string() }
                };
                world.personality_intensity = env.f64_field("intensity", 0.0) as f32;
                world.personality_valence = env.f64_field("valence", 0.0) as f32;
                world.personality_arousal = env.f64_field("arousal", 0.0) as f32;
                world.personality_layer = env.i64_field("layer", 0).clamp(0, 255) as u8;
                world.personality_idle_state = env.str_field("idle_state").to_string();
                world.personality_snapshot_ts_ms = now_ms;
                world.personality_conversation_active =
                    env.bool_field("conversation_active", false);
                world.personality_session_time_s = env.f64_field("session_time_s", 0.0);
                world.personality_daily_time_s = env.f64_field("daily_time_s", 0.0);
                world.personality_session_limit_reached =
                    env.bool_field("session_limit_reached", false);
                world.personality_daily_limit_reached =
                    env.bool_field("daily_limit_reached", false);
            }
            msg::PERSONALITY_EVENT_GUARDRAIL_TRIGGERED => {} // tick loop handles
            msg::PERSONALITY_STATUS_HEALTH => heartbeat(world, "personality", now_ms),

            other => debug!("ignoring envelope type {:?} from {}", other, worker_name),
        }
    }

    /// Core-authoritative plan acceptance.
    fn handle_plan(
        &mut self,
        env: &Envelope,
        world: &mut WorldState,
        scheduler: &mut ActionScheduler,
        now_ms: f64,
    ) {
        let plan_id = env.str_field("plan_id").to_string();
        let plan_seq = env.i64_field("plan_seq", 0);
        let ttl_ms = env.i64_field("ttl_ms", 2000);
        let empty = Vec::new();
        let actions: &Vec<Value> = match env.field("actions").and_then(Value::as_array) {
            Some(a) => a,
            None => &empty,
        };

        // 1. Transport-level dedup by plan id.
        self.prune_dedup(now_ms);
        if self.seen_plans.iter().any(|(id, _)| *id == plan_id) {
            world.plan_dropped_duplicate += 1;
            return;
        }
        self.seen_plans.push_back((plan_id.clone(), now_ms));
        while self.seen_plans.len() > PLAN_DEDUP_WINDOW {
            self.seen_plans.pop_front();
        }

        // 2. Strictly monotonic sequence per source.
        if plan_seq <= world.plan_seq_last_accepted {
            world.plan_dropped_out_of_order += 1;
            return;
        }

        // 3. Validate, 4. schedule. The plan just arrived, so issue time
        // is "now" for TTL purposes.
        let validated = self.validator.validate(actions, ttl_ms);
        let accepted = validated.actions.len();
        scheduler.schedule_plan(validated, now_ms, now_ms);

        world.plan_seq_last_accepted = plan_seq;
        world.last_plan_mono_ms = now_ms;
        world.last_plan_actions = accepted;
        world.last_plan_id = plan_id;
    }

    fn prune_dedup(&mut self, now_ms: f64) {
        while let Some((_, t)) = self.seen_plans.front() {
            if now_ms - t <= PLAN_DEDUP_TTL_MS {
                break;
            }
            self.seen_plans.pop_front();
        }
    }
}

fn heartbeat(world: &mut WorldState, name: &str, now_ms: f64) {
    let entry = world
        .workers
        .entry(name.to_string())
        .or_insert_with(WorkerLiveness::default);
    entry.alive = true;
    entry.last_heartbeat_ms = now_ms;
}
