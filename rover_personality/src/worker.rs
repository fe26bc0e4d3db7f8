//! The personality worker: process-isolated affect engine.
//!
//! Maintains a continuous affect vector, applies the Layer-0
//! deterministic impulse rules, projects to discrete moods, enforces its
//! own guardrails, and emits `personality.state.snapshot` envelopes
//! consumed by the tick loop. Layer 0 has zero server dependency: the
//! robot keeps an emotional life even when the language model is
//! offline.
//!
//! Wire contract: NDJSON envelopes on stdin/stdout, heartbeat via
//! `personality.status.health`, graceful exit on
//! `system.lifecycle.shutdown`.

use std::collections::HashMap;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use rover_common::envelope::{Envelope, SeqCounter};
use rover_common::messages as msg;
use rover_common::time::mono_ns;

use crate::affect::{
    compute_trait_parameters, emotion_target, enforce_context_gate, project_mood, update_affect,
    AffectVector, Impulse, MemoryBias, TraitParameters,
};

// ─── Guardrail tables ───────────────────────────────────────────────

/// mood → max continuous seconds before an auto-recovery impulse.
fn duration_cap_s(mood: &str) -> Option<f64> {
    match mood {
        "angry" | "scared" => Some(2.0),
        "surprised" => Some(3.0),
        "sad" => Some(4.0),
        _ => None,
    }
}

/// mood → maximum intensity before snapshot emission.
fn intensity_cap(mood: &str) -> Option<f64> {
    match mood {
        "angry" => Some(0.50),
        "scared" => Some(0.60),
        "sad" => Some(0.70),
        "surprised" => Some(0.80),
        _ => None,
    }
}

// ─── Idle thresholds ────────────────────────────────────────────────

const IDLE_DROWSY_S: f64 = 300.0;
const IDLE_ASLEEP_S: f64 = 900.0;
const IDLE_SUPPRESS_AFTER_CONV_S: f64 = 120.0;

// ─── Interaction time limits ────────────────────────────────────────

const SESSION_TIME_LIMIT_S: f64 = 900.0;
const DAILY_TIME_LIMIT_S: f64 = 2700.0;

/// Remembered biases kept live; oldest extractions age out first.
const MAX_MEMORIES: usize = 16;

/// Affect engine implementing the Layer-0 deterministic rules.
pub struct PersonalityWorker {
    traits: Option<TraitParameters>,
    affect: AffectVector,
    current_mood: &'static str,
    current_intensity: f64,
    pending: Vec<Impulse>,
    memories: Vec<MemoryBias>,

    conversation_active: bool,

    // Timers, advanced by tick/fast-path dt.
    now_s: f64,
    idle_timer_s: f64,
    conv_ended_ago_s: f64,
    negative_mood_timer_s: f64,
    negative_mood_name: &'static str,

    // Session / daily interaction accounting.
    session_time_s: f64,
    daily_time_s: f64,
    session_limit_fired: bool,
    daily_limit_fired: bool,

    cooldowns: HashMap<&'static str, f64>,
    boot_fired: bool,

    rng: StdRng,
    seq: SeqCounter,
    outbox: Vec<Envelope>,
}

impl PersonalityWorker {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            traits: None,
            affect: AffectVector { valence: 0.10, arousal: -0.05 },
            current_mood: "neutral",
            current_intensity: 0.0,
            pending: Vec::new(),
            memories: Vec::new(),
            conversation_active: false,
            now_s: 0.0,
            idle_timer_s: 0.0,
            conv_ended_ago_s: f64::INFINITY,
            negative_mood_timer_s: 0.0,
            negative_mood_name: "",
            session_time_s: 0.0,
            daily_time_s: 0.0,
            session_limit_fired: false,
            daily_limit_fired: false,
            cooldowns: HashMap::new(),
            boot_fired: false,
            rng,
            seq: SeqCounter::new(),
            outbox: Vec::new(),
        }
    }

    pub fn configured(&self) -> bool {
        self.traits.is_some()
    }

    /// Fall back to the default axis positions when no config arrives.
    pub fn configure_defaults(&mut self) {
        self.configure(0.40, 0.50, 0.30, 0.35, 0.75);
    }

    pub fn configure(
        &mut self,
        energy: f64,
        reactivity: f64,
        initiative: f64,
        vulnerability: f64,
        predictability: f64,
    ) {
        let traits = compute_trait_parameters(
            energy,
            reactivity,
            initiative,
            vulnerability,
            predictability,
        );
        self.affect = AffectVector::at_baseline(&traits);
        self.traits = Some(traits);
        info!(
            "traits configured (baseline v={:.2} a={:.2})",
            traits.baseline_valence, traits.baseline_arousal
        );
    }

    /// Drain envelopes produced since the last call.
    pub fn take_outbox(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outbox)
    }

    pub fn mood(&self) -> (&'static str, f64) {
        (self.current_mood, self.current_intensity)
    }

    pub fn affect(&self) -> &AffectVector {
        &self.affect
    }

    // ── Tick paths ───────────────────────────────────────────────

    /// Full 1 Hz tick: timers → idle rules → affect → project → emit.
    pub fn tick(&mut self, dt: f64) {
        self.now_s += dt;
        self.idle_timer_s += dt;
        if self.conv_ended_ago_s.is_finite() {
            self.conv_ended_ago_s += dt;
        }
        self.track_interaction_time(dt);
        self.evaluate_idle_rules();
        self.process_and_emit(dt);
    }

    /// Event-triggered immediate processing; no idle rule evaluation.
    fn fast_path(&mut self) {
        self.process_and_emit(0.0);
    }

    fn process_and_emit(&mut self, dt: f64) {
        let Some(traits) = self.traits else { return };

        update_affect(
            &mut self.affect,
            &traits,
            &mut self.pending,
            &self.memories,
            dt,
            &mut self.rng,
        );

        let (mood, intensity) = project_mood(&self.affect, self.current_mood);
        self.current_mood = mood;
        self.current_intensity = intensity;

        // Context gate; on a gate, recompute intensity for neutral.
        let gated = enforce_context_gate(self.current_mood, self.conversation_active);
        if gated != self.current_mood {
            self.current_mood = gated;
            let (_, intensity) = project_mood(&self.affect, self.current_mood);
            self.current_intensity = intensity;
        }

        self.enforce_duration_caps(dt);

        if let Some(cap) = intensity_cap(self.current_mood) {
            self.current_intensity = self.current_intensity.min(cap);
        }

        self.emit_snapshot();
    }

    fn emit_snapshot(&mut self) {
        let mut payload = Map::new();
        payload.insert("mood".into(), json!(self.current_mood));
        payload.insert("intensity".into(), json!(self.current_intensity));
        payload.insert("valence".into(), json!(self.affect.valence));
        payload.insert("arousal".into(), json!(self.affect.arousal));
        payload.insert("layer".into(), json!(0));
        payload.insert("conversation_active".into(), json!(self.conversation_active));
        payload.insert("idle_state".into(), json!(self.idle_state()));
        payload.insert("session_time_s".into(), json!(self.session_time_s));
        payload.insert("daily_time_s".into(), json!(self.daily_time_s));
        payload.insert(
            "session_limit_reached".into(),
            json!(self.session_limit_fired),
        );
        payload.insert("daily_limit_reached".into(), json!(self.daily_limit_fired));
        self.send(msg::PERSONALITY_STATE_SNAPSHOT, payload);
    }

    /// Health payload for the supervisor's heartbeat monitor.
    pub fn emit_health(&mut self) {
        let mut payload = Map::new();
        payload.insert("alive".into(), json!(true));
        payload.insert("mood".into(), json!(self.current_mood));
        payload.insert("idle_state".into(), json!(self.idle_state()));
        payload.insert("idle_timer_s".into(), json!(self.idle_timer_s));
        payload.insert("configured".into(), json!(self.configured()));
        self.send(msg::PERSONALITY_STATUS_HEALTH, payload);
    }

    // ── Idle rules ───────────────────────────────────────────────

    fn evaluate_idle_rules(&mut self) {
        if self.conversation_active {
            return;
        }
        // Settle time after a conversation before drowsiness kicks in.
        if self.conv_ended_ago_s < IDLE_SUPPRESS_AFTER_CONV_S {
            return;
        }

        if self.idle_timer_s > IDLE_DROWSY_S && self.check_cooldown("idle_medium", 600.0) {
            self.pending.push(Impulse {
                target_valence: 0.00,
                target_arousal: -0.15,
                magnitude: 0.30,
                source: "idle_rule",
            });
            debug!("medium idle impulse");
        }

        if self.idle_timer_s > IDLE_ASLEEP_S && self.check_cooldown("idle_long", 1800.0) {
            self.pending.push(Impulse {
                target_valence: 0.00,
                target_arousal: -0.30,
                magnitude: 0.40,
                source: "idle_rule",
            });
            debug!("long idle impulse");
        }
    }

    fn idle_state(&self) -> &'static str {
        if self.idle_timer_s >= IDLE_ASLEEP_S {
            "asleep"
        } else if self.idle_timer_s >= IDLE_DROWSY_S {
            "drowsy"
        } else {
            "awake"
        }
    }

    // ── Duration caps ────────────────────────────────────────────

    fn enforce_duration_caps(&mut self, dt: f64) {
        let Some(cap) = duration_cap_s(self.current_mood) else {
            self.negative_mood_timer_s = 0.0;
            self.negative_mood_name = "";
            return;
        };

        if self.negative_mood_name == self.current_mood {
            self.negative_mood_timer_s += dt;
        } else {
            self.negative_mood_name = self.current_mood;
            self.negative_mood_timer_s = 0.0;
        }

        if self.negative_mood_timer_s > cap {
            if let Some(traits) = self.traits {
                self.pending.push(Impulse {
                    target_valence: traits.baseline_valence,
                    target_arousal: traits.baseline_arousal,
                    magnitude: 0.40,
                    source: "system_event",
                });
                info!(
                    "duration cap: {} exceeded {:.1}s, recovery impulse",
                    self.current_mood, cap
                );
            }
            self.negative_mood_timer_s = 0.0;
            self.negative_mood_name = "";
        }
    }

    // ── Interaction time limits ──────────────────────────────────

    fn track_interaction_time(&mut self, dt: f64) {
        if !self.conversation_active {
            return;
        }
        self.session_time_s += dt;
        self.daily_time_s += dt;

        if !self.session_limit_fired && self.session_time_s > SESSION_TIME_LIMIT_S {
            self.session_limit_fired = true;
            let mut payload = Map::new();
            payload.insert("rule".into(), json!("session_time_limit"));
            self.send(msg::PERSONALITY_EVENT_GUARDRAIL_TRIGGERED, payload);
        }
        if !self.daily_limit_fired && self.daily_time_s > DAILY_TIME_LIMIT_S {
            self.daily_limit_fired = true;
            let mut payload = Map::new();
            payload.insert("rule".into(), json!("daily_time_limit"));
            self.send(msg::PERSONALITY_EVENT_GUARDRAIL_TRIGGERED, payload);
        }
    }

    fn check_cooldown(&mut self, rule: &'static str, cooldown_s: f64) -> bool {
        let last = self.cooldowns.get(rule).copied().unwrap_or(f64::NEG_INFINITY);
        if self.now_s - last < cooldown_s {
            return false;
        }
        self.cooldowns.insert(rule, self.now_s);
        true
    }

    // ── Inbound events (Layer-0 impulse catalog) ─────────────────

    /// Handle one envelope from the core. Returns false on shutdown.
    pub fn on_message(&mut self, env: &Envelope) -> bool {
        match env.msg_type.as_str() {
            msg::SYSTEM_LIFECYCLE_SHUTDOWN => return false,
            msg::PERSONALITY_CONFIG_INIT => {
                self.configure(
                    env.f64_field("energy", 0.40),
                    env.f64_field("reactivity", 0.50),
                    env.f64_field("initiative", 0.30),
                    env.f64_field("vulnerability", 0.35),
                    env.f64_field("predictability", 0.75),
                );
            }
            msg::PERSONALITY_EVENT_SYSTEM_STATE => self.handle_system_event(env),
            msg::PERSONALITY_EVENT_CONV_STARTED => {
                self.conversation_active = true;
                self.idle_timer_s = 0.0;
                self.session_time_s = 0.0;
                self.session_limit_fired = false;
                self.pending.push(Impulse {
                    target_valence: 0.10,
                    target_arousal: 0.15,
                    magnitude: 0.30,
                    source: "system_event",
                });
                // Wake-word starts carry an extra approach impulse.
                if env.str_field("trigger") == "wake_word"
                    && self.check_cooldown("wake_word_conv", 10.0)
                {
                    self.pending.push(Impulse {
                        target_valence: 0.10,
                        target_arousal: 0.15,
                        magnitude: 0.25,
                        source: "system_event",
                    });
                }
                self.fast_path();
            }
            msg::PERSONALITY_EVENT_CONV_ENDED => {
                self.conversation_active = false;
                self.conv_ended_ago_s = 0.0;
                if self.affect.valence > 0.0 {
                    self.pending.push(Impulse {
                        target_valence: 0.20,
                        target_arousal: -0.05,
                        magnitude: 0.40,
                        source: "system_event",
                    });
                } else {
                    self.pending.push(Impulse {
                        target_valence: 0.05,
                        target_arousal: -0.10,
                        magnitude: 0.30,
                        source: "system_event",
                    });
                }
                self.fast_path();
            }
            msg::PERSONALITY_EVENT_SPEECH_ACTIVITY => {
                let speaking = env.bool_field("speaking", false);
                if speaking && self.check_cooldown("speech_activity", 5.0) {
                    self.pending.push(Impulse {
                        target_valence: 0.05,
                        target_arousal: 0.10,
                        magnitude: 0.20,
                        source: "speech_signal",
                    });
                    self.idle_timer_s = 0.0;
                    self.fast_path();
                }
            }
            msg::PERSONALITY_EVENT_BUTTON_PRESS => {
                if self.check_cooldown("button_press", 5.0) {
                    self.pending.push(Impulse {
                        target_valence: 0.15,
                        target_arousal: 0.20,
                        magnitude: 0.40,
                        source: "system_event",
                    });
                    self.idle_timer_s = 0.0;
                    self.fast_path();
                }
            }
            msg::PERSONALITY_EVENT_AI_EMOTION => {
                let label = env.str_field("emotion").trim().to_lowercase();
                let intensity = env.f64_field("intensity", 0.7).clamp(0.0, 1.0);
                if let Some((v, a, base)) = emotion_target(&label) {
                    self.pending.push(Impulse {
                        target_valence: v,
                        target_arousal: a,
                        magnitude: base * intensity,
                        source: "ai_emotion",
                    });
                    self.idle_timer_s = 0.0;
                    self.fast_path();
                } else {
                    debug!("unknown emotion label {:?}", label);
                }
            }
            msg::PERSONALITY_EVENT_MEMORY_EXTRACT => {
                let memory = MemoryBias {
                    valence_bias: env.f64_field("valence_bias", 0.0).clamp(-1.0, 1.0),
                    arousal_bias: env.f64_field("arousal_bias", 0.0).clamp(-1.0, 1.0),
                    strength: env.f64_field("strength", 0.0).clamp(0.0, 1.0),
                };
                if self.memories.len() == MAX_MEMORIES {
                    self.memories.remove(0);
                }
                self.memories.push(memory);
                debug!(
                    "memory extracted (v={:.2} a={:.2} s={:.2})",
                    memory.valence_bias, memory.arousal_bias, memory.strength
                );
            }
            msg::PERSONALITY_CMD_OVERRIDE_AFFECT => {
                // Debug: inject an arbitrary impulse.
                self.pending.push(Impulse {
                    target_valence: env.f64_field("valence", 0.0),
                    target_arousal: env.f64_field("arousal", 0.0),
                    magnitude: env.f64_field("magnitude", 0.5),
                    source: "override",
                });
                self.fast_path();
            }
            other => debug!("ignoring message type {:?}", other),
        }
        true
    }

    fn handle_system_event(&mut self, env: &Envelope) {
        match env.str_field("event") {
            "boot" => {
                if !self.boot_fired {
                    self.boot_fired = true;
                    self.pending.push(Impulse {
                        target_valence: 0.35,
                        target_arousal: 0.40,
                        magnitude: 0.50,
                        source: "system_event",
                    });
                }
            }
            "low_battery" => {
                if self.check_cooldown("low_battery", 120.0) {
                    self.pending.push(Impulse {
                        target_valence: -0.15,
                        target_arousal: 0.10,
                        magnitude: 0.30,
                        source: "system_event",
                    });
                }
            }
            "critical_battery" => {
                self.pending.push(Impulse {
                    target_valence: 0.05,
                    target_arousal: -0.60,
                    magnitude: 0.40,
                    source: "system_event",
                });
            }
            "fault_raised" => {
                if self.check_cooldown("fault_raised", 30.0) {
                    self.pending.push(Impulse {
                        target_valence: -0.10,
                        target_arousal: 0.25,
                        magnitude: 0.40,
                        source: "system_event",
                    });
                }
            }
            "fault_cleared" => {
                self.pending.push(Impulse {
                    target_valence: 0.15,
                    target_arousal: -0.10,
                    magnitude: 0.30,
                    source: "system_event",
                });
            }
            other => {
                debug!("unknown system event {:?}", other);
                return;
            }
        }
        self.fast_path();
    }

    fn send(&mut self, msg_type: &str, payload: Map<String, Value>) {
        let mut env = Envelope::new(msg_type, "personality", self.seq.next(), mono_ns());
        env.payload = payload;
        self.outbox.push(env);
    }
}

impl Default for PersonalityWorker {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Process entry ──────────────────────────────────────────────────

/// Run the worker over stdin/stdout until shutdown or EOF.
pub async fn run() -> std::io::Result<()> {
    let mut worker = PersonalityWorker::new();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    // Announce and wait up to 10 s for config.init before defaulting.
    let mut started = Envelope::new(
        "personality.lifecycle.started",
        "personality",
        0,
        mono_ns(),
    );
    started.payload.insert("pid".into(), json!(std::process::id()));
    stdout.write_all(&started.to_line()).await?;
    stdout.flush().await?;

    let config_deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_tick = std::time::Instant::now();

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if !worker.configured() {
                    if tokio::time::Instant::now() >= config_deadline {
                        warn!("config.init not received within 10s, using defaults");
                        worker.configure_defaults();
                    } else {
                        continue;
                    }
                }
                let dt = last_tick.elapsed().as_secs_f64();
                last_tick = std::time::Instant::now();
                worker.tick(dt);
                worker.emit_health();
                flush_outbox(&mut worker, &mut stdout).await?;
            }
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                match Envelope::from_line(&line) {
                    Ok(env) => {
                        if !worker.on_message(&env) {
                            info!("shutdown requested");
                            break;
                        }
                        flush_outbox(&mut worker, &mut stdout).await?;
                    }
                    Err(e) => warn!("bad NDJSON from core: {}", e),
                }
            }
        }
    }

    Ok(())
}

async fn flush_outbox(
    worker: &mut PersonalityWorker,
    stdout: &mut tokio::io::Stdout,
) -> std::io::Result<()> {
    for env in worker.take_outbox() {
        stdout.write_all(&env.to_line()).await?;
    }
    stdout.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> PersonalityWorker {
        let mut w = PersonalityWorker::with_rng(StdRng::seed_from_u64(9));
        w.configure_defaults();
        // Deterministic tests: kill the noise term.
        if let Some(t) = w.traits.as_mut() {
            t.noise_amplitude = 0.0;
        }
        w
    }

    fn event(msg_type: &str, payload: Value) -> Envelope {
        let mut env = Envelope::new(msg_type, "core", 0, 0);
        if let Value::Object(map) = payload {
            env.payload = map;
        }
        env
    }

    #[test]
    fn boot_impulse_fires_once_and_lifts_mood() {
        let mut w = worker();
        let before = w.affect.valence;
        w.on_message(&event(msg::PERSONALITY_EVENT_SYSTEM_STATE, json!({"event": "boot"})));
        assert!(w.affect.valence > before);

        let after_first = w.affect;
        w.on_message(&event(msg::PERSONALITY_EVENT_SYSTEM_STATE, json!({"event": "boot"})));
        // No second impulse; dt=0 fast path leaves the vector alone.
        assert_eq!(w.affect, after_first);
    }

    #[test]
    fn snapshot_emitted_on_every_pass() {
        let mut w = worker();
        w.tick(1.0);
        let out = w.take_outbox();
        assert!(out.iter().any(|e| e.msg_type == msg::PERSONALITY_STATE_SNAPSHOT));
    }

    #[test]
    fn low_battery_cooldown() {
        let mut w = worker();
        w.on_message(&event(msg::PERSONALITY_EVENT_SYSTEM_STATE, json!({"event": "low_battery"})));
        let v1 = w.affect.valence;
        // Within the 120 s cooldown: no further impulse.
        w.on_message(&event(msg::PERSONALITY_EVENT_SYSTEM_STATE, json!({"event": "low_battery"})));
        assert_eq!(w.affect.valence, v1);
        // Advance past the cooldown.
        for _ in 0..121 {
            w.tick(1.0);
        }
        w.on_message(&event(msg::PERSONALITY_EVENT_SYSTEM_STATE, json!({"event": "low_battery"})));
        assert!(w.affect.valence < 0.12); // pulled down again
    }

    #[test]
    fn conversation_cycle_resets_idle_and_fires_ends() {
        let mut w = worker();
        for _ in 0..400 {
            w.tick(1.0);
        }
        assert_eq!(w.idle_state(), "drowsy");

        w.on_message(&event(
            msg::PERSONALITY_EVENT_CONV_STARTED,
            json!({"session_id": "s", "trigger": "ptt"}),
        ));
        assert!(w.conversation_active);
        assert_eq!(w.idle_state(), "awake");

        // Push valence positive, then end: positive-end impulse.
        w.on_message(&event(
            msg::PERSONALITY_EVENT_AI_EMOTION,
            json!({"emotion": "happy", "intensity": 1.0}),
        ));
        assert!(w.affect.valence > 0.0);
        w.on_message(&event(msg::PERSONALITY_EVENT_CONV_ENDED, json!({"session_id": "s"})));
        assert!(!w.conversation_active);
        assert_eq!(w.conv_ended_ago_s, 0.0);
    }

    #[test]
    fn idle_rules_suppressed_after_conversation() {
        let mut w = worker();
        w.on_message(&event(
            msg::PERSONALITY_EVENT_CONV_STARTED,
            json!({"session_id": "s", "trigger": "ptt"}),
        ));
        w.on_message(&event(msg::PERSONALITY_EVENT_CONV_ENDED, json!({"session_id": "s"})));

        // Drowsy threshold passed, but within the 120 s post-conv
        // suppression window no idle impulse fires.
        w.idle_timer_s = 400.0;
        w.conv_ended_ago_s = 60.0;
        let arousal_before = w.affect.arousal;
        w.tick(1.0);
        assert!(w.pending.is_empty());
        assert!((w.affect.arousal - arousal_before).abs() < 0.01);
    }

    #[test]
    fn ai_emotion_scales_by_intensity() {
        let mut w = worker();
        let mut strong = worker();
        w.on_message(&event(
            msg::PERSONALITY_EVENT_AI_EMOTION,
            json!({"emotion": "excited", "intensity": 0.2}),
        ));
        strong.on_message(&event(
            msg::PERSONALITY_EVENT_AI_EMOTION,
            json!({"emotion": "excited", "intensity": 1.0}),
        ));
        assert!(strong.affect.arousal > w.affect.arousal);
    }

    #[test]
    fn unknown_emotion_ignored() {
        let mut w = worker();
        let before = w.affect;
        w.on_message(&event(
            msg::PERSONALITY_EVENT_AI_EMOTION,
            json!({"emotion": "smug", "intensity": 1.0}),
        ));
        assert_eq!(w.affect, before);
    }

    #[test]
    fn negative_mood_duration_cap_recovers() {
        let mut w = worker();
        w.conversation_active = true; // context gate off
        // Slam into anger and hold it.
        for _ in 0..4 {
            w.on_message(&event(
                msg::PERSONALITY_CMD_OVERRIDE_AFFECT,
                json!({"valence": -0.6, "arousal": 0.7, "magnitude": 1.0}),
            ));
        }
        assert_eq!(w.current_mood, "angry");

        // Hold for 3 s of ticks, re-applying the pull each second; the
        // duration cap injects a recovery impulse after 2 s.
        for _ in 0..6 {
            w.pending.push(Impulse {
                target_valence: -0.6,
                target_arousal: 0.7,
                magnitude: 0.2,
                source: "test",
            });
            w.tick(1.0);
        }
        // Recovery pulled the vector toward baseline at least once.
        let snapshots = w.take_outbox();
        assert!(!snapshots.is_empty());
    }

    #[test]
    fn context_gate_in_snapshot() {
        let mut w = worker();
        // Strong negative push outside a conversation.
        for _ in 0..4 {
            w.on_message(&event(
                msg::PERSONALITY_CMD_OVERRIDE_AFFECT,
                json!({"valence": -0.6, "arousal": 0.7, "magnitude": 1.0}),
            ));
        }
        assert_eq!(w.current_mood, "neutral");
    }

    #[test]
    fn session_time_limit_fires_guardrail() {
        let mut w = worker();
        w.on_message(&event(
            msg::PERSONALITY_EVENT_CONV_STARTED,
            json!({"session_id": "s", "trigger": "ptt"}),
        ));
        w.take_outbox();
        for _ in 0..901 {
            w.tick(1.0);
        }
        let out = w.take_outbox();
        let guardrails: Vec<_> = out
            .iter()
            .filter(|e| e.msg_type == msg::PERSONALITY_EVENT_GUARDRAIL_TRIGGERED)
            .collect();
        assert_eq!(guardrails.len(), 1);
        assert_eq!(guardrails[0].str_field("rule"), "session_time_limit");

        // The snapshot now carries the limit flag.
        let snap = out
            .iter()
            .rev()
            .find(|e| e.msg_type == msg::PERSONALITY_STATE_SNAPSHOT)
            .unwrap();
        assert!(snap.bool_field("session_limit_reached", false));
    }

    #[test]
    fn memory_extract_biases_ticks() {
        let mut w = worker();
        w.on_message(&event(
            msg::PERSONALITY_EVENT_MEMORY_EXTRACT,
            json!({"valence_bias": 0.5, "arousal_bias": 0.0, "strength": 1.0}),
        ));
        assert_eq!(w.memories.len(), 1);

        // Starting at baseline, the remembered warmth nudges valence up.
        let before = w.affect.valence;
        w.tick(1.0);
        assert!(w.affect.valence > before);

        // The store is bounded; oldest extraction ages out.
        for _ in 0..(MAX_MEMORIES + 4) {
            w.on_message(&event(
                msg::PERSONALITY_EVENT_MEMORY_EXTRACT,
                json!({"valence_bias": 0.1, "arousal_bias": 0.0, "strength": 0.5}),
            ));
        }
        assert_eq!(w.memories.len(), MAX_MEMORIES);
    }

    #[test]
    fn shutdown_message_stops_worker() {
        let mut w = worker();
        assert!(w.on_message(&event("x.y.z", json!({}))));
        assert!(!w.on_message(&event(msg::SYSTEM_LIFECYCLE_SHUTDOWN, json!({}))));
    }
}
