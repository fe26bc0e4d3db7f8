//! Planner action validation and scheduling.
//!
//! The validator treats planner output as untrusted JSON and coerces it
//! to a bounded list of typed actions. The scheduler applies per-type and
//! per-key cooldowns at enqueue time, expires whole plans past their TTL,
//! and gates face actions behind the face lock at pop time.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;

use crate::skills::Skill;

// ─── Actions ────────────────────────────────────────────────────────

/// A validated planner action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Say { text: String },
    Emote { name: String, intensity: f32 },
    Gesture { name: String },
    Skill { skill: Skill },
}

impl Action {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Say { .. } => "say",
            Self::Emote { .. } => "emote",
            Self::Gesture { .. } => "gesture",
            Self::Skill { .. } => "skill",
        }
    }

    /// Cooldown key for repeated identical content.
    fn key(&self) -> String {
        match self {
            Self::Say { text } => format!("say:{}", text.to_lowercase()),
            Self::Emote { name, .. } => format!("emote:{name}"),
            Self::Gesture { name } => format!("gesture:{name}"),
            Self::Skill { skill } => format!("skill:{}", skill.as_str()),
        }
    }
}

// ─── Validation ─────────────────────────────────────────────────────

const MIN_TTL_MS: i64 = 500;
const MAX_TTL_MS: i64 = 5000;
const MAX_TEXT_LEN: usize = 200;

/// A coerced plan ready for scheduling.
#[derive(Debug, Clone, Default)]
pub struct ValidatedPlan {
    pub actions: Vec<Action>,
    pub ttl_ms: i64,
    pub dropped_actions: usize,
}

/// Treat planner output as untrusted and coerce to bounded actions.
#[derive(Debug, Default)]
pub struct PlanValidator;

impl PlanValidator {
    pub fn validate(&self, actions: &[Value], ttl_ms: i64) -> ValidatedPlan {
        let ttl_ms = ttl_ms.clamp(MIN_TTL_MS, MAX_TTL_MS);
        let mut safe = Vec::new();
        let mut dropped = 0usize;

        for raw in actions {
            let Some(obj) = raw.as_object() else {
                dropped += 1;
                continue;
            };
            let action = obj
                .get("action")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_lowercase();

            match action.as_str() {
                "say" => {
                    let Some(text) = obj.get("text").and_then(Value::as_str) else {
                        dropped += 1;
                        continue;
                    };
                    let text = text.trim();
                    if text.is_empty() {
                        dropped += 1;
                        continue;
                    }
                    let text: String = text.chars().take(MAX_TEXT_LEN).collect();
                    safe.push(Action::Say { text });
                }
                "emote" => {
                    let name = str_name(obj.get("name"));
                    if name.is_empty() {
                        dropped += 1;
                        continue;
                    }
                    let intensity = obj
                        .get("intensity")
                        .and_then(Value::as_f64)
                        .unwrap_or(0.7)
                        .clamp(0.0, 1.0) as f32;
                    safe.push(Action::Emote { name, intensity });
                }
                "gesture" => {
                    let name = str_name(obj.get("name"));
                    if name.is_empty() {
                        dropped += 1;
                        continue;
                    }
                    safe.push(Action::Gesture { name });
                }
                "skill" => match Skill::parse(&str_name(obj.get("name"))) {
                    Some(skill) => safe.push(Action::Skill { skill }),
                    None => dropped += 1,
                },
                _ => dropped += 1,
            }
        }

        ValidatedPlan { actions: safe, ttl_ms, dropped_actions: dropped }
    }
}

fn str_name(v: Option<&Value>) -> String {
    v.and_then(Value::as_str).unwrap_or("").trim().to_lowercase()
}

// ─── Scheduling ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct QueuedAction {
    action: Action,
    expires_mono_ms: f64,
}

/// Cooldown + TTL + face-lock gating of queued actions.
pub struct ActionScheduler {
    queue: VecDeque<QueuedAction>,
    last_type_ms: HashMap<&'static str, f64>,
    last_key_ms: HashMap<String, f64>,

    pub plan_dropped_stale: u64,
    pub plan_dropped_cooldown: u64,
    pub active_skill: Skill,
}

impl Default for ActionScheduler {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            last_type_ms: HashMap::new(),
            last_key_ms: HashMap::new(),
            plan_dropped_stale: 0,
            plan_dropped_cooldown: 0,
            active_skill: Skill::PatrolDrift,
        }
    }
}

fn cooldown_type_ms(t: &str) -> f64 {
    match t {
        "say" => 3000.0,
        "emote" => 600.0,
        "gesture" => 800.0,
        "skill" => 500.0,
        _ => 0.0,
    }
}

fn cooldown_key_ms(t: &str) -> f64 {
    match t {
        "say" => 12_000.0,
        "emote" => 1800.0,
        "gesture" => 2000.0,
        "skill" => 500.0,
        _ => 0.0,
    }
}

impl ActionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a validated plan. A plan older than its TTL is dropped
    /// wholesale; individual actions on cooldown are dropped one by one.
    /// Skill actions take effect immediately instead of queuing.
    pub fn schedule_plan(&mut self, plan: ValidatedPlan, now_mono_ms: f64, issued_mono_ms: f64) {
        if now_mono_ms - issued_mono_ms > plan.ttl_ms as f64 {
            self.plan_dropped_stale += 1;
            return;
        }

        let expires = issued_mono_ms + plan.ttl_ms as f64;
        for action in plan.actions {
            if self.on_cooldown(&action, now_mono_ms) {
                self.plan_dropped_cooldown += 1;
                continue;
            }
            self.mark(&action, now_mono_ms);

            if let Action::Skill { skill } = action {
                self.active_skill = skill;
                continue;
            }
            self.queue.push_back(QueuedAction { action, expires_mono_ms: expires });
        }
    }

    /// Drain the queue. Expired items count as stale; while the face is
    /// locked, emote/gesture actions are dropped as cooldown casualties.
    pub fn pop_due_actions(&mut self, now_mono_ms: f64, face_locked: bool) -> Vec<Action> {
        let mut due = Vec::new();
        while let Some(item) = self.queue.pop_front() {
            if item.expires_mono_ms < now_mono_ms {
                self.plan_dropped_stale += 1;
                continue;
            }
            if face_locked && matches!(item.action, Action::Emote { .. } | Action::Gesture { .. }) {
                self.plan_dropped_cooldown += 1;
                continue;
            }
            due.push(item.action);
        }
        due
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn clear_queued_actions(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    fn on_cooldown(&self, action: &Action, now_ms: f64) -> bool {
        let t = action.type_name();
        if let Some(&last) = self.last_type_ms.get(t) {
            if now_ms - last < cooldown_type_ms(t) {
                return true;
            }
        }
        if let Some(&last) = self.last_key_ms.get(&action.key()) {
            if now_ms - last < cooldown_key_ms(t) {
                return true;
            }
        }
        false
    }

    fn mark(&mut self, action: &Action, now_ms: f64) {
        self.last_type_ms.insert(action.type_name(), now_ms);
        self.last_key_ms.insert(action.key(), now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validate(actions: Vec<Value>, ttl: i64) -> ValidatedPlan {
        PlanValidator.validate(&actions, ttl)
    }

    #[test]
    fn say_truncated_and_trimmed() {
        let long = "x".repeat(300);
        let plan = validate(vec![json!({"action": "Say ", "text": format!("  {long}")})], 2000);
        assert_eq!(plan.actions.len(), 1);
        match &plan.actions[0] {
            Action::Say { text } => assert_eq!(text.len(), 200),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_say_dropped() {
        let plan = validate(vec![json!({"action": "say", "text": "   "})], 2000);
        assert!(plan.actions.is_empty());
        assert_eq!(plan.dropped_actions, 1);
    }

    #[test]
    fn emote_intensity_clamped_and_defaulted() {
        let plan = validate(
            vec![
                json!({"action": "emote", "name": "Happy", "intensity": 7.0}),
                json!({"action": "emote", "name": "curious"}),
            ],
            2000,
        );
        assert_eq!(
            plan.actions[0],
            Action::Emote { name: "happy".into(), intensity: 1.0 }
        );
        assert_eq!(
            plan.actions[1],
            Action::Emote { name: "curious".into(), intensity: 0.7 }
        );
    }

    #[test]
    fn unknown_skill_dropped() {
        let plan = validate(
            vec![
                json!({"action": "skill", "name": "patrol_drift"}),
                json!({"action": "skill", "name": "fly"}),
            ],
            2000,
        );
        assert_eq!(plan.actions, vec![Action::Skill { skill: Skill::PatrolDrift }]);
        assert_eq!(plan.dropped_actions, 1);
    }

    #[test]
    fn unknown_action_and_non_object_dropped() {
        let plan = validate(vec![json!({"action": "dance"}), json!(42)], 2000);
        assert!(plan.actions.is_empty());
        assert_eq!(plan.dropped_actions, 2);
    }

    #[test]
    fn ttl_clamped() {
        assert_eq!(validate(vec![], 100).ttl_ms, 500);
        assert_eq!(validate(vec![], 60_000).ttl_ms, 5000);
        assert_eq!(validate(vec![], 2000).ttl_ms, 2000);
    }

    fn say_plan(text: &str, ttl: i64) -> ValidatedPlan {
        ValidatedPlan {
            actions: vec![Action::Say { text: text.into() }],
            ttl_ms: ttl,
            dropped_actions: 0,
        }
    }

    #[test]
    fn type_cooldown_boundary() {
        let mut sched = ActionScheduler::new();
        sched.schedule_plan(say_plan("hi", 5000), 0.0, 0.0);
        assert_eq!(sched.queue_depth(), 1);

        // 2999 ms later: still inside the 3000 ms say-type cooldown.
        sched.schedule_plan(say_plan("other", 5000), 2999.0, 2999.0);
        assert_eq!(sched.queue_depth(), 1);
        assert_eq!(sched.plan_dropped_cooldown, 1);

        sched.schedule_plan(say_plan("other", 5000), 3001.0, 3001.0);
        assert_eq!(sched.queue_depth(), 2);
    }

    #[test]
    fn key_cooldown_outlasts_type_cooldown() {
        let mut sched = ActionScheduler::new();
        sched.schedule_plan(say_plan("hello", 5000), 0.0, 0.0);
        // Same text at 5 s: type cooldown passed, key cooldown (12 s) not.
        sched.schedule_plan(say_plan("hello", 5000), 5000.0, 5000.0);
        assert_eq!(sched.plan_dropped_cooldown, 1);
        sched.schedule_plan(say_plan("hello", 5000), 12_100.0, 12_100.0);
        assert_eq!(sched.queue_depth(), 2);
    }

    #[test]
    fn stale_plan_dropped_wholesale() {
        let mut sched = ActionScheduler::new();
        sched.schedule_plan(say_plan("hi", 2000), 5000.0, 1000.0);
        assert_eq!(sched.queue_depth(), 0);
        assert_eq!(sched.plan_dropped_stale, 1);
    }

    #[test]
    fn skill_applies_immediately() {
        let mut sched = ActionScheduler::new();
        let plan = ValidatedPlan {
            actions: vec![Action::Skill { skill: Skill::ScanForTarget }],
            ttl_ms: 2000,
            dropped_actions: 0,
        };
        sched.schedule_plan(plan, 0.0, 0.0);
        assert_eq!(sched.active_skill, Skill::ScanForTarget);
        assert_eq!(sched.queue_depth(), 0);
    }

    #[test]
    fn pop_expires_and_respects_face_lock() {
        let mut sched = ActionScheduler::new();
        let plan = ValidatedPlan {
            actions: vec![
                Action::Say { text: "hi".into() },
                Action::Gesture { name: "nod".into() },
            ],
            ttl_ms: 2000,
            dropped_actions: 0,
        };
        sched.schedule_plan(plan, 0.0, 0.0);

        // Face locked: gesture dropped, say passes.
        let due = sched.pop_due_actions(100.0, true);
        assert_eq!(due, vec![Action::Say { text: "hi".into() }]);
        assert_eq!(sched.plan_dropped_cooldown, 1);

        // Re-queue and let it expire.
        let plan = ValidatedPlan {
            actions: vec![Action::Gesture { name: "wiggle".into() }],
            ttl_ms: 2000,
            dropped_actions: 0,
        };
        sched.schedule_plan(plan, 3000.0, 3000.0);
        let due = sched.pop_due_actions(6000.0, false);
        assert!(due.is_empty());
        assert!(sched.plan_dropped_stale >= 1);
    }

    #[test]
    fn popped_actions_never_expired() {
        let mut sched = ActionScheduler::new();
        sched.schedule_plan(say_plan("a", 1000), 0.0, 0.0);
        let due = sched.pop_due_actions(999.0, false);
        assert_eq!(due.len(), 1);
    }
}
