//! Pure affect vector model: trait derivation, decaying integrator,
//! impulse application, mood projection, context gate, hysteresis.
//!
//! No I/O and no clocks; callers supply `dt` and a PRNG, so every path
//! is deterministic under test.

use rand::Rng;
use rand_distr::StandardNormal;

// ─── Mood anchors (Russell circumplex) ──────────────────────────────

/// Named `(valence, arousal)` anchor points; projection picks the
/// nearest.
pub const MOOD_ANCHORS: &[(&str, (f64, f64))] = &[
    ("neutral", (0.00, 0.00)),
    ("happy", (0.70, 0.35)),
    ("excited", (0.65, 0.80)),
    ("curious", (0.40, 0.45)),
    ("love", (0.80, 0.15)),
    ("silly", (0.55, 0.60)),
    ("thinking", (0.10, 0.20)),
    ("surprised", (0.15, 0.80)),
    ("sad", (-0.60, -0.40)),
    ("scared", (-0.70, 0.65)),
    ("angry", (-0.60, 0.70)),
    ("confused", (-0.20, 0.30)),
    ("sleepy", (0.05, -0.80)),
];

pub const NEGATIVE_MOODS: &[&str] = &["sad", "scared", "angry"];

/// Max distance in VA space for intensity scaling.
pub const MAX_ANCHOR_DISTANCE: f64 = 1.20;

/// Emotion label → `(target_v, target_a, base_magnitude)` for impulses
/// reported by the language model, scaled by its reported intensity.
pub const EMOTION_VA_TARGETS: &[(&str, (f64, f64, f64))] = &[
    ("neutral", (0.00, 0.00, 0.30)),
    ("happy", (0.70, 0.35, 0.60)),
    ("excited", (0.65, 0.80, 0.70)),
    ("curious", (0.40, 0.45, 0.55)),
    ("love", (0.80, 0.15, 0.60)),
    ("silly", (0.55, 0.60, 0.60)),
    ("thinking", (0.10, 0.20, 0.40)),
    ("surprised", (0.15, 0.80, 0.65)),
    ("sad", (-0.60, -0.40, 0.50)),
    ("scared", (-0.70, 0.65, 0.50)),
    ("angry", (-0.60, 0.70, 0.45)),
    ("confused", (-0.20, 0.30, 0.40)),
    ("sleepy", (0.05, -0.80, 0.40)),
];

pub fn emotion_target(label: &str) -> Option<(f64, f64, f64)> {
    EMOTION_VA_TARGETS
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, t)| *t)
}

fn is_negative(mood: &str) -> bool {
    NEGATIVE_MOODS.contains(&mood)
}

// ─── Data structures ────────────────────────────────────────────────

/// Static personality parameters derived from the five axis positions.
/// Computed once at startup; never modified at runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraitParameters {
    pub baseline_valence: f64,
    pub baseline_arousal: f64,
    pub decay_rate_phasic: f64,
    pub decay_multiplier_positive: f64,
    pub decay_multiplier_negative: f64,
    pub decay_rate_tonic: f64,
    pub impulse_scale_positive: f64,
    pub impulse_scale_negative: f64,
    pub valence_min: f64,
    pub valence_max: f64,
    pub arousal_min: f64,
    pub arousal_max: f64,
    pub noise_amplitude: f64,
    pub emotional_range: f64,
    pub idle_impulse_magnitude: f64,
}

/// Mutable emotional state, updated every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffectVector {
    pub valence: f64,
    pub arousal: f64,
}

impl AffectVector {
    pub fn at_baseline(trait_params: &TraitParameters) -> Self {
        Self {
            valence: trait_params.baseline_valence,
            arousal: trait_params.baseline_arousal,
        }
    }
}

/// Discrete emotional perturbation from any source.
#[derive(Debug, Clone)]
pub struct Impulse {
    pub target_valence: f64,
    pub target_arousal: f64,
    /// `[0, 1]`, scaled by trait before application.
    pub magnitude: f64,
    pub source: &'static str,
}

/// A long-lived affect bias distilled from past interactions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryBias {
    pub valence_bias: f64,
    pub arousal_bias: f64,
    /// `[0, 1]`; memories below 0.05 strength are ignored.
    pub strength: f64,
}

/// Per-second weight of the memory drift. A full-strength memory with a
/// 0.10 valence bias moves the vector by 0.002/s.
pub const MEMORY_WEIGHT: f64 = 0.02;

// ─── Sigmoid ────────────────────────────────────────────────────────

/// Map an axis position `[0,1]` through a sigmoid.
pub fn sigmoid_map(x: f64, k: f64, x0: f64) -> f64 {
    1.0 / (1.0 + (-k * (x - x0)).exp())
}

// ─── Trait parameter derivation ─────────────────────────────────────

/// Derive the full parameter set from the five axis positions.
///
/// The decay multipliers are design constants rather than
/// reactivity-derived: positive affect drains a little slower, negative
/// a fair bit faster.
pub fn compute_trait_parameters(
    energy: f64,
    reactivity: f64,
    initiative: f64,
    vulnerability: f64,
    predictability: f64,
) -> TraitParameters {
    let sig_r = sigmoid_map(reactivity, 5.0, 0.5);
    let impulse_scale_positive = 0.50 + 1.00 * sig_r;

    TraitParameters {
        baseline_valence: 0.10,
        baseline_arousal: 0.50 * (energy - 0.50),
        decay_rate_phasic: 0.03 + 0.05 * sig_r,
        decay_multiplier_positive: 0.85,
        decay_multiplier_negative: 1.30,
        decay_rate_tonic: 0.0003 + 0.0006 * sig_r,
        impulse_scale_positive,
        impulse_scale_negative: impulse_scale_positive * (0.30 + 0.70 * vulnerability),
        valence_min: -0.50 - 0.50 * vulnerability,
        valence_max: 0.95,
        arousal_min: -0.90,
        arousal_max: 0.50 + 0.40 * energy,
        noise_amplitude: 0.05 * (1.0 - predictability),
        emotional_range: 0.40 + 0.60 * sigmoid_map(reactivity, 4.0, 0.5),
        idle_impulse_magnitude: 0.10 + 0.30 * initiative,
    }
}

// ─── Affect update ──────────────────────────────────────────────────

/// One tick of the decaying integrator: asymmetric decay toward
/// baseline, impulse drain, memory bias, Brownian noise, clamp.
pub fn update_affect<R: Rng>(
    affect: &mut AffectVector,
    trait_params: &TraitParameters,
    pending: &mut Vec<Impulse>,
    memories: &[MemoryBias],
    dt: f64,
    rng: &mut R,
) {
    if dt <= 0.0 {
        // Same-tick events still drain their impulses.
        for impulse in pending.drain(..) {
            apply_impulse(affect, &impulse, trait_params);
        }
        return;
    }

    // 1. Asymmetric decay, per axis.
    let decay = |value: &mut f64, baseline: f64| {
        let multiplier = if *value >= baseline {
            trait_params.decay_multiplier_positive
        } else {
            trait_params.decay_multiplier_negative
        };
        let lambda = trait_params.decay_rate_phasic * multiplier;
        let alpha = 1.0 - (-lambda * dt).exp();
        *value += (baseline - *value) * alpha;
    };
    decay(&mut affect.valence, trait_params.baseline_valence);
    decay(&mut affect.arousal, trait_params.baseline_arousal);

    // 2. Drain pending impulses.
    for impulse in pending.drain(..) {
        apply_impulse(affect, &impulse, trait_params);
    }

    // 3. Memory bias: weighted drift toward remembered dispositions.
    for memory in memories {
        if memory.strength > 0.05 {
            affect.valence += memory.valence_bias * memory.strength * MEMORY_WEIGHT * dt;
            affect.arousal += memory.arousal_bias * memory.strength * MEMORY_WEIGHT * dt;
        }
    }

    // 4. Noise, Brownian scaling: stddev · √dt.
    let n_v: f64 = rng.sample(StandardNormal);
    let n_a: f64 = rng.sample(StandardNormal);
    affect.valence += n_v * trait_params.noise_amplitude * dt.sqrt();
    affect.arousal += n_a * trait_params.noise_amplitude * dt.sqrt();

    // 5. Clamp to trait bounds.
    affect.valence = affect
        .valence
        .clamp(trait_params.valence_min, trait_params.valence_max);
    affect.arousal = affect
        .arousal
        .clamp(trait_params.arousal_min, trait_params.arousal_max);
}

/// Apply a single impulse: unit displacement from current toward the
/// target, scaled by magnitude and the direction-dependent trait scale,
/// never overshooting.
pub fn apply_impulse(affect: &mut AffectVector, impulse: &Impulse, trait_params: &TraitParameters) {
    let dv = impulse.target_valence - affect.valence;
    let da = impulse.target_arousal - affect.arousal;
    let norm = (dv * dv + da * da).sqrt();
    if norm < 0.001 {
        return; // already at target
    }

    let scale = if impulse.target_valence < affect.valence {
        trait_params.impulse_scale_negative
    } else {
        trait_params.impulse_scale_positive
    };

    let displacement = (impulse.magnitude * scale).min(norm);
    affect.valence += dv / norm * displacement;
    affect.arousal += da / norm * displacement;
}

// ─── Mood projection ────────────────────────────────────────────────

fn distance(v: f64, a: f64, anchor: (f64, f64)) -> f64 {
    ((v - anchor.0).powi(2) + (a - anchor.1).powi(2)).sqrt()
}

fn anchor_of(mood: &str) -> (f64, f64) {
    MOOD_ANCHORS
        .iter()
        .find(|(name, _)| *name == mood)
        .map(|(_, a)| *a)
        .unwrap_or((0.0, 0.0))
}

/// Asymmetric hysteresis thresholds: harder to enter negative moods,
/// easier to leave them.
fn hysteresis_threshold(current: &str, candidate: &str) -> f64 {
    match (is_negative(current), is_negative(candidate)) {
        (true, false) => 0.08,
        (false, true) => 0.15,
        (true, true) => 0.10,
        (false, false) => 0.12,
    }
}

/// Project the affect vector to the nearest discrete mood, with
/// hysteresis on the distance gap. Returns `(mood, intensity)`.
pub fn project_mood(affect: &AffectVector, current_mood: &str) -> (&'static str, f64) {
    let mut d_current = distance(affect.valence, affect.arousal, anchor_of(current_mood));

    let (nearest, d_nearest) = MOOD_ANCHORS
        .iter()
        .map(|(name, anchor)| (*name, distance(affect.valence, affect.arousal, *anchor)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or(("neutral", d_current));

    let mut mood = MOOD_ANCHORS
        .iter()
        .find(|(name, _)| *name == current_mood)
        .map(|(name, _)| *name)
        .unwrap_or("neutral");

    if d_current - d_nearest > hysteresis_threshold(current_mood, nearest) {
        mood = nearest;
        d_current = d_nearest;
    }

    let intensity = (1.0 - d_current / MAX_ANCHOR_DISTANCE).clamp(0.0, 1.0);
    (mood, intensity)
}

/// Block negative moods outside a conversation.
pub fn enforce_context_gate(mood: &'static str, conversation_active: bool) -> &'static str {
    if is_negative(mood) && !conversation_active {
        "neutral"
    } else {
        mood
    }
}
