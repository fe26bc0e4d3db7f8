//! The supervisor core: split state model and the 50 Hz tick loop.
//!
//! Every subsystem here is a synchronous state machine advanced by the
//! tick loop; only the loop itself and the I/O layers it drains are async.
//!
//! # Module Structure
//!
//! - [`state`] - `RobotState` (MCU-derived) and `WorldState` (worker-derived)
//! - [`mode`] - Supervisor mode state machine with guarded transitions
//! - [`events`] - Edge-detection event bus over state snapshots
//! - [`skills`] - Deterministic motion policies for WANDER mode
//! - [`behavior`] - Mode-gated twist source selection
//! - [`safety`] - Layered speed-cap cascade
//! - [`plan`] - Plan validation, cooldowns, TTL scheduling
//! - [`speech`] - Deterministic event-driven speech policy
//! - [`router`] - Worker envelope → world-state dispatch + plan dedup
//! - [`conversation`] - Conversation phase machine with backchannel
//! - [`mood`] - 4-phase mood crossfade sequencer
//! - [`choreography`] - Per-transition gaze ramps and gestures
//! - [`guardrails`] - Negative-affect clamps for the fallback path
//! - [`expressions`] - Emotion/gesture name ↔ wire id mappings
//! - [`tick`] - The 50 Hz loop composing all of the above

pub mod behavior;
pub mod choreography;
pub mod conversation;
pub mod events;
pub mod expressions;
pub mod guardrails;
pub mod mode;
pub mod mood;
pub mod plan;
pub mod router;
pub mod safety;
pub mod skills;
pub mod speech;
pub mod state;
pub mod tick;
