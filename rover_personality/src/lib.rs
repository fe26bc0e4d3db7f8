//! Affect engine and the worker process that hosts it.
//!
//! [`affect`] is pure math: no I/O, no clocks, no channels. [`worker`]
//! wraps it in the NDJSON stdin/stdout worker contract with the Layer-0
//! deterministic rule catalog, a 1 Hz tick, and an event fast path.

pub mod affect;
pub mod worker;
