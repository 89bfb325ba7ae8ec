//! # trust-detect
//! Pure detection and scoring logic: the breakpoint interpolation
//! primitive, sybil/gaming indicator checks, the integrity multiplier,
//! and the five dimension scorers. No I/O; callers (trust-engine) supply
//! already-fetched evidence.

pub mod breakpoint;
pub mod dimensions;
pub mod gaming;
pub mod integrity;
pub mod stats;
pub mod sybil;

pub use breakpoint::{interpolate, Breakpoint};
