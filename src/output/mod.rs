//! Report output
//!
//! - [`text`]: human-readable summary for the terminal
//! - [`json`]: the same numbers as pretty-printed JSON

pub mod json;
pub mod text;

/// Note printed when the ramp window swallowed every sample
pub const NO_SAMPLES_NOTE: &str = "no samples after ramp";
