//! Shared helpers: aligned payload buffers and human-readable formatting

pub mod buffer;
pub mod format;
