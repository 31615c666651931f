//! CLI to Config conversion utilities

use crate::config::cli;
use crate::config::{BackendKind, FailurePolicy};
use anyhow::{Context, Result};

const SIZE_SUFFIXES: &[(&str, u64)] = &[
    ("kb", 1 << 10),
    ("mb", 1 << 20),
    ("gb", 1 << 30),
    ("tb", 1 << 40),
    ("k", 1 << 10),
    ("m", 1 << 20),
    ("g", 1 << 30),
    ("t", 1 << 40),
];

const DURATION_SUFFIXES: &[(&str, u64)] = &[
    ("sec", 1),
    ("min", 60),
    ("hr", 3600),
    ("s", 1),
    ("m", 60),
    ("h", 3600),
];

/// Parse a size string (e.g., "1G", "100M", "4k", "1_048_576") to bytes
///
/// Suffixes are binary multiples. Underscores are accepted as digit
/// separators.
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase().replace('_', "");
    let (num_str, multiplier) = split_suffix(&s, SIZE_SUFFIXES);

    let num: u64 = num_str
        .parse()
        .with_context(|| format!("Invalid size format: {}", s))?;

    num.checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("size {} does not fit into 64 bits", s))
}

/// Parse a duration string (e.g., "60s", "5m", "1h") to seconds
pub fn parse_duration(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();
    let (num_str, multiplier) = split_suffix(&s, DURATION_SUFFIXES);

    let num: u64 = num_str
        .parse()
        .with_context(|| format!("Invalid duration format: {}", s))?;

    num.checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("duration {} is too long", s))
}

/// Strip at most one unit suffix, longest spellings first
fn split_suffix<'a>(s: &'a str, suffixes: &[(&str, u64)]) -> (&'a str, u64) {
    suffixes
        .iter()
        .find_map(|&(suffix, multiplier)| s.strip_suffix(suffix).map(|num| (num, multiplier)))
        .unwrap_or((s, 1))
}

/// Convert CLI backend selection to the config type
pub fn convert_backend(cli_backend: cli::Backend) -> BackendKind {
    match cli_backend {
        cli::Backend::Mmap => BackendKind::Mmap,
        cli::Backend::IoUring => BackendKind::IoUring,
    }
}

/// Convert CLI error policy to the config type
pub fn convert_failure_policy(cli_policy: cli::ErrorPolicy, max_retries: u32) -> FailurePolicy {
    match cli_policy {
        cli::ErrorPolicy::Count => FailurePolicy::Count,
        cli::ErrorPolicy::Retry => FailurePolicy::Retry { max_retries },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("4k").unwrap(), 4096);
        assert_eq!(parse_size("4K").unwrap(), 4096);
        assert_eq!(parse_size("1m").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("2G").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("64kb").unwrap(), 64 * 1024);
        assert_eq!(parse_size("1_048_576").unwrap(), 1024 * 1024);
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("k").is_err());
        assert!(parse_size("12x").is_err());
        assert!(parse_size("-4k").is_err());
        assert!(parse_size("99999999999t").is_err());
    }

    #[test]
    fn test_suffix_is_stripped_once() {
        assert!(parse_size("4kk").is_err());
        assert!(parse_size("1mbmb").is_err());
        assert!(parse_duration("2ss").is_err());
        assert!(parse_duration("1hh").is_err());
        assert_eq!(parse_size("4kb").unwrap(), 4096);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30").unwrap(), 30);
        assert_eq!(parse_duration("30s").unwrap(), 30);
        assert_eq!(parse_duration("2m").unwrap(), 120);
        assert_eq!(parse_duration("2min").unwrap(), 120);
        assert_eq!(parse_duration("1h").unwrap(), 3600);
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_convert_failure_policy() {
        assert_eq!(convert_failure_policy(cli::ErrorPolicy::Count, 3), FailurePolicy::Count);
        assert_eq!(
            convert_failure_policy(cli::ErrorPolicy::Retry, 3),
            FailurePolicy::Retry { max_retries: 3 }
        );
    }
}
