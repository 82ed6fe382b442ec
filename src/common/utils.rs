//! Utility functions for oxistore

use once_cell::sync::Lazy;
use std::time::{SystemTime, UNIX_EPOCH};

/// Generate a short unique ID for transactions and listeners
pub fn gen_uuid() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..16].to_string()
}

/// Get current Unix timestamp (seconds)
pub fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Get current Unix timestamp (nanoseconds)
pub fn timestamp_now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

static DEBUG: Lazy<bool> = Lazy::new(|| {
    std::env::var("AIS_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
});

/// Are internal assertions enabled? Gated by `AIS_DEBUG`; off in production.
pub fn debug_enabled() -> bool {
    *DEBUG
}

/// Internal assertion, active only when `AIS_DEBUG` is set.
#[macro_export]
macro_rules! dassert {
    ($cond:expr) => {
        if $crate::common::debug_enabled() && !$cond {
            panic!("internal assertion failed: {}", stringify!($cond));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if $crate::common::debug_enabled() && !$cond {
            panic!($($arg)+);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gen_uuid() {
        let id1 = gen_uuid();
        let id2 = gen_uuid();
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 16);
    }

    #[test]
    fn test_timestamps() {
        let secs = timestamp_now();
        let nanos = timestamp_now_nanos();
        assert!(secs > 0);
        assert!(nanos > secs as i64);
    }
}
