// Rate limiting for sensitive credential operations.
//
// Fixed-window attempt counter keyed by the SHA-256 hash of the caller
// identifier, so raw identities (emails, session ids) are never stored.
// State is in-memory only (resets on restart) — a brute-force slow-down,
// not a durable defense.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

/// Attempt counter for a single hashed identifier.
struct AttemptWindow {
    count: u32,
    window_reset_at: Instant,
}

/// Fixed-window attempt limiter.
///
/// Windows are created lazily on first check. A denied attempt does not
/// increment the counter, so retries inside the window cannot push the reset
/// point away.
pub struct RateLimiter {
    windows: DashMap<String, AttemptWindow>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Record one attempt for `identifier` and report whether it is allowed.
    ///
    /// A fresh or expired window resets the count to 1 and allows. Within the
    /// window, attempts are allowed while `count < max_attempts`; after that
    /// every call is denied until the window elapses.
    pub fn check_limit(&self, identifier: &str, max_attempts: u32, window: Duration) -> bool {
        let key = hash_identifier(identifier);
        let now = Instant::now();

        let mut entry = self.windows.entry(key).or_insert_with(|| AttemptWindow {
            count: 0,
            window_reset_at: now + window,
        });

        if now >= entry.window_reset_at {
            entry.count = 1;
            entry.window_reset_at = now + window;
            return true;
        }

        if entry.count < max_attempts {
            entry.count += 1;
            true
        } else {
            false
        }
    }

    /// Clear the window for `identifier`.
    ///
    /// Called after a successful sensitive operation so legitimate retries
    /// are not penalized.
    pub fn reset(&self, identifier: &str) {
        self.windows.remove(&hash_identifier(identifier));
    }
}

fn hash_identifier(identifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identifier.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit_then_denies() {
        let limiter = RateLimiter::new();
        let window = Duration::from_secs(1);

        assert!(limiter.check_limit("user@example.com", 3, window));
        assert!(limiter.check_limit("user@example.com", 3, window));
        assert!(limiter.check_limit("user@example.com", 3, window));
        assert!(!limiter.check_limit("user@example.com", 3, window));
        assert!(!limiter.check_limit("user@example.com", 3, window));
    }

    #[test]
    fn test_window_elapse_allows_again() {
        let limiter = RateLimiter::new();
        let window = Duration::from_millis(40);

        assert!(limiter.check_limit("id", 1, window));
        assert!(!limiter.check_limit("id", 1, window));

        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.check_limit("id", 1, window));
    }

    #[test]
    fn test_separate_identifiers_independent() {
        let limiter = RateLimiter::new();
        let window = Duration::from_secs(1);

        assert!(limiter.check_limit("first", 1, window));
        assert!(!limiter.check_limit("first", 1, window));

        assert!(limiter.check_limit("second", 1, window));
    }

    #[test]
    fn test_reset_clears_window() {
        let limiter = RateLimiter::new();
        let window = Duration::from_secs(1);

        assert!(limiter.check_limit("id", 1, window));
        assert!(!limiter.check_limit("id", 1, window));

        limiter.reset("id");
        assert!(limiter.check_limit("id", 1, window));
    }

    #[test]
    fn test_identifier_is_hashed_before_storage() {
        assert_ne!(hash_identifier("user@example.com"), "user@example.com");
        // SHA-256 hex digest
        assert_eq!(hash_identifier("user@example.com").len(), 64);
    }
}
