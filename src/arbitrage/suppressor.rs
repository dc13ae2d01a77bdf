//! Rate limiting for repeated loop attempts

use alloy::primitives::Address;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::config::thresholds::{DUPLICATE_TTL, FAILURE_BACKOFF};

#[derive(Debug, Clone, Copy)]
struct Attempt {
    failures: u32,
    expires_at: Instant,
}

/// Canonical key for an ordered pair path
pub fn loop_key(pairs: &[Address]) -> String {
    pairs.iter().map(hex::encode).collect::<Vec<_>>().join("-")
}

/// Lets each loop through once per window and backs off after failures
pub struct DuplicateSuppressor {
    attempts: DashMap<String, Attempt>,
    ttl: Duration,
    backoff: Duration,
}

impl Default for DuplicateSuppressor {
    fn default() -> Self {
        Self::new(DUPLICATE_TTL, FAILURE_BACKOFF)
    }
}

impl DuplicateSuppressor {
    pub fn new(ttl: Duration, backoff: Duration) -> Self {
        Self {
            attempts: DashMap::new(),
            ttl,
            backoff,
        }
    }

    /// Whether `key` may be attempted now. Admitting records the attempt.
    pub fn admit(&self, key: &str) -> bool {
        self.admit_at(key, Instant::now())
    }

    pub fn admit_at(&self, key: &str, now: Instant) -> bool {
        match self.attempts.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(Attempt {
                    failures: 0,
                    expires_at: now + self.ttl,
                });
                true
            }
            Entry::Occupied(mut slot) => {
                if now < slot.get().expires_at {
                    return false;
                }
                // window over: start a fresh one but remember past failures
                let failures = slot.get().failures;
                slot.insert(Attempt {
                    failures,
                    expires_at: now + self.ttl,
                });
                true
            }
        }
    }

    pub fn report_failure(&self, key: &str) -> u32 {
        self.report_failure_at(key, Instant::now())
    }

    /// Bump the failure count and push the current window out by
    /// `backoff * failures`
    pub fn report_failure_at(&self, key: &str, now: Instant) -> u32 {
        let mut attempt = self.attempts.entry(key.to_string()).or_insert(Attempt {
            failures: 0,
            expires_at: now,
        });
        attempt.failures = attempt.failures.saturating_add(1);
        attempt.expires_at = attempt.expires_at.max(now) + self.backoff * attempt.failures;
        attempt.failures
    }

    pub fn failures(&self, key: &str) -> u32 {
        self.attempts.get(key).map(|a| a.failures).unwrap_or(0)
    }

    /// Drop entries whose window has passed. Failed loops are kept for one
    /// more window so a quick retry still sees its failure count.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.attempts.len();
        let ttl = self.ttl;
        self.attempts.retain(|_, attempt| {
            let grace = if attempt.failures > 0 { ttl } else { Duration::ZERO };
            attempt
                .expires_at
                .checked_add(grace)
                .map_or(true, |until| now < until)
        });
        before - self.attempts.len()
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}
