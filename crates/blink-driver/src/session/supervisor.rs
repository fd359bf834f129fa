//! Reconnect scheduling: capped exponential backoff with jitter and an
//! attempt ceiling.

use std::time::Duration;

use rand::Rng;

/// Backoff parameters for re-establishing a panel link.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the second attempt; the first attempt runs immediately.
    pub base_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Ceiling the exponential curve saturates at.
    pub max_delay: Duration,
    /// Attempts before the session gives up and reports retry exhaustion.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(15),
            max_attempts: 6,
        }
    }
}

impl ReconnectPolicy {
    /// Deterministic delay for the given attempt (1-based):
    /// `min(max_delay, base_delay * multiplier^(attempt-1))`.
    ///
    /// Jitter is applied separately so this curve stays testable.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = self.base_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }

    /// Adds uniform jitter in `[0, delay / 10]` so a fleet of panels does
    /// not reconnect in lockstep.
    pub fn jittered(&self, delay: Duration) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..=0.1);
        delay + delay.mul_f64(jitter)
    }
}

/// Tracks consecutive failed bring-up attempts for one session.
///
/// The counter resets only when the session reaches READY; a connect that
/// succeeds but whose handshake then fails still counts against the ceiling.
#[derive(Debug)]
pub struct ConnectionSupervisor {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl ConnectionSupervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Consecutive failed attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Records a failed bring-up attempt and returns the jittered delay to
    /// wait before the next one, or `None` once the ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.delay_for_attempt(self.attempt);
        Some(self.policy.jittered(delay))
    }

    /// Resets the attempt counter.  Called only when READY is reached.
    pub fn record_ready(&mut self) {
        self.attempt = 0;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
