//! Liveness tracking for Chorus connections.
//!
//! The transport task probes its peer every `interval`. Any inbound traffic
//! counts as a sign of life; a peer that stays silent for longer than
//! `timeout` is reaped through the normal close path.

use std::time::Duration;
use tokio::time::Instant;

/// Liveness configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// How often to probe.
    pub interval: Duration,
    /// Maximum silence before the connection is considered dead.
    pub timeout: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Result of a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Still alive; send a probe.
    Probe,
    /// Silent for too long; close the connection.
    Expired,
}

/// Tracks the last time a connection showed activity.
#[derive(Debug, Clone)]
pub struct Liveness {
    config: LivenessConfig,
    last_seen: Instant,
}

impl Liveness {
    /// Start tracking from `now`.
    #[must_use]
    pub fn new(config: LivenessConfig, now: Instant) -> Self {
        Self {
            config,
            last_seen: now,
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Record activity.
    pub fn touch(&mut self, now: Instant) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    /// When activity was last seen.
    #[must_use]
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// How long the connection has been silent.
    #[must_use]
    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    /// Decide what to do on a probe tick.
    #[must_use]
    pub fn check(&self, now: Instant) -> Verdict {
        if self.idle(now) > self.config.timeout {
            Verdict::Expired
        } else {
            Verdict::Probe
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_connection_is_probed() {
        let now = Instant::now();
        let liveness = Liveness::new(LivenessConfig::default(), now);
        assert_eq!(liveness.check(now + Duration::from_secs(30)), Verdict::Probe);
    }

    #[test]
    fn test_silent_connection_expires() {
        let now = Instant::now();
        let liveness = Liveness::new(LivenessConfig::default(), now);
        assert_eq!(liveness.check(now + Duration::from_secs(61)), Verdict::Expired);
    }

    #[test]
    fn test_touch_resets_idle() {
        let start = Instant::now();
        let mut liveness = Liveness::new(LivenessConfig::default(), start);

        liveness.touch(start + Duration::from_secs(50));
        assert_eq!(liveness.idle(start + Duration::from_secs(60)), Duration::from_secs(10));
        assert_eq!(liveness.check(start + Duration::from_secs(100)), Verdict::Probe);

        // Out-of-order timestamps never move last_seen backwards.
        liveness.touch(start);
        assert_eq!(liveness.last_seen(), start + Duration::from_secs(50));
    }
}
