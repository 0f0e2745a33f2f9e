use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    /// Consecutive cooldown-triggering failures before the account is benched
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(300),
        }
    }
}

impl HealthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub healthy: bool,
    pub consecutive_failures: u32,
    /// Remaining cooldown in ms, if currently benched.
    pub cooldown_remaining_ms: Option<u64>,
}

/// Failure counter plus cooldown window of one pool account.
///
/// - Counts consecutive failures; any success resets the count
/// - Cooldown-triggering failures bench the account once the threshold is reached
/// - A benched account recovers lazily, on the first check after the window
///
/// Not synchronized on its own; the pool serializes access.
#[derive(Debug, Clone)]
pub struct AccountHealth {
    cfg: HealthConfig,
    consecutive_failures: u32,
    unhealthy_until: Option<Instant>,
}

impl AccountHealth {
    pub fn new(cfg: HealthConfig) -> Self {
        Self {
            cfg,
            consecutive_failures: 0,
            unhealthy_until: None,
        }
    }

    /// Whether the account may take requests now. Clears an elapsed cooldown.
    pub fn check(&mut self) -> bool {
        if let Some(until) = self.unhealthy_until {
            if Instant::now() < until {
                return false;
            }
            self.unhealthy_until = None;
            self.consecutive_failures = 0;
        }
        true
    }

    pub fn is_healthy(&self) -> bool {
        self.unhealthy_until
            .map_or(true, |until| Instant::now() >= until)
    }

    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
        self.unhealthy_until = None;
    }

    /// Record a failure. Returns `true` when this failure benched the account.
    pub fn on_failure(&mut self, triggers_cooldown: bool) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if triggers_cooldown
            && self.unhealthy_until.is_none()
            && self.consecutive_failures >= self.cfg.failure_threshold
        {
            self.unhealthy_until = Some(Instant::now() + self.cfg.cooldown);
            return true;
        }
        false
    }

    /// Bench immediately, e.g. after a failed init.
    pub fn mark_unhealthy(&mut self) {
        self.unhealthy_until = Some(Instant::now() + self.cfg.cooldown);
    }

    pub fn reset(&mut self) {
        self.on_success();
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let now = Instant::now();
        let cooldown_remaining_ms = self
            .unhealthy_until
            .filter(|until| *until > now)
            .map(|until| (until - now).as_millis() as u64);
        HealthSnapshot {
            healthy: cooldown_remaining_ms.is_none(),
            consecutive_failures: self.consecutive_failures,
            cooldown_remaining_ms,
        }
    }
}
