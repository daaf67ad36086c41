use std::time::Duration;

/// Coarse failure class. Everything except `Other` is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connect or stall timeout.
    Timeout,
    /// 429 / 503.
    Throttled,
    /// Reset, refused, DNS, short body.
    Connection,
    Http5xx(u16),
    /// Protocol rejection or local failure.
    Other,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// Fixed-interval retry with an optional cap on attempts.
///
/// Metadata fetches are capped by the task's `tries`; block transfers keep
/// going until the engine halts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, first included. `None` = no cap.
    pub max_attempts: Option<u32>,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn unlimited(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
        }
    }

    /// `tries == 0` means no cap.
    pub fn from_budget(tries: u32, delay: Duration) -> Self {
        Self {
            max_attempts: (tries > 0).then_some(tries),
            delay,
        }
    }

    /// Whether attempt number `attempt` (1-based) may run.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }

    /// Verdict after attempt `attempt` (1-based) failed with `kind`.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if kind.is_retryable() && self.allows(attempt.saturating_add(1)) {
            RetryDecision::RetryAfter(self.delay)
        } else {
            RetryDecision::NoRetry
        }
    }
}
