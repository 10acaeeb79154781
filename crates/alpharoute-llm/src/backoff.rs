//! Retry delay curves and the sleep seam
//!
//! Delays are pure functions of the attempt number so they can be tested
//! without sleeping; the actual wait goes through [`Sleeper`].

use std::time::Duration;

use async_trait::async_trait;

/// Longest wait between two attempts
pub const MAX_DELAY: Duration = Duration::from_secs(60);

/// Which growth curve a retry follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    /// 5xx, transport failure or timeout: `base × 1.5^attempt`
    ServerError,
    /// 429: `base × 2^attempt`
    RateLimit,
}

/// Delay before retry number `attempt` (zero based), capped at [`MAX_DELAY`]
pub fn delay(base: Duration, attempt: u32, kind: RetryKind) -> Duration {
    let factor: f64 = match kind {
        RetryKind::ServerError => 1.5,
        RetryKind::RateLimit => 2.0,
    };
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = base.as_secs_f64() * factor.powi(exponent);
    if !secs.is_finite() || secs >= MAX_DELAY.as_secs_f64() {
        return MAX_DELAY;
    }
    Duration::from_secs_f64(secs.max(0.0))
}

/// Like [`delay`], lengthened (never shortened) by a server hint
pub fn delay_with_hint(base: Duration, attempt: u32, kind: RetryKind, retry_after: Option<Duration>) -> Duration {
    let computed = delay(base, attempt, kind);
    retry_after.map_or(computed, |hint| computed.max(hint.min(MAX_DELAY)))
}

/// Suspends the current task between attempts
#[async_trait]
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Records requested delays without sleeping
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: std::sync::Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(duration);
    }
}
