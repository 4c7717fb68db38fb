//! Deadline budget shared by every step of one invocation.
//!
//! A budget is created once per public operation with the caller's hard
//! ceiling. Navigations, poll loops, and retries derive their timeouts
//! from it instead of fixed constants, so nested steps can never
//! collectively exceed the ceiling.

use crate::error::{Fault, FaultKind, HawkerError, HawkerResult};
use std::time::{Duration, Instant};

/// Tracks elapsed wall-clock time against a fixed per-invocation ceiling.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineBudget {
    started: Instant,
    ceiling: Duration,
}

impl DeadlineBudget {
    /// Start a budget with the given ceiling.
    pub fn new(ceiling: Duration) -> Self {
        DeadlineBudget {
            started: Instant::now(),
            ceiling,
        }
    }

    /// The fixed ceiling this budget was created with.
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Time spent since the invocation started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the ceiling, zero once exhausted.
    pub fn remaining(&self) -> Duration {
        self.ceiling.saturating_sub(self.started.elapsed())
    }

    /// Whether the ceiling has been reached.
    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Fail with `MESSAGE_ACTION_TIMEOUT` once the ceiling is reached.
    pub fn ensure_not_expired(&self, context: &str) -> HawkerResult<()> {
        if self.expired() {
            Err(HawkerError::ActionTimeout(Fault::new(
                FaultKind::ActionTimeout,
                context,
                &format!(
                    "action deadline of {}ms exhausted after {}ms",
                    self.ceiling.as_millis(),
                    self.elapsed().as_millis()
                ),
                None,
            )))
        } else {
            Ok(())
        }
    }

    /// Clamp a requested step timeout to `min(desired, remaining - reserve)`.
    ///
    /// Fails fast with `MESSAGE_ACTION_TIMEOUT` when the remaining budget
    /// cannot cover at least `min` after holding back `reserve` for the
    /// steps that must still run afterwards.
    pub fn step_timeout(
        &self,
        desired: Duration,
        min: Duration,
        reserve: Duration,
        context: &str,
    ) -> HawkerResult<Duration> {
        self.ensure_not_expired(context)?;

        let usable = self.remaining().saturating_sub(reserve);
        let step = desired.min(usable);

        if step < min {
            return Err(HawkerError::ActionTimeout(Fault::new(
                FaultKind::ActionTimeout,
                context,
                &format!(
                    "remaining budget {}ms (reserve {}ms) cannot cover the minimum step of {}ms",
                    self.remaining().as_millis(),
                    reserve.as_millis(),
                    min.as_millis()
                ),
                None,
            )));
        }

        Ok(step)
    }

    /// A proportional slice of the ceiling, bounded to the remaining budget.
    pub fn slice(&self, fraction: f64) -> Duration {
        let ms = (self.ceiling.as_millis() as f64 * fraction.clamp(0.0, 1.0)) as u64;
        Duration::from_millis(ms).min(self.remaining())
    }
}
