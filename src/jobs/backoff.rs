use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Ceiling on the exponent so large attempt numbers cannot overflow.
const MAX_EXPONENT: u32 = 20;

/// Redelivery delay as a pure function of the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum BackoffPolicy {
    /// `base * 2^(attempt - 1)`
    Exponential { base: Duration },
    /// The same delay after every attempt
    Fixed { delay: Duration },
}

impl BackoffPolicy {
    /// Delay before redelivering after the given (1-based) failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            BackoffPolicy::Exponential { base } => {
                let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
                base.saturating_mul(1u32 << exponent)
            }
            BackoffPolicy::Fixed { delay } => delay,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_secs(2),
        }
    }
}
