// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry policy for failed job attempts: exponential backoff with jitter.
//
// Errors are classified as Transient (auto-retry), UserAction (the user has
// to pair, plug in or grant something) and Permanent (the job itself is
// wrong).  Only transient failures are re-attempted.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use bonwerk_core::config::RetryConfig;
use bonwerk_core::error::ErrorKind;

/// How a failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    Transient,
    UserAction,
    Permanent,
}

/// Result of evaluating whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Start another attempt after this delay.
    RetryAfter(Duration),
    /// Do not retry: the error is permanent or needs the user.
    GiveUp(ErrorClass),
    /// The attempt budget is spent.
    Exhausted,
}

pub fn classify(kind: ErrorKind) -> ErrorClass {
    match kind {
        ErrorKind::Unreachable | ErrorKind::Timeout | ErrorKind::OperationFailed => {
            ErrorClass::Transient
        }
        ErrorKind::NotFound | ErrorKind::PermissionDenied => ErrorClass::UserAction,
        ErrorKind::ProtocolMismatch | ErrorKind::InvalidConfig | ErrorKind::Internal => {
            ErrorClass::Permanent
        }
    }
}

/// Decide whether a job whose `attempts`-th attempt just failed with `kind`
/// gets another one.  `attempts` counts every run so far, the first included.
pub fn should_retry(kind: ErrorKind, attempts: u32, config: &RetryConfig) -> RetryDecision {
    match classify(kind) {
        ErrorClass::Permanent => {
            info!(?kind, "permanent error, not retrying");
            RetryDecision::GiveUp(ErrorClass::Permanent)
        }
        ErrorClass::UserAction => {
            info!(?kind, "user action required, not auto-retrying");
            RetryDecision::GiveUp(ErrorClass::UserAction)
        }
        ErrorClass::Transient => {
            if attempts >= config.max_attempts {
                warn!(attempts, max = config.max_attempts, "retry limit exhausted");
                RetryDecision::Exhausted
            } else {
                let delay = compute_delay(attempts.saturating_sub(1), config);
                debug!(attempts, delay_ms = delay.as_millis(), "scheduling retry");
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}

/// delay = min(base * 2^retry + jitter, max), jitter in [0, base).
pub fn compute_delay(retry: u32, config: &RetryConfig) -> Duration {
    let base_ms = config.base_delay_ms;
    let exp_ms = base_ms.saturating_mul(1u64 << retry.min(10));
    let total_ms = exp_ms.saturating_add(jitter(base_ms, retry));
    Duration::from_millis(total_ms.min(config.max_delay_ms))
}

/// Deterministic spread in [0, base).
fn jitter(base_ms: u64, retry: u32) -> u64 {
    let hash = u64::from(retry).wrapping_mul(6364136223846793005);
    hash % base_ms.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bonwerk_core::error::BonwerkError;

    #[test]
    fn transport_failures_are_transient() {
        assert_eq!(classify(ErrorKind::Unreachable), ErrorClass::Transient);
        assert_eq!(classify(ErrorKind::Timeout), ErrorClass::Transient);
        assert_eq!(classify(ErrorKind::OperationFailed), ErrorClass::Transient);
    }

    #[test]
    fn missing_device_needs_the_user() {
        let err = BonwerkError::NotFound {
            transport: bonwerk_core::TransportKind::Bluetooth,
            identifier: "00:11:22:33:44:55".into(),
        };
        assert_eq!(classify(err.kind()), ErrorClass::UserAction);
    }

    #[test]
    fn bad_reply_is_permanent() {
        let err = BonwerkError::ProtocolMismatch {
            target: "10.0.0.5:9100".into(),
            detail: "garbage".into(),
        };
        assert_eq!(classify(err.kind()), ErrorClass::Permanent);
        assert_eq!(
            should_retry(err.kind(), 1, &RetryConfig::default()),
            RetryDecision::GiveUp(ErrorClass::Permanent)
        );
    }

    #[test]
    fn retry_respects_max_attempts() {
        let config = RetryConfig {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(matches!(
            should_retry(ErrorKind::Unreachable, 1, &config),
            RetryDecision::RetryAfter(_)
        ));
        assert!(matches!(
            should_retry(ErrorKind::Unreachable, 2, &config),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(
            should_retry(ErrorKind::Unreachable, 3, &config),
            RetryDecision::Exhausted
        );
    }

    #[test]
    fn delay_increases_with_retries() {
        let config = RetryConfig::default();
        let d0 = compute_delay(0, &config);
        let d1 = compute_delay(1, &config);
        let d2 = compute_delay(2, &config);
        assert!(d1 > d0);
        assert!(d2 > d1);
    }

    #[test]
    fn delay_capped_at_max() {
        let config = RetryConfig {
            max_delay_ms: 10_000,
            ..Default::default()
        };
        assert!(compute_delay(20, &config) <= Duration::from_secs(10));
    }
}
