//! Error classification.
//!
//! Typed inspection first, substring fallback second. Pure and
//! allocation-free on the hot path — no heap work beyond the `&str` the
//! caller already owns.

use serde::{Deserialize, Serialize};

/// The three-way classification a delivery failure is reduced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Recoverable by retry: timeouts, connection resets, DNS failures,
    /// 408/429/502/503/504, transport-peer I/O errors.
    Transient,
    /// Never retry: 400/401/403/404/405/409/410/422, serialization or
    /// validation failures.
    Permanent,
    /// Anything unmapped, including unrecognized 5xx. Retried up to
    /// `MaxRetries` but counted separately in metrics.
    Unknown,
}

impl ErrorKind {
    /// `should_retry(err_kind, attempt) := err_kind != Permanent && attempt < MaxRetries`.
    pub fn should_retry(self, attempt: u32, max_retries: u32) -> bool {
        self != ErrorKind::Permanent && attempt < max_retries
    }
}

/// A structured carrier a [`crate::publisher::Publisher`] error may expose so
/// the classifier can skip substring matching entirely. Implement this on
/// your delivery error type for deterministic, allocation-free classification.
pub trait StatusCarrier {
    /// The HTTP-ish status code, if the failure came from a wire call.
    fn status_code(&self) -> Option<u16> {
        None
    }
    /// Whether the underlying transport marked this as a temporary error
    /// (timeout, connection reset, DNS failure).
    fn is_transport_temporary(&self) -> bool {
        false
    }
    /// Whether this failure is a serialization/validation failure — always
    /// permanent regardless of any status code also present.
    fn is_validation_failure(&self) -> bool {
        false
    }
}

const PERMANENT_STATUSES: &[u16] = &[400, 401, 403, 404, 405, 409, 410, 422];
const TRANSIENT_STATUSES: &[u16] = &[408, 429, 502, 503, 504];

/// Classify a failure into [`ErrorKind`].
///
/// `carrier` is consulted first; `message` is only substring-matched when the
/// carrier gives no definite answer (or none is available).
pub fn classify(carrier: Option<&dyn StatusCarrier>, message: &str) -> ErrorKind {
    if let Some(carrier) = carrier {
        if carrier.is_validation_failure() {
            return ErrorKind::Permanent;
        }
        if carrier.is_transport_temporary() {
            return ErrorKind::Transient;
        }
        if let Some(status) = carrier.status_code() {
            if PERMANENT_STATUSES.contains(&status) {
                return ErrorKind::Permanent;
            }
            if TRANSIENT_STATUSES.contains(&status) {
                return ErrorKind::Transient;
            }
            if (500..600).contains(&status) {
                return ErrorKind::Unknown;
            }
        }
    }

    classify_message(message)
}

/// Substring fallback used when no [`StatusCarrier`] is available or it did
/// not resolve the classification.
fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();

    let permanent_markers = [
        "400", "401", "403", "404", "405", "409", "410", "422", "invalid", "malformed",
        "unauthorized", "forbidden", "not found", "validation", "serialization",
    ];
    if permanent_markers.iter().any(|m| lower.contains(m)) {
        return ErrorKind::Permanent;
    }

    let transient_markers = [
        "408", "429", "502", "503", "504", "timeout", "timed out", "connection refused",
        "connection reset", "dns", "temporarily unavailable", "broken pipe", "eof",
        "connection",
    ];
    if transient_markers.iter().any(|m| lower.contains(m)) {
        return ErrorKind::Transient;
    }

    ErrorKind::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeCarrier {
        status: Option<u16>,
        transport_temp: bool,
        validation: bool,
    }

    impl StatusCarrier for FakeCarrier {
        fn status_code(&self) -> Option<u16> {
            self.status
        }
        fn is_transport_temporary(&self) -> bool {
            self.transport_temp
        }
        fn is_validation_failure(&self) -> bool {
            self.validation
        }
    }

    #[test]
    fn status_401_is_permanent() {
        let c = FakeCarrier {
            status: Some(401),
            transport_temp: false,
            validation: false,
        };
        assert_eq!(classify(Some(&c), "unauthorized"), ErrorKind::Permanent);
    }

    #[test]
    fn status_503_is_transient() {
        let c = FakeCarrier {
            status: Some(503),
            transport_temp: false,
            validation: false,
        };
        assert_eq!(classify(Some(&c), "service unavailable"), ErrorKind::Transient);
    }

    #[test]
    fn unmapped_5xx_is_unknown() {
        let c = FakeCarrier {
            status: Some(599),
            transport_temp: false,
            validation: false,
        };
        assert_eq!(classify(Some(&c), "weird"), ErrorKind::Unknown);
    }

    #[test]
    fn transport_temporary_wins_over_status() {
        let c = FakeCarrier {
            status: Some(404),
            transport_temp: true,
            validation: false,
        };
        // Transport-temporary is checked before status in the carrier path.
        assert_eq!(classify(Some(&c), "x"), ErrorKind::Transient);
    }

    #[test]
    fn validation_failure_always_permanent() {
        let c = FakeCarrier {
            status: Some(503),
            transport_temp: true,
            validation: true,
        };
        assert_eq!(classify(Some(&c), "x"), ErrorKind::Permanent);
    }

    #[test]
    fn message_fallback_transient() {
        assert_eq!(classify(None, "connection timed out"), ErrorKind::Transient);
    }

    #[test]
    fn message_fallback_permanent() {
        assert_eq!(classify(None, "400 bad request: invalid payload"), ErrorKind::Permanent);
    }

    #[test]
    fn message_fallback_unknown() {
        assert_eq!(classify(None, "something weird happened"), ErrorKind::Unknown);
    }

    #[test]
    fn classification_is_deterministic() {
        for _ in 0..5 {
            assert_eq!(classify(None, "HTTP 503"), ErrorKind::Transient);
        }
    }

    #[test]
    fn should_retry_respects_permanent_and_ceiling() {
        assert!(!ErrorKind::Permanent.should_retry(0, 3));
        assert!(ErrorKind::Transient.should_retry(0, 3));
        assert!(!ErrorKind::Transient.should_retry(3, 3));
        assert!(ErrorKind::Unknown.should_retry(2, 3));
    }
}
