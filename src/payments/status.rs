//! Payment status state machine
//!
//! ```text
//! pending ──► processing ──► completed ──► refunded
//!    │             │
//!    │             └───────► failed
//!    └──► completed / failed   (gateway reports the outcome directly)
//! ```
//!
//! Nothing ever moves back to `pending`, and `failed` / `refunded` are terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "processing" => Some(PaymentStatus::Processing),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    /// Validates if a state transition is allowed
    pub fn can_transition_to(&self, next: &PaymentStatus) -> bool {
        match (self, next) {
            (PaymentStatus::Pending, PaymentStatus::Processing) => true,
            (PaymentStatus::Pending, PaymentStatus::Completed) => true,
            (PaymentStatus::Pending, PaymentStatus::Failed) => true,
            (PaymentStatus::Processing, PaymentStatus::Completed) => true,
            (PaymentStatus::Processing, PaymentStatus::Failed) => true,
            (PaymentStatus::Completed, PaymentStatus::Refunded) => true,
            _ => false,
        }
    }

    /// Map a raw gateway result string onto a status.
    ///
    /// Unknown results fail closed.
    pub fn from_gateway_result(result: &str) -> Self {
        match result.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" | "CAPTURED" | "AUTHORIZED" => PaymentStatus::Completed,
            "PENDING" | "IN_PROGRESS" => PaymentStatus::Processing,
            "FAILURE" | "DECLINED" | "ERROR" | "CANCELLED" => PaymentStatus::Failed,
            "REFUNDED" | "REVERSED" => PaymentStatus::Refunded,
            _ => PaymentStatus::Failed,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Completed,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
    ];

    #[test]
    fn payment_status_transitions_are_validated() {
        assert!(PaymentStatus::Pending.can_transition_to(&PaymentStatus::Processing));
        assert!(PaymentStatus::Pending.can_transition_to(&PaymentStatus::Completed));
        assert!(PaymentStatus::Processing.can_transition_to(&PaymentStatus::Completed));
        assert!(PaymentStatus::Processing.can_transition_to(&PaymentStatus::Failed));
        assert!(PaymentStatus::Completed.can_transition_to(&PaymentStatus::Refunded));

        assert!(!PaymentStatus::Pending.can_transition_to(&PaymentStatus::Refunded));
        assert!(!PaymentStatus::Completed.can_transition_to(&PaymentStatus::Failed));
        assert!(!PaymentStatus::Failed.can_transition_to(&PaymentStatus::Completed));
        assert!(!PaymentStatus::Refunded.can_transition_to(&PaymentStatus::Completed));
    }

    #[test]
    fn nothing_returns_to_pending() {
        for from in ALL {
            assert!(
                !from.can_transition_to(&PaymentStatus::Pending),
                "{} -> pending must be rejected",
                from
            );
        }
    }

    #[test]
    fn completed_and_refunded_never_move_backwards() {
        for to in ALL {
            if to != PaymentStatus::Refunded {
                assert!(!PaymentStatus::Completed.can_transition_to(&to));
            }
            assert!(!PaymentStatus::Refunded.can_transition_to(&to));
        }
    }

    #[test]
    fn gateway_results_map_case_insensitively() {
        assert_eq!(PaymentStatus::from_gateway_result("SUCCESS"), PaymentStatus::Completed);
        assert_eq!(PaymentStatus::from_gateway_result("captured"), PaymentStatus::Completed);
        assert_eq!(PaymentStatus::from_gateway_result("Authorized"), PaymentStatus::Completed);
        assert_eq!(PaymentStatus::from_gateway_result("pending"), PaymentStatus::Processing);
        assert_eq!(PaymentStatus::from_gateway_result("IN_PROGRESS"), PaymentStatus::Processing);
        assert_eq!(PaymentStatus::from_gateway_result("DECLINED"), PaymentStatus::Failed);
        assert_eq!(PaymentStatus::from_gateway_result("cancelled"), PaymentStatus::Failed);
        assert_eq!(PaymentStatus::from_gateway_result("REVERSED"), PaymentStatus::Refunded);
    }

    #[test]
    fn unknown_gateway_results_fail_closed() {
        assert_eq!(PaymentStatus::from_gateway_result("PARTIALLY_CAPTURED"), PaymentStatus::Failed);
        assert_eq!(PaymentStatus::from_gateway_result(""), PaymentStatus::Failed);
    }

    #[test]
    fn payment_status_string_conversion() {
        for status in ALL {
            assert_eq!(PaymentStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(PaymentStatus::from_str("settled"), None);
    }
}
