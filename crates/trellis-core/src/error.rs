//! Error types for Trellis ledger, emission, and routing operations.

use thiserror::Error;

use crate::types::{Amount, Role, StrategyId};

/// Result type alias for Trellis operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Unified error across the ledger, emission, and router crates.
///
/// Every state-changing operation either applies completely or returns one
/// of these and leaves internal state untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // === Shares & balances ===
    #[error("insufficient shares: requested {requested}, available {available}")]
    InsufficientShares { requested: Amount, available: Amount },

    #[error("operation would have no effect")]
    NoOp,

    #[error("arithmetic overflow in ledger math")]
    AmountOverflow,

    // === Enrollment & routing ===
    #[error("participant is not enrolled in any strategy")]
    NotEnrolled,

    #[error("participant is enrolled in '{current}', not '{requested}'")]
    StrategyMismatch { current: StrategyId, requested: StrategyId },

    // === Admission gates ===
    #[error("deadline expired: deadline {deadline}, now {now}")]
    Expired { deadline: i64, now: i64 },

    #[error("emergency circuit breaker is active")]
    EmergencyActive,

    #[error("operations are paused")]
    Paused,

    #[error("reentrant call rejected")]
    ReentrantCall,

    #[error("caller lacks required role '{}'", .0.name())]
    Unauthorized(Role),

    // === Collaborators ===
    #[error("external transfer failed: {0}")]
    TransferFailed(String),

    #[error("slippage exceeded: quoted {quoted}, live {live}")]
    SlippageExceeded { quoted: Amount, live: Amount },

    // === Configuration ===
    #[error("invalid emission schedule: {0}")]
    ScheduleInvalid(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl LedgerError {
    /// Stable machine-readable code for logs and counters.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InsufficientShares { .. } => "INSUFFICIENT_SHARES",
            LedgerError::NoOp => "NO_OP",
            LedgerError::AmountOverflow => "AMOUNT_OVERFLOW",
            LedgerError::NotEnrolled => "NOT_ENROLLED",
            LedgerError::StrategyMismatch { .. } => "STRATEGY_MISMATCH",
            LedgerError::Expired { .. } => "EXPIRED",
            LedgerError::EmergencyActive => "EMERGENCY_ACTIVE",
            LedgerError::Paused => "PAUSED",
            LedgerError::ReentrantCall => "REENTRANT_CALL",
            LedgerError::Unauthorized(_) => "UNAUTHORIZED",
            LedgerError::TransferFailed(_) => "TRANSFER_FAILED",
            LedgerError::SlippageExceeded { .. } => "SLIPPAGE_EXCEEDED",
            LedgerError::ScheduleInvalid(_) => "SCHEDULE_INVALID",
            LedgerError::ConfigInvalid(_) => "CONFIG_INVALID",
        }
    }

    /// Whether retrying the same call later could succeed without any
    /// state or configuration change on our side.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::Expired { .. }
                | LedgerError::Paused
                | LedgerError::ReentrantCall
                | LedgerError::TransferFailed(_)
                | LedgerError::SlippageExceeded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_the_numbers() {
        let err = LedgerError::InsufficientShares { requested: 10, available: 3 };
        assert_eq!(err.to_string(), "insufficient shares: requested 10, available 3");

        let err = LedgerError::SlippageExceeded { quoted: 100, live: 98 };
        assert!(err.to_string().contains("quoted 100"));
    }

    #[test]
    fn transient_split_matches_retryability() {
        assert!(LedgerError::Paused.is_transient());
        assert!(LedgerError::ReentrantCall.is_transient());
        assert!(LedgerError::TransferFailed("farm".into()).is_transient());
        assert!(!LedgerError::EmergencyActive.is_transient());
        assert!(!LedgerError::NotEnrolled.is_transient());
        assert!(!LedgerError::AmountOverflow.is_transient());
    }

    #[test]
    fn codes_are_unique() {
        let all = [
            LedgerError::NoOp.code(),
            LedgerError::NotEnrolled.code(),
            LedgerError::EmergencyActive.code(),
            LedgerError::Paused.code(),
            LedgerError::ReentrantCall.code(),
            LedgerError::AmountOverflow.code(),
        ];
        let mut dedup = all.to_vec();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), all.len());
    }
}
