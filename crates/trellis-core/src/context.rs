//! Per-call operation context.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::BlockNumber;

/// Ambient facts a state-changing call is evaluated against: the chain
/// height driving emission accrual and the wall-clock time driving
/// deadline checks.
///
/// Callers construct this once per call, so a single operation sees one
/// consistent (block, time) pair even when it touches several ledgers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpContext {
    /// Current block height.
    pub block: BlockNumber,
    /// Unix timestamp (seconds).
    pub now: i64,
}

impl OpContext {
    pub fn new(block: BlockNumber, now: i64) -> Self {
        Self { block, now }
    }

    /// Context at the current wall-clock time.
    pub fn at_now(block: BlockNumber) -> Self {
        Self { block, now: Utc::now().timestamp() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_now_uses_wall_clock() {
        let ctx = OpContext::at_now(42);
        assert_eq!(ctx.block, 42);
        assert!(ctx.now > 1_700_000_000); // after Nov 2023
    }
}
