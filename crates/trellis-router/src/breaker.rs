//! Emergency circuit breaker and the reversible pause switch.

use serde::{Deserialize, Serialize};
use tracing::warn;

use trellis_core::{LedgerError, Result};

/// Global operating state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    Normal,
    /// Terminal. Only the principal-recovery path stays open.
    Emergency,
}

/// Two independent switches in front of every mutating entry point.
///
/// `pause` is the routine maintenance gate and flips both ways. The
/// breaker is the one-way fuse: once tripped there is deliberately no
/// operation that returns to [`BreakerState::Normal`] for the lifetime of
/// the instance, and everything except principal withdrawal stays dark.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CircuitBreaker {
    state: BreakerState,
    paused: bool,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self { state: BreakerState::Normal, paused: false }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn is_tripped(&self) -> bool {
        self.state == BreakerState::Emergency
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Trips the fuse. Tripping an already-tripped breaker is a no-op
    /// error so the caller learns nothing changed.
    pub fn trip(&mut self) -> Result<()> {
        if self.state == BreakerState::Emergency {
            return Err(LedgerError::NoOp);
        }
        self.state = BreakerState::Emergency;
        warn!("emergency circuit breaker tripped; only principal withdrawal remains");
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        if self.paused {
            return Err(LedgerError::NoOp);
        }
        self.paused = true;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if !self.paused {
            return Err(LedgerError::NoOp);
        }
        self.paused = false;
        Ok(())
    }

    /// Gate for normal mutating operations. The breaker outranks the
    /// pause switch so callers see the more severe condition first.
    pub fn ensure_operational(&self) -> Result<()> {
        if self.is_tripped() {
            return Err(LedgerError::EmergencyActive);
        }
        if self.paused {
            return Err(LedgerError::Paused);
        }
        Ok(())
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
