//! # Trellis Core
//!
//! Shared foundation for the Trellis yield aggregator: identifier and
//! quantity types, the fixed-point accrual scale, the error taxonomy, and
//! the per-call operation context.
//!
//! ## Layering
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  trellis-router   (strategy pools, breaker)  │
//! ├──────────────────────────────────────────────┤
//! │  trellis-ledger   (round-mask accrual)       │
//! │  trellis-emission (phased mint schedule)     │
//! ├──────────────────────────────────────────────┤
//! │  trellis-core     (types, scale, errors)     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Everything above this crate speaks in `ParticipantId`, `Amount`, and
//! `LedgerError`; nothing below the router talks to the outside world.

pub mod context;
pub mod error;
pub mod scale;
pub mod types;

pub use context::OpContext;
pub use error::{LedgerError, Result};
pub use scale::{bps_of, mul_div, BPS_DENOM, SCALE};
pub use types::{Amount, AssetId, BlockNumber, ParticipantId, Role, StrategyId};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::context::OpContext;
    pub use crate::error::{LedgerError, Result};
    pub use crate::scale::{SCALE};
    pub use crate::types::*;
}
