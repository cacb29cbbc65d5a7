//! # Trellis Router
//!
//! The participant-facing layer of the Trellis yield aggregator. The
//! crates below it are pure bookkeeping; this one owns the wiring:
//!
//! - [`StrategyRouter`] — three strategy pools, the platform mint
//!   stream, the referral book, and one session lock serializing every
//!   mutation across all of them.
//! - [`CircuitBreaker`] — the reversible pause switch and the one-way
//!   emergency fuse that leaves only principal recovery open.
//! - [`collaborators`] — the traits the router drives the outside world
//!   through: token custody, the swap venue, the upstream farm, and the
//!   role gate.
//! - [`slippage`] — quote revalidation for harvest conversions.
//! - [`testing`] — in-memory collaborator implementations for exercising
//!   the router without a chain.
//!
//! Every entry point takes explicit participant identity and an
//! [`OpContext`](trellis_core::OpContext); there is no ambient caller.

pub mod breaker;
pub mod collaborators;
pub mod config;
pub mod events;
pub mod router;
pub mod slippage;
pub mod testing;

pub use breaker::{BreakerState, CircuitBreaker};
pub use collaborators::{ExternalFarm, FungibleAsset, RoleGate, SwapVenue};
pub use config::{AccrualPolicy, DenomConfig, RouterConfig, StrategyConfig};
pub use events::{EventLog, EventRecord, RouterEvent};
pub use router::{DenomTotals, HarvestOutcome, ParticipantView, PoolTotals, StrategyRouter};
pub use slippage::{check_slippage, min_out, SlippageCheck};
