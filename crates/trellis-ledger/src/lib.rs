//! # Trellis Ledger
//!
//! Round-mask reward accrual: proportional distribution over a mutable
//! set of share holders at O(1) per operation, and everything built
//! directly on top of it.
//!
//! ## Components
//!
//! - [`RewardLedger`] — the accrual primitive: one denomination, one
//!   monotone round mask, per-participant `(shares, stored mask, banked)`
//!   state. Five near-identical copies of this pattern existed across the
//!   strategies this crate replaces; here it is one type parameterized by
//!   an [`IdlePolicy`] for injections that arrive with no shares staked.
//! - [`LedgerSet`] — one ledger per payout denomination with share
//!   movements mirrored across all of them, so a strategy can pay several
//!   reward tokens against a single principal balance.
//! - [`MintStream`] — a ledger fed by a block-emission schedule instead
//!   of discrete injections; integrates lazily between touches.
//! - [`ReferralBook`] — giver ledgers keyed by strategy pool whose shares
//!   are attributed referee deposits.
//!
//! Every mutation is keyed by an explicit participant id, settles the
//! participant before moving shares, and is snapshot-restorable in O(1)
//! so multi-ledger callers can stay all-or-nothing.

pub mod ledger_set;
pub mod mint_stream;
pub mod referral;
pub mod reward_ledger;

pub use ledger_set::LedgerSet;
pub use mint_stream::{MintStream, MintStreamCheckpoint};
pub use referral::{ReferralBook, ReferralCheckpoint};
pub use reward_ledger::{IdlePolicy, LedgerCheckpoint, ParticipantState, RewardLedger};
