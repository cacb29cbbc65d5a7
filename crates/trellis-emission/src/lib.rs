//! # Trellis Emission
//!
//! Phased block-reward schedule: a high bootstrap rate, a linear taper,
//! and a long flat tail. The schedule is a pure function of block height;
//! it holds no balances and mints nothing itself. `trellis-ledger`'s mint
//! stream integrates it between touches and feeds the result into a
//! reward ledger.
//!
//! ## Shape
//!
//! ```text
//! rate
//!  p1 ────────┐
//!             │╲
//!             │ ╲  linear ramp
//!             │  ╲
//!  p2         │   └──────────────────
//!      ───────┼───┼──────────────────► block
//!           phase1end  phase2start
//! ```

pub mod schedule;

pub use schedule::EmissionSchedule;
