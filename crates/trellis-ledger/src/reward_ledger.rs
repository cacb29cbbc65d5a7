//! # Reward Ledger
//!
//! Proportional reward distribution over a mutable set of share holders,
//! in O(1) per operation regardless of participant count.
//!
//! ## How the round mask works
//!
//! The ledger keeps one global accumulator, the *round mask*: cumulative
//! reward per share, carried at [`SCALE`] fixed-point. Injecting `amount`
//! while `total_shares > 0` advances it by `amount * SCALE / total_shares`.
//! Each participant remembers the mask value at their last settlement;
//! their unsettled entitlement is `(mask - stored) * shares / SCALE`,
//! banked whenever their share count is about to change.
//!
//! | Step | total shares | mask advance | A pending | B pending |
//! |------|--------------|--------------|-----------|-----------|
//! | A deposits 1,000 | 1,000 | – | 0 | – |
//! | inject 500 | 1,000 | `0.5 * SCALE` | 500 | – |
//! | B deposits 1,000 | 2,000 | – | 500 | 0 |
//! | inject 500 | 2,000 | `0.25 * SCALE` | 750 | 250 |
//!
//! Participants are identified explicitly; the ledger has no notion of a
//! caller. Entries are zeroed rather than deleted so a returning
//! participant starts from a clean slate instead of a stale mask.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use trellis_core::scale::{mul_div, SCALE};
use trellis_core::types::{short_id, Amount, AssetId, ParticipantId};
use trellis_core::{LedgerError, Result};

/// What to do with an injection that arrives while nobody holds shares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdlePolicy {
    /// Count it and drop it. The amount stays visible in
    /// [`RewardLedger::total_discarded`] but is not distributable.
    Discard,
    /// Park it and fold it into the next injection that finds shares.
    Reserve,
}

/// Per-participant accrual state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantState {
    /// Shares currently held.
    pub shares: Amount,
    /// Round mask at last settlement. `None` means the participant has
    /// never settled (or was forfeited), so no mask delta is owed.
    pub stored_mask: Option<u128>,
    /// Settled but unclaimed reward.
    pub banked: Amount,
}

/// Snapshot of the ledger's scalars plus one participant entry.
///
/// Capturing and restoring is O(1); multi-ledger operations take one per
/// touched ledger so a failure midway can put every book back exactly as
/// it was.
#[derive(Clone, Debug)]
pub struct LedgerCheckpoint {
    participant: ParticipantId,
    entry: Option<ParticipantState>,
    total_shares: Amount,
    round_mask: u128,
    reserved: Amount,
    total_injected: Amount,
    total_claimed: Amount,
    total_discarded: Amount,
}

/// Single-denomination proportional reward book.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RewardLedger {
    denom: AssetId,
    idle_policy: IdlePolicy,
    total_shares: Amount,
    /// Cumulative reward per share at `SCALE` fixed-point. Starts at
    /// `SCALE` rather than zero so a freshly created ledger is
    /// distinguishable from an unserialized default; only deltas matter.
    round_mask: u128,
    /// Injections parked under [`IdlePolicy::Reserve`].
    reserved: Amount,
    total_injected: Amount,
    total_claimed: Amount,
    total_discarded: Amount,
    participants: HashMap<ParticipantId, ParticipantState>,
}

impl RewardLedger {
    pub fn new(denom: AssetId, idle_policy: IdlePolicy) -> Self {
        Self {
            denom,
            idle_policy,
            total_shares: 0,
            round_mask: SCALE,
            reserved: 0,
            total_injected: 0,
            total_claimed: 0,
            total_discarded: 0,
            participants: HashMap::new(),
        }
    }

    pub fn denom(&self) -> AssetId {
        self.denom
    }

    pub fn idle_policy(&self) -> IdlePolicy {
        self.idle_policy
    }

    pub fn total_shares(&self) -> Amount {
        self.total_shares
    }

    pub fn round_mask(&self) -> u128 {
        self.round_mask
    }

    /// Injections waiting for the next active round under `Reserve`.
    pub fn reserved(&self) -> Amount {
        self.reserved
    }

    pub fn total_injected(&self) -> Amount {
        self.total_injected
    }

    pub fn total_claimed(&self) -> Amount {
        self.total_claimed
    }

    pub fn total_discarded(&self) -> Amount {
        self.total_discarded
    }

    pub fn shares_of(&self, participant: &ParticipantId) -> Amount {
        self.participants.get(participant).map_or(0, |p| p.shares)
    }

    pub fn state_of(&self, participant: &ParticipantId) -> Option<&ParticipantState> {
        self.participants.get(participant)
    }

    /// Distributes `amount` proportionally across current share holders.
    ///
    /// Returns the amount actually folded into the round mask: the
    /// injection itself plus any previously reserved idle rewards, or zero
    /// when the ledger is idle and the amount was discarded or reserved.
    pub fn inject(&mut self, amount: Amount) -> Result<Amount> {
        if amount == 0 {
            return Ok(0);
        }
        self.total_injected =
            self.total_injected.checked_add(amount).ok_or(LedgerError::AmountOverflow)?;

        if self.total_shares == 0 {
            match self.idle_policy {
                IdlePolicy::Discard => {
                    self.total_discarded = self
                        .total_discarded
                        .checked_add(amount)
                        .ok_or(LedgerError::AmountOverflow)?;
                    warn!(
                        denom = %short_id(&self.denom),
                        amount,
                        "reward injected with no shares outstanding; discarded"
                    );
                }
                IdlePolicy::Reserve => {
                    self.reserved =
                        self.reserved.checked_add(amount).ok_or(LedgerError::AmountOverflow)?;
                }
            }
            return Ok(0);
        }

        let distributing =
            amount.checked_add(self.reserved).ok_or(LedgerError::AmountOverflow)?;
        self.reserved = 0;
        let advance = mul_div(distributing, SCALE, self.total_shares)?;
        self.round_mask =
            self.round_mask.checked_add(advance).ok_or(LedgerError::AmountOverflow)?;
        Ok(distributing)
    }

    /// Reward currently owed to `participant`: banked plus the unsettled
    /// mask delta. Zero for unknown or never-settled participants.
    pub fn pending_of(&self, participant: &ParticipantId) -> Result<Amount> {
        let Some(entry) = self.participants.get(participant) else {
            return Ok(0);
        };
        let Some(stored) = entry.stored_mask else {
            return Ok(0);
        };
        // The mask never decreases, so the delta cannot underflow.
        let delta = self.round_mask - stored;
        let unsettled = mul_div(delta, entry.shares, SCALE)?;
        entry.banked.checked_add(unsettled).ok_or(LedgerError::AmountOverflow)
    }

    /// Like [`pending_of`](Self::pending_of), but as if `queued` more
    /// reward had just been injected. Used by mint streams to answer
    /// views without mutating the cursor.
    pub fn pending_of_with(&self, participant: &ParticipantId, queued: Amount) -> Result<Amount> {
        if queued == 0 || self.total_shares == 0 {
            return self.pending_of(participant);
        }
        let Some(entry) = self.participants.get(participant) else {
            return Ok(0);
        };
        let Some(stored) = entry.stored_mask else {
            return Ok(0);
        };
        let distributing = queued.checked_add(self.reserved).ok_or(LedgerError::AmountOverflow)?;
        let advance = mul_div(distributing, SCALE, self.total_shares)?;
        let mask = self.round_mask.checked_add(advance).ok_or(LedgerError::AmountOverflow)?;
        let unsettled = mul_div(mask - stored, entry.shares, SCALE)?;
        entry.banked.checked_add(unsettled).ok_or(LedgerError::AmountOverflow)
    }

    /// Banks the participant's unsettled mask delta and stamps the entry
    /// with the current mask. Idempotent until the mask moves again.
    pub fn settle(&mut self, participant: &ParticipantId) -> Result<()> {
        let pending = self.pending_of(participant)?;
        let entry = self.participants.entry(*participant).or_default();
        entry.banked = pending;
        entry.stored_mask = Some(self.round_mask);
        Ok(())
    }

    /// Adds shares for `participant`, settling first so the new shares
    /// earn only from this point forward.
    pub fn deposit(&mut self, participant: &ParticipantId, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Err(LedgerError::NoOp);
        }
        let new_total =
            self.total_shares.checked_add(amount).ok_or(LedgerError::AmountOverflow)?;
        self.settle(participant)?;
        // Entry exists after settle.
        if let Some(entry) = self.participants.get_mut(participant) {
            entry.shares = entry.shares.checked_add(amount).ok_or(LedgerError::AmountOverflow)?;
        }
        self.total_shares = new_total;
        Ok(())
    }

    /// Removes shares, settling first so the departing shares keep every
    /// reward earned up to this instant.
    pub fn withdraw(&mut self, participant: &ParticipantId, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Err(LedgerError::NoOp);
        }
        let available = self.shares_of(participant);
        if amount > available {
            return Err(LedgerError::InsufficientShares { requested: amount, available });
        }
        self.settle(participant)?;
        if let Some(entry) = self.participants.get_mut(participant) {
            entry.shares -= amount;
        }
        self.total_shares -= amount;
        Ok(())
    }

    /// Settles and takes the participant's full banked reward.
    pub fn claim(&mut self, participant: &ParticipantId) -> Result<Amount> {
        self.settle(participant)?;
        let taken = match self.participants.get_mut(participant) {
            Some(entry) => std::mem::take(&mut entry.banked),
            None => 0,
        };
        self.total_claimed =
            self.total_claimed.checked_add(taken).ok_or(LedgerError::AmountOverflow)?;
        Ok(taken)
    }

    /// Emergency exit: zeroes the participant's entry without settling.
    ///
    /// Returns the share count that was forfeited. Unclaimed rewards are
    /// abandoned; this path is deliberately infallible so it stays open
    /// when accrual math cannot run.
    pub fn forfeit(&mut self, participant: &ParticipantId) -> Amount {
        let Some(entry) = self.participants.get_mut(participant) else {
            return 0;
        };
        let shares = entry.shares;
        entry.shares = 0;
        entry.banked = 0;
        entry.stored_mask = None;
        self.total_shares -= shares;
        shares
    }

    /// O(1) snapshot of everything an operation touching `participant`
    /// could modify.
    pub fn checkpoint(&self, participant: &ParticipantId) -> LedgerCheckpoint {
        LedgerCheckpoint {
            participant: *participant,
            entry: self.participants.get(participant).cloned(),
            total_shares: self.total_shares,
            round_mask: self.round_mask,
            reserved: self.reserved,
            total_injected: self.total_injected,
            total_claimed: self.total_claimed,
            total_discarded: self.total_discarded,
        }
    }

    /// Rolls the ledger back to `checkpoint`. Only valid for a checkpoint
    /// taken from this ledger with no other participants touched since.
    pub fn restore(&mut self, checkpoint: LedgerCheckpoint) {
        self.total_shares = checkpoint.total_shares;
        self.round_mask = checkpoint.round_mask;
        self.reserved = checkpoint.reserved;
        self.total_injected = checkpoint.total_injected;
        self.total_claimed = checkpoint.total_claimed;
        self.total_discarded = checkpoint.total_discarded;
        match checkpoint.entry {
            Some(entry) => {
                self.participants.insert(checkpoint.participant, entry);
            }
            None => {
                self.participants.remove(&checkpoint.participant);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: ParticipantId = [1u8; 32];
    const BOB: ParticipantId = [2u8; 32];
    const TOKEN: AssetId = [9u8; 32];

    fn ledger() -> RewardLedger {
        RewardLedger::new(TOKEN, IdlePolicy::Discard)
    }

    #[test]
    fn two_holders_split_by_share_weight() {
        let mut l = ledger();
        l.deposit(&ALICE, 1_000).unwrap();
        l.inject(500).unwrap();
        assert_eq!(l.pending_of(&ALICE).unwrap(), 500);

        l.deposit(&BOB, 1_000).unwrap();
        assert_eq!(l.pending_of(&BOB).unwrap(), 0);

        l.inject(500).unwrap();
        assert_eq!(l.pending_of(&ALICE).unwrap(), 750);
        assert_eq!(l.pending_of(&BOB).unwrap(), 250);
    }

    #[test]
    fn settle_is_idempotent_between_injections() {
        let mut l = ledger();
        l.deposit(&ALICE, 100).unwrap();
        l.inject(300).unwrap();
        l.settle(&ALICE).unwrap();
        let once = l.state_of(&ALICE).unwrap().clone();
        l.settle(&ALICE).unwrap();
        assert_eq!(l.state_of(&ALICE).unwrap(), &once);
        assert_eq!(l.pending_of(&ALICE).unwrap(), 300);
    }

    #[test]
    fn late_joiner_earns_nothing_retroactively() {
        let mut l = ledger();
        l.deposit(&ALICE, 50).unwrap();
        l.inject(1_000).unwrap();
        l.deposit(&BOB, 950).unwrap();
        assert_eq!(l.pending_of(&BOB).unwrap(), 0);
        assert_eq!(l.pending_of(&ALICE).unwrap(), 1_000);
    }

    #[test]
    fn withdraw_keeps_rewards_earned_so_far() {
        let mut l = ledger();
        l.deposit(&ALICE, 1_000).unwrap();
        l.inject(400).unwrap();
        l.withdraw(&ALICE, 1_000).unwrap();
        assert_eq!(l.shares_of(&ALICE), 0);
        assert_eq!(l.pending_of(&ALICE).unwrap(), 400);
        assert_eq!(l.claim(&ALICE).unwrap(), 400);
        assert_eq!(l.pending_of(&ALICE).unwrap(), 0);
    }

    #[test]
    fn withdraw_beyond_balance_leaves_state_untouched() {
        let mut l = ledger();
        l.deposit(&ALICE, 100).unwrap();
        l.inject(90).unwrap();
        let before_mask = l.round_mask();
        let before = l.state_of(&ALICE).unwrap().clone();

        let err = l.withdraw(&ALICE, 101).unwrap_err();
        assert_eq!(err, LedgerError::InsufficientShares { requested: 101, available: 100 });
        assert_eq!(l.state_of(&ALICE).unwrap(), &before);
        assert_eq!(l.round_mask(), before_mask);
        assert_eq!(l.total_shares(), 100);
    }

    #[test]
    fn zero_amounts_are_rejected_as_noops() {
        let mut l = ledger();
        assert_eq!(l.deposit(&ALICE, 0).unwrap_err(), LedgerError::NoOp);
        assert_eq!(l.withdraw(&ALICE, 0).unwrap_err(), LedgerError::NoOp);
        assert_eq!(l.inject(0).unwrap(), 0);
        assert_eq!(l.total_injected(), 0);
    }

    #[test]
    fn idle_injection_is_discarded_under_discard_policy() {
        let mut l = ledger();
        assert_eq!(l.inject(777).unwrap(), 0);
        assert_eq!(l.total_discarded(), 777);
        assert_eq!(l.total_injected(), 777);
        // A later depositor sees none of it.
        l.deposit(&ALICE, 10).unwrap();
        assert_eq!(l.pending_of(&ALICE).unwrap(), 0);
    }

    #[test]
    fn idle_injection_is_parked_under_reserve_policy() {
        let mut l = RewardLedger::new(TOKEN, IdlePolicy::Reserve);
        assert_eq!(l.inject(300).unwrap(), 0);
        assert_eq!(l.reserved(), 300);

        l.deposit(&ALICE, 100).unwrap();
        // The park folds into the next live injection.
        assert_eq!(l.inject(100).unwrap(), 400);
        assert_eq!(l.reserved(), 0);
        assert_eq!(l.pending_of(&ALICE).unwrap(), 400);
    }

    #[test]
    fn forfeit_abandons_pending_and_zeroes_the_entry() {
        let mut l = ledger();
        l.deposit(&ALICE, 600).unwrap();
        l.inject(60).unwrap();
        assert_eq!(l.forfeit(&ALICE), 600);
        assert_eq!(l.total_shares(), 0);
        assert_eq!(l.pending_of(&ALICE).unwrap(), 0);
        assert_eq!(l.state_of(&ALICE).unwrap().stored_mask, None);
        // Unknown participants forfeit nothing.
        assert_eq!(l.forfeit(&BOB), 0);
    }

    #[test]
    fn returning_after_forfeit_starts_clean() {
        let mut l = ledger();
        l.deposit(&ALICE, 100).unwrap();
        l.inject(50).unwrap();
        l.forfeit(&ALICE);

        l.deposit(&BOB, 100).unwrap();
        l.inject(80).unwrap();
        l.deposit(&ALICE, 100).unwrap();
        assert_eq!(l.pending_of(&ALICE).unwrap(), 0);
        l.inject(100).unwrap();
        assert_eq!(l.pending_of(&ALICE).unwrap(), 50);
        assert_eq!(l.pending_of(&BOB).unwrap(), 130);
    }

    #[test]
    fn pending_with_queued_injection_matches_real_injection() {
        let mut l = ledger();
        l.deposit(&ALICE, 300).unwrap();
        l.deposit(&BOB, 100).unwrap();
        l.inject(100).unwrap();

        let preview = l.pending_of_with(&ALICE, 400).unwrap();
        l.inject(400).unwrap();
        assert_eq!(l.pending_of(&ALICE).unwrap(), preview);
        assert_eq!(preview, 75 + 300);
    }

    #[test]
    fn checkpoint_restore_is_exact() {
        let mut l = ledger();
        l.deposit(&ALICE, 1_000).unwrap();
        l.inject(250).unwrap();
        let cp = l.checkpoint(&ALICE);
        let snapshot = l.clone();

        l.inject(999).unwrap();
        l.claim(&ALICE).unwrap();
        l.withdraw(&ALICE, 500).unwrap();
        l.restore(cp);

        assert_eq!(l.round_mask(), snapshot.round_mask());
        assert_eq!(l.total_shares(), snapshot.total_shares());
        assert_eq!(l.total_claimed(), snapshot.total_claimed());
        assert_eq!(l.state_of(&ALICE), snapshot.state_of(&ALICE));
    }

    #[test]
    fn checkpoint_restore_removes_entries_created_after_capture() {
        let mut l = ledger();
        let cp = l.checkpoint(&ALICE);
        l.deposit(&ALICE, 10).unwrap();
        l.restore(cp);
        assert!(l.state_of(&ALICE).is_none());
        assert_eq!(l.total_shares(), 0);
    }

    proptest::proptest! {
        #[test]
        fn payouts_never_exceed_injections(ops in proptest::collection::vec((0u8..4, 1u128..10_000), 1..60)) {
            // Random deposit/inject/claim/withdraw interleavings: the sum of
            // everything claimed plus still-pending never exceeds what was
            // injected and actually distributed.
            let mut l = ledger();
            let actors = [ALICE, BOB];
            for (i, (op, amount)) in ops.into_iter().enumerate() {
                let who = &actors[i % 2];
                match op {
                    0 => { let _ = l.deposit(who, amount); }
                    1 => { let _ = l.inject(amount); }
                    2 => { let _ = l.claim(who); }
                    _ => { let _ = l.withdraw(who, amount); }
                }
            }
            let pending = l.pending_of(&ALICE).unwrap() + l.pending_of(&BOB).unwrap();
            let distributed = l.total_injected() - l.total_discarded() - l.reserved();
            proptest::prop_assert!(l.total_claimed() + pending <= distributed);
        }
    }
}
