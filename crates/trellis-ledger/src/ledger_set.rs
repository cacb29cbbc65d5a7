//! Share-mirrored bundle of reward ledgers, one per payout denomination.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use trellis_core::types::{Amount, AssetId, ParticipantId};
use trellis_core::{LedgerError, Result};

use crate::reward_ledger::{IdlePolicy, LedgerCheckpoint, RewardLedger};

/// A strategy pool pays rewards in several denominations at once, all
/// weighted by the same principal. `LedgerSet` keeps one [`RewardLedger`]
/// per denomination and mirrors every share movement across all of them,
/// so each denomination's mask can advance independently while share
/// weights stay identical.
///
/// Iteration order is insertion order; injection and settlement touch
/// denominations deterministically.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerSet {
    ledgers: IndexMap<AssetId, RewardLedger>,
}

impl LedgerSet {
    pub fn new() -> Self {
        Self { ledgers: IndexMap::new() }
    }

    /// Adds a denomination. Replaces nothing: a denom already present is
    /// left untouched so share mirrors cannot be reset mid-flight.
    pub fn add_denom(&mut self, denom: AssetId, idle_policy: IdlePolicy) {
        self.ledgers.entry(denom).or_insert_with(|| RewardLedger::new(denom, idle_policy));
    }

    pub fn denoms(&self) -> impl Iterator<Item = &AssetId> {
        self.ledgers.keys()
    }

    pub fn ledger(&self, denom: &AssetId) -> Option<&RewardLedger> {
        self.ledgers.get(denom)
    }

    pub fn is_empty(&self) -> bool {
        self.ledgers.is_empty()
    }

    /// Shares held by `participant`, identical in every ledger.
    pub fn shares_of(&self, participant: &ParticipantId) -> Amount {
        self.ledgers.first().map_or(0, |(_, l)| l.shares_of(participant))
    }

    /// Total shares staked in the pool.
    pub fn total_shares(&self) -> Amount {
        self.ledgers.first().map_or(0, |(_, l)| l.total_shares())
    }

    /// Mirrors a share deposit into every denomination ledger.
    pub fn deposit_all(&mut self, participant: &ParticipantId, amount: Amount) -> Result<()> {
        for ledger in self.ledgers.values_mut() {
            ledger.deposit(participant, amount)?;
        }
        Ok(())
    }

    /// Mirrors a share withdrawal out of every denomination ledger.
    pub fn withdraw_all(&mut self, participant: &ParticipantId, amount: Amount) -> Result<()> {
        let available = self.shares_of(participant);
        if amount > available {
            return Err(LedgerError::InsufficientShares { requested: amount, available });
        }
        for ledger in self.ledgers.values_mut() {
            ledger.withdraw(participant, amount)?;
        }
        Ok(())
    }

    /// Banks pending rewards in every denomination without moving shares.
    pub fn settle_all(&mut self, participant: &ParticipantId) -> Result<()> {
        for ledger in self.ledgers.values_mut() {
            ledger.settle(participant)?;
        }
        Ok(())
    }

    /// Zeroes the participant in every ledger. Returns the forfeited
    /// share count (identical across ledgers).
    pub fn forfeit_all(&mut self, participant: &ParticipantId) -> Amount {
        let mut shares = 0;
        for ledger in self.ledgers.values_mut() {
            shares = ledger.forfeit(participant);
        }
        shares
    }

    pub fn inject(&mut self, denom: &AssetId, amount: Amount) -> Result<Amount> {
        match self.ledgers.get_mut(denom) {
            Some(ledger) => ledger.inject(amount),
            None => Err(LedgerError::ConfigInvalid(format!(
                "no ledger for denom {}",
                trellis_core::types::short_id(denom)
            ))),
        }
    }

    pub fn pending_of(&self, participant: &ParticipantId, denom: &AssetId) -> Result<Amount> {
        match self.ledgers.get(denom) {
            Some(ledger) => ledger.pending_of(participant),
            None => Ok(0),
        }
    }

    /// Claims one denomination's banked reward for the participant.
    pub fn claim(&mut self, participant: &ParticipantId, denom: &AssetId) -> Result<Amount> {
        match self.ledgers.get_mut(denom) {
            Some(ledger) => ledger.claim(participant),
            None => Ok(0),
        }
    }

    /// One checkpoint per denomination ledger, in iteration order.
    pub fn checkpoint_all(&self, participant: &ParticipantId) -> Vec<(AssetId, LedgerCheckpoint)> {
        self.ledgers.iter().map(|(denom, l)| (*denom, l.checkpoint(participant))).collect()
    }

    pub fn restore_all(&mut self, checkpoints: Vec<(AssetId, LedgerCheckpoint)>) {
        for (denom, cp) in checkpoints {
            if let Some(ledger) = self.ledgers.get_mut(&denom) {
                ledger.restore(cp);
            }
        }
    }
}

impl Default for LedgerSet {
    fn default() -> Self {
        Self::new()
    }
}
