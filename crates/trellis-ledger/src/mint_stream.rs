//! Block-mint reward stream: an emission schedule folded into a ledger.

use serde::{Deserialize, Serialize};
use tracing::debug;

use trellis_core::types::{Amount, AssetId, BlockNumber, ParticipantId};
use trellis_core::Result;
use trellis_emission::EmissionSchedule;

use crate::reward_ledger::{IdlePolicy, LedgerCheckpoint, ParticipantState, RewardLedger};

/// Continuous protocol-token emission distributed by share weight.
///
/// The stream is lazy: nothing accrues per block. Every state-changing
/// touch first integrates the schedule over `(last_update_block, block]`
/// and injects the result, then moves shares. Blocks that pass while
/// nobody is staked emit into an empty room and are discarded, the same
/// rule the strategy pools use for harvests.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MintStream {
    ledger: RewardLedger,
    schedule: EmissionSchedule,
    last_update_block: BlockNumber,
}

/// Snapshot for all-or-nothing callers: ledger state plus the cursor and
/// schedule in force when it was taken.
#[derive(Clone, Debug)]
pub struct MintStreamCheckpoint {
    ledger: LedgerCheckpoint,
    schedule: EmissionSchedule,
    last_update_block: BlockNumber,
}

impl MintStream {
    pub fn new(denom: AssetId, schedule: EmissionSchedule, start_block: BlockNumber) -> Self {
        Self {
            ledger: RewardLedger::new(denom, IdlePolicy::Discard),
            schedule,
            last_update_block: start_block,
        }
    }

    pub fn denom(&self) -> AssetId {
        self.ledger.denom()
    }

    pub fn schedule(&self) -> &EmissionSchedule {
        &self.schedule
    }

    pub fn last_update_block(&self) -> BlockNumber {
        self.last_update_block
    }

    pub fn total_shares(&self) -> Amount {
        self.ledger.total_shares()
    }

    pub fn shares_of(&self, participant: &ParticipantId) -> Amount {
        self.ledger.shares_of(participant)
    }

    pub fn state_of(&self, participant: &ParticipantId) -> Option<&ParticipantState> {
        self.ledger.state_of(participant)
    }

    pub fn total_minted(&self) -> Amount {
        self.ledger.total_injected()
    }

    pub fn total_discarded(&self) -> Amount {
        self.ledger.total_discarded()
    }

    /// Integrates the schedule up to `block` and folds the result into
    /// the ledger. Returns the freshly minted amount. A stale or repeated
    /// block is a no-op; the cursor never moves backwards.
    pub fn accrue(&mut self, block: BlockNumber) -> Result<Amount> {
        if block <= self.last_update_block {
            return Ok(0);
        }
        let minted = self.schedule.rewards_in_range(self.last_update_block, block)?;
        self.ledger.inject(minted)?;
        debug!(from = self.last_update_block, to = block, minted, "mint stream accrued");
        self.last_update_block = block;
        Ok(minted)
    }

    pub fn deposit(
        &mut self,
        participant: &ParticipantId,
        amount: Amount,
        block: BlockNumber,
    ) -> Result<()> {
        self.accrue(block)?;
        self.ledger.deposit(participant, amount)
    }

    pub fn withdraw(
        &mut self,
        participant: &ParticipantId,
        amount: Amount,
        block: BlockNumber,
    ) -> Result<()> {
        self.accrue(block)?;
        self.ledger.withdraw(participant, amount)
    }

    pub fn claim(&mut self, participant: &ParticipantId, block: BlockNumber) -> Result<Amount> {
        self.accrue(block)?;
        self.ledger.claim(participant)
    }

    /// Pending mint for `participant` as of `block`, without advancing
    /// the cursor. Matches what [`claim`](Self::claim) at the same block
    /// would pay.
    pub fn pending_at(&self, participant: &ParticipantId, block: BlockNumber) -> Result<Amount> {
        let queued = if block > self.last_update_block {
            self.schedule.rewards_in_range(self.last_update_block, block)?
        } else {
            0
        };
        self.ledger.pending_of_with(participant, queued)
    }

    /// Emergency exit without accrual; see [`RewardLedger::forfeit`].
    pub fn forfeit(&mut self, participant: &ParticipantId) -> Amount {
        self.ledger.forfeit(participant)
    }

    /// Swaps the live schedule. Rewards for blocks before `block` are
    /// settled under the outgoing schedule first, so a retune never
    /// rewrites history.
    pub fn set_schedule(&mut self, next: EmissionSchedule, block: BlockNumber) -> Result<()> {
        self.accrue(block)?;
        self.schedule = next;
        Ok(())
    }

    pub fn checkpoint(&self, participant: &ParticipantId) -> MintStreamCheckpoint {
        MintStreamCheckpoint {
            ledger: self.ledger.checkpoint(participant),
            schedule: self.schedule.clone(),
            last_update_block: self.last_update_block,
        }
    }

    pub fn restore(&mut self, checkpoint: MintStreamCheckpoint) {
        self.ledger.restore(checkpoint.ledger);
        self.schedule = checkpoint.schedule;
        self.last_update_block = checkpoint.last_update_block;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: ParticipantId = [1u8; 32];
    const BOB: ParticipantId = [2u8; 32];
    const MINT: AssetId = [7u8; 32];

    fn stream() -> MintStream {
        // 10/block to 100, tapering to 2/block at 200.
        MintStream::new(MINT, EmissionSchedule::new(100, 200, 10, 2).unwrap(), 0)
    }

    #[test]
    fn accrual_distributes_schedule_output_by_share_weight() {
        let mut s = stream();
        s.deposit(&ALICE, 100, 0).unwrap();
        assert_eq!(s.accrue(50).unwrap(), 500);
        assert_eq!(s.pending_at(&ALICE, 50).unwrap(), 500);

        s.deposit(&BOB, 100, 50).unwrap();
        // (50,150] = 50 bootstrap blocks + trapezoid over [100,150].
        assert_eq!(s.accrue(150).unwrap(), 500 + 400);
        assert_eq!(s.pending_at(&ALICE, 150).unwrap(), 950);
        assert_eq!(s.pending_at(&BOB, 150).unwrap(), 450);
    }

    #[test]
    fn pending_view_matches_claim_without_moving_the_cursor() {
        let mut s = stream();
        s.deposit(&ALICE, 10, 0).unwrap();
        let preview = s.pending_at(&ALICE, 30).unwrap();
        assert_eq!(s.last_update_block(), 0);

        let paid = s.claim(&ALICE, 30).unwrap();
        assert_eq!(paid, preview);
        assert_eq!(paid, 300);
        assert_eq!(s.last_update_block(), 30);
    }

    #[test]
    fn stale_blocks_do_not_rewind_the_cursor() {
        let mut s = stream();
        s.deposit(&ALICE, 10, 40).unwrap();
        s.accrue(60).unwrap();
        assert_eq!(s.accrue(60).unwrap(), 0);
        assert_eq!(s.accrue(20).unwrap(), 0);
        assert_eq!(s.last_update_block(), 60);
    }

    #[test]
    fn unstaked_blocks_emit_into_the_void() {
        let mut s = stream();
        // Nobody staked for the first 50 blocks.
        s.accrue(50).unwrap();
        assert_eq!(s.total_discarded(), 500);

        s.deposit(&ALICE, 10, 50).unwrap();
        s.accrue(100).unwrap();
        assert_eq!(s.pending_at(&ALICE, 100).unwrap(), 500);
    }

    #[test]
    fn schedule_swap_settles_old_rates_first() {
        let mut s = stream();
        s.deposit(&ALICE, 10, 0).unwrap();

        let retuned = EmissionSchedule::new(60, 120, 4, 1).unwrap();
        s.set_schedule(retuned, 50).unwrap();
        // Blocks (0,50] stay at the old 10/block.
        assert_eq!(s.pending_at(&ALICE, 50).unwrap(), 500);
        // Blocks (50,60] run at the new bootstrap rate.
        assert_eq!(s.pending_at(&ALICE, 60).unwrap(), 500 + 40);
    }

    #[test]
    fn checkpoint_restores_cursor_and_schedule() {
        let mut s = stream();
        s.deposit(&ALICE, 10, 0).unwrap();
        let cp = s.checkpoint(&ALICE);

        s.set_schedule(EmissionSchedule::new(10, 20, 3, 0).unwrap(), 80).unwrap();
        s.claim(&ALICE, 90).unwrap();
        s.restore(cp);

        assert_eq!(s.last_update_block(), 0);
        assert_eq!(s.schedule().phase1_rate(), 10);
        assert_eq!(s.pending_at(&ALICE, 50).unwrap(), 500);
        assert_eq!(s.total_minted(), 0);
    }
}
