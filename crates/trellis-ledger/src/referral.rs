//! Referral attribution book: giver rewards driven by referee deposits.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use trellis_core::types::{short_id, Amount, AssetId, ParticipantId, StrategyId};
use trellis_core::{LedgerError, Result};

use crate::reward_ledger::{IdlePolicy, LedgerCheckpoint, RewardLedger};

/// Tracks who referred whom and pays givers a share of pool harvests.
///
/// Each strategy pool owns one giver ledger whose *shares* are the amounts
/// the giver's referees currently have deposited there, so a harvest cut
/// injected into the pool's giver ledger splits across givers by how much
/// deposit volume they brought in. The `attributed` map remembers exactly
/// how much of each referee's balance was credited to their giver, so a
/// withdrawal or migration removes precisely that much and never strands
/// giver shares behind a departed referee.
///
/// Giver ledgers park idle injections ([`IdlePolicy::Reserve`]): a harvest
/// cut that arrives before any giver holds shares waits for the first
/// attributed deposit instead of burning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferralBook {
    reward_denom: AssetId,
    /// Referee to giver, set once on first registration.
    referrer_of: HashMap<ParticipantId, ParticipantId>,
    ledgers: HashMap<StrategyId, RewardLedger>,
    /// (pool, referee) to the deposit volume currently credited to the
    /// referee's giver in that pool.
    attributed: HashMap<(StrategyId, ParticipantId), Amount>,
}

/// Snapshot of everything one referee-scoped or giver-scoped operation can
/// touch: the registration entry, one attribution entry, and the giver's
/// ledger entry in one pool.
#[derive(Clone, Debug)]
pub struct ReferralCheckpoint {
    registration: Option<(ParticipantId, Option<ParticipantId>)>,
    attributed: Option<((StrategyId, ParticipantId), Option<Amount>)>,
    ledger: Option<(StrategyId, LedgerCheckpoint)>,
}

impl ReferralBook {
    /// Builds a book with one giver ledger per strategy pool, all paying
    /// rewards in `reward_denom`.
    pub fn new(reward_denom: AssetId) -> Self {
        let ledgers = StrategyId::ALL
            .iter()
            .map(|id| (*id, RewardLedger::new(reward_denom, IdlePolicy::Reserve)))
            .collect();
        Self { reward_denom, referrer_of: HashMap::new(), ledgers, attributed: HashMap::new() }
    }

    pub fn reward_denom(&self) -> AssetId {
        self.reward_denom
    }

    /// The giver registered for `referee`, if any.
    pub fn giver_of(&self, referee: &ParticipantId) -> Option<ParticipantId> {
        self.referrer_of.get(referee).copied()
    }

    pub fn attributed_of(&self, pool: StrategyId, referee: &ParticipantId) -> Amount {
        self.attributed.get(&(pool, *referee)).copied().unwrap_or(0)
    }

    pub fn ledger(&self, pool: StrategyId) -> Option<&RewardLedger> {
        self.ledgers.get(&pool)
    }

    /// Registers `giver` as the referrer of `referee`. The first
    /// registration wins; repeats return `Ok(false)` and keep the original
    /// giver. Self-referral is rejected.
    pub fn register(&mut self, referee: &ParticipantId, giver: &ParticipantId) -> Result<bool> {
        if referee == giver {
            return Err(LedgerError::ConfigInvalid("self-referral is not allowed".into()));
        }
        if self.referrer_of.contains_key(referee) {
            return Ok(false);
        }
        self.referrer_of.insert(*referee, *giver);
        debug!(
            referee = %short_id(referee),
            giver = %short_id(giver),
            "referral registered"
        );
        Ok(true)
    }

    /// Credits `amount` of a referee deposit to their giver's shares in
    /// `pool`. No giver or a zero amount credits nothing.
    pub fn attribute(
        &mut self,
        pool: StrategyId,
        referee: &ParticipantId,
        amount: Amount,
    ) -> Result<Amount> {
        let Some(giver) = self.giver_of(referee) else {
            return Ok(0);
        };
        if amount == 0 {
            return Ok(0);
        }
        self.pool_ledger(pool)?.deposit(&giver, amount)?;
        let slot = self.attributed.entry((pool, *referee)).or_insert(0);
        *slot = slot.checked_add(amount).ok_or(LedgerError::AmountOverflow)?;
        Ok(amount)
    }

    /// Removes giver credit for a referee withdrawal. Only the portion of
    /// `amount` that was ever attributed moves; deposits made before the
    /// referee had a giver carry no credit to unwind.
    pub fn deattribute(
        &mut self,
        pool: StrategyId,
        referee: &ParticipantId,
        amount: Amount,
    ) -> Result<Amount> {
        let Some(giver) = self.giver_of(referee) else {
            return Ok(0);
        };
        let key = (pool, *referee);
        let credited = self.attributed.get(&key).copied().unwrap_or(0);
        let moved = amount.min(credited);
        if moved == 0 {
            return Ok(0);
        }
        self.pool_ledger(pool)?.withdraw(&giver, moved)?;
        if credited == moved {
            self.attributed.remove(&key);
        } else {
            self.attributed.insert(key, credited - moved);
        }
        Ok(moved)
    }

    /// Moves a referee's full attribution between pools when they change
    /// strategy, settling the giver in both ledgers along the way.
    pub fn migrate(
        &mut self,
        referee: &ParticipantId,
        from: StrategyId,
        to: StrategyId,
    ) -> Result<Amount> {
        let Some(giver) = self.giver_of(referee) else {
            return Ok(0);
        };
        let amount = self.attributed.get(&(from, *referee)).copied().unwrap_or(0);
        if amount == 0 {
            return Ok(0);
        }
        self.pool_ledger(from)?.withdraw(&giver, amount)?;
        self.pool_ledger(to)?.deposit(&giver, amount)?;
        self.attributed.remove(&(from, *referee));
        let slot = self.attributed.entry((to, *referee)).or_insert(0);
        *slot = slot.checked_add(amount).ok_or(LedgerError::AmountOverflow)?;
        Ok(amount)
    }

    /// Drops a departing referee's entire attribution in `pool`, settling
    /// the giver first so rewards earned up to now stay theirs. The
    /// registration survives; a returning referee keeps their giver.
    pub fn clear_attribution(
        &mut self,
        pool: StrategyId,
        referee: &ParticipantId,
    ) -> Result<Amount> {
        let Some(giver) = self.giver_of(referee) else {
            return Ok(0);
        };
        let key = (pool, *referee);
        let credited = self.attributed.get(&key).copied().unwrap_or(0);
        if credited == 0 {
            return Ok(0);
        }
        let ledger = self.pool_ledger(pool)?;
        let moved = credited.min(ledger.shares_of(&giver));
        if moved > 0 {
            ledger.withdraw(&giver, moved)?;
        }
        self.attributed.remove(&key);
        Ok(moved)
    }

    /// Injects a harvest's referral cut into `pool`'s giver ledger.
    pub fn inject(&mut self, pool: StrategyId, amount: Amount) -> Result<Amount> {
        self.pool_ledger(pool)?.inject(amount)
    }

    /// Reward owed to `giver` in one pool.
    pub fn pending_of(&self, pool: StrategyId, giver: &ParticipantId) -> Result<Amount> {
        match self.ledgers.get(&pool) {
            Some(ledger) => ledger.pending_of(giver),
            None => Ok(0),
        }
    }

    /// Reward owed to `giver` summed across every pool.
    pub fn pending_total(&self, giver: &ParticipantId) -> Result<Amount> {
        let mut total: Amount = 0;
        for ledger in self.ledgers.values() {
            total = total
                .checked_add(ledger.pending_of(giver)?)
                .ok_or(LedgerError::AmountOverflow)?;
        }
        Ok(total)
    }

    /// Settles and takes the giver's banked reward in one pool.
    pub fn claim(&mut self, pool: StrategyId, giver: &ParticipantId) -> Result<Amount> {
        self.pool_ledger(pool)?.claim(giver)
    }

    /// Snapshot around a referee-scoped mutation (attribute, deattribute,
    /// clear, register). `giver_hint` covers the first-deposit case where
    /// registration itself happens inside the operation being guarded.
    pub fn checkpoint_referee(
        &self,
        pool: StrategyId,
        referee: &ParticipantId,
        giver_hint: Option<&ParticipantId>,
    ) -> ReferralCheckpoint {
        let registered = self.referrer_of.get(referee).copied();
        let giver = registered.or(giver_hint.copied());
        ReferralCheckpoint {
            registration: Some((*referee, registered)),
            attributed: Some(((pool, *referee), self.attributed.get(&(pool, *referee)).copied())),
            ledger: giver
                .and_then(|g| self.ledgers.get(&pool).map(|l| (pool, l.checkpoint(&g)))),
        }
    }

    /// Snapshot around a giver-scoped mutation (claim).
    pub fn checkpoint_giver(&self, pool: StrategyId, giver: &ParticipantId) -> ReferralCheckpoint {
        ReferralCheckpoint {
            registration: None,
            attributed: None,
            ledger: self.ledgers.get(&pool).map(|l| (pool, l.checkpoint(giver))),
        }
    }

    pub fn restore(&mut self, checkpoint: ReferralCheckpoint) {
        if let Some((referee, prior)) = checkpoint.registration {
            match prior {
                Some(giver) => {
                    self.referrer_of.insert(referee, giver);
                }
                None => {
                    self.referrer_of.remove(&referee);
                }
            }
        }
        if let Some((key, prior)) = checkpoint.attributed {
            match prior {
                Some(amount) => {
                    self.attributed.insert(key, amount);
                }
                None => {
                    self.attributed.remove(&key);
                }
            }
        }
        if let Some((pool, cp)) = checkpoint.ledger {
            if let Some(ledger) = self.ledgers.get_mut(&pool) {
                ledger.restore(cp);
            }
        }
    }

    fn pool_ledger(&mut self, pool: StrategyId) -> Result<&mut RewardLedger> {
        self.ledgers.get_mut(&pool).ok_or_else(|| {
            LedgerError::ConfigInvalid(format!("no referral ledger for pool '{pool}'"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFEREE: ParticipantId = [1u8; 32];
    const OTHER: ParticipantId = [2u8; 32];
    const GIVER: ParticipantId = [8u8; 32];
    const TOKEN: AssetId = [9u8; 32];

    fn book() -> ReferralBook {
        ReferralBook::new(TOKEN)
    }

    #[test]
    fn first_registration_wins() {
        let mut b = book();
        assert!(b.register(&REFEREE, &GIVER).unwrap());
        assert!(!b.register(&REFEREE, &OTHER).unwrap());
        assert_eq!(b.giver_of(&REFEREE), Some(GIVER));
    }

    #[test]
    fn self_referral_is_rejected() {
        let mut b = book();
        assert!(matches!(b.register(&REFEREE, &REFEREE), Err(LedgerError::ConfigInvalid(_))));
        assert_eq!(b.giver_of(&REFEREE), None);
    }

    #[test]
    fn attribution_mirrors_referee_deposits_into_giver_shares() {
        let mut b = book();
        b.register(&REFEREE, &GIVER).unwrap();
        assert_eq!(b.attribute(StrategyId::Standard, &REFEREE, 1_000).unwrap(), 1_000);
        assert_eq!(b.attributed_of(StrategyId::Standard, &REFEREE), 1_000);

        let ledger = b.ledger(StrategyId::Standard).unwrap();
        assert_eq!(ledger.shares_of(&GIVER), 1_000);
        // A referee with no giver credits nobody.
        assert_eq!(b.attribute(StrategyId::Standard, &OTHER, 500).unwrap(), 0);
    }

    #[test]
    fn harvest_cut_splits_between_givers_by_attributed_volume() {
        let mut b = book();
        let giver2: ParticipantId = [7u8; 32];
        b.register(&REFEREE, &GIVER).unwrap();
        b.register(&OTHER, &giver2).unwrap();
        b.attribute(StrategyId::Stable, &REFEREE, 300).unwrap();
        b.attribute(StrategyId::Stable, &OTHER, 100).unwrap();

        b.inject(StrategyId::Stable, 400).unwrap();
        assert_eq!(b.pending_of(StrategyId::Stable, &GIVER).unwrap(), 300);
        assert_eq!(b.pending_of(StrategyId::Stable, &giver2).unwrap(), 100);
        assert_eq!(b.claim(StrategyId::Stable, &GIVER).unwrap(), 300);
        assert_eq!(b.pending_of(StrategyId::Stable, &GIVER).unwrap(), 0);
    }

    #[test]
    fn deattribution_moves_only_what_was_credited() {
        let mut b = book();
        b.attribute(StrategyId::Balanced, &REFEREE, 500).unwrap(); // no giver yet
        b.register(&REFEREE, &GIVER).unwrap();
        b.attribute(StrategyId::Balanced, &REFEREE, 200).unwrap();

        // Referee withdraws 600, but only 200 was ever attributed.
        assert_eq!(b.deattribute(StrategyId::Balanced, &REFEREE, 600).unwrap(), 200);
        assert_eq!(b.attributed_of(StrategyId::Balanced, &REFEREE), 0);
        assert_eq!(b.ledger(StrategyId::Balanced).unwrap().shares_of(&GIVER), 0);
    }

    #[test]
    fn cut_before_any_attribution_is_parked_not_burned() {
        let mut b = book();
        assert_eq!(b.inject(StrategyId::Standard, 250).unwrap(), 0);
        assert_eq!(b.ledger(StrategyId::Standard).unwrap().reserved(), 250);

        b.register(&REFEREE, &GIVER).unwrap();
        b.attribute(StrategyId::Standard, &REFEREE, 100).unwrap();
        b.inject(StrategyId::Standard, 50).unwrap();
        assert_eq!(b.pending_of(StrategyId::Standard, &GIVER).unwrap(), 300);
    }

    #[test]
    fn migration_carries_attribution_and_keeps_earned_rewards() {
        let mut b = book();
        b.register(&REFEREE, &GIVER).unwrap();
        b.attribute(StrategyId::Standard, &REFEREE, 400).unwrap();
        b.inject(StrategyId::Standard, 40).unwrap();

        assert_eq!(b.migrate(&REFEREE, StrategyId::Standard, StrategyId::Stable).unwrap(), 400);
        assert_eq!(b.attributed_of(StrategyId::Standard, &REFEREE), 0);
        assert_eq!(b.attributed_of(StrategyId::Stable, &REFEREE), 400);
        // Settled on the way out of the old pool.
        assert_eq!(b.pending_of(StrategyId::Standard, &GIVER).unwrap(), 40);
        assert_eq!(b.ledger(StrategyId::Stable).unwrap().shares_of(&GIVER), 400);
    }

    #[test]
    fn clearing_attribution_keeps_registration_and_giver_rewards() {
        let mut b = book();
        b.register(&REFEREE, &GIVER).unwrap();
        b.attribute(StrategyId::Balanced, &REFEREE, 800).unwrap();
        b.inject(StrategyId::Balanced, 80).unwrap();

        assert_eq!(b.clear_attribution(StrategyId::Balanced, &REFEREE).unwrap(), 800);
        assert_eq!(b.attributed_of(StrategyId::Balanced, &REFEREE), 0);
        assert_eq!(b.pending_of(StrategyId::Balanced, &GIVER).unwrap(), 80);
        assert_eq!(b.giver_of(&REFEREE), Some(GIVER));
        // Clearing again is a no-op.
        assert_eq!(b.clear_attribution(StrategyId::Balanced, &REFEREE).unwrap(), 0);
    }

    #[test]
    fn pending_total_sums_across_pools() {
        let mut b = book();
        b.register(&REFEREE, &GIVER).unwrap();
        b.attribute(StrategyId::Standard, &REFEREE, 100).unwrap();
        b.attribute(StrategyId::Stable, &REFEREE, 100).unwrap();
        b.inject(StrategyId::Standard, 30).unwrap();
        b.inject(StrategyId::Stable, 12).unwrap();
        assert_eq!(b.pending_total(&GIVER).unwrap(), 42);
    }

    #[test]
    fn referee_checkpoint_unwinds_first_deposit_registration() {
        let mut b = book();
        let cp = b.checkpoint_referee(StrategyId::Standard, &REFEREE, Some(&GIVER));

        b.register(&REFEREE, &GIVER).unwrap();
        b.attribute(StrategyId::Standard, &REFEREE, 700).unwrap();
        b.restore(cp);

        assert_eq!(b.giver_of(&REFEREE), None);
        assert_eq!(b.attributed_of(StrategyId::Standard, &REFEREE), 0);
        assert_eq!(b.ledger(StrategyId::Standard).unwrap().shares_of(&GIVER), 0);
        assert_eq!(b.ledger(StrategyId::Standard).unwrap().total_shares(), 0);
    }

    #[test]
    fn giver_checkpoint_unwinds_a_claim() {
        let mut b = book();
        b.register(&REFEREE, &GIVER).unwrap();
        b.attribute(StrategyId::Stable, &REFEREE, 100).unwrap();
        b.inject(StrategyId::Stable, 60).unwrap();

        let cp = b.checkpoint_giver(StrategyId::Stable, &GIVER);
        assert_eq!(b.claim(StrategyId::Stable, &GIVER).unwrap(), 60);
        b.restore(cp);
        assert_eq!(b.pending_of(StrategyId::Stable, &GIVER).unwrap(), 60);
        assert_eq!(b.ledger(StrategyId::Stable).unwrap().total_claimed(), 0);
    }
}
