//! # Strategy Router
//!
//! The participant-facing surface of Trellis. One router owns three
//! strategy pools, the platform mint stream, the referral book, and the
//! circuit breaker; one session lock serializes every mutation across all
//! of them.
//!
//! ## Operation shape
//!
//! Every state-changing entry point runs the same gauntlet, checked once
//! at entry: acquire the session lock (a held lock fails fast with
//! `ReentrantCall`), pass the breaker, pass the caller's deadline, then
//! validate the operation itself. Mutations are all-or-nothing: internal
//! books are snapshotted first and restored on any failure, and transfers
//! out to a participant are ordered as the last side effect so no caller
//! can observe (or reenter) a half-updated ledger.
//!
//! Multi-leg payouts are the one place rollback is partial: a token that
//! already left the treasury cannot be taken back, so a failed leg
//! restores the books and then re-claims exactly the delivered legs.
//! The failed leg and everything after it stay pending; a retry pays
//! only what is still owed.
//!
//! ## Strategy accrual profiles
//!
//! | Strategy | Compounds | Pays out |
//! |----------|-----------|----------|
//! | standard | half of harvest, as shares | half, in the reward token |
//! | balanced | entire harvest | — |
//! | stable   | — | entire harvest |
//!
//! Whether a denomination compounds or pays out is pool configuration
//! ([`AccrualPolicy`]), not separate code paths: compounding claims the
//! share-denominated pending and re-deposits it as principal at the
//! participant's next settlement touch, so a migration always reads
//! "shares inclusive of reinvested auto-compounding".

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use trellis_core::scale::bps_of;
use trellis_core::types::{
    short_id, Amount, AssetId, BlockNumber, ParticipantId, Role, StrategyId,
};
use trellis_core::{LedgerError, OpContext, Result};
use trellis_emission::EmissionSchedule;
use trellis_ledger::reward_ledger::LedgerCheckpoint;
use trellis_ledger::{
    IdlePolicy, LedgerSet, MintStream, MintStreamCheckpoint, ReferralBook, ReferralCheckpoint,
};

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::collaborators::{ExternalFarm, FungibleAsset, RoleGate, SwapVenue};
use crate::config::{AccrualPolicy, RouterConfig, StrategyConfig};
use crate::events::{EventLog, EventRecord, RouterEvent};
use crate::slippage::{check_slippage, min_out, SlippageCheck};

/// Placeholder identity for checkpoints that only need ledger scalars.
const NOBODY: ParticipantId = [0u8; 32];

/// One strategy's pool: its live configuration and the share-mirrored
/// denomination ledgers.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct StrategyPool {
    config: StrategyConfig,
    ledgers: LedgerSet,
}

impl StrategyPool {
    fn new(config: StrategyConfig) -> Self {
        let mut ledgers = LedgerSet::new();
        for dc in &config.denoms {
            ledgers.add_denom(dc.denom, IdlePolicy::Discard);
        }
        Self { config, ledgers }
    }

    fn denoms_with_policy(&self, policy: AccrualPolicy) -> Vec<AssetId> {
        self.config.denoms.iter().filter(|d| d.policy == policy).map(|d| d.denom).collect()
    }
}

/// Aggregated position of one participant across every ledger that knows
/// them, as of a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub participant: ParticipantId,
    pub strategy: Option<StrategyId>,
    /// Principal shares, inclusive of compounding already settled.
    pub shares: Amount,
    /// Share-denominated rewards not yet folded into principal.
    pub compound_pending: Amount,
    /// Claimable payout rewards per denomination.
    pub payouts: Vec<(AssetId, Amount)>,
    pub mint_pending: Amount,
    /// Claimable referral rewards as a giver, across all pools.
    pub referral_pending: Amount,
}

/// Audit counters for one denomination ledger of a pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenomTotals {
    pub denom: AssetId,
    pub policy: AccrualPolicy,
    pub total_injected: Amount,
    pub total_claimed: Amount,
    pub total_discarded: Amount,
    pub reserved: Amount,
}

/// Pool-level totals for audits and conservation tests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTotals {
    pub strategy: StrategyId,
    pub farm_pool_id: u64,
    pub total_shares: Amount,
    pub denoms: Vec<DenomTotals>,
}

/// What one harvest did with the rewards it pulled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestOutcome {
    pub strategy: StrategyId,
    /// Reward tokens pulled out of the farm, measured by balance delta.
    pub gross: Amount,
    pub referral_cut: Amount,
    /// Share units restaked on behalf of the pool.
    pub compounded: Amount,
    /// Amount injected per denomination ledger, post-conversion.
    pub injected: Vec<(AssetId, Amount)>,
}

/// Everything behind the session lock.
struct RouterState {
    pools: IndexMap<StrategyId, StrategyPool>,
    assignments: HashMap<ParticipantId, StrategyId>,
    mint: MintStream,
    referrals: ReferralBook,
    breaker: CircuitBreaker,
    events: EventLog,
}

/// O(1) snapshot of every book an operation may touch. External calls are
/// compensated inline by the operation; this covers the internal state.
struct OpCheckpoint {
    pools: Vec<(StrategyId, Vec<(AssetId, LedgerCheckpoint)>)>,
    mint: MintStreamCheckpoint,
    referrals: Vec<ReferralCheckpoint>,
    assignment: (ParticipantId, Option<StrategyId>),
}

impl RouterState {
    fn pool(&self, strategy: StrategyId) -> Result<&StrategyPool> {
        self.pools
            .get(&strategy)
            .ok_or_else(|| LedgerError::ConfigInvalid(format!("no pool for strategy '{strategy}'")))
    }

    fn pool_mut(&mut self, strategy: StrategyId) -> Result<&mut StrategyPool> {
        self.pools
            .get_mut(&strategy)
            .ok_or_else(|| LedgerError::ConfigInvalid(format!("no pool for strategy '{strategy}'")))
    }

    /// Folds the participant's compound-policy pendings into principal:
    /// claim the share-denominated reward and re-deposit it, mirrored
    /// into the mint stream. Returns the amount folded.
    fn compound_settle(
        &mut self,
        participant: &ParticipantId,
        strategy: StrategyId,
        block: BlockNumber,
    ) -> Result<Amount> {
        let denoms = self.pool(strategy)?.denoms_with_policy(AccrualPolicy::Compound);
        let mut compounded: Amount = 0;
        for denom in denoms {
            let claimed = self.pool_mut(strategy)?.ledgers.claim(participant, &denom)?;
            compounded = compounded.checked_add(claimed).ok_or(LedgerError::AmountOverflow)?;
        }
        if compounded > 0 {
            self.pool_mut(strategy)?.ledgers.deposit_all(participant, compounded)?;
            self.mint.deposit(participant, compounded, block)?;
            debug!(
                participant = %short_id(participant),
                %strategy,
                compounded,
                "compound rewards folded into principal"
            );
        }
        Ok(compounded)
    }

    /// Books phase of a claim: fold compounding, then take every
    /// payout-policy denomination and the mint pending. No tokens move.
    fn claim_books(
        &mut self,
        participant: &ParticipantId,
        strategy: StrategyId,
        block: BlockNumber,
    ) -> Result<(Vec<(AssetId, Amount)>, Amount)> {
        self.compound_settle(participant, strategy, block)?;
        let mut payouts: Vec<(AssetId, Amount)> = Vec::new();
        for denom in self.pool(strategy)?.denoms_with_policy(AccrualPolicy::Payout) {
            let amount = self.pool_mut(strategy)?.ledgers.claim(participant, &denom)?;
            if amount > 0 {
                payouts.push((denom, amount));
            }
        }
        let minted = self.mint.claim(participant, block)?;
        Ok((payouts, minted))
    }

    /// Books phase of a migration: settle everything the old pool owes
    /// and move the full principal between the books. Returns the moved
    /// principal and the old pool's payouts, which the external phase
    /// delivers.
    fn migrate_books(
        &mut self,
        participant: &ParticipantId,
        old: StrategyId,
        new: StrategyId,
        block: BlockNumber,
    ) -> Result<(Amount, Vec<(AssetId, Amount)>)> {
        // 1. Settle everything the old pool owes: compounding into
        //    principal, payouts collected for delivery at the end.
        self.compound_settle(participant, old, block)?;
        let mut payouts: Vec<(AssetId, Amount)> = Vec::new();
        for denom in self.pool(old)?.denoms_with_policy(AccrualPolicy::Payout) {
            let amount = self.pool_mut(old)?.ledgers.claim(participant, &denom)?;
            if amount > 0 {
                payouts.push((denom, amount));
            }
        }

        // 2-4. Move the full principal between the books.
        let principal = self.pool(old)?.ledgers.shares_of(participant);
        if principal > 0 {
            self.pool_mut(old)?.ledgers.withdraw_all(participant, principal)?;
            self.pool_mut(new)?.ledgers.deposit_all(participant, principal)?;
        }
        self.referrals.migrate(participant, old, new)?;

        // 5. Retag before external effects; a failure there restores it.
        self.assignments.insert(*participant, new);
        Ok((principal, payouts))
    }

    /// Re-claims payout legs whose tokens already left the treasury,
    /// after a rollback re-banked them. Nothing moved between the
    /// snapshot and the rollback, so each claim yields exactly the
    /// delivered amount.
    fn recommit_payouts(
        &mut self,
        participant: &ParticipantId,
        strategy: StrategyId,
        delivered: &[(AssetId, Amount)],
    ) {
        for (denom, amount) in delivered {
            match self.pool_mut(strategy).and_then(|p| p.ledgers.claim(participant, denom)) {
                Ok(claimed) => debug_assert_eq!(claimed, *amount),
                Err(err) => warn!(
                    error = %err,
                    amount = *amount,
                    "re-claiming a delivered payout failed; claimed totals under-count it"
                ),
            }
        }
    }

    fn checkpoint_participant(
        &self,
        participant: &ParticipantId,
        strategy: StrategyId,
        giver_hint: Option<&ParticipantId>,
    ) -> Result<OpCheckpoint> {
        Ok(OpCheckpoint {
            pools: vec![(strategy, self.pool(strategy)?.ledgers.checkpoint_all(participant))],
            mint: self.mint.checkpoint(participant),
            referrals: vec![self.referrals.checkpoint_referee(strategy, participant, giver_hint)],
            assignment: (*participant, self.assignments.get(participant).copied()),
        })
    }

    fn checkpoint_migration(
        &self,
        participant: &ParticipantId,
        old: StrategyId,
        new: StrategyId,
    ) -> Result<OpCheckpoint> {
        Ok(OpCheckpoint {
            pools: vec![
                (old, self.pool(old)?.ledgers.checkpoint_all(participant)),
                (new, self.pool(new)?.ledgers.checkpoint_all(participant)),
            ],
            mint: self.mint.checkpoint(participant),
            referrals: vec![
                self.referrals.checkpoint_referee(old, participant, None),
                self.referrals.checkpoint_referee(new, participant, None),
            ],
            assignment: (*participant, self.assignments.get(participant).copied()),
        })
    }

    /// Scalar-only snapshot for operations that touch no participant
    /// entry (harvest).
    fn checkpoint_scalars(&self, strategy: StrategyId) -> Result<OpCheckpoint> {
        Ok(OpCheckpoint {
            pools: vec![(strategy, self.pool(strategy)?.ledgers.checkpoint_all(&NOBODY))],
            mint: self.mint.checkpoint(&NOBODY),
            referrals: vec![self.referrals.checkpoint_giver(strategy, &NOBODY)],
            assignment: (NOBODY, self.assignments.get(&NOBODY).copied()),
        })
    }

    fn checkpoint_giver(&self, giver: &ParticipantId) -> OpCheckpoint {
        OpCheckpoint {
            pools: Vec::new(),
            mint: self.mint.checkpoint(giver),
            referrals: StrategyId::ALL
                .iter()
                .map(|s| self.referrals.checkpoint_giver(*s, giver))
                .collect(),
            assignment: (*giver, self.assignments.get(giver).copied()),
        }
    }

    fn restore(&mut self, checkpoint: OpCheckpoint) {
        for (strategy, cps) in checkpoint.pools {
            if let Some(pool) = self.pools.get_mut(&strategy) {
                pool.ledgers.restore_all(cps);
            }
        }
        self.mint.restore(checkpoint.mint);
        for rcp in checkpoint.referrals {
            self.referrals.restore(rcp);
        }
        let (participant, prior) = checkpoint.assignment;
        match prior {
            Some(strategy) => {
                self.assignments.insert(participant, strategy);
            }
            None => {
                self.assignments.remove(&participant);
            }
        }
    }
}

/// The multi-strategy yield router.
pub struct StrategyRouter {
    config: RouterConfig,
    assets: Arc<dyn FungibleAsset>,
    venue: Arc<dyn SwapVenue>,
    farm: Arc<dyn ExternalFarm>,
    roles: Arc<dyn RoleGate>,
    state: Mutex<RouterState>,
}

impl StrategyRouter {
    /// Builds a router from validated configuration and its collaborator
    /// handles. Live pool parameters afterwards belong to the pools (see
    /// [`set_pool_params`](Self::set_pool_params)); `config` keeps the
    /// immutable wiring.
    pub fn new(
        config: RouterConfig,
        assets: Arc<dyn FungibleAsset>,
        venue: Arc<dyn SwapVenue>,
        farm: Arc<dyn ExternalFarm>,
        roles: Arc<dyn RoleGate>,
    ) -> Result<Self> {
        config.validate()?;
        let pools: IndexMap<StrategyId, StrategyPool> = config
            .strategies
            .iter()
            .map(|sc| (sc.strategy, StrategyPool::new(sc.clone())))
            .collect();
        let state = RouterState {
            pools,
            assignments: HashMap::new(),
            mint: MintStream::new(
                config.mint_asset,
                config.mint_schedule.clone(),
                config.start_block,
            ),
            referrals: ReferralBook::new(config.reward_asset),
            breaker: CircuitBreaker::new(),
            events: EventLog::new(config.event_capacity),
        };
        Ok(Self { config, assets, venue, farm, roles, state: Mutex::new(state) })
    }

    // === Entry gates ===

    /// The session lock. A lock already held — by a nested call from a
    /// collaborator or by a concurrent caller — fails fast instead of
    /// letting anyone observe mid-operation state.
    fn session(&self) -> Result<MutexGuard<'_, RouterState>> {
        self.state.try_lock().ok_or(LedgerError::ReentrantCall)
    }

    fn ensure_fresh(ctx: &OpContext, deadline: i64) -> Result<()> {
        if ctx.now > deadline {
            return Err(LedgerError::Expired { deadline, now: ctx.now });
        }
        Ok(())
    }

    fn require_role(&self, role: Role, caller: &ParticipantId) -> Result<()> {
        if !self.roles.has_role(role, caller) {
            return Err(LedgerError::Unauthorized(role));
        }
        Ok(())
    }

    // === Participant operations ===

    /// Deposits `amount` share units into `strategy` for `participant`.
    ///
    /// The first deposit enrolls the participant (and may register a
    /// referral giver); later deposits must name their current strategy.
    /// Shares are pulled in via `transfer_from`, so the participant must
    /// have approved the treasury beforehand.
    pub fn deposit(
        &self,
        participant: &ParticipantId,
        strategy: StrategyId,
        amount: Amount,
        referrer: Option<ParticipantId>,
        ctx: OpContext,
        deadline: i64,
    ) -> Result<()> {
        let mut st = self.session()?;
        st.breaker.ensure_operational()?;
        Self::ensure_fresh(&ctx, deadline)?;
        if amount == 0 {
            return Err(LedgerError::NoOp);
        }
        if let Some(current) = st.assignments.get(participant).copied() {
            if current != strategy {
                return Err(LedgerError::StrategyMismatch { current, requested: strategy });
            }
        }
        st.mint.accrue(ctx.block)?;

        let cp = st.checkpoint_participant(participant, strategy, referrer.as_ref())?;
        let registered =
            match self.deposit_flow(&mut st, participant, strategy, amount, referrer, ctx.block) {
                Ok(registered) => registered,
                Err(err) => {
                    st.restore(cp);
                    return Err(err);
                }
            };

        st.assignments.insert(*participant, strategy);
        if registered {
            if let Some(giver) = st.referrals.giver_of(participant) {
                st.events.record(
                    ctx.block,
                    ctx.now,
                    RouterEvent::ReferralRegistered { referee: *participant, giver },
                );
            }
        }
        st.events.record(
            ctx.block,
            ctx.now,
            RouterEvent::Deposited { participant: *participant, strategy, amount },
        );
        debug!(participant = %short_id(participant), %strategy, amount, "deposit booked");
        Ok(())
    }

    fn deposit_flow(
        &self,
        st: &mut RouterState,
        participant: &ParticipantId,
        strategy: StrategyId,
        amount: Amount,
        referrer: Option<ParticipantId>,
        block: BlockNumber,
    ) -> Result<bool> {
        // Internal books first; the caller restores them on any failure.
        st.compound_settle(participant, strategy, block)?;
        let mut registered = false;
        if !st.assignments.contains_key(participant) {
            if let Some(giver) = referrer {
                registered = st.referrals.register(participant, &giver)?;
            }
        }
        st.pool_mut(strategy)?.ledgers.deposit_all(participant, amount)?;
        st.mint.deposit(participant, amount, block)?;
        st.referrals.attribute(strategy, participant, amount)?;

        // External effects after the books balance.
        let treasury = &self.config.treasury;
        if !self.assets.transfer_from(
            &self.config.share_asset,
            treasury,
            participant,
            treasury,
            amount,
        ) {
            return Err(LedgerError::TransferFailed(
                "share transfer from participant was rejected".into(),
            ));
        }
        let pool_id = st.pool(strategy)?.config.farm_pool_id;
        if !self.farm.deposit(pool_id, amount) {
            // Hand the pulled shares back before unwinding the books.
            if !self.assets.transfer(&self.config.share_asset, treasury, participant, amount) {
                warn!(
                    participant = %short_id(participant),
                    amount,
                    "refund after farm rejection failed; shares parked in treasury"
                );
            }
            return Err(LedgerError::TransferFailed("farm rejected principal stake".into()));
        }
        Ok(registered)
    }

    /// Withdraws `amount` share units of principal (inclusive of settled
    /// compounding) back to the participant.
    pub fn withdraw(
        &self,
        participant: &ParticipantId,
        amount: Amount,
        ctx: OpContext,
        deadline: i64,
    ) -> Result<()> {
        let mut st = self.session()?;
        st.breaker.ensure_operational()?;
        Self::ensure_fresh(&ctx, deadline)?;
        if amount == 0 {
            return Err(LedgerError::NoOp);
        }
        let strategy = st.assignments.get(participant).copied().ok_or(LedgerError::NotEnrolled)?;
        st.mint.accrue(ctx.block)?;

        let cp = st.checkpoint_participant(participant, strategy, None)?;
        if let Err(err) = self.withdraw_flow(&mut st, participant, strategy, amount, ctx.block) {
            st.restore(cp);
            return Err(err);
        }

        st.events.record(
            ctx.block,
            ctx.now,
            RouterEvent::Withdrawn { participant: *participant, strategy, amount },
        );
        debug!(participant = %short_id(participant), %strategy, amount, "withdrawal booked");
        Ok(())
    }

    fn withdraw_flow(
        &self,
        st: &mut RouterState,
        participant: &ParticipantId,
        strategy: StrategyId,
        amount: Amount,
        block: BlockNumber,
    ) -> Result<()> {
        st.compound_settle(participant, strategy, block)?;
        let available = st.pool(strategy)?.ledgers.shares_of(participant);
        if amount > available {
            return Err(LedgerError::InsufficientShares { requested: amount, available });
        }
        st.pool_mut(strategy)?.ledgers.withdraw_all(participant, amount)?;
        st.mint.withdraw(participant, amount, block)?;
        st.referrals.deattribute(strategy, participant, amount)?;

        let pool_id = st.pool(strategy)?.config.farm_pool_id;
        if !self.farm.withdraw(pool_id, amount) {
            return Err(LedgerError::TransferFailed("farm rejected principal unstake".into()));
        }
        // Principal back to the participant is the last side effect.
        if !self.assets.transfer(&self.config.share_asset, &self.config.treasury, participant, amount)
        {
            if !self.farm.deposit(pool_id, amount) {
                warn!(amount, "restake after failed payout also failed; shares parked in treasury");
            }
            return Err(LedgerError::TransferFailed(
                "share payout to participant was rejected".into(),
            ));
        }
        Ok(())
    }

    /// Pays out every claimable reward: payout-policy denominations plus
    /// the participant's platform mint. Returns what was paid, per asset.
    pub fn claim(
        &self,
        participant: &ParticipantId,
        ctx: OpContext,
        deadline: i64,
    ) -> Result<Vec<(AssetId, Amount)>> {
        let mut st = self.session()?;
        st.breaker.ensure_operational()?;
        Self::ensure_fresh(&ctx, deadline)?;
        let strategy = st.assignments.get(participant).copied().ok_or(LedgerError::NotEnrolled)?;
        st.mint.accrue(ctx.block)?;

        let cp = st.checkpoint_participant(participant, strategy, None)?;
        let (pool_payouts, minted) = match st.claim_books(participant, strategy, ctx.block) {
            Ok(booked) => booked,
            Err(err) => {
                st.restore(cp);
                return Err(err);
            }
        };
        if pool_payouts.is_empty() && minted == 0 {
            // Nothing owed; undo the settle stamps so the call truly
            // changed nothing.
            st.restore(cp);
            return Err(LedgerError::NoOp);
        }
        self.deliver_claim(&mut st, participant, strategy, &pool_payouts, minted, cp)?;

        let mut payouts = pool_payouts;
        if minted > 0 {
            payouts.push((self.config.mint_asset, minted));
        }
        st.events.record(
            ctx.block,
            ctx.now,
            RouterEvent::Claimed { participant: *participant, strategy, payouts: payouts.clone() },
        );
        debug!(participant = %short_id(participant), %strategy, assets = payouts.len(), "rewards claimed");
        Ok(payouts)
    }

    /// Transfer phase of a claim, ordered after every book is settled.
    ///
    /// A failed leg cannot take back tokens that already left the
    /// treasury, so the rollback is partial: restore the books, then
    /// re-claim exactly the delivered legs against the restored state.
    /// The failed leg and everything after it stay pending.
    fn deliver_claim(
        &self,
        st: &mut RouterState,
        participant: &ParticipantId,
        strategy: StrategyId,
        pool_payouts: &[(AssetId, Amount)],
        minted: Amount,
        cp: OpCheckpoint,
    ) -> Result<()> {
        let treasury = &self.config.treasury;
        for (delivered, (denom, amount)) in pool_payouts.iter().enumerate() {
            if !self.assets.transfer(denom, treasury, participant, *amount) {
                st.restore(cp);
                st.recommit_payouts(participant, strategy, &pool_payouts[..delivered]);
                if delivered > 0 {
                    warn!(
                        participant = %short_id(participant),
                        delivered,
                        "claim interrupted midway; delivered legs stay claimed"
                    );
                }
                return Err(LedgerError::TransferFailed(
                    "reward payout transfer was rejected".into(),
                ));
            }
        }
        if minted > 0
            && !self.assets.transfer(&self.config.mint_asset, treasury, participant, minted)
        {
            st.restore(cp);
            st.recommit_payouts(participant, strategy, pool_payouts);
            if !pool_payouts.is_empty() {
                warn!(
                    participant = %short_id(participant),
                    delivered = pool_payouts.len(),
                    "mint payout rejected; delivered legs stay claimed"
                );
            }
            return Err(LedgerError::TransferFailed("mint payout transfer was rejected".into()));
        }
        Ok(())
    }

    /// Pays out a giver's accumulated referral rewards across all pools.
    pub fn claim_referral(
        &self,
        giver: &ParticipantId,
        ctx: OpContext,
        deadline: i64,
    ) -> Result<Amount> {
        let mut st = self.session()?;
        st.breaker.ensure_operational()?;
        Self::ensure_fresh(&ctx, deadline)?;

        let cp = st.checkpoint_giver(giver);
        let total = match Self::claim_referral_flow(&mut st, giver) {
            Ok(total) => total,
            Err(err) => {
                st.restore(cp);
                return Err(err);
            }
        };
        if total == 0 {
            st.restore(cp);
            return Err(LedgerError::NoOp);
        }
        if !self.assets.transfer(&self.config.reward_asset, &self.config.treasury, giver, total) {
            st.restore(cp);
            return Err(LedgerError::TransferFailed(
                "referral payout transfer was rejected".into(),
            ));
        }

        st.events
            .record(ctx.block, ctx.now, RouterEvent::ReferralClaimed { giver: *giver, amount: total });
        debug!(giver = %short_id(giver), total, "referral rewards claimed");
        Ok(total)
    }

    fn claim_referral_flow(st: &mut RouterState, giver: &ParticipantId) -> Result<Amount> {
        let mut total: Amount = 0;
        for strategy in StrategyId::ALL {
            let claimed = st.referrals.claim(strategy, giver)?;
            total = total.checked_add(claimed).ok_or(LedgerError::AmountOverflow)?;
        }
        Ok(total)
    }

    /// Moves the participant's entire position to a different strategy:
    /// settle and claim the old pool's payouts, fold its compounding into
    /// principal, move the principal (ledgers and farm stake), carry the
    /// referral attribution, and retag. A failure unwinds the move;
    /// payout legs already delivered stay claimed against the old pool.
    ///
    /// The mint stream is untouched: its shares mirror total principal,
    /// which the move conserves.
    pub fn change_strategy(
        &self,
        participant: &ParticipantId,
        new_strategy: StrategyId,
        ctx: OpContext,
        deadline: i64,
    ) -> Result<Amount> {
        let mut st = self.session()?;
        st.breaker.ensure_operational()?;
        Self::ensure_fresh(&ctx, deadline)?;
        let current = st.assignments.get(participant).copied().ok_or(LedgerError::NotEnrolled)?;
        if current == new_strategy {
            return Err(LedgerError::NoOp);
        }
        st.mint.accrue(ctx.block)?;
        let old_pool_id = st.pool(current)?.config.farm_pool_id;
        let new_pool_id = st.pool(new_strategy)?.config.farm_pool_id;

        let cp = st.checkpoint_migration(participant, current, new_strategy)?;
        let (principal, payouts) =
            match st.migrate_books(participant, current, new_strategy, ctx.block) {
                Ok(moved) => moved,
                Err(err) => {
                    st.restore(cp);
                    return Err(err);
                }
            };
        self.migrate_external(
            &mut st,
            participant,
            current,
            (old_pool_id, new_pool_id),
            principal,
            &payouts,
            cp,
        )?;

        st.events.record(
            ctx.block,
            ctx.now,
            RouterEvent::StrategyChanged {
                participant: *participant,
                from: current,
                to: new_strategy,
                principal,
            },
        );
        info!(
            participant = %short_id(participant),
            from = %current,
            to = %new_strategy,
            principal,
            "strategy changed"
        );
        Ok(principal)
    }

    /// External phase of a migration: move the farm stake, then deliver
    /// the old pool's payouts last. Any failure unwinds the move, but a
    /// payout leg that already reached the participant stays claimed
    /// against the old pool, the same rule `deliver_claim` applies.
    fn migrate_external(
        &self,
        st: &mut RouterState,
        participant: &ParticipantId,
        old: StrategyId,
        pool_ids: (u64, u64),
        principal: Amount,
        payouts: &[(AssetId, Amount)],
        cp: OpCheckpoint,
    ) -> Result<()> {
        let (old_pool_id, new_pool_id) = pool_ids;
        if principal > 0 {
            if !self.farm.withdraw(old_pool_id, principal) {
                st.restore(cp);
                return Err(LedgerError::TransferFailed(
                    "farm rejected unstake from the old pool".into(),
                ));
            }
            if !self.farm.deposit(new_pool_id, principal) {
                if !self.farm.deposit(old_pool_id, principal) {
                    warn!(principal, "restake into the old pool failed; shares parked in treasury");
                }
                st.restore(cp);
                return Err(LedgerError::TransferFailed(
                    "farm rejected stake into the new pool".into(),
                ));
            }
        }

        // Deliver the old pool's payouts last.
        for (delivered, (denom, amount)) in payouts.iter().enumerate() {
            if !self.assets.transfer(denom, &self.config.treasury, participant, *amount) {
                if principal > 0
                    && !(self.farm.withdraw(new_pool_id, principal)
                        && self.farm.deposit(old_pool_id, principal))
                {
                    warn!(principal, "farm compensation after failed payout did not complete");
                }
                st.restore(cp);
                st.recommit_payouts(participant, old, &payouts[..delivered]);
                if delivered > 0 {
                    warn!(delivered, "migration payouts interrupted midway; delivered legs stay claimed");
                }
                return Err(LedgerError::TransferFailed(
                    "reward payout transfer was rejected".into(),
                ));
            }
        }
        Ok(())
    }

    /// Reduced-functionality recovery path: returns the participant's
    /// recorded principal and abandons every pending reward, without
    /// settling, claiming, or touching the swap venue.
    ///
    /// Deliberately not gated by the circuit breaker, the pause switch,
    /// or a deadline — this is the path that stays open in an emergency.
    pub fn withdraw_principal_only(
        &self,
        participant: &ParticipantId,
        ctx: OpContext,
    ) -> Result<Amount> {
        let mut st = self.session()?;
        let strategy = st.assignments.get(participant).copied().ok_or(LedgerError::NotEnrolled)?;

        let cp = st.checkpoint_participant(participant, strategy, None)?;
        let principal = match self.recover_flow(&mut st, participant, strategy) {
            Ok(principal) => principal,
            Err(err) => {
                st.restore(cp);
                return Err(err);
            }
        };

        st.assignments.remove(participant);
        st.events.record(
            ctx.block,
            ctx.now,
            RouterEvent::EmergencyWithdrawal { participant: *participant, strategy, principal },
        );
        info!(
            participant = %short_id(participant),
            %strategy,
            principal,
            "principal-only withdrawal completed"
        );
        Ok(principal)
    }

    fn recover_flow(
        &self,
        st: &mut RouterState,
        participant: &ParticipantId,
        strategy: StrategyId,
    ) -> Result<Amount> {
        // Forfeit, not settle: pending rewards are abandoned here.
        let principal = st.pool_mut(strategy)?.ledgers.forfeit_all(participant);
        st.mint.forfeit(participant);
        st.referrals.clear_attribution(strategy, participant)?;
        if principal == 0 {
            return Ok(0);
        }
        let pool_id = st.pool(strategy)?.config.farm_pool_id;
        if !self.farm.withdraw(pool_id, principal) {
            return Err(LedgerError::TransferFailed("farm rejected emergency unstake".into()));
        }
        if !self.assets.transfer(
            &self.config.share_asset,
            &self.config.treasury,
            participant,
            principal,
        ) {
            if !self.farm.deposit(pool_id, principal) {
                warn!(principal, "restake after failed recovery payout failed; shares parked in treasury");
            }
            return Err(LedgerError::TransferFailed(
                "principal payout to participant was rejected".into(),
            ));
        }
        Ok(principal)
    }

    // === Keeper operations ===

    /// Pulls accumulated farm rewards for one strategy and distributes
    /// them: referral cut to the givers, then the configured split across
    /// denominations — payout slices injected as-is, compound slices
    /// converted to share units, restaked, and injected.
    ///
    /// Permissionless; anyone may pay the gas to turn the crank.
    pub fn harvest(&self, strategy: StrategyId, ctx: OpContext) -> Result<HarvestOutcome> {
        let mut st = self.session()?;
        st.breaker.ensure_operational()?;
        st.mint.accrue(ctx.block)?;
        let (pool_id, referral_bps, slippage_bps, denom_cfgs) = {
            let pool = st.pool(strategy)?;
            (
                pool.config.farm_pool_id,
                pool.config.referral_bps,
                pool.config.slippage_bps,
                pool.config.denoms.clone(),
            )
        };

        // Poke the farm and measure what actually arrived.
        let treasury = &self.config.treasury;
        let expected = self.farm.pending_reward(pool_id, treasury);
        let before = self.assets.balance_of(&self.config.reward_asset, treasury);
        if !self.farm.withdraw(pool_id, 0) {
            return Err(LedgerError::TransferFailed("farm rejected harvest poke".into()));
        }
        let after = self.assets.balance_of(&self.config.reward_asset, treasury);
        let Some(gross) = after.checked_sub(before) else {
            return Err(LedgerError::TransferFailed(
                "farm poke decreased the treasury balance".into(),
            ));
        };
        debug!(%strategy, expected, gross, "farm rewards pulled");
        if gross == 0 {
            return Err(LedgerError::NoOp);
        }

        let referral_cut = bps_of(gross, referral_bps)?;
        let distributable = gross - referral_cut;

        // External phase: convert what needs converting, restake the
        // compound slices. Nothing internal has moved yet, so a failure
        // here leaves the books untouched (converted residue stays in
        // the treasury for operations to recover).
        let mut compounded: Amount = 0;
        let mut injections: Vec<(AssetId, Amount)> = Vec::new();
        for dc in &denom_cfgs {
            let slice = bps_of(distributable, dc.harvest_share_bps)?;
            if slice == 0 {
                continue;
            }
            let amount = if dc.denom == self.config.reward_asset {
                slice
            } else {
                self.convert_slice(slice, &dc.denom, slippage_bps)?
            };
            if dc.policy == AccrualPolicy::Compound {
                if !self.farm.deposit(pool_id, amount) {
                    return Err(LedgerError::TransferFailed(
                        "farm rejected compound restake".into(),
                    ));
                }
                compounded = compounded.checked_add(amount).ok_or(LedgerError::AmountOverflow)?;
            }
            injections.push((dc.denom, amount));
        }

        // Internal phase, checkpointed.
        let cp = st.checkpoint_scalars(strategy)?;
        if let Err(err) = Self::book_harvest(&mut st, strategy, referral_cut, &injections) {
            st.restore(cp);
            warn!(%strategy, error = %err, "harvest bookkeeping failed; conversions remain in treasury");
            return Err(err);
        }

        let outcome = HarvestOutcome { strategy, gross, referral_cut, compounded, injected: injections };
        st.events.record(
            ctx.block,
            ctx.now,
            RouterEvent::Harvested {
                strategy,
                gross,
                referral_cut,
                compounded,
                injected: outcome.injected.clone(),
            },
        );
        info!(%strategy, gross, referral_cut, compounded, "harvest distributed");
        Ok(outcome)
    }

    /// Quote-validate-convert one harvest slice from the reward asset
    /// into `target`, enforcing the pool's slippage tolerance both before
    /// and after execution.
    fn convert_slice(&self, slice: Amount, target: &AssetId, slippage_bps: u16) -> Result<Amount> {
        let path = vec![self.config.reward_asset, *target];
        let quoted = self
            .venue
            .quote(slice, &path)
            .ok_or_else(|| LedgerError::TransferFailed("venue refused to quote harvest".into()))?;
        check_slippage(
            self.venue.as_ref(),
            &[SlippageCheck { path: path.clone(), quoted_in: slice, quoted_out: quoted }],
            slippage_bps,
        )?;
        let out = self
            .venue
            .convert(slice, &path)
            .ok_or_else(|| LedgerError::TransferFailed("venue rejected harvest conversion".into()))?;
        if out < min_out(quoted, slippage_bps)? {
            warn!(quoted, out, "conversion executed below tolerance; output parked in treasury");
            return Err(LedgerError::SlippageExceeded { quoted, live: out });
        }
        Ok(out)
    }

    fn book_harvest(
        st: &mut RouterState,
        strategy: StrategyId,
        referral_cut: Amount,
        injections: &[(AssetId, Amount)],
    ) -> Result<()> {
        if referral_cut > 0 {
            st.referrals.inject(strategy, referral_cut)?;
        }
        for (denom, amount) in injections {
            st.pool_mut(strategy)?.ledgers.inject(denom, *amount)?;
        }
        Ok(())
    }

    // === Privileged operations ===

    /// Retunes the mint emission curve. Admin only. Accrual up to
    /// `ctx.block` is settled under the outgoing schedule first, so the
    /// change is never retroactive.
    pub fn set_schedule(
        &self,
        caller: &ParticipantId,
        phase1_end: BlockNumber,
        phase2_start: BlockNumber,
        phase1_rate: Amount,
        phase2_rate: Amount,
        ctx: OpContext,
    ) -> Result<()> {
        let mut st = self.session()?;
        self.require_role(Role::Admin, caller)?;
        let schedule = EmissionSchedule::new(phase1_end, phase2_start, phase1_rate, phase2_rate)?;
        st.mint.set_schedule(schedule, ctx.block)?;
        st.events.record(
            ctx.block,
            ctx.now,
            RouterEvent::ScheduleUpdated { phase1_end, phase2_start, phase1_rate, phase2_rate },
        );
        info!(phase1_end, phase2_start, phase1_rate, phase2_rate, "emission schedule updated");
        Ok(())
    }

    /// Updates one pool's referral cut and slippage tolerance. Admin only.
    pub fn set_pool_params(
        &self,
        caller: &ParticipantId,
        strategy: StrategyId,
        referral_bps: u16,
        slippage_bps: u16,
        ctx: OpContext,
    ) -> Result<()> {
        let mut st = self.session()?;
        self.require_role(Role::Admin, caller)?;
        let share_asset = self.config.share_asset;
        let pool = st.pool_mut(strategy)?;
        let mut updated = pool.config.clone();
        updated.referral_bps = referral_bps;
        updated.slippage_bps = slippage_bps;
        updated.validate(&share_asset)?;
        pool.config = updated;
        st.events.record(
            ctx.block,
            ctx.now,
            RouterEvent::PoolParamsUpdated { strategy, referral_bps, slippage_bps },
        );
        info!(%strategy, referral_bps, slippage_bps, "pool parameters updated");
        Ok(())
    }

    /// Trips the one-way emergency breaker. Guardian only.
    pub fn trip_breaker(&self, caller: &ParticipantId, ctx: OpContext) -> Result<()> {
        let mut st = self.session()?;
        self.require_role(Role::Guardian, caller)?;
        st.breaker.trip()?;
        st.events.record(ctx.block, ctx.now, RouterEvent::BreakerTripped);
        Ok(())
    }

    /// Pauses normal operation. Guardian only; reversible.
    pub fn pause(&self, caller: &ParticipantId, ctx: OpContext) -> Result<()> {
        let mut st = self.session()?;
        self.require_role(Role::Guardian, caller)?;
        st.breaker.pause()?;
        st.events.record(ctx.block, ctx.now, RouterEvent::PauseSet { paused: true });
        info!("router paused");
        Ok(())
    }

    /// Lifts a pause. Guardian only. Does not touch the breaker.
    pub fn resume(&self, caller: &ParticipantId, ctx: OpContext) -> Result<()> {
        let mut st = self.session()?;
        self.require_role(Role::Guardian, caller)?;
        st.breaker.resume()?;
        st.events.record(ctx.block, ctx.now, RouterEvent::PauseSet { paused: false });
        info!("router resumed");
        Ok(())
    }

    // === Views ===

    /// The participant's aggregated position across every ledger, with
    /// mint emission previewed up to `block`.
    pub fn participant_view(
        &self,
        participant: &ParticipantId,
        block: BlockNumber,
    ) -> Result<ParticipantView> {
        let st = self.session()?;
        let strategy = st.assignments.get(participant).copied();
        let mut shares = 0;
        let mut compound_pending: Amount = 0;
        let mut payouts: Vec<(AssetId, Amount)> = Vec::new();
        if let Some(tag) = strategy {
            let pool = st.pool(tag)?;
            shares = pool.ledgers.shares_of(participant);
            for dc in &pool.config.denoms {
                let pending = pool.ledgers.pending_of(participant, &dc.denom)?;
                match dc.policy {
                    AccrualPolicy::Compound => {
                        compound_pending = compound_pending
                            .checked_add(pending)
                            .ok_or(LedgerError::AmountOverflow)?;
                    }
                    AccrualPolicy::Payout => {
                        if pending > 0 {
                            payouts.push((dc.denom, pending));
                        }
                    }
                }
            }
        }
        Ok(ParticipantView {
            participant: *participant,
            strategy,
            shares,
            compound_pending,
            payouts,
            mint_pending: st.mint.pending_at(participant, block)?,
            referral_pending: st.referrals.pending_total(participant)?,
        })
    }

    /// Audit totals for one pool.
    pub fn pool_totals(&self, strategy: StrategyId) -> Result<PoolTotals> {
        let st = self.session()?;
        let pool = st.pool(strategy)?;
        let mut denoms = Vec::with_capacity(pool.config.denoms.len());
        for dc in &pool.config.denoms {
            let ledger = pool.ledgers.ledger(&dc.denom).ok_or_else(|| {
                LedgerError::ConfigInvalid(format!("pool '{strategy}' is missing a ledger"))
            })?;
            denoms.push(DenomTotals {
                denom: dc.denom,
                policy: dc.policy,
                total_injected: ledger.total_injected(),
                total_claimed: ledger.total_claimed(),
                total_discarded: ledger.total_discarded(),
                reserved: ledger.reserved(),
            });
        }
        Ok(PoolTotals {
            strategy,
            farm_pool_id: pool.config.farm_pool_id,
            total_shares: pool.ledgers.total_shares(),
            denoms,
        })
    }

    pub fn strategy_of(&self, participant: &ParticipantId) -> Result<Option<StrategyId>> {
        Ok(self.session()?.assignments.get(participant).copied())
    }

    pub fn breaker_state(&self) -> Result<BreakerState> {
        Ok(self.session()?.breaker.state())
    }

    pub fn is_paused(&self) -> Result<bool> {
        Ok(self.session()?.breaker.is_paused())
    }

    /// Current contents of the bounded event log, oldest first.
    pub fn events(&self) -> Result<Vec<EventRecord>> {
        Ok(self.session()?.events.iter().cloned().collect())
    }

    /// The live mint schedule.
    pub fn mint_schedule(&self) -> Result<EmissionSchedule> {
        Ok(self.session()?.mint.schedule().clone())
    }

    /// Mint stream counters: (total minted, minted-but-unstaked discard).
    pub fn mint_totals(&self) -> Result<(Amount, Amount)> {
        let st = self.session()?;
        Ok((st.mint.total_minted(), st.mint.total_discarded()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedRateVenue, InMemoryAsset, InMemoryFarm, StaticRoles};

    const TREASURY: ParticipantId = [0xEE; 32];
    const ALICE: ParticipantId = [1u8; 32];
    const ADMIN: ParticipantId = [0xAD; 32];
    const GUARDIAN: ParticipantId = [0x6A; 32];
    const SHARE: AssetId = [10u8; 32];
    const REWARD: AssetId = [11u8; 32];
    const MINT: AssetId = [12u8; 32];

    fn fixture() -> (StrategyRouter, Arc<InMemoryAsset>) {
        let assets = Arc::new(InMemoryAsset::new());
        assets.credit(&SHARE, &ALICE, 1_000_000);
        assets.approve(&SHARE, &ALICE, &TREASURY, u128::MAX);
        let farm = Arc::new(InMemoryFarm::new(Arc::clone(&assets), REWARD, TREASURY));
        let venue = Arc::new(FixedRateVenue::new(Arc::clone(&assets), TREASURY));
        venue.set_rate(REWARD, SHARE, 1, 1);
        let roles =
            Arc::new(StaticRoles::new(vec![(Role::Admin, ADMIN), (Role::Guardian, GUARDIAN)]));
        let config = RouterConfig::new(
            TREASURY,
            SHARE,
            REWARD,
            MINT,
            EmissionSchedule::new(100, 200, 10, 2).unwrap(),
            0,
        );
        let router = StrategyRouter::new(config, assets.clone(), venue, farm, roles).unwrap();
        (router, assets)
    }

    fn ctx(block: BlockNumber) -> OpContext {
        OpContext::new(block, 1_000)
    }

    #[test]
    fn session_lock_rejects_reentrant_calls() {
        let (router, _) = fixture();
        let _held = router.state.lock();
        let err = router
            .deposit(&ALICE, StrategyId::Standard, 100, None, ctx(1), i64::MAX)
            .unwrap_err();
        assert_eq!(err, LedgerError::ReentrantCall);
        assert_eq!(router.participant_view(&ALICE, 1).unwrap_err(), LedgerError::ReentrantCall);
    }

    #[test]
    fn entry_gates_run_in_order() {
        let (router, _) = fixture();
        router.pause(&GUARDIAN, ctx(1)).unwrap();
        // Paused outranks the deadline check.
        let err = router.deposit(&ALICE, StrategyId::Stable, 10, None, ctx(1), 0).unwrap_err();
        assert_eq!(err, LedgerError::Paused);

        router.resume(&GUARDIAN, ctx(1)).unwrap();
        let err = router.deposit(&ALICE, StrategyId::Stable, 10, None, ctx(1), 0).unwrap_err();
        assert_eq!(err, LedgerError::Expired { deadline: 0, now: 1_000 });
    }

    #[test]
    fn zero_amount_deposits_and_withdrawals_are_noops() {
        let (router, _) = fixture();
        let err =
            router.deposit(&ALICE, StrategyId::Standard, 0, None, ctx(1), i64::MAX).unwrap_err();
        assert_eq!(err, LedgerError::NoOp);
        router.deposit(&ALICE, StrategyId::Standard, 100, None, ctx(1), i64::MAX).unwrap();
        assert_eq!(router.withdraw(&ALICE, 0, ctx(2), i64::MAX).unwrap_err(), LedgerError::NoOp);
    }

    #[test]
    fn deposits_must_name_the_current_strategy() {
        let (router, _) = fixture();
        router.deposit(&ALICE, StrategyId::Standard, 100, None, ctx(1), i64::MAX).unwrap();
        let err =
            router.deposit(&ALICE, StrategyId::Stable, 100, None, ctx(2), i64::MAX).unwrap_err();
        assert_eq!(
            err,
            LedgerError::StrategyMismatch {
                current: StrategyId::Standard,
                requested: StrategyId::Stable
            }
        );
    }

    #[test]
    fn privileged_operations_check_roles() {
        let (router, _) = fixture();
        assert_eq!(
            router.set_schedule(&ALICE, 10, 20, 5, 1, ctx(1)).unwrap_err(),
            LedgerError::Unauthorized(Role::Admin)
        );
        assert_eq!(
            router.trip_breaker(&ALICE, ctx(1)).unwrap_err(),
            LedgerError::Unauthorized(Role::Guardian)
        );
        assert_eq!(
            router.pause(&ADMIN, ctx(1)).unwrap_err(),
            LedgerError::Unauthorized(Role::Guardian)
        );
        assert!(router.set_pool_params(&ADMIN, StrategyId::Stable, 100, 50, ctx(1)).is_ok());
    }

    #[test]
    fn invalid_schedule_is_rejected_at_the_router_boundary() {
        let (router, _) = fixture();
        assert!(matches!(
            router.set_schedule(&ADMIN, 200, 100, 10, 2, ctx(1)),
            Err(LedgerError::ScheduleInvalid(_))
        ));
        assert!(matches!(
            router.set_schedule(&ADMIN, 100, 200, 2, 10, ctx(1)),
            Err(LedgerError::ScheduleInvalid(_))
        ));
    }

    #[test]
    fn pool_params_update_is_validated_and_visible_to_harvests() {
        let (router, _) = fixture();
        assert!(matches!(
            router.set_pool_params(&ADMIN, StrategyId::Stable, 9_999, 0, ctx(1)),
            Err(LedgerError::ConfigInvalid(_))
        ));
        router.set_pool_params(&ADMIN, StrategyId::Stable, 1_000, 0, ctx(1)).unwrap();
        let record = router.events().unwrap().pop().unwrap();
        assert_eq!(record.event.kind(), "pool_params_updated");
    }

    #[test]
    fn views_report_empty_positions_for_strangers() {
        let (router, _) = fixture();
        let view = router.participant_view(&ALICE, 5).unwrap();
        assert_eq!(view.strategy, None);
        assert_eq!(view.shares, 0);
        assert_eq!(view.mint_pending, 0);
        assert!(view.payouts.is_empty());
    }
}
