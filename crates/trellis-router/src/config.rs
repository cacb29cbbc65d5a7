//! Router and strategy pool configuration.

use serde::{Deserialize, Serialize};

use trellis_core::types::{AssetId, BlockNumber, ParticipantId, StrategyId};
use trellis_core::{LedgerError, Result};
use trellis_emission::EmissionSchedule;

/// Cap on the referral cut a pool may take from a harvest (20%).
pub const MAX_REFERRAL_BPS: u16 = 2_000;

/// Events kept in the in-memory log before the oldest are dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 1_024;

/// What a strategy does with one reward denomination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccrualPolicy {
    /// Rewards accrue separately and are paid out on claim.
    Payout,
    /// Rewards are converted to share units at harvest and folded into
    /// the participant's principal at their next settlement touch.
    Compound,
}

impl AccrualPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            AccrualPolicy::Payout => "payout",
            AccrualPolicy::Compound => "compound",
        }
    }
}

/// One reward denomination of a strategy pool: which asset, how it
/// accrues, and its slice of the post-referral harvest in basis points.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenomConfig {
    pub denom: AssetId,
    pub policy: AccrualPolicy,
    pub harvest_share_bps: u16,
}

/// Full configuration of one strategy pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub strategy: StrategyId,
    /// Pool id in the external farm where this strategy's principal sits.
    pub farm_pool_id: u64,
    pub denoms: Vec<DenomConfig>,
    /// Harvest cut routed to referral givers, in basis points.
    pub referral_bps: u16,
    /// Tolerated quote-vs-execution drift for compound conversions.
    pub slippage_bps: u16,
}

impl StrategyConfig {
    /// LP-style split: half of each harvest compounds into principal,
    /// half pays out in the farm's reward token.
    pub fn standard(share_asset: AssetId, reward_asset: AssetId, farm_pool_id: u64) -> Self {
        Self {
            strategy: StrategyId::Standard,
            farm_pool_id,
            denoms: vec![
                DenomConfig {
                    denom: share_asset,
                    policy: AccrualPolicy::Compound,
                    harvest_share_bps: 5_000,
                },
                DenomConfig {
                    denom: reward_asset,
                    policy: AccrualPolicy::Payout,
                    harvest_share_bps: 5_000,
                },
            ],
            referral_bps: 200,
            slippage_bps: 100,
        }
    }

    /// Everything compounds into principal.
    pub fn balanced(share_asset: AssetId, farm_pool_id: u64) -> Self {
        Self {
            strategy: StrategyId::Balanced,
            farm_pool_id,
            denoms: vec![DenomConfig {
                denom: share_asset,
                policy: AccrualPolicy::Compound,
                harvest_share_bps: 10_000,
            }],
            referral_bps: 200,
            slippage_bps: 100,
        }
    }

    /// Everything pays out in the reward token; principal never moves.
    pub fn stable(reward_asset: AssetId, farm_pool_id: u64) -> Self {
        Self {
            strategy: StrategyId::Stable,
            farm_pool_id,
            denoms: vec![DenomConfig {
                denom: reward_asset,
                policy: AccrualPolicy::Payout,
                harvest_share_bps: 10_000,
            }],
            referral_bps: 200,
            slippage_bps: 100,
        }
    }

    pub fn validate(&self, share_asset: &AssetId) -> Result<()> {
        if self.denoms.is_empty() {
            return Err(LedgerError::ConfigInvalid(format!(
                "strategy '{}' has no reward denominations",
                self.strategy
            )));
        }
        let mut seen = Vec::with_capacity(self.denoms.len());
        let mut bps_total: u32 = 0;
        for dc in &self.denoms {
            if seen.contains(&dc.denom) {
                return Err(LedgerError::ConfigInvalid(format!(
                    "strategy '{}' lists a denomination twice",
                    self.strategy
                )));
            }
            seen.push(dc.denom);
            bps_total += dc.harvest_share_bps as u32;
            // Compound rewards are re-deposited as principal, so they can
            // only be denominated in the share asset itself.
            if dc.policy == AccrualPolicy::Compound && dc.denom != *share_asset {
                return Err(LedgerError::ConfigInvalid(format!(
                    "strategy '{}' compounds a non-share denomination",
                    self.strategy
                )));
            }
        }
        if bps_total != 10_000 {
            return Err(LedgerError::ConfigInvalid(format!(
                "strategy '{}' harvest shares sum to {bps_total} bps, expected 10000",
                self.strategy
            )));
        }
        if self.referral_bps > MAX_REFERRAL_BPS {
            return Err(LedgerError::ConfigInvalid(format!(
                "strategy '{}' referral cut {} bps exceeds cap {MAX_REFERRAL_BPS}",
                self.strategy, self.referral_bps
            )));
        }
        if self.slippage_bps > 10_000 {
            return Err(LedgerError::ConfigInvalid(format!(
                "strategy '{}' slippage tolerance {} bps exceeds 100%",
                self.strategy, self.slippage_bps
            )));
        }
        Ok(())
    }
}

/// Wiring for a whole router: custody account, the assets involved, the
/// platform mint schedule, and one pool per strategy tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Custody account the router transacts as.
    pub treasury: ParticipantId,
    /// The principal unit participants deposit.
    pub share_asset: AssetId,
    /// The token the external farm emits.
    pub reward_asset: AssetId,
    /// The platform token minted by the emission schedule.
    pub mint_asset: AssetId,
    pub mint_schedule: EmissionSchedule,
    /// Block the mint stream starts accruing from.
    pub start_block: BlockNumber,
    pub strategies: Vec<StrategyConfig>,
    pub event_capacity: usize,
}

impl RouterConfig {
    /// Standard three-pool wiring with the preset strategies on farm
    /// pools 0, 1, 2.
    pub fn new(
        treasury: ParticipantId,
        share_asset: AssetId,
        reward_asset: AssetId,
        mint_asset: AssetId,
        mint_schedule: EmissionSchedule,
        start_block: BlockNumber,
    ) -> Self {
        Self {
            treasury,
            share_asset,
            reward_asset,
            mint_asset,
            mint_schedule,
            start_block,
            strategies: vec![
                StrategyConfig::standard(share_asset, reward_asset, 0),
                StrategyConfig::balanced(share_asset, 1),
                StrategyConfig::stable(reward_asset, 2),
            ],
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.share_asset == self.reward_asset {
            return Err(LedgerError::ConfigInvalid(
                "share asset and farm reward asset must differ".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(LedgerError::ConfigInvalid("event capacity must be nonzero".into()));
        }
        for tag in StrategyId::ALL {
            let count = self.strategies.iter().filter(|s| s.strategy == tag).count();
            if count != 1 {
                return Err(LedgerError::ConfigInvalid(format!(
                    "strategy '{tag}' must be configured exactly once, found {count}"
                )));
            }
        }
        let mut pool_ids: Vec<u64> = self.strategies.iter().map(|s| s.farm_pool_id).collect();
        pool_ids.sort_unstable();
        pool_ids.dedup();
        if pool_ids.len() != self.strategies.len() {
            return Err(LedgerError::ConfigInvalid("farm pool ids must be distinct".into()));
        }
        for sc in &self.strategies {
            sc.validate(&self.share_asset)?;
        }
        Ok(())
    }
}
