//! In-memory collaborator implementations for tests.
//!
//! These are deliberately stateful fakes, not mocks: they keep real
//! balance, stake, and rate books behind `parking_lot` locks so a test
//! can assert on where value actually ended up after a multi-step router
//! operation. Each one has a failure switch so rollback paths can be
//! exercised.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use trellis_core::types::{Amount, AssetId, ParticipantId, Role};

use crate::collaborators::{ExternalFarm, FungibleAsset, RoleGate, SwapVenue};

/// Multi-asset token book with balances and allowances.
///
/// Tokens are minted by [`credit`](Self::credit); transfers fail (return
/// `false`) on insufficient balance or allowance, or while frozen.
pub struct InMemoryAsset {
    balances: RwLock<HashMap<(AssetId, ParticipantId), Amount>>,
    allowances: RwLock<HashMap<(AssetId, ParticipantId, ParticipantId), Amount>>,
    frozen: RwLock<bool>,
}

impl InMemoryAsset {
    pub fn new() -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
            allowances: RwLock::new(HashMap::new()),
            frozen: RwLock::new(false),
        }
    }

    /// Mints `amount` of `asset` into `who`'s balance.
    pub fn credit(&self, asset: &AssetId, who: &ParticipantId, amount: Amount) {
        *self.balances.write().entry((*asset, *who)).or_insert(0) += amount;
    }

    /// Burns up to `amount`; returns `false` if the balance is short.
    pub fn debit(&self, asset: &AssetId, who: &ParticipantId, amount: Amount) -> bool {
        let mut balances = self.balances.write();
        let slot = balances.entry((*asset, *who)).or_insert(0);
        if *slot < amount {
            return false;
        }
        *slot -= amount;
        true
    }

    /// While frozen, every transfer is rejected.
    pub fn set_frozen(&self, frozen: bool) {
        *self.frozen.write() = frozen;
    }
}

impl Default for InMemoryAsset {
    fn default() -> Self {
        Self::new()
    }
}

impl FungibleAsset for InMemoryAsset {
    fn transfer(
        &self,
        asset: &AssetId,
        from: &ParticipantId,
        to: &ParticipantId,
        amount: Amount,
    ) -> bool {
        if *self.frozen.read() {
            return false;
        }
        let mut balances = self.balances.write();
        let src = balances.entry((*asset, *from)).or_insert(0);
        if *src < amount {
            return false;
        }
        *src -= amount;
        *balances.entry((*asset, *to)).or_insert(0) += amount;
        true
    }

    fn transfer_from(
        &self,
        asset: &AssetId,
        spender: &ParticipantId,
        from: &ParticipantId,
        to: &ParticipantId,
        amount: Amount,
    ) -> bool {
        if *self.frozen.read() {
            return false;
        }
        {
            let mut allowances = self.allowances.write();
            let granted = allowances.entry((*asset, *from, *spender)).or_insert(0);
            if *granted < amount {
                return false;
            }
            // Unlimited allowances are never drawn down.
            if *granted != u128::MAX {
                *granted -= amount;
            }
        }
        self.transfer(asset, from, to, amount)
    }

    fn balance_of(&self, asset: &AssetId, account: &ParticipantId) -> Amount {
        self.balances.read().get(&(*asset, *account)).copied().unwrap_or(0)
    }

    fn approve(
        &self,
        asset: &AssetId,
        owner: &ParticipantId,
        spender: &ParticipantId,
        amount: Amount,
    ) -> bool {
        self.allowances.write().insert((*asset, *owner, *spender), amount);
        true
    }
}

/// Upstream staking farm: per-pool stake counters plus a pending-reward
/// hopper that any deposit or withdraw poke pays out to the beneficiary,
/// MasterChef style. Share tokens themselves never move; the router
/// parks them in its treasury.
pub struct InMemoryFarm {
    assets: Arc<InMemoryAsset>,
    reward_asset: AssetId,
    beneficiary: ParticipantId,
    staked: RwLock<HashMap<u64, Amount>>,
    pending: RwLock<HashMap<u64, Amount>>,
    jammed: RwLock<bool>,
}

impl InMemoryFarm {
    pub fn new(assets: Arc<InMemoryAsset>, reward_asset: AssetId, beneficiary: ParticipantId) -> Self {
        Self {
            assets,
            reward_asset,
            beneficiary,
            staked: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            jammed: RwLock::new(false),
        }
    }

    /// Queues `amount` of farm rewards for the next poke of `pool_id`.
    pub fn add_pending(&self, pool_id: u64, amount: Amount) {
        *self.pending.write().entry(pool_id).or_insert(0) += amount;
    }

    pub fn staked(&self, pool_id: u64) -> Amount {
        self.staked.read().get(&pool_id).copied().unwrap_or(0)
    }

    /// While jammed, every deposit and withdraw is rejected.
    pub fn set_jammed(&self, jammed: bool) {
        *self.jammed.write() = jammed;
    }

    fn pay_pending(&self, pool_id: u64) {
        let owed = self.pending.write().remove(&pool_id).unwrap_or(0);
        if owed > 0 {
            self.assets.credit(&self.reward_asset, &self.beneficiary, owed);
        }
    }
}

impl ExternalFarm for InMemoryFarm {
    fn deposit(&self, pool_id: u64, amount: Amount) -> bool {
        if *self.jammed.read() {
            return false;
        }
        self.pay_pending(pool_id);
        *self.staked.write().entry(pool_id).or_insert(0) += amount;
        true
    }

    fn withdraw(&self, pool_id: u64, amount: Amount) -> bool {
        if *self.jammed.read() {
            return false;
        }
        {
            let mut staked = self.staked.write();
            let slot = staked.entry(pool_id).or_insert(0);
            if *slot < amount {
                return false;
            }
            *slot -= amount;
        }
        self.pay_pending(pool_id);
        true
    }

    fn pending_reward(&self, pool_id: u64, account: &ParticipantId) -> Amount {
        if *account != self.beneficiary {
            return 0;
        }
        self.pending.read().get(&pool_id).copied().unwrap_or(0)
    }
}

/// Swap venue with fixed pairwise rates and a naive constant-sum
/// liquidity book. Conversions move real [`InMemoryAsset`] balances on
/// the trader's account, so treasury math in router tests stays honest.
pub struct FixedRateVenue {
    assets: Arc<InMemoryAsset>,
    trader: ParticipantId,
    /// (from, to) -> (numerator, denominator) of the output rate.
    rates: RwLock<HashMap<(AssetId, AssetId), (u128, u128)>>,
    /// (a, b) -> (reserve_a, reserve_b, lp issued).
    pools: RwLock<HashMap<(AssetId, AssetId), (Amount, Amount, Amount)>>,
}

impl FixedRateVenue {
    pub fn new(assets: Arc<InMemoryAsset>, trader: ParticipantId) -> Self {
        Self {
            assets,
            trader,
            rates: RwLock::new(HashMap::new()),
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Sets the `from -> to` rate so that `amount_in * num / den` comes
    /// out. Unset pairs refuse to quote.
    pub fn set_rate(&self, from: AssetId, to: AssetId, num: u128, den: u128) {
        assert!(den > 0, "rate denominator must be nonzero");
        self.rates.write().insert((from, to), (num, den));
    }

    fn quote_inner(&self, amount_in: Amount, path: &[AssetId]) -> Option<Amount> {
        if path.len() < 2 {
            return None;
        }
        let rates = self.rates.read();
        let mut amount = amount_in;
        for pair in path.windows(2) {
            let (num, den) = rates.get(&(pair[0], pair[1])).copied()?;
            amount = amount.checked_mul(num)? / den;
        }
        Some(amount)
    }
}

impl SwapVenue for FixedRateVenue {
    fn quote(&self, amount_in: Amount, path: &[AssetId]) -> Option<Amount> {
        self.quote_inner(amount_in, path)
    }

    fn convert(&self, amount_in: Amount, path: &[AssetId]) -> Option<Amount> {
        let out = self.quote_inner(amount_in, path)?;
        if !self.assets.debit(&path[0], &self.trader, amount_in) {
            return None;
        }
        self.assets.credit(path.last()?, &self.trader, out);
        Some(out)
    }

    fn add_liquidity(
        &self,
        asset_a: &AssetId,
        asset_b: &AssetId,
        amount_a: Amount,
        amount_b: Amount,
    ) -> Option<Amount> {
        if !self.assets.debit(asset_a, &self.trader, amount_a) {
            return None;
        }
        if !self.assets.debit(asset_b, &self.trader, amount_b) {
            self.assets.credit(asset_a, &self.trader, amount_a);
            return None;
        }
        let lp = amount_a.checked_add(amount_b)?;
        let mut pools = self.pools.write();
        let entry = pools.entry((*asset_a, *asset_b)).or_insert((0, 0, 0));
        entry.0 += amount_a;
        entry.1 += amount_b;
        entry.2 += lp;
        Some(lp)
    }

    fn remove_liquidity(
        &self,
        asset_a: &AssetId,
        asset_b: &AssetId,
        lp_amount: Amount,
    ) -> Option<(Amount, Amount)> {
        let (out_a, out_b) = {
            let mut pools = self.pools.write();
            let entry = pools.get_mut(&(*asset_a, *asset_b))?;
            if entry.2 < lp_amount || lp_amount == 0 {
                return None;
            }
            let out_a = entry.0 * lp_amount / entry.2;
            let out_b = entry.1 * lp_amount / entry.2;
            entry.0 -= out_a;
            entry.1 -= out_b;
            entry.2 -= lp_amount;
            (out_a, out_b)
        };
        self.assets.credit(asset_a, &self.trader, out_a);
        self.assets.credit(asset_b, &self.trader, out_b);
        Some((out_a, out_b))
    }
}

/// Role gate with a fixed grant list.
pub struct StaticRoles {
    grants: Vec<(Role, ParticipantId)>,
}

impl StaticRoles {
    pub fn new(grants: Vec<(Role, ParticipantId)>) -> Self {
        Self { grants }
    }
}

impl RoleGate for StaticRoles {
    fn has_role(&self, role: Role, account: &ParticipantId) -> bool {
        self.grants.iter().any(|(r, a)| *r == role && a == account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: ParticipantId = [1u8; 32];
    const BOB: ParticipantId = [2u8; 32];
    const GOLD: AssetId = [10u8; 32];
    const SILVER: AssetId = [11u8; 32];

    #[test]
    fn transfers_respect_balances_and_the_freeze() {
        let assets = InMemoryAsset::new();
        assets.credit(&GOLD, &ALICE, 100);
        assert!(assets.transfer(&GOLD, &ALICE, &BOB, 60));
        assert!(!assets.transfer(&GOLD, &ALICE, &BOB, 60));
        assert_eq!(assets.balance_of(&GOLD, &BOB), 60);

        assets.set_frozen(true);
        assert!(!assets.transfer(&GOLD, &BOB, &ALICE, 1));
        assets.set_frozen(false);
        assert!(assets.transfer(&GOLD, &BOB, &ALICE, 1));
    }

    #[test]
    fn transfer_from_draws_down_finite_allowances_only() {
        let assets = InMemoryAsset::new();
        assets.credit(&GOLD, &ALICE, 100);
        assert!(!assets.transfer_from(&GOLD, &BOB, &ALICE, &BOB, 10));

        assets.approve(&GOLD, &ALICE, &BOB, 30);
        assert!(assets.transfer_from(&GOLD, &BOB, &ALICE, &BOB, 20));
        assert!(!assets.transfer_from(&GOLD, &BOB, &ALICE, &BOB, 20));

        assets.approve(&GOLD, &ALICE, &BOB, u128::MAX);
        assert!(assets.transfer_from(&GOLD, &BOB, &ALICE, &BOB, 40));
        assert!(assets.transfer_from(&GOLD, &BOB, &ALICE, &BOB, 40));
    }

    #[test]
    fn farm_pokes_pay_pending_to_the_beneficiary() {
        let assets = Arc::new(InMemoryAsset::new());
        let farm = InMemoryFarm::new(Arc::clone(&assets), GOLD, ALICE);
        farm.add_pending(7, 250);
        assert_eq!(farm.pending_reward(7, &ALICE), 250);
        assert_eq!(farm.pending_reward(7, &BOB), 0);

        assert!(farm.withdraw(7, 0));
        assert_eq!(assets.balance_of(&GOLD, &ALICE), 250);
        assert_eq!(farm.pending_reward(7, &ALICE), 0);

        assert!(farm.deposit(7, 40));
        assert_eq!(farm.staked(7), 40);
        assert!(!farm.withdraw(7, 41));
        farm.set_jammed(true);
        assert!(!farm.deposit(7, 1));
    }

    #[test]
    fn conversions_move_trader_balances_at_the_set_rate() {
        let assets = Arc::new(InMemoryAsset::new());
        let venue = FixedRateVenue::new(Arc::clone(&assets), ALICE);
        venue.set_rate(GOLD, SILVER, 3, 2);
        assets.credit(&GOLD, &ALICE, 100);

        assert_eq!(venue.quote(100, &[GOLD, SILVER]), Some(150));
        assert_eq!(venue.quote(100, &[SILVER, GOLD]), None);
        assert_eq!(venue.convert(100, &[GOLD, SILVER]), Some(150));
        assert_eq!(assets.balance_of(&GOLD, &ALICE), 0);
        assert_eq!(assets.balance_of(&SILVER, &ALICE), 150);
        // Nothing left to sell.
        assert_eq!(venue.convert(1, &[GOLD, SILVER]), None);
    }

    #[test]
    fn liquidity_round_trips_proportionally() {
        let assets = Arc::new(InMemoryAsset::new());
        let venue = FixedRateVenue::new(Arc::clone(&assets), ALICE);
        assets.credit(&GOLD, &ALICE, 100);
        assets.credit(&SILVER, &ALICE, 200);

        let lp = venue.add_liquidity(&GOLD, &SILVER, 100, 200).unwrap();
        assert_eq!(lp, 300);
        assert_eq!(assets.balance_of(&GOLD, &ALICE), 0);

        let (a, b) = venue.remove_liquidity(&GOLD, &SILVER, 150).unwrap();
        assert_eq!((a, b), (50, 100));
        assert_eq!(assets.balance_of(&SILVER, &ALICE), 100);
    }

    #[test]
    fn role_grants_are_exact() {
        let roles = StaticRoles::new(vec![(Role::Admin, ALICE)]);
        assert!(roles.has_role(Role::Admin, &ALICE));
        assert!(!roles.has_role(Role::Guardian, &ALICE));
        assert!(!roles.has_role(Role::Admin, &BOB));
    }
}
