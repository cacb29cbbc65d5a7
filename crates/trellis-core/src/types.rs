//! Identifier and quantity types shared across the Trellis workspace.

use serde::{Deserialize, Serialize};

/// Participant identity: a 32-byte account key.
///
/// Every ledger keys its books by explicit participant identity rather than
/// by ambient caller context, so the same engine can sit behind any
/// transport or signing layer.
pub type ParticipantId = [u8; 32];

/// Asset (denomination) identity: a 32-byte token key.
pub type AssetId = [u8; 32];

/// Token quantity in the asset's smallest indivisible unit.
pub type Amount = u128;

/// Chain block height.
pub type BlockNumber = u64;

/// Short hex tag for an id, used in log lines.
pub fn short_id(id: &[u8; 32]) -> String {
    hex::encode(&id[..4])
}

/// The closed set of investment strategies a participant's principal can
/// be routed to. Each strategy owns its own pool of ledgers; a participant
/// is enrolled in at most one strategy at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StrategyId {
    /// LP-style principal with a split of compounding and paid-out rewards.
    Standard,
    /// Single-asset principal, rewards fully compounded.
    Balanced,
    /// Single-asset principal, rewards fully paid out.
    Stable,
}

impl StrategyId {
    /// Every strategy, in routing order.
    pub const ALL: [StrategyId; 3] = [StrategyId::Standard, StrategyId::Balanced, StrategyId::Stable];

    pub fn name(&self) -> &'static str {
        match self {
            StrategyId::Standard => "standard",
            StrategyId::Balanced => "balanced",
            StrategyId::Stable => "stable",
        }
    }
}

impl std::fmt::Display for StrategyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Privileged roles recognized by the router's admission checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// May retune emission and pool parameters.
    Admin,
    /// May pause, resume, and trip the circuit breaker.
    Guardian,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Guardian => "guardian",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_names_are_stable() {
        assert_eq!(StrategyId::Standard.name(), "standard");
        assert_eq!(StrategyId::Balanced.to_string(), "balanced");
        assert_eq!(StrategyId::ALL.len(), 3);
    }

    #[test]
    fn short_id_renders_first_four_bytes() {
        let id = [0xAB; 32];
        assert_eq!(short_id(&id), "abababab");
    }
}
