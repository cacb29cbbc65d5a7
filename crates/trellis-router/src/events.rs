//! Router event log: what happened, when, with a derived receipt id.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use trellis_core::types::{Amount, AssetId, BlockNumber, ParticipantId, StrategyId};

/// Everything the router announces at operation boundaries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterEvent {
    Deposited {
        participant: ParticipantId,
        strategy: StrategyId,
        amount: Amount,
    },
    Withdrawn {
        participant: ParticipantId,
        strategy: StrategyId,
        amount: Amount,
    },
    Claimed {
        participant: ParticipantId,
        strategy: StrategyId,
        payouts: Vec<(AssetId, Amount)>,
    },
    Harvested {
        strategy: StrategyId,
        gross: Amount,
        referral_cut: Amount,
        compounded: Amount,
        injected: Vec<(AssetId, Amount)>,
    },
    StrategyChanged {
        participant: ParticipantId,
        from: StrategyId,
        to: StrategyId,
        principal: Amount,
    },
    EmergencyWithdrawal {
        participant: ParticipantId,
        strategy: StrategyId,
        principal: Amount,
    },
    ReferralRegistered {
        referee: ParticipantId,
        giver: ParticipantId,
    },
    ReferralClaimed {
        giver: ParticipantId,
        amount: Amount,
    },
    ScheduleUpdated {
        phase1_end: BlockNumber,
        phase2_start: BlockNumber,
        phase1_rate: Amount,
        phase2_rate: Amount,
    },
    PoolParamsUpdated {
        strategy: StrategyId,
        referral_bps: u16,
        slippage_bps: u16,
    },
    BreakerTripped,
    PauseSet {
        paused: bool,
    },
}

impl RouterEvent {
    /// Stable tag for logs and receipt derivation.
    pub fn kind(&self) -> &'static str {
        match self {
            RouterEvent::Deposited { .. } => "deposited",
            RouterEvent::Withdrawn { .. } => "withdrawn",
            RouterEvent::Claimed { .. } => "claimed",
            RouterEvent::Harvested { .. } => "harvested",
            RouterEvent::StrategyChanged { .. } => "strategy_changed",
            RouterEvent::EmergencyWithdrawal { .. } => "emergency_withdrawal",
            RouterEvent::ReferralRegistered { .. } => "referral_registered",
            RouterEvent::ReferralClaimed { .. } => "referral_claimed",
            RouterEvent::ScheduleUpdated { .. } => "schedule_updated",
            RouterEvent::PoolParamsUpdated { .. } => "pool_params_updated",
            RouterEvent::BreakerTripped => "breaker_tripped",
            RouterEvent::PauseSet { .. } => "pause_set",
        }
    }
}

/// A logged event with its position and derived receipt id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// blake3 over (seq, block, time, kind) — unique per log because seq
    /// never repeats.
    pub id: [u8; 32],
    pub seq: u64,
    pub block: BlockNumber,
    /// Unix timestamp from the operation context.
    pub at: i64,
    pub event: RouterEvent,
}

/// Bounded in-memory history, oldest records dropped first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLog {
    capacity: usize,
    next_seq: u64,
    records: VecDeque<EventRecord>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), next_seq: 0, records: VecDeque::new() }
    }

    /// Appends an event stamped with the caller's block and time and
    /// returns its receipt id.
    pub fn record(&mut self, block: BlockNumber, at: i64, event: RouterEvent) -> [u8; 32] {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = *blake3::hash(
            &[
                &seq.to_le_bytes()[..],
                &block.to_le_bytes()[..],
                &at.to_le_bytes()[..],
                event.kind().as_bytes(),
            ]
            .concat(),
        )
        .as_bytes();
        self.records.push_back(EventRecord { id, seq, block, at, event });
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
        id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&EventRecord> {
        self.records.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.records.iter()
    }

    /// Records from `seq` onward, oldest first.
    pub fn since(&self, seq: u64) -> Vec<EventRecord> {
        self.records.iter().filter(|r| r.seq >= seq).cloned().collect()
    }
}
