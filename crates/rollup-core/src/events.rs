use serde::{Deserialize, Serialize};

use crate::canonical::Address;
use crate::ops::{AccountId, TokenId};
use crate::request::RequestKind;

/// Events emitted by the rollup engine, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RollupEvent {
    RequestEnqueued {
        id: u64,
        kind: RequestKind,
        enqueued_at: u64,
    },
    BlockCommitted {
        number: u64,
        requests_consumed: u64,
    },
    BlockVerified {
        number: u64,
        requests_consumed: u64,
    },
    BlockExecuted {
        number: u64,
        requests_consumed: u64,
    },
    BlocksReverted {
        count: u64,
        committed: u64,
    },
    /// Accepted evacuation claim; `amount` is in base-ledger units.
    Evacuation {
        address: Address,
        request_id: u64,
        token: Address,
        token_id: TokenId,
        account_id: AccountId,
        amount: u128,
    },
    EvacuModeActivated {
        at: u64,
        drain_target: u64,
    },
    EvacuModeDeactivated,
    PendingBalanceWithdrawn {
        address: Address,
        token_id: TokenId,
        amount: u128,
    },
}

impl RollupEvent {
    /// Stable snake-case name, used as a log field and metric label.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestEnqueued { .. } => "request_enqueued",
            Self::BlockCommitted { .. } => "block_committed",
            Self::BlockVerified { .. } => "block_verified",
            Self::BlockExecuted { .. } => "block_executed",
            Self::BlocksReverted { .. } => "blocks_reverted",
            Self::Evacuation { .. } => "evacuation",
            Self::EvacuModeActivated { .. } => "evacu_mode_activated",
            Self::EvacuModeDeactivated => "evacu_mode_deactivated",
            Self::PendingBalanceWithdrawn { .. } => "pending_balance_withdrawn",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_tag_matches_name() {
        let events = [
            RollupEvent::BlockCommitted {
                number: 1,
                requests_consumed: 2,
            },
            RollupEvent::EvacuModeActivated {
                at: 5,
                drain_target: 3,
            },
            RollupEvent::EvacuModeDeactivated,
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], event.name());
        }
    }
}
