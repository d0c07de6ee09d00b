#![forbid(unsafe_code)]

//! Rollup block headers and their commitments.
//!
//! A block moves through three phases, strictly in order:
//!
//! ```text
//! Committed -> Proved -> Executed
//! ```
//!
//! Executed is terminal. Committed and Proved blocks may still be discarded
//! (operator revert, or evacuation activation), executed ones never.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_hash, CanonicalError, Hash32};

/// Block header as stored by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlock {
    pub number: u64,
    /// Number of queued L1 requests resolved by this block.
    pub requests_consumed: u64,
    /// Hash chain over the block's settlement operations.
    pub pending_settlement_hash: Hash32,
    /// Commitment over `(old_state_root, new_state_root, aux_root, timestamp, public_data)`.
    pub commitment: Hash32,
    pub state_root: Hash32,
    pub timestamp: u64,
}

impl StoredBlock {
    /// Block 0, the parent of the first committed block.
    pub fn genesis(state_root: Hash32, timestamp: u64) -> Self {
        Self {
            number: 0,
            requests_consumed: 0,
            pending_settlement_hash: Hash32::ZERO,
            commitment: Hash32::ZERO,
            state_root,
            timestamp,
        }
    }

    /// Canonical hash used for chain linkage.
    pub fn hash(&self) -> Result<Hash32, CanonicalError> {
        canonical_hash(self)
    }
}

/// Raw block data supplied by the operator (or by an evacuation claimant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitBlockInfo {
    pub number: u64,
    pub timestamp: u64,
    pub new_state_root: Hash32,
    /// Auxiliary root committed alongside the state root (e.g. the order-book tree).
    pub aux_root: Hash32,
    pub public_data: Vec<u8>,
}

#[derive(Serialize)]
struct CommitmentPreimage<'a> {
    old_state_root: Hash32,
    new_state_root: Hash32,
    aux_root: Hash32,
    timestamp: u64,
    public_data: &'a [u8],
}

/// Recompute a block commitment from raw inputs.
pub fn compute_commitment(
    old_state_root: Hash32,
    info: &CommitBlockInfo,
) -> Result<Hash32, CanonicalError> {
    canonical_hash(&CommitmentPreimage {
        old_state_root,
        new_state_root: info.new_state_root,
        aux_root: info.aux_root,
        timestamp: info.timestamp,
        public_data: &info.public_data,
    })
}

/// Lifecycle phase of a stored block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockPhase {
    Committed,
    Proved,
    Executed,
}

impl BlockPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Proved => "proved",
            Self::Executed => "executed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed)
    }
}

impl fmt::Display for BlockPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error type for invalid phase transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhaseTransitionError {
    #[error("block {number} is already {from} and cannot become {to}")]
    Terminal {
        number: u64,
        from: BlockPhase,
        to: BlockPhase,
    },
    #[error("block {number} cannot go from {from} back to {to}")]
    Backwards {
        number: u64,
        from: BlockPhase,
        to: BlockPhase,
    },
    #[error("block {number} cannot go from {from} to {to} without being {skipped}")]
    Skipped {
        number: u64,
        from: BlockPhase,
        to: BlockPhase,
        skipped: BlockPhase,
    },
}

/// Validate a phase transition for block `number`.
///
/// # Rules
///
/// 1. Executed blocks cannot transition.
/// 2. Phases only move forward.
/// 3. Phases cannot be skipped.
pub fn validate_transition(
    number: u64,
    from: BlockPhase,
    to: BlockPhase,
) -> Result<(), PhaseTransitionError> {
    if from.is_terminal() {
        return Err(PhaseTransitionError::Terminal { number, from, to });
    }
    match (from, to) {
        (BlockPhase::Committed, BlockPhase::Proved) | (BlockPhase::Proved, BlockPhase::Executed) => {
            Ok(())
        }
        (BlockPhase::Committed, BlockPhase::Executed) => Err(PhaseTransitionError::Skipped {
            number,
            from,
            to,
            skipped: BlockPhase::Proved,
        }),
        _ => Err(PhaseTransitionError::Backwards { number, from, to }),
    }
}

/// Block-lifecycle counters.
///
/// Invariant: `executed <= proved <= committed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCounters {
    pub committed: u64,
    pub proved: u64,
    pub executed: u64,
}

impl BlockCounters {
    pub fn phase_of(&self, number: u64) -> Option<BlockPhase> {
        if number <= self.executed {
            Some(BlockPhase::Executed)
        } else if number <= self.proved {
            Some(BlockPhase::Proved)
        } else if number <= self.committed {
            Some(BlockPhase::Committed)
        } else {
            None
        }
    }
}
