use rollup_core::{BlockCounters, StoredBlock};
use serde::{Deserialize, Serialize};

use crate::error::RollupError;
use crate::queue::len_u64;

/// Committed block headers, indexed by block number.
///
/// Block 0 is genesis and is always present. `executed <= proved <= committed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStore {
    genesis: StoredBlock,
    blocks: Vec<StoredBlock>,
    proved: u64,
    executed: u64,
}

impl BlockStore {
    pub fn new(genesis: StoredBlock) -> Self {
        Self {
            genesis,
            blocks: Vec::new(),
            proved: 0,
            executed: 0,
        }
    }

    pub fn from_parts(
        genesis: StoredBlock,
        blocks: Vec<StoredBlock>,
        proved: u64,
        executed: u64,
    ) -> Result<Self, RollupError> {
        let store = Self {
            genesis,
            blocks,
            proved,
            executed,
        };
        let numbered = store
            .blocks
            .iter()
            .enumerate()
            .all(|(i, b)| b.number == len_u64(i).saturating_add(1));
        if !numbered || store.executed > store.proved || store.proved > store.committed() {
            return Err(RollupError::CursorViolation);
        }
        Ok(store)
    }

    pub fn committed(&self) -> u64 {
        len_u64(self.blocks.len())
    }

    pub fn proved(&self) -> u64 {
        self.proved
    }

    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub fn counters(&self) -> BlockCounters {
        BlockCounters {
            committed: self.committed(),
            proved: self.proved,
            executed: self.executed,
        }
    }

    pub fn genesis(&self) -> &StoredBlock {
        &self.genesis
    }

    pub fn get(&self, number: u64) -> Option<&StoredBlock> {
        if number == 0 {
            return Some(&self.genesis);
        }
        usize::try_from(number - 1)
            .ok()
            .and_then(|i| self.blocks.get(i))
    }

    /// Blocks numbered `from` and above.
    pub fn blocks_from(&self, from: u64) -> &[StoredBlock] {
        let start = usize::try_from(from.saturating_sub(1))
            .unwrap_or(usize::MAX)
            .min(self.blocks.len());
        &self.blocks[start..]
    }

    pub fn last_committed(&self) -> &StoredBlock {
        self.blocks.last().unwrap_or(&self.genesis)
    }

    pub fn last_executed(&self) -> &StoredBlock {
        self.get(self.executed).unwrap_or(&self.genesis)
    }

    pub(crate) fn append(&mut self, block: StoredBlock) {
        self.blocks.push(block);
    }

    pub(crate) fn mark_proved(&mut self, count: u64) {
        self.proved = self.proved.saturating_add(count).min(self.committed());
    }

    pub(crate) fn mark_executed(&mut self, count: u64) {
        self.executed = self.executed.saturating_add(count).min(self.proved);
    }

    /// Drop every block above `number`. Executed blocks are never dropped.
    pub(crate) fn truncate_to(&mut self, number: u64) -> Result<(), RollupError> {
        if number < self.executed {
            return Err(RollupError::CannotRevertExecuted {
                number: self.executed,
            });
        }
        let keep = usize::try_from(number).unwrap_or(usize::MAX);
        self.blocks.truncate(keep);
        self.proved = self.proved.min(number);
        Ok(())
    }
}
