//! Commit / verify / execute over the block store and the request queue.
//!
//! The three phases are shared between normal operation and the evacuation
//! restore pipeline; the commit scope selects which operations a block may
//! carry.

use rollup_core::{
    compute_commitment, decode_public_data, fold_hash, to_l1_amount, validate_transition,
    Address, BlockPhase, CommitBlockInfo, Hash32, LoanSettlement, OpCode, RollupEvent,
    SettlementEntry, StoredBlock, TokenId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RollupError;
use crate::queue::len_u64;
use crate::RollupEngine;

/// A proved block together with the settlement entries its commit folded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteBlockInfo {
    pub block: StoredBlock,
    /// Encoded settlement operations, in public-data order.
    pub pending_settlements: Vec<Vec<u8>>,
}

impl ExecuteBlockInfo {
    pub fn new(block: StoredBlock, entries: &[SettlementEntry]) -> Self {
        Self {
            block,
            pending_settlements: entries.iter().map(SettlementEntry::to_bytes).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommitScope {
    Normal,
    /// Restore pipeline: only Noop and Evacuation operations.
    Evacuation,
}

impl CommitScope {
    fn allows(self, opcode: OpCode) -> bool {
        match self {
            Self::Normal => opcode != OpCode::Evacuation,
            Self::Evacuation => matches!(opcode, OpCode::Noop | OpCode::Evacuation),
        }
    }
}

/// Base-ledger effect of one settlement entry, resolved before anything is applied.
enum SettlementEffect {
    Credit {
        address: Address,
        token_id: TokenId,
        amount: u128,
    },
    Loan {
        loan: LoanSettlement,
        borrower: Address,
    },
    Fee {
        token_id: TokenId,
        amount: u128,
    },
}

impl RollupEngine {
    /// Commit new blocks on top of `parent`, which must be the last committed block.
    pub fn commit_blocks(
        &mut self,
        parent: &StoredBlock,
        candidates: &[CommitBlockInfo],
        now: u64,
    ) -> Result<Vec<StoredBlock>, RollupError> {
        self.require_normal()?;
        self.commit_chain(CommitScope::Normal, parent, candidates, now)
    }

    /// Attach proofs to the next committed blocks.
    pub fn verify_blocks(
        &mut self,
        blocks: &[StoredBlock],
        proofs: &[Vec<u8>],
    ) -> Result<(), RollupError> {
        self.require_normal()?;
        self.verify_chain(blocks, proofs)
    }

    /// Execute the next proved blocks and apply their settlements.
    pub fn execute_blocks(&mut self, blocks: &[ExecuteBlockInfo]) -> Result<(), RollupError> {
        self.require_normal()?;
        self.execute_chain(blocks)
    }

    /// Drop committed but unexecuted blocks, given newest first.
    pub fn revert_blocks(&mut self, blocks: &[StoredBlock]) -> Result<(), RollupError> {
        self.require_normal()?;
        if blocks.is_empty() {
            return Err(RollupError::EmptyBatch);
        }
        let store = &self.state.blocks;
        let mut number = store.committed();
        let mut requests = 0u64;
        for block in blocks {
            if number <= store.executed() {
                return Err(RollupError::CannotRevertExecuted { number });
            }
            let stored = store
                .get(number)
                .ok_or(RollupError::BlockNotCommitted { number })?;
            if stored.hash()? != block.hash()? {
                return Err(RollupError::BlockMismatch { number });
            }
            requests = requests.saturating_add(stored.requests_consumed);
            number -= 1;
        }
        let queue_target = self
            .state
            .queue
            .committed()
            .checked_sub(requests)
            .ok_or(RollupError::CursorViolation)?;
        if queue_target < self.state.queue.executed() {
            return Err(RollupError::CursorViolation);
        }

        self.state.blocks.truncate_to(number)?;
        self.state.queue.rewind_committed(queue_target)?;
        let count = len_u64(blocks.len());
        info!(count, committed = number, requests, "blocks reverted");
        self.emit(RollupEvent::BlocksReverted {
            count,
            committed: number,
        });
        Ok(())
    }

    /// Pull a pending balance out to the base ledger.
    pub fn withdraw_pending(
        &mut self,
        address: Address,
        token_id: TokenId,
        amount: u128,
    ) -> Result<(), RollupError> {
        if amount == 0 {
            return Err(RollupError::InvalidAmount);
        }
        self.state.pending.debit(&address, token_id, amount)?;
        info!(address = %address, token_id, amount = %amount, "pending balance withdrawn");
        self.emit(RollupEvent::PendingBalanceWithdrawn {
            address,
            token_id,
            amount,
        });
        Ok(())
    }

    pub(crate) fn commit_chain(
        &mut self,
        scope: CommitScope,
        parent: &StoredBlock,
        candidates: &[CommitBlockInfo],
        now: u64,
    ) -> Result<Vec<StoredBlock>, RollupError> {
        if candidates.is_empty() {
            return Err(RollupError::EmptyBatch);
        }
        let last = self.state.blocks.last_committed();
        if parent.hash()? != last.hash()? {
            return Err(RollupError::ParentMismatch {
                expected: last.number,
            });
        }

        let limit = now.saturating_add(self.config.max_future_drift_secs);
        let mut prev = last.clone();
        let mut cursor = self.state.queue.committed();
        let mut prepared = Vec::with_capacity(candidates.len());
        for info in candidates {
            let block = self.prepare_block(scope, &prev, info, limit, &mut cursor)?;
            prev = block.clone();
            prepared.push(block);
        }

        let consumed = cursor - self.state.queue.committed();
        self.state.queue.advance_committed(consumed)?;
        for block in &prepared {
            self.state.blocks.append(block.clone());
            info!(
                number = block.number,
                requests_consumed = block.requests_consumed,
                commitment = %block.commitment,
                "block committed"
            );
            self.emit(RollupEvent::BlockCommitted {
                number: block.number,
                requests_consumed: block.requests_consumed,
            });
        }
        Ok(prepared)
    }

    fn prepare_block(
        &self,
        scope: CommitScope,
        prev: &StoredBlock,
        info: &CommitBlockInfo,
        timestamp_limit: u64,
        cursor: &mut u64,
    ) -> Result<StoredBlock, RollupError> {
        let expected = prev.number.saturating_add(1);
        if info.number != expected {
            return Err(RollupError::BlockNumberMismatch {
                expected,
                found: info.number,
            });
        }
        if info.timestamp <= prev.timestamp {
            return Err(RollupError::NonMonotonicTimestamp {
                number: info.number,
                timestamp: info.timestamp,
                parent: prev.timestamp,
            });
        }
        if info.timestamp > timestamp_limit {
            return Err(RollupError::TimestampInFuture {
                number: info.number,
                timestamp: info.timestamp,
                limit: timestamp_limit,
            });
        }

        let ops = decode_public_data(&info.public_data)?;
        let mut requests_consumed = 0u64;
        let mut settlement_hash = Hash32::ZERO;
        for op in &ops {
            let opcode = op.opcode();
            if !scope.allows(opcode) {
                return Err(RollupError::OperationNotAllowed(opcode));
            }
            if let (Some(kind), Some(payload)) = (op.request_kind(), op.request_payload()) {
                self.state.queue.verify_request(*cursor, kind, &payload)?;
                *cursor += 1;
                requests_consumed += 1;
            }
            if let Some(entry) = SettlementEntry::from_op(op) {
                settlement_hash = fold_hash(settlement_hash, &entry.to_bytes());
            }
        }

        Ok(StoredBlock {
            number: info.number,
            requests_consumed,
            pending_settlement_hash: settlement_hash,
            commitment: compute_commitment(prev.state_root, info)?,
            state_root: info.new_state_root,
            timestamp: info.timestamp,
        })
    }

    pub(crate) fn verify_chain(
        &mut self,
        blocks: &[StoredBlock],
        proofs: &[Vec<u8>],
    ) -> Result<(), RollupError> {
        if blocks.is_empty() {
            return Err(RollupError::EmptyBatch);
        }
        if blocks.len() != proofs.len() {
            return Err(RollupError::ProofCountMismatch {
                blocks: blocks.len(),
                proofs: proofs.len(),
            });
        }
        let counters = self.state.blocks.counters();
        for (offset, (block, proof)) in (1u64..).zip(blocks.iter().zip(proofs)) {
            let number = counters.proved + offset;
            let phase = counters
                .phase_of(number)
                .ok_or(RollupError::BlockNotCommitted { number })?;
            validate_transition(number, phase, BlockPhase::Proved)?;
            self.require_stored(number, block)?;
            if !self.block_verifier.verify(&block.commitment, proof) {
                return Err(RollupError::ProofRejected { number });
            }
        }

        self.state.blocks.mark_proved(len_u64(blocks.len()));
        for block in blocks {
            info!(number = block.number, verifier = self.block_verifier.name(), "block verified");
            self.emit(RollupEvent::BlockVerified {
                number: block.number,
                requests_consumed: block.requests_consumed,
            });
        }
        Ok(())
    }

    pub(crate) fn execute_chain(&mut self, blocks: &[ExecuteBlockInfo]) -> Result<(), RollupError> {
        if blocks.is_empty() {
            return Err(RollupError::EmptyBatch);
        }
        let counters = self.state.blocks.counters();
        let mut effects = Vec::new();
        let mut requests = 0u64;
        for (offset, info) in (1u64..).zip(blocks) {
            let number = counters.executed + offset;
            match counters.phase_of(number) {
                Some(BlockPhase::Proved) => {}
                Some(BlockPhase::Committed) => return Err(RollupError::BlockNotProved { number }),
                Some(phase) => validate_transition(number, phase, BlockPhase::Executed)?,
                None => return Err(RollupError::BlockNotCommitted { number }),
            }
            self.require_stored(number, &info.block)?;

            let mut hash = Hash32::ZERO;
            for bytes in &info.pending_settlements {
                let entry = SettlementEntry::from_bytes(bytes)?;
                hash = fold_hash(hash, bytes);
                effects.push(self.resolve_settlement(&entry)?);
            }
            if hash != info.block.pending_settlement_hash {
                return Err(RollupError::SettlementHashMismatch { number });
            }
            requests = requests.saturating_add(info.block.requests_consumed);
        }
        let queue = &self.state.queue;
        if queue.executed().saturating_add(requests) > queue.committed() {
            return Err(RollupError::CursorViolation);
        }

        for effect in effects {
            match effect {
                SettlementEffect::Credit {
                    address,
                    token_id,
                    amount,
                } => {
                    debug!(address = %address, token_id, amount = %amount, "withdrawal credited");
                    self.state.pending.credit(address, token_id, amount);
                }
                SettlementEffect::Loan { loan, borrower } => {
                    self.loans.settle_loan(&loan, borrower);
                }
                SettlementEffect::Fee { token_id, amount } => {
                    self.fees.credit_fee(token_id, amount);
                }
            }
        }
        self.state.queue.advance_executed(requests)?;
        self.state.blocks.mark_executed(len_u64(blocks.len()));
        for info in blocks {
            info!(
                number = info.block.number,
                requests_consumed = info.block.requests_consumed,
                settlements = info.pending_settlements.len(),
                "block executed"
            );
            self.emit(RollupEvent::BlockExecuted {
                number: info.block.number,
                requests_consumed: info.block.requests_consumed,
            });
        }
        Ok(())
    }

    fn require_stored(&self, number: u64, block: &StoredBlock) -> Result<(), RollupError> {
        let stored = self
            .state
            .blocks
            .get(number)
            .ok_or(RollupError::BlockNotCommitted { number })?;
        if stored.hash()? != block.hash()? {
            return Err(RollupError::BlockMismatch { number });
        }
        Ok(())
    }

    fn resolve_settlement(&self, entry: &SettlementEntry) -> Result<SettlementEffect, RollupError> {
        match *entry {
            SettlementEntry::Withdraw {
                account_id,
                token_id,
                l2_amount,
            }
            | SettlementEntry::ForceWithdraw {
                account_id,
                token_id,
                l2_amount,
            } => {
                let address = self.state.accounts.require_address(account_id)?;
                let token = self.state.tokens.get(token_id)?;
                Ok(SettlementEffect::Credit {
                    address,
                    token_id,
                    amount: to_l1_amount(l2_amount, token.decimals)?,
                })
            }
            SettlementEntry::LoanSettlement(loan) => Ok(SettlementEffect::Loan {
                loan,
                borrower: self.state.accounts.require_address(loan.account_id)?,
            }),
            SettlementEntry::FeeWithdrawal {
                token_id,
                l2_amount,
            } => {
                let token = self.state.tokens.get(token_id)?;
                Ok(SettlementEffect::Fee {
                    token_id,
                    amount: to_l1_amount(l2_amount, token.decimals)?,
                })
            }
        }
    }
}

/// Settlement entries a block's public data folds into its settlement hash.
pub fn settlement_entries(public_data: &[u8]) -> Result<Vec<SettlementEntry>, RollupError> {
    Ok(decode_public_data(public_data)?
        .iter()
        .filter_map(SettlementEntry::from_op)
        .collect())
}

