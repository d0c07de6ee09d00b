//! Evacuation: the forced-exit path when the operator stops executing blocks.
//!
//! ```text
//! Normal ──activate_evacuation──▶ Evacuating ──execute_evacu_blocks (queue empty)──▶ Normal
//! ```
//!
//! While evacuating, anyone may drain the queue up to the activation-time
//! total, then each `(account, token)` pair may be claimed once against the
//! last executed state root. Claims are queued as Evacuation requests and
//! cleared by the restore pipeline, which ends the cycle.

use std::collections::BTreeSet;

use rollup_core::{
    compute_commitment, to_l1_amount, AccountId, Address, CommitBlockInfo, L2Op, RequestKind,
    RollupEvent, StoredBlock, TokenId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ExpirationAnchor;
use crate::error::RollupError;
use crate::pipeline::{CommitScope, ExecuteBlockInfo};
use crate::queue::len_u64;
use crate::RollupEngine;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvacuMode {
    #[default]
    Normal,
    Evacuating,
}

/// Block number and timestamp of the last accepted claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimMarker {
    pub number: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvacuationState {
    pub mode: EvacuMode,
    /// Queue total when the mode was activated.
    pub drain_target: u64,
    pub last_claim: Option<ClaimMarker>,
    pub evacuated: BTreeSet<(AccountId, TokenId)>,
    pub activated_at: Option<u64>,
}

impl EvacuationState {
    pub fn is_active(&self) -> bool {
        self.mode == EvacuMode::Evacuating
    }

    pub fn is_evacuated(&self, account_id: AccountId, token_id: TokenId) -> bool {
        self.evacuated.contains(&(account_id, token_id))
    }
}

/// Resolved effect of one drained request.
enum DrainEffect {
    Refund {
        address: Address,
        token_id: TokenId,
        amount: u128,
    },
    None,
}

impl RollupEngine {
    /// Earliest time at which evacuation may be activated, if any request is pending.
    pub fn evacuation_deadline(&self) -> Option<u64> {
        let oldest = self.state.queue.oldest_unexecuted()?;
        let anchor = match self.config.expiration_anchor {
            ExpirationAnchor::OldestRequest => oldest.enqueued_at,
            ExpirationAnchor::LastExecution => self.state.blocks.last_executed().timestamp,
        };
        Some(anchor.saturating_add(self.config.expiration_window_secs))
    }

    pub fn can_activate_evacuation(&self, now: u64) -> bool {
        !self.is_evacu_mode() && self.evacuation_deadline().is_some_and(|d| now >= d)
    }

    /// Switch to evacuation mode once a request has gone unexecuted for too long.
    ///
    /// Committed but unexecuted blocks are discarded.
    pub fn activate_evacuation(&mut self, now: u64) -> Result<(), RollupError> {
        self.require_normal()?;
        let deadline = self
            .evacuation_deadline()
            .ok_or(RollupError::NoPendingRequests)?;
        if now < deadline {
            return Err(RollupError::NotExpired { deadline, now });
        }

        let executed_blocks = self.state.blocks.executed();
        let discarded = self.state.blocks.committed() - executed_blocks;
        self.state.blocks.truncate_to(executed_blocks)?;
        let executed_requests = self.state.queue.executed();
        self.state.queue.rewind_committed(executed_requests)?;

        let last = self.state.blocks.last_executed();
        let marker = ClaimMarker {
            number: last.number,
            timestamp: last.timestamp,
        };
        let drain_target = self.state.queue.total();
        self.state.evacuation = EvacuationState {
            mode: EvacuMode::Evacuating,
            drain_target,
            last_claim: Some(marker),
            evacuated: BTreeSet::new(),
            activated_at: Some(now),
        };
        info!(
            now,
            deadline,
            drain_target,
            discarded_blocks = discarded,
            "evacuation mode activated"
        );
        self.emit(RollupEvent::EvacuModeActivated {
            at: now,
            drain_target,
        });
        Ok(())
    }

    /// Permissionlessly drain the next queued requests, refunding deposits.
    ///
    /// Returns the new executed cursor.
    pub fn consume_l1_requests(&mut self, payloads: &[Vec<u8>]) -> Result<u64, RollupError> {
        self.require_evacuating()?;
        if payloads.is_empty() {
            return Err(RollupError::EmptyBatch);
        }
        let start = self.state.queue.executed();
        let target = self.state.evacuation.drain_target;
        let requested = len_u64(payloads.len());
        let available = target.saturating_sub(start);
        if requested > available {
            return Err(RollupError::RequestOverflow {
                requested,
                available,
            });
        }

        let mut effects = Vec::with_capacity(payloads.len());
        for (id, payload) in (start..).zip(payloads) {
            let op = L2Op::decode(payload)?;
            let kind = op
                .request_kind()
                .ok_or(RollupError::OperationNotAllowed(op.opcode()))?;
            self.state.queue.verify_request(id, kind, payload)?;
            let effect = match op {
                L2Op::Deposit {
                    account_id,
                    token_id,
                    l2_amount,
                } => {
                    let address = self.state.accounts.require_address(account_id)?;
                    let token = self.state.tokens.get(token_id)?;
                    DrainEffect::Refund {
                        address,
                        token_id,
                        amount: to_l1_amount(l2_amount, token.decimals)?,
                    }
                }
                L2Op::Register { .. } | L2Op::ForceWithdraw { .. } => DrainEffect::None,
                other => return Err(RollupError::OperationNotAllowed(other.opcode())),
            };
            debug!(id, kind = %kind, "request drained");
            effects.push(effect);
        }

        for effect in effects {
            if let DrainEffect::Refund {
                address,
                token_id,
                amount,
            } = effect
            {
                self.state.pending.credit(address, token_id, amount);
            }
        }
        self.state.queue.advance_committed(requested)?;
        self.state.queue.advance_executed(requested)?;
        let executed = self.state.queue.executed();
        info!(consumed = requested, executed, drain_target = target, "queue drained");
        Ok(executed)
    }

    /// Accept a claim for one `(account, token)` balance at the last executed state.
    ///
    /// Returns the id of the queued Evacuation request.
    pub fn evacuate(
        &mut self,
        last_executed: &StoredBlock,
        claim: &CommitBlockInfo,
        proof: &[u8],
        now: u64,
    ) -> Result<u64, RollupError> {
        self.require_evacuating()?;
        let executed = self.state.queue.executed();
        let target = self.state.evacuation.drain_target;
        if executed < target {
            return Err(RollupError::NotFullyConsumed { executed, target });
        }

        let stored = self.state.blocks.last_executed();
        if stored.hash()? != last_executed.hash()? {
            return Err(RollupError::LastExecutedMismatch {
                expected: stored.number,
            });
        }

        let (account_id, token_id, l2_amount) = match L2Op::decode(&claim.public_data) {
            Ok(L2Op::Evacuation {
                account_id,
                token_id,
                l2_amount,
            }) => (account_id, token_id, l2_amount),
            _ => return Err(RollupError::InvalidClaimData),
        };
        if self.state.evacuation.is_evacuated(account_id, token_id) {
            return Err(RollupError::AlreadyEvacuated {
                account_id,
                token_id,
            });
        }
        if let Some(last) = self.state.evacuation.last_claim {
            if claim.number <= last.number || claim.timestamp <= last.timestamp {
                return Err(RollupError::ClaimOutOfOrder {
                    number: claim.number,
                    timestamp: claim.timestamp,
                });
            }
        }

        let commitment = compute_commitment(stored.state_root, claim)?;
        if !self.evacuation_verifier.verify(&commitment, proof) {
            return Err(RollupError::ProofRejected {
                number: claim.number,
            });
        }
        let address = self.state.accounts.require_address(account_id)?;
        let token = *self.state.tokens.get(token_id)?;
        let amount = to_l1_amount(l2_amount, token.decimals)?;

        self.state.evacuation.evacuated.insert((account_id, token_id));
        self.state.evacuation.last_claim = Some(ClaimMarker {
            number: claim.number,
            timestamp: claim.timestamp,
        });
        let op = L2Op::Evacuation {
            account_id,
            token_id,
            l2_amount,
        };
        let request_id = self
            .state
            .queue
            .enqueue(RequestKind::Evacuation, &op.encode(), now);
        self.state.pending.credit(address, token_id, amount);
        info!(
            address = %address,
            account_id,
            token_id,
            amount = %amount,
            request_id,
            "evacuation accepted"
        );
        self.emit(RollupEvent::RequestEnqueued {
            id: request_id,
            kind: RequestKind::Evacuation,
            enqueued_at: now,
        });
        self.emit(RollupEvent::Evacuation {
            address,
            request_id,
            token: token.l1_address,
            token_id,
            account_id,
            amount,
        });
        Ok(request_id)
    }

    /// Commit restore blocks carrying the queued evacuation claims.
    pub fn commit_evacu_blocks(
        &mut self,
        parent: &StoredBlock,
        candidates: &[CommitBlockInfo],
        now: u64,
    ) -> Result<Vec<StoredBlock>, RollupError> {
        self.require_drained()?;
        self.commit_chain(CommitScope::Evacuation, parent, candidates, now)
    }

    pub fn verify_evacu_blocks(
        &mut self,
        blocks: &[StoredBlock],
        proofs: &[Vec<u8>],
    ) -> Result<(), RollupError> {
        self.require_drained()?;
        self.verify_chain(blocks, proofs)
    }

    /// Execute restore blocks; leaves evacuation mode once every claim is executed.
    pub fn execute_evacu_blocks(&mut self, blocks: &[StoredBlock]) -> Result<(), RollupError> {
        self.require_drained()?;
        let infos: Vec<ExecuteBlockInfo> = blocks
            .iter()
            .map(|block| ExecuteBlockInfo::new(block.clone(), &[]))
            .collect();
        self.execute_chain(&infos)?;

        let counters = self.state.queue.counters();
        if counters.executed == counters.total {
            self.state.evacuation = EvacuationState::default();
            info!(executed = counters.executed, "evacuation mode deactivated");
            self.emit(RollupEvent::EvacuModeDeactivated);
        }
        Ok(())
    }

    fn require_drained(&self) -> Result<(), RollupError> {
        self.require_evacuating()?;
        let executed = self.state.queue.executed();
        let target = self.state.evacuation.drain_target;
        if executed < target {
            return Err(RollupError::NotFullyConsumed { executed, target });
        }
        Ok(())
    }
}
