#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_precision_loss)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]

//! Rollup engine: L1 request queue, block pipeline and evacuation controller.
//!
//! The engine is a plain state machine. Every public mutating call validates
//! all of its input before touching state, so a rejected call has no effect.
//! Callers that need concurrent access go through [`actor::spawn`], which
//! serializes calls on a single task.
//!
//! ```text
//! users ── register/deposit/force_withdraw ──▶ RequestQueue
//! operator ── commit_blocks ──▶ prover ── verify_blocks ──▶ executor ── execute_blocks
//!                                   │
//!          (no execution for the expiration window)
//!                                   ▼
//! activate_evacuation ─▶ consume_l1_requests ─▶ evacuate ─▶ *_evacu_blocks ─▶ Normal
//! ```

pub mod actor;
pub mod blocks;
pub mod config;
pub mod error;
pub mod evacuation;
pub mod ledger;
pub mod pipeline;
pub mod queue;

use std::sync::Arc;

use rollup_core::{
    to_l2_amount, AccountId, Address, BlockCounters, L1Request, L2Op, ProofVerifier,
    RequestCounters, RequestKind, RollupEvent, StoredBlock, TokenId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use actor::{spawn, ActorError, EngineHandle, NoopPersister, PersistError, StatePersister};
pub use blocks::BlockStore;
pub use config::{EngineConfig, ExpirationAnchor, DEFAULT_EXPIRATION_WINDOW_SECS};
pub use error::RollupError;
pub use evacuation::{ClaimMarker, EvacuMode, EvacuationState};
pub use ledger::{
    AccountRegistry, FeeSink, LoanLedger, LoggingFeeSink, LoggingLoanLedger, PendingBalances,
    RecordingFeeSink, RecordingLoanLedger, TokenInfo, TokenRegistry,
};
pub use pipeline::ExecuteBlockInfo;
pub use queue::RequestQueue;

/// Everything the engine persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupState {
    pub queue: RequestQueue,
    pub blocks: BlockStore,
    pub evacuation: EvacuationState,
    pub accounts: AccountRegistry,
    pub tokens: TokenRegistry,
    pub pending: PendingBalances,
}

impl RollupState {
    /// Fresh state with only the genesis block.
    pub fn genesis(config: &EngineConfig, tokens: impl IntoIterator<Item = TokenInfo>) -> Self {
        Self {
            queue: RequestQueue::new(),
            blocks: BlockStore::new(StoredBlock::genesis(
                config.genesis_state_root,
                config.genesis_timestamp,
            )),
            evacuation: EvacuationState::default(),
            accounts: AccountRegistry::default(),
            tokens: TokenRegistry::new(tokens),
            pending: PendingBalances::default(),
        }
    }
}

pub struct RollupEngine {
    config: EngineConfig,
    state: RollupState,
    block_verifier: Arc<dyn ProofVerifier>,
    evacuation_verifier: Arc<dyn ProofVerifier>,
    loans: Arc<dyn LoanLedger>,
    fees: Arc<dyn FeeSink>,
    events: Vec<RollupEvent>,
}

impl RollupEngine {
    pub fn new(
        config: EngineConfig,
        tokens: impl IntoIterator<Item = TokenInfo>,
        block_verifier: Arc<dyn ProofVerifier>,
        evacuation_verifier: Arc<dyn ProofVerifier>,
    ) -> Self {
        let state = RollupState::genesis(&config, tokens);
        Self::with_state(config, state, block_verifier, evacuation_verifier)
    }

    /// Resume from previously persisted state.
    pub fn with_state(
        config: EngineConfig,
        state: RollupState,
        block_verifier: Arc<dyn ProofVerifier>,
        evacuation_verifier: Arc<dyn ProofVerifier>,
    ) -> Self {
        Self {
            config,
            state,
            block_verifier,
            evacuation_verifier,
            loans: Arc::new(LoggingLoanLedger),
            fees: Arc::new(LoggingFeeSink),
            events: Vec::new(),
        }
    }

    pub fn with_loan_ledger(mut self, loans: Arc<dyn LoanLedger>) -> Self {
        self.loans = loans;
        self
    }

    pub fn with_fee_sink(mut self, fees: Arc<dyn FeeSink>) -> Self {
        self.fees = fees;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &RollupState {
        &self.state
    }

    /// Drain events emitted since the last call.
    pub fn take_events(&mut self) -> Vec<RollupEvent> {
        std::mem::take(&mut self.events)
    }

    /// Put back `state` and drop the events of the discarded call.
    pub(crate) fn rollback(&mut self, state: RollupState) {
        self.state = state;
        self.events.clear();
    }

    fn emit(&mut self, event: RollupEvent) {
        self.events.push(event);
    }

    fn require_normal(&self) -> Result<(), RollupError> {
        if self.state.evacuation.is_active() {
            return Err(RollupError::EvacuModeActive);
        }
        Ok(())
    }

    fn require_evacuating(&self) -> Result<(), RollupError> {
        if !self.state.evacuation.is_active() {
            return Err(RollupError::NotEvacuMode);
        }
        Ok(())
    }

    // ========== Queries ==========

    pub fn block_counters(&self) -> BlockCounters {
        self.state.blocks.counters()
    }

    pub fn request_counters(&self) -> RequestCounters {
        self.state.queue.counters()
    }

    /// True iff request `id` is the queued request for `op`.
    pub fn is_in_request_queue(&self, op: &L2Op, id: u64) -> bool {
        match (op.request_kind(), op.request_payload()) {
            (Some(kind), Some(payload)) => {
                self.state.queue.verify_request(id, kind, &payload).is_ok()
            }
            _ => false,
        }
    }

    pub fn is_evacu_mode(&self) -> bool {
        self.state.evacuation.is_active()
    }

    pub fn is_evacuated(&self, account_id: AccountId, token_id: TokenId) -> bool {
        self.state.evacuation.is_evacuated(account_id, token_id)
    }

    pub fn pending_balance(&self, address: &Address, token_id: TokenId) -> u128 {
        self.state.pending.get(address, token_id)
    }

    pub fn stored_block(&self, number: u64) -> Option<&StoredBlock> {
        self.state.blocks.get(number)
    }

    pub fn l1_request(&self, id: u64) -> Option<&L1Request> {
        self.state.queue.get(id)
    }

    pub fn account_of(&self, address: &Address) -> Option<AccountId> {
        self.state.accounts.account_of(address)
    }

    // ========== User requests ==========

    fn enqueue(&mut self, kind: RequestKind, op: &L2Op, now: u64) -> u64 {
        let id = self.state.queue.enqueue(kind, &op.encode(), now);
        debug!(id, kind = %kind, "request enqueued");
        self.emit(RollupEvent::RequestEnqueued {
            id,
            kind,
            enqueued_at: now,
        });
        id
    }

    /// Register `address` with an initial deposit; returns the new account id.
    pub fn register(
        &mut self,
        address: Address,
        token_id: TokenId,
        l1_amount: u128,
        now: u64,
    ) -> Result<AccountId, RollupError> {
        self.require_normal()?;
        if let Some(existing) = self.state.accounts.account_of(&address) {
            debug!(address = %address, account_id = existing, "duplicate registration");
            return Err(RollupError::AlreadyRegistered { address });
        }
        let token = *self.state.tokens.get(token_id)?;
        let l2_amount = to_l2_amount(l1_amount, token.decimals)?;
        if l2_amount < self.config.min_register_deposit {
            return Err(RollupError::InsufficientDeposit {
                min: self.config.min_register_deposit,
                found: l2_amount,
            });
        }

        let account_id = self.state.accounts.allocate(address)?;
        self.enqueue(
            RequestKind::Register,
            &L2Op::Register {
                account_id,
                l1_address: address,
            },
            now,
        );
        self.enqueue(
            RequestKind::Deposit,
            &L2Op::Deposit {
                account_id,
                token_id,
                l2_amount,
            },
            now,
        );
        info!(address = %address, account_id, token_id, l2_amount = %l2_amount, "account registered");
        Ok(account_id)
    }

    /// Queue a deposit for a registered address; returns the request id.
    pub fn deposit(
        &mut self,
        address: Address,
        token_id: TokenId,
        l1_amount: u128,
        now: u64,
    ) -> Result<u64, RollupError> {
        self.require_normal()?;
        let account_id = self
            .state
            .accounts
            .account_of(&address)
            .ok_or(RollupError::UnregisteredAddress { address })?;
        let token = *self.state.tokens.get(token_id)?;
        if l1_amount == 0 {
            return Err(RollupError::InvalidAmount);
        }
        let l2_amount = to_l2_amount(l1_amount, token.decimals)?;
        Ok(self.enqueue(
            RequestKind::Deposit,
            &L2Op::Deposit {
                account_id,
                token_id,
                l2_amount,
            },
            now,
        ))
    }

    /// Queue a forced withdrawal of the full L2 balance; returns the request id.
    pub fn force_withdraw(
        &mut self,
        address: Address,
        token_id: TokenId,
        now: u64,
    ) -> Result<u64, RollupError> {
        self.require_normal()?;
        let account_id = self
            .state
            .accounts
            .account_of(&address)
            .ok_or(RollupError::UnregisteredAddress { address })?;
        self.state.tokens.get(token_id)?;
        Ok(self.enqueue(
            RequestKind::ForceWithdraw,
            &L2Op::ForceWithdraw {
                account_id,
                token_id,
                l2_amount: 0,
            },
            now,
        ))
    }
}

#[cfg(test)]
mod tests {
    use rollup_core::StaticVerifier;

    use super::*;

    fn engine() -> RollupEngine {
        RollupEngine::new(
            EngineConfig {
                min_register_deposit: 100,
                ..EngineConfig::default()
            },
            [TokenInfo {
                token_id: 1,
                l1_address: Address([0xEE; 20]),
                decimals: 8,
            }],
            Arc::new(StaticVerifier::accept_all()),
            Arc::new(StaticVerifier::accept_all()),
        )
    }

    #[test]
    fn register_enqueues_register_then_deposit() {
        let mut engine = engine();
        let alice = Address([1; 20]);
        let id = engine.register(alice, 1, 1_000, 10).unwrap();
        assert_eq!(id, 1);
        assert_eq!(engine.request_counters().total, 2);
        assert_eq!(engine.l1_request(0).unwrap().kind, RequestKind::Register);
        assert_eq!(engine.l1_request(1).unwrap().kind, RequestKind::Deposit);
        assert!(engine.is_in_request_queue(
            &L2Op::Deposit {
                account_id: 1,
                token_id: 1,
                l2_amount: 1_000
            },
            1
        ));
        assert_eq!(engine.take_events().len(), 2);
        assert!(engine.take_events().is_empty());
    }

    #[test]
    fn register_rejects_bad_input() {
        let mut engine = engine();
        let alice = Address([1; 20]);
        assert!(matches!(
            engine.register(alice, 1, 99, 0),
            Err(RollupError::InsufficientDeposit { min: 100, found: 99 })
        ));
        assert!(matches!(
            engine.register(alice, 7, 1_000, 0),
            Err(RollupError::UnknownToken { token_id: 7 })
        ));
        engine.register(alice, 1, 1_000, 0).unwrap();
        assert!(matches!(
            engine.register(alice, 1, 1_000, 0),
            Err(RollupError::AlreadyRegistered { .. })
        ));
        assert_eq!(engine.request_counters().total, 2);
    }

    #[test]
    fn deposit_and_force_withdraw_need_registration() {
        let mut engine = engine();
        let bob = Address([2; 20]);
        assert!(matches!(
            engine.deposit(bob, 1, 10, 0),
            Err(RollupError::UnregisteredAddress { .. })
        ));
        assert!(matches!(
            engine.force_withdraw(bob, 1, 0),
            Err(RollupError::UnregisteredAddress { .. })
        ));
        engine.register(bob, 1, 500, 0).unwrap();
        assert!(matches!(
            engine.deposit(bob, 1, 0, 0),
            Err(RollupError::InvalidAmount)
        ));
        assert_eq!(engine.deposit(bob, 1, 10, 0).unwrap(), 2);
        assert_eq!(engine.force_withdraw(bob, 1, 0).unwrap(), 3);
        assert!(engine.is_in_request_queue(
            &L2Op::ForceWithdraw {
                account_id: 1,
                token_id: 1,
                l2_amount: 777
            },
            3
        ));
    }
}
