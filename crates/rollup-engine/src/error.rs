use rollup_core::{
    Address, AmountError, CanonicalError, OpCode, OpCodecError, PhaseTransitionError,
    RequestKind, SettlementDecodeError, TokenId,
};
use thiserror::Error;

/// Every way an engine call can be rejected.
///
/// A rejected call never leaves partial state behind.
#[derive(Debug, Error)]
pub enum RollupError {
    // Chain linkage
    #[error("parent block does not match the last committed block {expected}")]
    ParentMismatch { expected: u64 },
    #[error("expected block number {expected}, found {found}")]
    BlockNumberMismatch { expected: u64, found: u64 },
    #[error("block {number} timestamp {timestamp} is not after parent timestamp {parent}")]
    NonMonotonicTimestamp {
        number: u64,
        timestamp: u64,
        parent: u64,
    },
    #[error("block {number} timestamp {timestamp} is beyond the allowed drift (limit {limit})")]
    TimestampInFuture {
        number: u64,
        timestamp: u64,
        limit: u64,
    },
    #[error("block {number} is not committed")]
    BlockNotCommitted { number: u64 },
    #[error("block {number} does not match the stored header")]
    BlockMismatch { number: u64 },
    #[error("block {number} is not proved")]
    BlockNotProved { number: u64 },
    #[error("last executed block does not match block {expected}")]
    LastExecutedMismatch { expected: u64 },
    #[error("block {number} is executed and cannot be reverted")]
    CannotRevertExecuted { number: u64 },
    #[error(transparent)]
    Phase(#[from] PhaseTransitionError),

    // Proofs and settlement
    #[error("proof rejected for block {number}")]
    ProofRejected { number: u64 },
    #[error("got {proofs} proofs for {blocks} blocks")]
    ProofCountMismatch { blocks: usize, proofs: usize },
    #[error("settlement entries of block {number} do not fold to the committed hash")]
    SettlementHashMismatch { number: u64 },

    // Request queue
    #[error("requested {requested} requests but only {available} are available")]
    RequestOverflow { requested: u64, available: u64 },
    #[error("payload does not match queued request {id}")]
    RequestMismatch { id: u64 },
    #[error("request {id} is a {expected} request, operation resolves {found}")]
    RequestKindMismatch {
        id: u64,
        expected: RequestKind,
        found: String,
    },
    #[error("request {id} does not exist")]
    UnknownRequest { id: u64 },
    #[error("cursor update would break executed <= committed <= total")]
    CursorViolation,

    // Mode
    #[error("evacuation mode is active")]
    EvacuModeActive,
    #[error("evacuation mode is not active")]
    NotEvacuMode,
    #[error("no request has expired yet (deadline {deadline}, now {now})")]
    NotExpired { deadline: u64, now: u64 },
    #[error("no unexecuted requests")]
    NoPendingRequests,
    #[error("queue not drained: executed {executed}, drain target {target}")]
    NotFullyConsumed { executed: u64, target: u64 },

    // Idempotency and claims
    #[error("account {account_id} already evacuated token {token_id}")]
    AlreadyEvacuated { account_id: u32, token_id: TokenId },
    #[error("claim block {number} at {timestamp} is not after the last accepted claim")]
    ClaimOutOfOrder { number: u64, timestamp: u64 },
    #[error("claim public data must hold exactly one evacuation operation")]
    InvalidClaimData,

    // Input and codec
    #[error(transparent)]
    Codec(#[from] OpCodecError),
    #[error(transparent)]
    Settlement(#[from] SettlementDecodeError),
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    #[error(transparent)]
    Amount(#[from] AmountError),
    #[error("operation {0:?} is not allowed here")]
    OperationNotAllowed(OpCode),
    #[error("unknown token {token_id}")]
    UnknownToken { token_id: TokenId },
    #[error("unknown account {account_id}")]
    UnknownAccount { account_id: u32 },
    #[error("address {address} is not registered")]
    UnregisteredAddress { address: Address },
    #[error("address {address} is already registered")]
    AlreadyRegistered { address: Address },
    #[error("no account ids left")]
    AccountsExhausted,
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("register deposit {found} is below the minimum {min}")]
    InsufficientDeposit { min: u128, found: u128 },
    #[error("pending balance {available} is below the requested {requested}")]
    InsufficientPendingBalance { available: u128, requested: u128 },
    #[error("empty batch")]
    EmptyBatch,
}

impl RollupError {
    /// Stable reason code, used in logs, HTTP responses and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParentMismatch { .. } => "parent_mismatch",
            Self::BlockNumberMismatch { .. } => "block_number_mismatch",
            Self::NonMonotonicTimestamp { .. } => "non_monotonic_timestamp",
            Self::TimestampInFuture { .. } => "timestamp_in_future",
            Self::BlockNotCommitted { .. } => "block_not_committed",
            Self::BlockMismatch { .. } => "block_mismatch",
            Self::BlockNotProved { .. } => "block_not_proved",
            Self::LastExecutedMismatch { .. } => "last_executed_mismatch",
            Self::CannotRevertExecuted { .. } => "cannot_revert_executed",
            Self::Phase(_) => "invalid_phase_transition",
            Self::ProofRejected { .. } => "proof_rejected",
            Self::ProofCountMismatch { .. } => "proof_count_mismatch",
            Self::SettlementHashMismatch { .. } => "settlement_hash_mismatch",
            Self::RequestOverflow { .. } => "request_overflow",
            Self::RequestMismatch { .. } => "request_mismatch",
            Self::RequestKindMismatch { .. } => "request_kind_mismatch",
            Self::UnknownRequest { .. } => "unknown_request",
            Self::CursorViolation => "cursor_violation",
            Self::EvacuModeActive => "evacu_mode_active",
            Self::NotEvacuMode => "not_evacu_mode",
            Self::NotExpired { .. } => "not_expired",
            Self::NoPendingRequests => "no_pending_requests",
            Self::NotFullyConsumed { .. } => "not_fully_consumed",
            Self::AlreadyEvacuated { .. } => "already_evacuated",
            Self::ClaimOutOfOrder { .. } => "claim_out_of_order",
            Self::InvalidClaimData => "invalid_claim_data",
            Self::Codec(_) => "invalid_public_data",
            Self::Settlement(_) => "invalid_settlement_entry",
            Self::Canonical(_) => "canonical_encoding",
            Self::Amount(_) => "invalid_amount",
            Self::OperationNotAllowed(_) => "operation_not_allowed",
            Self::UnknownToken { .. } => "unknown_token",
            Self::UnknownAccount { .. } => "unknown_account",
            Self::UnregisteredAddress { .. } => "unregistered_address",
            Self::AlreadyRegistered { .. } => "already_registered",
            Self::AccountsExhausted => "accounts_exhausted",
            Self::InvalidAmount => "invalid_amount",
            Self::InsufficientDeposit { .. } => "insufficient_deposit",
            Self::InsufficientPendingBalance { .. } => "insufficient_pending_balance",
            Self::EmptyBatch => "empty_batch",
        }
    }
}
