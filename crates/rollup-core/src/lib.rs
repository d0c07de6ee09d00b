#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_precision_loss)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]

//! Core types for the rollup ledger.
//!
//! This crate holds everything that must be byte-for-byte identical between
//! the operator, the engine and any independent checker: canonical encoding
//! and hashing, the public-data operation codec, block commitments, request
//! commitments, settlement hash chains and amount conversion.

pub mod amount;
pub mod block;
pub mod canonical;
pub mod events;
pub mod ops;
pub mod request;
pub mod settlement;
pub mod verifier;

pub use amount::{to_l1_amount, to_l2_amount, AmountError, L2_DECIMALS};
pub use block::{
    compute_commitment, validate_transition, BlockCounters, BlockPhase, CommitBlockInfo,
    PhaseTransitionError, StoredBlock,
};
pub use canonical::{
    canonical_decode, canonical_encode, canonical_hash, canonical_hash_bytes, fold_hash,
    fold_hash_chain, Address, CanonicalError, Hash32,
};
pub use events::RollupEvent;
pub use ops::{
    decode_public_data, encode_public_data, AccountId, L2Op, LoanSettlement, OpCode,
    OpCodecError, TokenId, CHUNK_BYTES,
};
pub use request::{L1Request, RequestCounters, RequestKind};
pub use settlement::{fold_settlement_hash, SettlementDecodeError, SettlementEntry};
pub use verifier::{
    CommitmentEchoVerifier, KeyedHashVerifier, ProofVerifier, StaticVerifier, VerifierKind,
};
