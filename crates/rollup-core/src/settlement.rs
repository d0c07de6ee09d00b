//! Pending settlement entries.
//!
//! Operations with a base-ledger effect are not applied when their block is
//! committed. Instead the commit folds them into a hash chain, and the
//! executor later re-supplies the entries, which must fold back to the same
//! hash before any effect is applied.

use serde::{Deserialize, Serialize};

use crate::canonical::{fold_hash, Hash32};
use crate::ops::{AccountId, L2Op, LoanSettlement, OpCodecError, TokenId};

/// A settlement entry, tagged by the operation that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementEntry {
    Withdraw {
        account_id: AccountId,
        token_id: TokenId,
        l2_amount: u128,
    },
    ForceWithdraw {
        account_id: AccountId,
        token_id: TokenId,
        l2_amount: u128,
    },
    LoanSettlement(LoanSettlement),
    FeeWithdrawal {
        token_id: TokenId,
        l2_amount: u128,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementDecodeError {
    #[error(transparent)]
    Codec(#[from] OpCodecError),
    #[error("operation {0:?} has no base-ledger settlement")]
    NotSettlement(crate::ops::OpCode),
}

impl SettlementEntry {
    /// The settlement entry for an operation, if it carries one.
    pub fn from_op(op: &L2Op) -> Option<Self> {
        match *op {
            L2Op::Withdraw {
                account_id,
                token_id,
                l2_amount,
            } => Some(Self::Withdraw {
                account_id,
                token_id,
                l2_amount,
            }),
            L2Op::ForceWithdraw {
                account_id,
                token_id,
                l2_amount,
            } => Some(Self::ForceWithdraw {
                account_id,
                token_id,
                l2_amount,
            }),
            L2Op::LoanSettlement(loan) => Some(Self::LoanSettlement(loan)),
            L2Op::FeeWithdrawal {
                token_id,
                l2_amount,
            } => Some(Self::FeeWithdrawal {
                token_id,
                l2_amount,
            }),
            _ => None,
        }
    }

    pub fn to_op(&self) -> L2Op {
        match *self {
            Self::Withdraw {
                account_id,
                token_id,
                l2_amount,
            } => L2Op::Withdraw {
                account_id,
                token_id,
                l2_amount,
            },
            Self::ForceWithdraw {
                account_id,
                token_id,
                l2_amount,
            } => L2Op::ForceWithdraw {
                account_id,
                token_id,
                l2_amount,
            },
            Self::LoanSettlement(loan) => L2Op::LoanSettlement(loan),
            Self::FeeWithdrawal {
                token_id,
                l2_amount,
            } => L2Op::FeeWithdrawal {
                token_id,
                l2_amount,
            },
        }
    }

    /// Bytes folded into the settlement hash: the operation's public-data encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_op().encode()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SettlementDecodeError> {
        let op = L2Op::decode(bytes)?;
        Self::from_op(&op).ok_or(SettlementDecodeError::NotSettlement(op.opcode()))
    }
}

/// Fold entries into the settlement hash, starting from zero.
pub fn fold_settlement_hash(entries: &[SettlementEntry]) -> Hash32 {
    entries
        .iter()
        .fold(Hash32::ZERO, |acc, entry| fold_hash(acc, &entry.to_bytes()))
}
