//! Public-data codec for rollup blocks.
//!
//! Public data is a flat sequence of fixed-size chunks. Every operation starts
//! with a one-byte opcode and occupies a fixed number of chunks, so a block can
//! be scanned without trusting any operator-declared offsets. Integers are
//! big-endian and unused trailing bytes of an operation must be zero.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::canonical::Address;
use crate::request::RequestKind;

/// Size of one public-data chunk in bytes.
pub const CHUNK_BYTES: usize = 16;

pub type AccountId = u32;
pub type TokenId = u16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpCodecError {
    #[error("unknown opcode {opcode} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },
    #[error("public data length {len} is not a multiple of the chunk size")]
    UnalignedLength { len: usize },
    #[error("truncated {opcode:?} operation at offset {offset}")]
    Truncated { opcode: OpCode, offset: usize },
    #[error("non-zero padding in {opcode:?} operation at offset {offset}")]
    DirtyPadding { opcode: OpCode, offset: usize },
    #[error("expected exactly one operation of {expected} bytes, got {found} bytes")]
    LengthMismatch { expected: usize, found: usize },
}

/// Operation codes and their fixed chunk widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpCode {
    Noop = 0,
    Register = 1,
    Deposit = 2,
    ForceWithdraw = 3,
    Transfer = 4,
    Withdraw = 5,
    LoanSettlement = 6,
    FeeWithdrawal = 7,
    Evacuation = 8,
}

impl OpCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Noop),
            1 => Some(Self::Register),
            2 => Some(Self::Deposit),
            3 => Some(Self::ForceWithdraw),
            4 => Some(Self::Transfer),
            5 => Some(Self::Withdraw),
            6 => Some(Self::LoanSettlement),
            7 => Some(Self::FeeWithdrawal),
            8 => Some(Self::Evacuation),
            _ => None,
        }
    }

    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Number of chunks an operation of this kind occupies.
    pub const fn chunks(self) -> usize {
        match self {
            Self::Noop => 1,
            Self::LoanSettlement => 3,
            Self::Register
            | Self::Deposit
            | Self::ForceWithdraw
            | Self::Transfer
            | Self::Withdraw
            | Self::FeeWithdrawal
            | Self::Evacuation => 2,
        }
    }

    pub const fn byte_len(self) -> usize {
        self.chunks() * CHUNK_BYTES
    }

    /// Operations that resolve a queued L1 request.
    pub const fn request_kind(self) -> Option<RequestKind> {
        match self {
            Self::Register => Some(RequestKind::Register),
            Self::Deposit => Some(RequestKind::Deposit),
            Self::ForceWithdraw => Some(RequestKind::ForceWithdraw),
            Self::Evacuation => Some(RequestKind::Evacuation),
            _ => None,
        }
    }

    /// Operations whose effect must be applied on the base ledger after execution.
    pub const fn needs_settlement(self) -> bool {
        matches!(
            self,
            Self::ForceWithdraw | Self::Withdraw | Self::LoanSettlement | Self::FeeWithdrawal
        )
    }
}

/// Loan settlement emitted by the lending engine on L2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanSettlement {
    pub account_id: AccountId,
    pub collateral_token_id: TokenId,
    pub collateral_amount: u128,
    pub debt_token_id: TokenId,
    pub debt_amount: u128,
    pub maturity: u32,
}

/// A decoded public-data operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum L2Op {
    Noop,
    Register {
        account_id: AccountId,
        l1_address: Address,
    },
    Deposit {
        account_id: AccountId,
        token_id: TokenId,
        l2_amount: u128,
    },
    ForceWithdraw {
        account_id: AccountId,
        token_id: TokenId,
        l2_amount: u128,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        token_id: TokenId,
        l2_amount: u128,
    },
    Withdraw {
        account_id: AccountId,
        token_id: TokenId,
        l2_amount: u128,
    },
    LoanSettlement(LoanSettlement),
    FeeWithdrawal {
        token_id: TokenId,
        l2_amount: u128,
    },
    Evacuation {
        account_id: AccountId,
        token_id: TokenId,
        l2_amount: u128,
    },
}

impl L2Op {
    pub fn opcode(&self) -> OpCode {
        match self {
            Self::Noop => OpCode::Noop,
            Self::Register { .. } => OpCode::Register,
            Self::Deposit { .. } => OpCode::Deposit,
            Self::ForceWithdraw { .. } => OpCode::ForceWithdraw,
            Self::Transfer { .. } => OpCode::Transfer,
            Self::Withdraw { .. } => OpCode::Withdraw,
            Self::LoanSettlement(_) => OpCode::LoanSettlement,
            Self::FeeWithdrawal { .. } => OpCode::FeeWithdrawal,
            Self::Evacuation { .. } => OpCode::Evacuation,
        }
    }

    /// Encode into the fixed-width, zero-padded chunk layout.
    pub fn encode(&self) -> Vec<u8> {
        let opcode = self.opcode();
        let mut w = OpWriter::new(opcode);
        match *self {
            Self::Noop => {}
            Self::Register {
                account_id,
                l1_address,
            } => {
                w.put_u32(account_id);
                w.put_bytes(&l1_address.0);
            }
            Self::Deposit {
                account_id,
                token_id,
                l2_amount,
            }
            | Self::ForceWithdraw {
                account_id,
                token_id,
                l2_amount,
            }
            | Self::Withdraw {
                account_id,
                token_id,
                l2_amount,
            }
            | Self::Evacuation {
                account_id,
                token_id,
                l2_amount,
            } => {
                w.put_u32(account_id);
                w.put_u16(token_id);
                w.put_u128(l2_amount);
            }
            Self::Transfer {
                from,
                to,
                token_id,
                l2_amount,
            } => {
                w.put_u32(from);
                w.put_u32(to);
                w.put_u16(token_id);
                w.put_u128(l2_amount);
            }
            Self::LoanSettlement(loan) => {
                w.put_u32(loan.account_id);
                w.put_u16(loan.collateral_token_id);
                w.put_u128(loan.collateral_amount);
                w.put_u16(loan.debt_token_id);
                w.put_u128(loan.debt_amount);
                w.put_u32(loan.maturity);
            }
            Self::FeeWithdrawal {
                token_id,
                l2_amount,
            } => {
                w.put_u16(token_id);
                w.put_u128(l2_amount);
            }
        }
        w.finish()
    }

    /// Decode exactly one operation; the slice must have the opcode's width.
    pub fn decode(bytes: &[u8]) -> Result<Self, OpCodecError> {
        let first = *bytes.first().ok_or(OpCodecError::LengthMismatch {
            expected: CHUNK_BYTES,
            found: 0,
        })?;
        let opcode = OpCode::from_byte(first)
            .ok_or(OpCodecError::UnknownOpcode { opcode: first, offset: 0 })?;
        if bytes.len() != opcode.byte_len() {
            return Err(OpCodecError::LengthMismatch {
                expected: opcode.byte_len(),
                found: bytes.len(),
            });
        }
        decode_at(bytes, 0).map(|(op, _)| op)
    }

    /// The request kind this operation resolves, if it consumes an L1 request.
    pub fn request_kind(&self) -> Option<RequestKind> {
        self.opcode().request_kind()
    }

    /// Bytes whose hash the request queue stores for this operation.
    ///
    /// A forced withdrawal is enqueued before its amount is known, so its
    /// request payload carries a zero amount regardless of what L2 fills in.
    pub fn request_payload(&self) -> Option<Vec<u8>> {
        match *self {
            Self::ForceWithdraw {
                account_id,
                token_id,
                ..
            } => Some(
                Self::ForceWithdraw {
                    account_id,
                    token_id,
                    l2_amount: 0,
                }
                .encode(),
            ),
            ref op if op.request_kind().is_some() => Some(op.encode()),
            _ => None,
        }
    }
}

/// Decode a full block's public data into its operations, in order.
pub fn decode_public_data(data: &[u8]) -> Result<Vec<L2Op>, OpCodecError> {
    if data.len() % CHUNK_BYTES != 0 {
        return Err(OpCodecError::UnalignedLength { len: data.len() });
    }
    let mut ops = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let (op, next) = decode_at(data, offset)?;
        ops.push(op);
        offset = next;
    }
    Ok(ops)
}

/// Concatenate encoded operations into block public data.
pub fn encode_public_data(ops: &[L2Op]) -> Vec<u8> {
    ops.iter().flat_map(L2Op::encode).collect()
}

fn decode_at(data: &[u8], offset: usize) -> Result<(L2Op, usize), OpCodecError> {
    let byte = data[offset];
    let opcode =
        OpCode::from_byte(byte).ok_or(OpCodecError::UnknownOpcode { opcode: byte, offset })?;
    let end = offset + opcode.byte_len();
    if end > data.len() {
        return Err(OpCodecError::Truncated { opcode, offset });
    }
    let mut r = OpReader {
        bytes: &data[offset..end],
        pos: 1,
    };
    let op = match opcode {
        OpCode::Noop => L2Op::Noop,
        OpCode::Register => L2Op::Register {
            account_id: r.u32(),
            l1_address: Address(r.array()),
        },
        OpCode::Deposit => L2Op::Deposit {
            account_id: r.u32(),
            token_id: r.u16(),
            l2_amount: r.u128(),
        },
        OpCode::ForceWithdraw => L2Op::ForceWithdraw {
            account_id: r.u32(),
            token_id: r.u16(),
            l2_amount: r.u128(),
        },
        OpCode::Transfer => L2Op::Transfer {
            from: r.u32(),
            to: r.u32(),
            token_id: r.u16(),
            l2_amount: r.u128(),
        },
        OpCode::Withdraw => L2Op::Withdraw {
            account_id: r.u32(),
            token_id: r.u16(),
            l2_amount: r.u128(),
        },
        OpCode::LoanSettlement => L2Op::LoanSettlement(LoanSettlement {
            account_id: r.u32(),
            collateral_token_id: r.u16(),
            collateral_amount: r.u128(),
            debt_token_id: r.u16(),
            debt_amount: r.u128(),
            maturity: r.u32(),
        }),
        OpCode::FeeWithdrawal => L2Op::FeeWithdrawal {
            token_id: r.u16(),
            l2_amount: r.u128(),
        },
        OpCode::Evacuation => L2Op::Evacuation {
            account_id: r.u32(),
            token_id: r.u16(),
            l2_amount: r.u128(),
        },
    };
    if !r.padding_is_zero() {
        return Err(OpCodecError::DirtyPadding { opcode, offset });
    }
    Ok((op, end))
}

struct OpWriter {
    buf: Vec<u8>,
    len: usize,
}

impl OpWriter {
    fn new(opcode: OpCode) -> Self {
        let len = opcode.byte_len();
        let mut buf = Vec::with_capacity(len);
        buf.push(opcode.as_byte());
        Self { buf, len }
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn put_u16(&mut self, v: u16) {
        self.put_bytes(&v.to_be_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.put_bytes(&v.to_be_bytes());
    }

    fn put_u128(&mut self, v: u128) {
        self.put_bytes(&v.to_be_bytes());
    }

    fn finish(mut self) -> Vec<u8> {
        self.buf.resize(self.len, 0);
        self.buf
    }
}

/// Reader over a slice already checked to hold the full operation width.
struct OpReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl OpReader<'_> {
    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u16(&mut self) -> u16 {
        u16::from_be_bytes(self.array())
    }

    fn u32(&mut self) -> u32 {
        u32::from_be_bytes(self.array())
    }

    fn u128(&mut self) -> u128 {
        u128::from_be_bytes(self.array())
    }

    fn padding_is_zero(&self) -> bool {
        self.bytes[self.pos..].iter().all(|b| *b == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ops() -> Vec<L2Op> {
        vec![
            L2Op::Register {
                account_id: 1,
                l1_address: Address([0x11; 20]),
            },
            L2Op::Deposit {
                account_id: 1,
                token_id: 2,
                l2_amount: 1_000_000_000,
            },
            L2Op::Noop,
            L2Op::LoanSettlement(LoanSettlement {
                account_id: 1,
                collateral_token_id: 2,
                collateral_amount: 5,
                debt_token_id: 3,
                debt_amount: 7,
                maturity: 1_700_000_000,
            }),
            L2Op::FeeWithdrawal {
                token_id: 2,
                l2_amount: 9,
            },
        ]
    }

    #[test]
    fn every_layout_fits_its_width() {
        for op in sample_ops() {
            assert_eq!(op.encode().len(), op.opcode().byte_len(), "{op:?}");
        }
    }

    #[test]
    fn public_data_scan_recovers_operations() {
        let ops = sample_ops();
        let data = encode_public_data(&ops);
        assert_eq!(data.len() % CHUNK_BYTES, 0);
        assert_eq!(decode_public_data(&data).unwrap(), ops);
    }

    #[test]
    fn deposit_layout_is_big_endian() {
        let op = L2Op::Deposit {
            account_id: 0x0102_0304,
            token_id: 0x0506,
            l2_amount: 1,
        };
        let bytes = op.encode();
        assert_eq!(&bytes[..7], &[2, 1, 2, 3, 4, 5, 6]);
        assert_eq!(bytes[22], 1);
        assert!(bytes[23..].iter().all(|b| *b == 0));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let mut data = vec![0u8; CHUNK_BYTES];
        data[0] = 0xFE;
        assert_eq!(
            decode_public_data(&data),
            Err(OpCodecError::UnknownOpcode {
                opcode: 0xFE,
                offset: 0
            })
        );
    }

    #[test]
    fn truncated_operation_is_rejected() {
        let mut data = L2Op::Noop.encode();
        data.extend_from_slice(&L2Op::Withdraw {
            account_id: 1,
            token_id: 1,
            l2_amount: 1,
        }
        .encode()[..CHUNK_BYTES]);
        assert!(matches!(
            decode_public_data(&data),
            Err(OpCodecError::Truncated {
                opcode: OpCode::Withdraw,
                offset: 16
            })
        ));
    }

    #[test]
    fn unaligned_length_is_rejected() {
        assert_eq!(
            decode_public_data(&[0u8; 17]),
            Err(OpCodecError::UnalignedLength { len: 17 })
        );
    }

    #[test]
    fn dirty_padding_is_rejected() {
        let mut bytes = L2Op::FeeWithdrawal {
            token_id: 1,
            l2_amount: 1,
        }
        .encode();
        let last = bytes.len() - 1;
        bytes[last] = 1;
        assert!(matches!(
            L2Op::decode(&bytes),
            Err(OpCodecError::DirtyPadding { .. })
        ));
    }

    #[test]
    fn single_decode_requires_exact_width() {
        let mut bytes = L2Op::Evacuation {
            account_id: 1,
            token_id: 1,
            l2_amount: 1,
        }
        .encode();
        bytes.extend_from_slice(&[0u8; CHUNK_BYTES]);
        assert_eq!(
            L2Op::decode(&bytes),
            Err(OpCodecError::LengthMismatch {
                expected: 32,
                found: 48
            })
        );
    }

    #[test]
    fn force_withdraw_request_payload_ignores_amount() {
        let queued = L2Op::ForceWithdraw {
            account_id: 4,
            token_id: 1,
            l2_amount: 0,
        };
        let filled = L2Op::ForceWithdraw {
            account_id: 4,
            token_id: 1,
            l2_amount: 123,
        };
        assert_eq!(filled.request_payload(), Some(queued.encode()));
    }

    #[test]
    fn l2_only_operations_have_no_request_payload() {
        let transfer = L2Op::Transfer {
            from: 1,
            to: 2,
            token_id: 1,
            l2_amount: 5,
        };
        assert!(transfer.request_payload().is_none());
        assert!(!OpCode::Transfer.needs_settlement());
        assert!(OpCode::Withdraw.needs_settlement());
        assert!(!OpCode::Evacuation.needs_settlement());
    }
}
