#![allow(dead_code)]

use std::sync::Arc;

use rollup_core::{
    canonical_hash_bytes, compute_commitment, encode_public_data, Address, CommitBlockInfo,
    CommitmentEchoVerifier, Hash32, L2Op, StoredBlock, TokenId,
};
use rollup_engine::pipeline::settlement_entries;
use rollup_engine::{EngineConfig, ExecuteBlockInfo, RollupEngine, TokenInfo};

pub const ETH: TokenId = 1;
pub const USDC: TokenId = 2;
pub const ONE_ETH: u128 = 1_000_000_000_000_000_000;
/// One ETH in L2 units.
pub const ONE_ETH_L2: u128 = 100_000_000;
pub const GENESIS_TS: u64 = 1_000;
pub const WINDOW: u64 = 14 * 24 * 60 * 60;

pub fn alice() -> Address {
    Address([0xA1; 20])
}

pub fn bob() -> Address {
    Address([0xB0; 20])
}

pub fn config() -> EngineConfig {
    EngineConfig {
        genesis_state_root: Hash32([0x11; 32]),
        genesis_timestamp: GENESIS_TS,
        ..EngineConfig::default()
    }
}

pub fn tokens() -> Vec<TokenInfo> {
    vec![
        TokenInfo {
            token_id: ETH,
            l1_address: Address([0xEE; 20]),
            decimals: 18,
        },
        TokenInfo {
            token_id: USDC,
            l1_address: Address([0xC0; 20]),
            decimals: 6,
        },
    ]
}

pub fn engine_with(config: EngineConfig) -> RollupEngine {
    RollupEngine::new(
        config,
        tokens(),
        Arc::new(CommitmentEchoVerifier),
        Arc::new(CommitmentEchoVerifier),
    )
}

pub fn engine() -> RollupEngine {
    engine_with(config())
}

pub fn state_root(number: u64) -> Hash32 {
    canonical_hash_bytes(&number.to_be_bytes())
}

/// Block data for the block after the last committed one.
pub fn next_block(engine: &RollupEngine, ops: &[L2Op], timestamp: u64) -> CommitBlockInfo {
    let number = engine.block_counters().committed + 1;
    CommitBlockInfo {
        number,
        timestamp,
        new_state_root: state_root(number),
        aux_root: Hash32::ZERO,
        public_data: encode_public_data(ops),
    }
}

pub fn last_committed(engine: &RollupEngine) -> StoredBlock {
    let number = engine.block_counters().committed;
    engine.stored_block(number).expect("last committed").clone()
}

pub fn last_executed(engine: &RollupEngine) -> StoredBlock {
    let number = engine.block_counters().executed;
    engine.stored_block(number).expect("last executed").clone()
}

pub fn commit(engine: &mut RollupEngine, ops: &[L2Op], timestamp: u64) -> StoredBlock {
    let parent = last_committed(engine);
    let info = next_block(engine, ops, timestamp);
    let mut blocks = engine
        .commit_blocks(&parent, &[info], timestamp)
        .expect("commit");
    blocks.remove(0)
}

/// Proof accepted by the commitment-echo verifier.
pub fn proof(block: &StoredBlock) -> Vec<u8> {
    block.commitment.0.to_vec()
}

pub fn execute_info(block: &StoredBlock, ops: &[L2Op]) -> ExecuteBlockInfo {
    let entries = settlement_entries(&encode_public_data(ops)).expect("entries");
    ExecuteBlockInfo::new(block.clone(), &entries)
}

/// Commit, verify and execute one block.
pub fn finalize(engine: &mut RollupEngine, ops: &[L2Op], timestamp: u64) -> StoredBlock {
    let block = commit(engine, ops, timestamp);
    engine
        .verify_blocks(&[block.clone()], &[proof(&block)])
        .expect("verify");
    engine
        .execute_blocks(&[execute_info(&block, ops)])
        .expect("execute");
    block
}

pub fn register_op(account_id: u32, address: Address) -> L2Op {
    L2Op::Register {
        account_id,
        l1_address: address,
    }
}

pub fn deposit_op(account_id: u32, token_id: TokenId, l2_amount: u128) -> L2Op {
    L2Op::Deposit {
        account_id,
        token_id,
        l2_amount,
    }
}

pub fn evacuation_op(account_id: u32, token_id: TokenId, l2_amount: u128) -> L2Op {
    L2Op::Evacuation {
        account_id,
        token_id,
        l2_amount,
    }
}

/// Claim block data plus the proof the echo verifier accepts for it.
pub fn claim(
    last_executed: &StoredBlock,
    number: u64,
    timestamp: u64,
    op: L2Op,
) -> (CommitBlockInfo, Vec<u8>) {
    let info = CommitBlockInfo {
        number,
        timestamp,
        new_state_root: state_root(number),
        aux_root: Hash32::ZERO,
        public_data: op.encode(),
    };
    let commitment = compute_commitment(last_executed.state_root, &info).expect("commitment");
    (info, commitment.0.to_vec())
}
