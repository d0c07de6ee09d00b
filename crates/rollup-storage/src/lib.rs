#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_precision_loss)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]

//! Durable engine state on sled.
//!
//! Requests and blocks live in their own trees keyed by big-endian id, so a
//! persist only writes what changed. The header in the meta tree (cursors,
//! evacuation state, registries, pending balances) is the source of truth on
//! load: rows beyond its counters are ignored. Every persist commits the
//! request rows, block rows and header in a single sled transaction.

use std::path::Path;

use rollup_core::{canonical_decode, canonical_encode, L1Request, StoredBlock};
use rollup_engine::{
    AccountRegistry, BlockStore, EvacuationState, PendingBalances, PersistError, RequestQueue,
    RollupError, RollupState, StatePersister, TokenRegistry,
};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Transactional, Tree};
use thiserror::Error;
use tracing::{debug, info};

pub const SCHEMA_VERSION: &str = "1";
const META_SCHEMA_KEY: &[u8] = b"schema_version";
const META_HEADER_KEY: &[u8] = b"state_header";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),
    #[error("canonical encoding error: {0}")]
    Canonical(#[from] rollup_core::CanonicalError),
    #[error("schema mismatch: expected {expected}, found {found:?}")]
    SchemaMismatch {
        expected: String,
        found: Option<String>,
    },
    #[error("stored {what} {id} is missing")]
    Missing { what: &'static str, id: u64 },
    #[error("stored state is inconsistent: {0}")]
    Inconsistent(#[from] RollupError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateHeader {
    genesis: StoredBlock,
    requests_total: u64,
    requests_committed: u64,
    requests_executed: u64,
    blocks_committed: u64,
    blocks_proved: u64,
    blocks_executed: u64,
    evacuation: EvacuationState,
    accounts: AccountRegistry,
    tokens: TokenRegistry,
    pending: PendingBalances,
}

impl StateHeader {
    fn of(state: &RollupState) -> Self {
        let requests = state.queue.counters();
        let blocks = state.blocks.counters();
        Self {
            genesis: state.blocks.genesis().clone(),
            requests_total: requests.total,
            requests_committed: requests.committed,
            requests_executed: requests.executed,
            blocks_committed: blocks.committed,
            blocks_proved: blocks.proved,
            blocks_executed: blocks.executed,
            evacuation: state.evacuation.clone(),
            accounts: state.accounts.clone(),
            tokens: state.tokens.clone(),
            pending: state.pending.clone(),
        }
    }
}

/// Rows and header prepared for one persist.
struct StagedWrite {
    requests: sled::Batch,
    blocks: sled::Batch,
    header: Vec<u8>,
    requests_written: usize,
    blocks_written: usize,
    blocks_removed: usize,
}

pub struct Storage {
    db: sled::Db,
    requests: Tree,
    blocks: Tree,
    meta: Tree,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let requests = db.open_tree("requests")?;
        let blocks = db.open_tree("blocks")?;
        let meta = db.open_tree("meta")?;
        let storage = Self {
            db,
            requests,
            blocks,
            meta,
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Write `state`, touching only rows that may have changed since the last call.
    ///
    /// All three trees are updated in one transaction, so a crash leaves
    /// either the previous state or the new one.
    pub fn persist(&self, state: &RollupState) -> Result<(), StorageError> {
        let staged = self.stage(state)?;
        self.commit(&staged)?;
        self.db.flush()?;
        debug!(
            requests = staged.requests_written,
            blocks = staged.blocks_written,
            blocks_removed = staged.blocks_removed,
            "state persisted"
        );
        Ok(())
    }

    fn stage(&self, state: &RollupState) -> Result<StagedWrite, StorageError> {
        let previous = self.header()?;

        let stored_requests = previous.as_ref().map_or(0, |h| h.requests_total);
        let mut requests = sled::Batch::default();
        let mut requests_written = 0usize;
        for request in state.queue.requests_from(stored_requests) {
            requests.insert(request.id.to_be_bytes().to_vec(), canonical_encode(request)?);
            requests_written += 1;
        }

        // Blocks at or below the executed cursor never change.
        let counters = state.blocks.counters();
        let stable = previous
            .as_ref()
            .map_or(0, |h| h.blocks_executed)
            .min(counters.executed);
        let mut blocks = sled::Batch::default();
        let mut blocks_removed = 0usize;
        for entry in self.blocks.range(counters.committed.saturating_add(1).to_be_bytes()..) {
            let (key, _) = entry?;
            blocks.remove(key);
            blocks_removed += 1;
        }
        let mut blocks_written = 0usize;
        for block in state.blocks.blocks_from(stable.saturating_add(1)) {
            blocks.insert(block.number.to_be_bytes().to_vec(), canonical_encode(block)?);
            blocks_written += 1;
        }

        Ok(StagedWrite {
            requests,
            blocks,
            header: canonical_encode(&StateHeader::of(state))?,
            requests_written,
            blocks_written,
            blocks_removed,
        })
    }

    fn commit(&self, staged: &StagedWrite) -> Result<(), StorageError> {
        let result = (&self.requests, &self.blocks, &self.meta).transaction(
            |(requests, blocks, meta)| {
                requests.apply_batch(&staged.requests)?;
                blocks.apply_batch(&staged.blocks)?;
                meta.insert(META_HEADER_KEY, staged.header.as_slice())?;
                Ok::<(), ConflictableTransactionError<StorageError>>(())
            },
        );
        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(StorageError::Sled(e)),
        }
    }

    /// Load the last persisted state, if any.
    pub fn load(&self) -> Result<Option<RollupState>, StorageError> {
        let Some(header) = self.header()? else {
            return Ok(None);
        };

        let mut requests = Vec::new();
        for id in 0..header.requests_total {
            let bytes = self
                .requests
                .get(id.to_be_bytes())?
                .ok_or(StorageError::Missing { what: "request", id })?;
            requests.push(canonical_decode::<L1Request>(&bytes)?);
        }
        let queue = RequestQueue::from_parts(
            requests,
            header.requests_committed,
            header.requests_executed,
        )?;

        let mut blocks = Vec::new();
        for number in 1..=header.blocks_committed {
            let bytes = self
                .blocks
                .get(number.to_be_bytes())?
                .ok_or(StorageError::Missing {
                    what: "block",
                    id: number,
                })?;
            blocks.push(canonical_decode::<StoredBlock>(&bytes)?);
        }
        let blocks = BlockStore::from_parts(
            header.genesis,
            blocks,
            header.blocks_proved,
            header.blocks_executed,
        )?;

        info!(
            requests = header.requests_total,
            blocks = header.blocks_committed,
            evacuating = header.evacuation.is_active(),
            "state loaded"
        );
        Ok(Some(RollupState {
            queue,
            blocks,
            evacuation: header.evacuation,
            accounts: header.accounts,
            tokens: header.tokens,
            pending: header.pending,
        }))
    }

    fn header(&self) -> Result<Option<StateHeader>, StorageError> {
        self.meta
            .get(META_HEADER_KEY)
            .map(|opt| opt.map(|ivec| canonical_decode(&ivec)))?
            .transpose()
            .map_err(Into::into)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let existing = self.meta.get(META_SCHEMA_KEY)?;
        match existing {
            Some(val) => {
                let current = String::from_utf8_lossy(&val).to_string();
                if current != SCHEMA_VERSION {
                    return Err(StorageError::SchemaMismatch {
                        expected: SCHEMA_VERSION.to_string(),
                        found: Some(current),
                    });
                }
            }
            None => {
                self.meta
                    .insert(META_SCHEMA_KEY, SCHEMA_VERSION.as_bytes())?;
                info!(schema = SCHEMA_VERSION, "initialized schema version");
            }
        }
        Ok(())
    }
}

impl StatePersister for Storage {
    fn persist(&self, state: &RollupState) -> Result<(), PersistError> {
        Storage::persist(self, state).map_err(Into::into)
    }
}
