//! L1 request types.
//!
//! Users on the base ledger submit requests (register, deposit, forced
//! withdrawal) that the operator must include in a rollup block. Only the
//! commitment of each payload is retained; the payload is re-supplied and
//! checked when the request is consumed.

use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_hash_bytes, Hash32};

/// Kind of a queued L1 request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Register,
    Deposit,
    ForceWithdraw,
    /// Claim accepted while evacuating; settled by the restore pipeline.
    Evacuation,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Deposit => "deposit",
            Self::ForceWithdraw => "force_withdraw",
            Self::Evacuation => "evacuation",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued L1 request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1Request {
    /// Sequential id; equals the queue length at the time of enqueueing.
    pub id: u64,
    pub kind: RequestKind,
    /// BLAKE3 hash of the request payload.
    pub commitment: Hash32,
    /// Base-ledger timestamp (seconds) when the request was enqueued.
    pub enqueued_at: u64,
}

impl L1Request {
    pub fn new(id: u64, kind: RequestKind, payload: &[u8], enqueued_at: u64) -> Self {
        Self {
            id,
            kind,
            commitment: canonical_hash_bytes(payload),
            enqueued_at,
        }
    }

    /// Check a re-supplied payload against the stored commitment.
    pub fn matches(&self, payload: &[u8]) -> bool {
        canonical_hash_bytes(payload) == self.commitment
    }

    /// Timestamp from which the request counts as stalled.
    pub fn expires_at(&self, window_secs: u64) -> u64 {
        self.enqueued_at.saturating_add(window_secs)
    }

    pub fn is_expired(&self, now: u64, window_secs: u64) -> bool {
        now >= self.expires_at(window_secs)
    }
}

/// The three request-queue cursors.
///
/// Invariant: `executed <= committed <= total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounters {
    pub committed: u64,
    pub executed: u64,
    pub total: u64,
}

impl RequestCounters {
    pub fn is_consistent(&self) -> bool {
        self.executed <= self.committed && self.committed <= self.total
    }

    /// Requests enqueued but not yet executed.
    pub fn pending(&self) -> u64 {
        self.total.saturating_sub(self.executed)
    }
}
