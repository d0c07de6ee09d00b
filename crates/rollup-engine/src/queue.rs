use rollup_core::{L1Request, RequestCounters, RequestKind};
use serde::{Deserialize, Serialize};

use crate::error::RollupError;

pub(crate) fn len_u64(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

/// Append-only queue of L1 request commitments with its two consumption cursors.
///
/// `executed <= committed <= total` holds after every call; a cursor update
/// that would break it is rejected without effect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestQueue {
    requests: Vec<L1Request>,
    committed: u64,
    executed: u64,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a queue from persisted parts.
    pub fn from_parts(
        requests: Vec<L1Request>,
        committed: u64,
        executed: u64,
    ) -> Result<Self, RollupError> {
        let queue = Self {
            requests,
            committed,
            executed,
        };
        let ids_sequential = queue
            .requests
            .iter()
            .enumerate()
            .all(|(i, r)| r.id == len_u64(i));
        if !ids_sequential || !queue.counters().is_consistent() {
            return Err(RollupError::CursorViolation);
        }
        Ok(queue)
    }

    pub fn enqueue(&mut self, kind: RequestKind, payload: &[u8], now: u64) -> u64 {
        let id = self.total();
        self.requests.push(L1Request::new(id, kind, payload, now));
        id
    }

    pub fn total(&self) -> u64 {
        len_u64(self.requests.len())
    }

    pub fn committed(&self) -> u64 {
        self.committed
    }

    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub fn counters(&self) -> RequestCounters {
        RequestCounters {
            committed: self.committed,
            executed: self.executed,
            total: self.total(),
        }
    }

    pub fn get(&self, id: u64) -> Option<&L1Request> {
        usize::try_from(id).ok().and_then(|i| self.requests.get(i))
    }

    pub fn requests(&self) -> &[L1Request] {
        &self.requests
    }

    /// Requests with `id >= from`, used for incremental persistence.
    pub fn requests_from(&self, from: u64) -> &[L1Request] {
        let start = usize::try_from(from)
            .unwrap_or(usize::MAX)
            .min(self.requests.len());
        &self.requests[start..]
    }

    pub fn oldest_unexecuted(&self) -> Option<&L1Request> {
        self.get(self.executed)
    }

    /// True iff request `id` exists and `payload` hashes to its commitment.
    pub fn verify_membership(&self, id: u64, payload: &[u8]) -> bool {
        self.get(id).is_some_and(|r| r.matches(payload))
    }

    /// Check that request `id` exists, has `kind`, and commits to `payload`.
    pub fn verify_request(
        &self,
        id: u64,
        kind: RequestKind,
        payload: &[u8],
    ) -> Result<&L1Request, RollupError> {
        let request = self.get(id).ok_or(RollupError::UnknownRequest { id })?;
        if request.kind != kind {
            return Err(RollupError::RequestKindMismatch {
                id,
                expected: request.kind,
                found: kind.to_string(),
            });
        }
        if !request.matches(payload) {
            return Err(RollupError::RequestMismatch { id });
        }
        Ok(request)
    }

    pub fn advance_committed(&mut self, n: u64) -> Result<(), RollupError> {
        let next = self
            .committed
            .checked_add(n)
            .ok_or(RollupError::CursorViolation)?;
        if next > self.total() {
            return Err(RollupError::CursorViolation);
        }
        self.committed = next;
        Ok(())
    }

    pub fn advance_executed(&mut self, n: u64) -> Result<(), RollupError> {
        let next = self
            .executed
            .checked_add(n)
            .ok_or(RollupError::CursorViolation)?;
        if next > self.committed {
            return Err(RollupError::CursorViolation);
        }
        self.executed = next;
        Ok(())
    }

    /// Move `committed` back to `to`, never below `executed`.
    pub fn rewind_committed(&mut self, to: u64) -> Result<(), RollupError> {
        if to < self.executed || to > self.committed {
            return Err(RollupError::CursorViolation);
        }
        self.committed = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(n: u64) -> RequestQueue {
        let mut queue = RequestQueue::new();
        for i in 0..n {
            queue.enqueue(RequestKind::Deposit, &i.to_be_bytes(), 100 + i);
        }
        queue
    }

    #[test]
    fn ids_are_sequential() {
        let mut queue = RequestQueue::new();
        assert_eq!(queue.enqueue(RequestKind::Register, b"a", 1), 0);
        assert_eq!(queue.enqueue(RequestKind::Deposit, b"b", 1), 1);
        assert_eq!(queue.total(), 2);
        assert_eq!(queue.get(1).unwrap().kind, RequestKind::Deposit);
        assert!(queue.get(2).is_none());
    }

    #[test]
    fn membership_checks_commitment() {
        let queue = queue_with(2);
        assert!(queue.verify_membership(1, &1u64.to_be_bytes()));
        assert!(!queue.verify_membership(1, &0u64.to_be_bytes()));
        assert!(!queue.verify_membership(7, &1u64.to_be_bytes()));
    }

    #[test]
    fn verify_request_reports_reason() {
        let queue = queue_with(1);
        assert!(matches!(
            queue.verify_request(0, RequestKind::Register, &0u64.to_be_bytes()),
            Err(RollupError::RequestKindMismatch { id: 0, .. })
        ));
        assert!(matches!(
            queue.verify_request(0, RequestKind::Deposit, b"x"),
            Err(RollupError::RequestMismatch { id: 0 })
        ));
        assert!(matches!(
            queue.verify_request(3, RequestKind::Deposit, b"x"),
            Err(RollupError::UnknownRequest { id: 3 })
        ));
    }

    #[test]
    fn cursors_cannot_overtake() {
        let mut queue = queue_with(3);
        assert!(queue.advance_executed(1).is_err());
        queue.advance_committed(2).unwrap();
        assert!(queue.advance_committed(2).is_err());
        queue.advance_executed(2).unwrap();
        assert!(queue.advance_executed(1).is_err());
        assert_eq!(
            queue.counters(),
            RequestCounters {
                committed: 2,
                executed: 2,
                total: 3
            }
        );
    }

    #[test]
    fn rewind_stops_at_executed() {
        let mut queue = queue_with(4);
        queue.advance_committed(3).unwrap();
        queue.advance_executed(1).unwrap();
        assert!(queue.rewind_committed(0).is_err());
        queue.rewind_committed(1).unwrap();
        assert_eq!(queue.committed(), 1);
        assert_eq!(queue.oldest_unexecuted().unwrap().id, 1);
    }

    #[test]
    fn from_parts_validates() {
        let queue = queue_with(2);
        let requests = queue.requests().to_vec();
        assert!(RequestQueue::from_parts(requests.clone(), 2, 1).is_ok());
        assert!(RequestQueue::from_parts(requests.clone(), 1, 2).is_err());
        assert!(RequestQueue::from_parts(requests[1..].to_vec(), 0, 0).is_err());
        assert_eq!(queue.requests_from(1).len(), 1);
        assert!(queue.requests_from(9).is_empty());
    }
}
