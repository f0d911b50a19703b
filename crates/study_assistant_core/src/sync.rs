//! crates/study_assistant_core/src/sync.rs
//!
//! Primitives for reconciling refetched state with overlapping fetches.

use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one issued fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket(u64);

/// A per-subscription generation counter.
///
/// Refetches may resolve in any order. Only the result of the most recently
/// *issued* fetch may be applied; everything older is stale on arrival.
#[derive(Debug, Default)]
pub struct FetchGeneration {
    latest: AtomicU64,
}

impl FetchGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> FetchTicket {
        FetchTicket(self.latest.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn is_latest(&self, ticket: FetchTicket) -> bool {
        self.latest.load(Ordering::Acquire) == ticket.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_newest_ticket_is_current() {
        let generation = FetchGeneration::new();
        let first = generation.issue();
        assert!(generation.is_latest(first));

        let second = generation.issue();
        assert!(!generation.is_latest(first));
        assert!(generation.is_latest(second));
        assert!(second > first);
    }
}
