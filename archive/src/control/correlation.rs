//! Per-session correlation id sequence.

use crate::control::types::CorrelationId;

/// Upper bound for a randomly chosen first id, leaving 2^62 ids of headroom.
const MAX_SEED: u64 = 1 << 62;

/// Monotonically increasing source of [`CorrelationId`]s.
///
/// Owned by one session and driven from its single calling thread, so no
/// synchronisation is involved.
#[derive(Debug)]
pub struct CorrelationIdGenerator {
    next: u64,
}

impl CorrelationIdGenerator {
    /// Starts at a random point so that late responses addressed to a
    /// previous session on the same response channel cannot match this one.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(rand::random_range(1..MAX_SEED))
    }

    /// Starts at a fixed first id. Zero is bumped to one.
    #[must_use]
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: if first == 0 { 1 } else { first },
        }
    }

    /// Returns an id strictly greater than every id returned before.
    ///
    /// # Panics
    ///
    /// Panics if the 64-bit sequence is exhausted, which a random seed below
    /// 2^62 cannot reach in practice.
    pub fn next_id(&mut self) -> CorrelationId {
        let id = CorrelationId::new(self.next).expect("sequence never yields zero");
        self.next = self
            .next
            .checked_add(1)
            .expect("correlation id sequence exhausted");
        id
    }

    /// The id the next call to [`next_id`](Self::next_id) will return.
    #[must_use]
    pub const fn peek(&self) -> u64 {
        self.next
    }
}

impl Default for CorrelationIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
