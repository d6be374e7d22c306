// ============================================================================
// Shard Router
// ============================================================================
//
// Maps an owning user to the shard that holds all of that user's orders.
//
// Order identifiers are allocated from disjoint per-shard ranges:
//
//   shard 0: [1_000_001, 2_000_002)
//   shard 1: [2_000_002, 3_000_003)
//   ...
//
// so the shard of an existing order can be recovered from its identifier
// alone, without scanning every shard.
//
// Changing `shard_count` invalidates every previously computed assignment.
// Resharding is a data migration, never a runtime operation.
//
// ============================================================================

/// Width of each shard's identifier range, and the offset of shard 0.
pub const SHARD_ID_SPAN: i64 = 1_000_001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRouter {
    shard_count: usize,
}

impl ShardRouter {
    /// # Panics
    /// Panics if `shard_count` is zero.
    pub fn new(shard_count: usize) -> Self {
        assert!(shard_count > 0, "shard count must be positive");
        Self { shard_count }
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Shard owning every order of `user_id`.
    pub fn shard_of(&self, user_id: i64) -> usize {
        user_id.rem_euclid(self.shard_count as i64) as usize
    }

    /// First identifier handed out by `shard`.
    pub fn id_base(&self, shard: usize) -> i64 {
        (shard as i64 + 1) * SHARD_ID_SPAN
    }

    /// Last identifier `shard` may hand out before its range is exhausted.
    pub fn id_max(&self, shard: usize) -> i64 {
        self.id_base(shard) + SHARD_ID_SPAN - 1
    }

    /// Shard holding `order_id`, or `None` when the identifier lies outside
    /// every shard's range.
    pub fn shard_of_order(&self, order_id: i64) -> Option<usize> {
        if order_id < SHARD_ID_SPAN {
            return None;
        }
        let shard = (order_id / SHARD_ID_SPAN - 1) as usize;
        (shard < self.shard_count).then_some(shard)
    }
}
