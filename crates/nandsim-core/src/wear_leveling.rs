//! Wear tracking: erase-count extremes, age classes and the forced-migration
//! queue.
//!
//! Blocks are bucketed into age classes by normalised erase count; the free
//! pools and GC candidate sets are partitioned by class. When the spread
//! between the youngest and oldest block exceeds [`WEAR_LEVEL_SPREAD`],
//! every block tied for the minimum age is queued for forced migration so
//! its static data moves and the block re-enters circulation.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use nandsim_device::{BlockHandle, Device};

/// Maximum tolerated erase-count spread before forced migration starts.
pub const WEAR_LEVEL_SPREAD: u32 = 500;

/// Statistics for wear tracking.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WearStats {
    /// Times the minimum age advanced.
    pub min_age_advances: u64,
    /// Blocks queued for forced migration.
    pub blocks_queued: u64,
}

/// Tracks erase-count extremes and the set of blocks tied for the minimum.
#[derive(Debug)]
pub struct WearTracker {
    min_age: u32,
    max_age: u32,
    num_age_classes: usize,
    num_blocks: usize,
    blocks_with_min_age: BTreeSet<BlockHandle>,
    queue: VecDeque<BlockHandle>,
    stats: WearStats,
}

impl WearTracker {
    /// Creates a tracker over `num_blocks` pristine blocks.
    pub fn new(num_blocks: usize, num_age_classes: usize) -> Self {
        Self {
            min_age: 0,
            // Non-zero so the normalisation span is never empty.
            max_age: 1,
            num_age_classes,
            num_blocks,
            blocks_with_min_age: (0..num_blocks).map(BlockHandle).collect(),
            queue: VecDeque::new(),
            stats: WearStats::default(),
        }
    }

    /// Lowest observed erase count.
    #[inline]
    pub fn min_age(&self) -> u32 {
        self.min_age
    }

    /// Highest observed erase count.
    #[inline]
    pub fn max_age(&self) -> u32 {
        self.max_age
    }

    /// Current erase-count spread.
    #[inline]
    pub fn spread(&self) -> u32 {
        self.max_age.saturating_sub(self.min_age)
    }

    /// Blocks currently tied for the minimum age.
    #[inline]
    pub fn blocks_with_min_age(&self) -> &BTreeSet<BlockHandle> {
        &self.blocks_with_min_age
    }

    /// Wear statistics.
    #[inline]
    pub fn stats(&self) -> &WearStats {
        &self.stats
    }

    /// Erase count of a block.
    pub fn age_of(&self, device: &Device, handle: BlockHandle) -> u32 {
        device.geometry().block_erases - device.block(handle).erases_remaining()
    }

    /// Buckets a block into an age class in `[0, num_age_classes)`.
    ///
    /// Also raises `max_age` when a new extreme is observed. The 0.99999
    /// factor keeps a block at the exact maximum strictly below the class
    /// count.
    pub fn age_class(&mut self, device: &Device, handle: BlockHandle) -> usize {
        let age = self.age_of(device, handle);
        if age > self.max_age {
            self.max_age = age;
        }
        let span = self.max_age.saturating_sub(self.min_age);
        if span == 0 {
            return 0;
        }
        let normalized = f64::from(age.saturating_sub(self.min_age)) / f64::from(span);
        let class = (normalized * self.num_age_classes as f64 * 0.99999).floor() as usize;
        class.min(self.num_age_classes - 1)
    }

    /// Maintains the extremes and the min-age set after a block's erase.
    ///
    /// An erased block leaves the minimum tie; once the set drains, the
    /// minimum is re-derived by scanning every block.
    pub fn note_erase(&mut self, device: &Device, handle: BlockHandle) {
        let age = self.age_of(device, handle);
        if age > self.max_age {
            self.max_age = age;
        }
        if self.blocks_with_min_age.remove(&handle) && self.blocks_with_min_age.is_empty() {
            self.rescan_min_age(device);
        }
    }

    /// Rescans every block for the new minimum age and rebuilds the tie set.
    pub fn rescan_min_age(&mut self, device: &Device) {
        let mut new_min = u32::MAX;
        for index in 0..self.num_blocks {
            let age = self.age_of(device, BlockHandle(index));
            if age < new_min {
                new_min = age;
            }
        }
        let tied: BTreeSet<BlockHandle> = (0..self.num_blocks)
            .map(BlockHandle)
            .filter(|&h| self.age_of(device, h) == new_min)
            .collect();
        self.blocks_with_min_age = tied;
        if new_min > self.min_age {
            self.stats.min_age_advances += 1;
        }
        debug!(
            min_age = new_min,
            tied = self.blocks_with_min_age.len(),
            "minimum age advanced"
        );
        self.min_age = new_min;
    }

    /// True when the spread warrants a forced-migration round and no round
    /// is already queued.
    pub fn wants_leveling(&self) -> bool {
        self.queue.is_empty() && self.spread() > WEAR_LEVEL_SPREAD
    }

    /// Queues every min-age block for forced migration.
    pub fn enqueue_min_age(&mut self) {
        self.stats.blocks_queued += self.blocks_with_min_age.len() as u64;
        self.queue.extend(self.blocks_with_min_age.iter().copied());
    }

    /// The next queued block, without removing it.
    #[inline]
    pub fn peek_queued(&self) -> Option<BlockHandle> {
        self.queue.front().copied()
    }

    /// Removes the front of the queue.
    #[inline]
    pub fn pop_queued(&mut self) -> Option<BlockHandle> {
        self.queue.pop_front()
    }

    /// Number of blocks awaiting forced migration.
    #[inline]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}
