//! Physical-space management: free pools, garbage collection and the
//! wear-levelling driver.
//!
//! The block manager owns every fully-free block, bucketed per (channel,
//! die) and age class, plus one append-frontier block per die. Blocks
//! accumulate invalid pages as overwrites and merges retire old copies; once
//! a block crosses the candidate threshold it becomes eligible for GC, and
//! once fully invalid its erase is scheduled. Victims are chosen by fewest
//! valid pages; live pages are migrated as read/write pairs that re-enter
//! the translation layer with the GC flag set.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use nandsim_device::{
    BlockHandle, BlockState, Device, Event, Granularity, IoKind, PageState, PhysicalAddress,
    SimConfig,
};

use crate::controller::Controller;
use crate::error::{CoreError, CoreResult};
use crate::mapping::ReverseMap;
use crate::wear_leveling::WearTracker;

/// What an allocated block will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockPurpose {
    /// A data block (merge target or promoted sequential log).
    Data,
    /// A log block (sequential or random).
    Log,
}

impl fmt::Display for BlockPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockPurpose::Data => write!(f, "data"),
            BlockPurpose::Log => write!(f, "log"),
        }
    }
}

/// Why a page or block is being invalidated (statistics only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidateKind {
    /// A data-block copy was superseded or retired.
    Data,
    /// A log-block copy was superseded or retired.
    Log,
    /// A host trim.
    Trim,
}

/// Which candidate sets a GC round scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcScope {
    /// Every set on the device.
    Device,
    /// Every class of one die.
    Die {
        /// Channel (package) index.
        channel: usize,
        /// Die index.
        die: usize,
    },
    /// One class across every die.
    Class {
        /// Age class.
        class: usize,
    },
    /// A single (die, class) set.
    DieClass {
        /// Channel (package) index.
        channel: usize,
        /// Die index.
        die: usize,
        /// Age class.
        class: usize,
    },
}

/// Statistics for the block manager.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BlockManagerStats {
    /// GC rounds started (all triggers).
    pub gc_rounds: u64,
    /// Rounds triggered by the emergency free-page floor.
    pub emergency_gc: u64,
    /// Rounds triggered by a low per-(die, class) free pool.
    pub greedy_gc: u64,
    /// Victim blocks whose migration was started.
    pub migrations: u64,
    /// Migration page writes queued.
    pub migration_writes: u64,
    /// Migration writes dropped because the page was superseded in flight.
    pub skipped_migration_writes: u64,
    /// Erases scheduled by the invalidation path.
    pub erases_scheduled: u64,
    /// Erases completed.
    pub erases_completed: u64,
    /// Blocks retired after exhausting their erase budget.
    pub retired_blocks: u64,
    /// Forced wear-levelling rounds started.
    pub wear_level_rounds: u64,
    /// Page invalidations of data-block copies.
    pub invalidated_data: u64,
    /// Page invalidations of log-block copies.
    pub invalidated_log: u64,
    /// Page invalidations by trim.
    pub invalidated_trim: u64,
}

impl BlockManagerStats {
    fn record_invalidate(&mut self, kind: InvalidateKind, pages: u64) {
        match kind {
            InvalidateKind::Data => self.invalidated_data += pages,
            InvalidateKind::Log => self.invalidated_log += pages,
            InvalidateKind::Trim => self.invalidated_trim += pages,
        }
    }
}

/// The block manager.
#[derive(Debug)]
pub struct BlockManager {
    num_age_classes: usize,
    greedy_gc: bool,
    block_size: u32,
    /// `[channel][die]`: the designated next block for each die.
    free_block_pointers: Vec<Vec<Option<BlockHandle>>>,
    /// `[channel][die][class]`: stacks of fully-free blocks.
    free_blocks: Vec<Vec<Vec<Vec<BlockHandle>>>>,
    /// `[channel][die][class]`: active blocks worth collecting.
    gc_candidates: Vec<Vec<Vec<BTreeSet<BlockHandle>>>>,
    /// Blocks whose erase is queued but not yet completed.
    erase_pending: HashSet<BlockHandle>,
    /// Victims with migration writes still in the pipeline, with the count
    /// outstanding. Guards against double-collecting a block mid-move.
    migration_inflight: HashMap<BlockHandle, u64>,
    wear: WearTracker,
    num_free_pages: u64,
    num_available_pages_for_new_writes: i64,
    stats: BlockManagerStats,
}

impl BlockManager {
    /// Builds the manager over a pristine device: every block free in class
    /// 0, one frontier block claimed per die.
    pub fn new(config: &SimConfig) -> Self {
        let geometry = config.geometry;
        let channels = geometry.num_channels();
        let dies = geometry.dies_per_package();
        let classes = config.num_age_classes;

        let mut free_blocks =
            vec![vec![vec![Vec::new(); classes]; dies]; channels];
        for index in 0..geometry.num_blocks() {
            let handle = BlockHandle(index);
            let (channel, die) = geometry.die_of(handle);
            free_blocks[channel][die][0].push(handle);
        }

        let mut free_block_pointers = vec![vec![None; dies]; channels];
        for (channel, per_die) in free_block_pointers.iter_mut().enumerate() {
            for (die, slot) in per_die.iter_mut().enumerate() {
                *slot = free_blocks[channel][die][0].pop();
            }
        }

        let total_pages = geometry.total_pages();
        debug!(
            blocks = geometry.num_blocks(),
            pages = total_pages,
            classes,
            greedy = config.greedy_gc,
            "block manager created"
        );
        Self {
            num_age_classes: classes,
            greedy_gc: config.greedy_gc,
            block_size: geometry.block_size,
            free_block_pointers,
            free_blocks,
            gc_candidates: vec![vec![vec![BTreeSet::new(); classes]; dies]; channels],
            erase_pending: HashSet::new(),
            migration_inflight: HashMap::new(),
            wear: WearTracker::new(geometry.num_blocks(), classes),
            num_free_pages: total_pages,
            num_available_pages_for_new_writes: total_pages as i64,
            stats: BlockManagerStats::default(),
        }
    }

    /// Pages currently in the FREE state (lags in-flight writes until their
    /// completion is registered).
    #[inline]
    pub fn num_free_pages(&self) -> u64 {
        self.num_free_pages
    }

    /// Free pages not yet promised to in-flight GC migrations. Merge
    /// traffic settles at completion, so the account may dip negative
    /// transiently; it equals the free-page count at quiesce.
    #[inline]
    pub fn num_available_pages_for_new_writes(&self) -> i64 {
        self.num_available_pages_for_new_writes
    }

    /// Statistics.
    #[inline]
    pub fn stats(&self) -> &BlockManagerStats {
        &self.stats
    }

    /// The wear tracker.
    #[inline]
    pub fn wear(&self) -> &WearTracker {
        &self.wear
    }

    /// Write admission: GC traffic always passes; host writes need unspoken-
    /// for capacity.
    pub fn can_write(&self, event: &Event) -> bool {
        self.num_available_pages_for_new_writes > 0 || event.gc_op
    }

    // ── Allocation ──

    /// Admission probe for ordinary writes: at least one die register must
    /// be idle at `now`. The pipeline runs it before placing a dispatched
    /// write, so a refused write leaves no state behind and is simply put
    /// back until a register clears.
    pub fn probe_write_admission(&self, now: f64, device: &Device) -> CoreResult<()> {
        let channels = self.free_block_pointers.len();
        let dies = self.free_block_pointers[0].len();
        for channel in 0..channels {
            for die in 0..dies {
                if !device.die_register_busy(channel, die, now) {
                    return Ok(());
                }
            }
        }
        Err(CoreError::DeviceBusy)
    }

    /// Hands out a fully-free block for `purpose`, choosing the die with the
    /// earliest channel+die finish time among dies that can supply one.
    pub fn get_free_block(
        &mut self,
        purpose: BlockPurpose,
        now: f64,
        device: &Device,
        ctl: &mut Controller,
        rmap: &ReverseMap,
    ) -> CoreResult<PhysicalAddress> {
        let channels = self.free_block_pointers.len();
        let dies = self.free_block_pointers[0].len();

        let mut best: Option<(usize, usize)> = None;
        let mut best_time = f64::INFINITY;
        for channel in 0..channels {
            for die in 0..dies {
                if !self.die_has_supply(channel, die) {
                    continue;
                }
                let finish = device
                    .channel_finish_time(channel)
                    .max(device.die_finish_time(channel, die));
                if finish < best_time {
                    best_time = finish;
                    best = Some((channel, die));
                }
            }
        }

        let Some((channel, die)) = best else {
            return Err(CoreError::NoFreeBlock { purpose });
        };

        let handle = match self.free_block_pointers[channel][die].take() {
            Some(handle) => handle,
            None => self
                .pop_free_block(channel, die, now, device, ctl, rmap)?
                .ok_or(CoreError::NoFreeBlock { purpose })?,
        };
        // Re-arm the frontier for the next allocation.
        self.free_block_pointers[channel][die] =
            self.pop_free_block(channel, die, now, device, ctl, rmap)?;

        debug_assert_eq!(device.block(handle).state(), BlockState::Free);
        let address = device.geometry().address_of(handle).with_page(0);
        debug!(%handle, %purpose, "free block allocated");
        Ok(address)
    }

    fn die_has_supply(&self, channel: usize, die: usize) -> bool {
        self.free_block_pointers[channel][die].is_some()
            || self.free_blocks[channel][die].iter().any(|p| !p.is_empty())
    }

    /// Pops from the lowest non-empty age class, triggering greedy GC when a
    /// pool runs low.
    fn pop_free_block(
        &mut self,
        channel: usize,
        die: usize,
        now: f64,
        device: &Device,
        ctl: &mut Controller,
        rmap: &ReverseMap,
    ) -> CoreResult<Option<BlockHandle>> {
        for class in 0..self.num_age_classes {
            if let Some(handle) = self.free_blocks[channel][die][class].pop() {
                if self.greedy_gc && self.free_blocks[channel][die][class].len() < 2 {
                    self.stats.greedy_gc += 1;
                    self.perform_gc(
                        GcScope::DieClass { channel, die, class },
                        now,
                        device,
                        ctl,
                        rmap,
                    )?;
                }
                return Ok(Some(handle));
            }
        }
        Ok(None)
    }

    // ── Invalidation ──

    /// Invalidates the target: a single page at page granularity, or the
    /// whole block (free holes included) at block granularity.
    pub fn invalidate(
        &mut self,
        address: PhysicalAddress,
        kind: InvalidateKind,
        now: f64,
        device: &mut Device,
        ctl: &mut Controller,
    ) -> CoreResult<()> {
        let handle = device.geometry().handle_of(&address.to_block());
        match address.level {
            Granularity::Block => {
                let mut retired = 0u64;
                for page in 0..self.block_size {
                    let page_addr = address.with_page(page);
                    match device.page_state(&page_addr)? {
                        PageState::Valid => {
                            device.invalidate_page(&page_addr)?;
                            retired += 1;
                        }
                        PageState::Free => {
                            // A never-written hole still blocks the erase
                            // trigger until it is retired.
                            device.invalidate_page(&page_addr)?;
                            self.num_free_pages = self.num_free_pages.saturating_sub(1);
                            self.num_available_pages_for_new_writes -= 1;
                            retired += 1;
                        }
                        PageState::Invalid => {}
                    }
                }
                self.stats.record_invalidate(kind, retired);
            }
            _ => {
                if device.page_state(&address)? == PageState::Valid {
                    device.invalidate_page(&address)?;
                    self.stats.record_invalidate(kind, 1);
                }
            }
        }
        self.note_invalidation(handle, now, device, ctl)
    }

    /// Candidate and erase upkeep after a block lost pages: schedules the
    /// erase once fully invalid, otherwise tracks it as a GC candidate when
    /// it crosses the threshold (or the candidate set is empty).
    fn note_invalidation(
        &mut self,
        handle: BlockHandle,
        now: f64,
        device: &Device,
        ctl: &mut Controller,
    ) -> CoreResult<()> {
        let block = device.block(handle);
        let (channel, die) = device.geometry().die_of(handle);

        if block.pages_invalid() == self.block_size {
            if self.erase_pending.insert(handle) {
                for class in 0..self.num_age_classes {
                    self.gc_candidates[channel][die][class].remove(&handle);
                }
                let address = device.geometry().address_of(handle);
                debug!(%handle, "block fully invalid, erase scheduled");
                self.stats.erases_scheduled += 1;
                ctl.issue(Event::erase(address, now))?;
            }
            return Ok(());
        }

        if block.state() == BlockState::Active && !self.migration_inflight.contains_key(&handle) {
            let class = self.wear.age_class(device, handle);
            let set = &mut self.gc_candidates[channel][die][class];
            if block.pages_invalid() >= self.block_size / 4 || set.is_empty() {
                set.insert(handle);
            }
        }
        Ok(())
    }

    // ── Pipeline callbacks ──

    /// Invoked before a physical write begins: invalidates the copy this
    /// write supersedes. Exactly once per overwrite.
    pub fn register_write_arrival(&mut self, event: &Event, device: &mut Device) -> CoreResult<()> {
        debug_assert_eq!(event.kind, IoKind::Write);
        if let Some(replace) = event.replace {
            if device.page_state(&replace)? == PageState::Valid {
                device.invalidate_page(&replace)?;
            }
        }
        Ok(())
    }

    /// Invoked when a physical write completes: free-page accounting,
    /// candidate upkeep for the replaced block, emergency GC.
    pub fn register_write_outcome(
        &mut self,
        event: &Event,
        now: f64,
        device: &Device,
        ctl: &mut Controller,
        rmap: &ReverseMap,
    ) -> CoreResult<()> {
        debug_assert!(self.num_free_pages > 0, "write completed with no free pages");
        self.num_free_pages = self.num_free_pages.saturating_sub(1);
        if !event.gc_op {
            self.num_available_pages_for_new_writes -= 1;
        }

        if let Some(replace) = event.replace {
            let handle = device.geometry().handle_of(&replace.to_block());
            if event.gc_op {
                self.note_migration_write_done(handle);
            }
            self.note_invalidation(handle, now, device, ctl)?;
        }

        if self.num_free_pages <= u64::from(self.block_size) {
            self.stats.emergency_gc += 1;
            self.perform_gc(GcScope::Device, now, device, ctl, rmap)?;
        }
        Ok(())
    }

    /// Invoked when a read completes.
    pub fn register_read_outcome(&mut self, event: &Event) {
        debug_assert!(matches!(event.kind, IoKind::Read | IoKind::ReadCommand));
    }

    /// Invoked when an erase completes: the block rejoins the free pool in
    /// its new age class and the page counters are restored.
    pub fn register_erase_outcome(&mut self, event: &Event, device: &Device) -> CoreResult<()> {
        let address = event.physical.expect("erase events carry their target");
        let handle = device.geometry().handle_of(&address.to_block());
        self.erase_pending.remove(&handle);
        self.migration_inflight.remove(&handle);

        let class = self.wear.age_class(device, handle);
        let (channel, die) = device.geometry().die_of(handle);
        self.free_blocks[channel][die][class].push(handle);

        self.num_free_pages += u64::from(self.block_size);
        self.num_available_pages_for_new_writes += i64::from(self.block_size);
        self.stats.erases_completed += 1;
        self.wear.note_erase(device, handle);
        debug!(%handle, class, "erase completed, block freed");
        Ok(())
    }

    /// Permanently retires a block whose erase budget ran out.
    pub fn note_retired_block(&mut self, handle: BlockHandle) {
        self.erase_pending.remove(&handle);
        self.stats.retired_blocks += 1;
        warn!(%handle, "erase budget exhausted, block retired");
    }

    // ── Garbage collection ──

    /// Runs one GC round over the given scope: picks the candidate with the
    /// fewest valid pages and migrates it. Returns whether a victim was
    /// found.
    pub fn perform_gc(
        &mut self,
        scope: GcScope,
        now: f64,
        device: &Device,
        ctl: &mut Controller,
        rmap: &ReverseMap,
    ) -> CoreResult<bool> {
        self.stats.gc_rounds += 1;

        let mut min_valid = self.block_size;
        let mut victim: Option<(usize, usize, usize, BlockHandle)> = None;
        for (channel, die, class) in self.scope_sets(scope) {
            for &handle in &self.gc_candidates[channel][die][class] {
                if self.migration_inflight.contains_key(&handle) {
                    continue;
                }
                let valid = device.block(handle).pages_valid();
                // A victim must fit inside the unreserved free pages.
                if i64::from(valid) > self.num_available_pages_for_new_writes {
                    continue;
                }
                if valid < min_valid {
                    min_valid = valid;
                    victim = Some((channel, die, class, handle));
                }
            }
        }

        let Some((channel, die, class, handle)) = victim else {
            return Ok(false);
        };
        self.gc_candidates[channel][die][class].remove(&handle);
        debug!(%handle, valid = min_valid, "GC victim chosen");
        self.migrate(handle, now, device, ctl, rmap)?;
        Ok(true)
    }

    fn scope_sets(&self, scope: GcScope) -> Vec<(usize, usize, usize)> {
        let channels = self.gc_candidates.len();
        let dies = self.gc_candidates[0].len();
        let classes = self.num_age_classes;
        match scope {
            GcScope::Device => (0..channels)
                .flat_map(|c| (0..dies).flat_map(move |d| (0..classes).map(move |k| (c, d, k))))
                .collect(),
            GcScope::Die { channel, die } => (0..classes).map(|k| (channel, die, k)).collect(),
            GcScope::Class { class } => (0..channels)
                .flat_map(|c| (0..dies).map(move |d| (c, d, class)))
                .collect(),
            GcScope::DieClass { channel, die, class } => vec![(channel, die, class)],
        }
    }

    /// Queues read/write pairs that move every live page of `handle`
    /// elsewhere. The writes re-enter the translation layer when dispatched;
    /// the block's erase follows once the last migration invalidates the
    /// last page.
    pub fn migrate(
        &mut self,
        handle: BlockHandle,
        now: f64,
        device: &Device,
        ctl: &mut Controller,
        rmap: &ReverseMap,
    ) -> CoreResult<()> {
        let geometry = device.geometry();
        let address = geometry.address_of(handle);
        let base_linear = geometry.linear(&address);

        let mut moved = 0u64;
        for page in 0..self.block_size {
            let page_addr = address.with_page(page);
            if device.page_state(&page_addr)? != PageState::Valid {
                continue;
            }
            // Copies already superseded by an in-flight overwrite carry no
            // reverse mapping and need no migration.
            let Some(logical) = rmap.logical_at(base_linear + u64::from(page)) else {
                continue;
            };
            let payload = device.read_page(&page_addr)?;
            let read = Event::new(IoKind::ReadCommand, logical, now)
                .at(page_addr)
                .as_gc();
            let mut write = Event::new(IoKind::Write, logical, now)
                .replacing(page_addr)
                .as_gc();
            write.payload = payload;
            ctl.issue_batch(vec![read, write])?;
            moved += 1;
        }

        if moved > 0 {
            self.num_available_pages_for_new_writes -= moved as i64;
            debug_assert!(!self.migration_inflight.contains_key(&handle));
            self.migration_inflight.insert(handle, moved);
        }
        self.stats.migrations += 1;
        self.stats.migration_writes += moved;
        debug!(%handle, pages = moved, "migration queued");
        Ok(())
    }

    /// A migration write completed; its victim may be collectable again
    /// once nothing else is outstanding.
    fn note_migration_write_done(&mut self, handle: BlockHandle) {
        if let Some(outstanding) = self.migration_inflight.get_mut(&handle) {
            *outstanding -= 1;
            if *outstanding == 0 {
                self.migration_inflight.remove(&handle);
            }
        }
    }

    /// A migration write was dropped before placement: return its page
    /// reservation and settle the in-flight count.
    pub fn note_migration_write_dropped(&mut self, victim: BlockHandle) {
        self.num_available_pages_for_new_writes += 1;
        self.stats.skipped_migration_writes += 1;
        self.note_migration_write_done(victim);
    }

    // ── Wear levelling ──

    /// Invoked after every erase completion: starts a forced-migration round
    /// once the age spread exceeds the threshold, and drains the queue while
    /// reservations fit.
    pub fn wear_level(
        &mut self,
        now: f64,
        device: &Device,
        ctl: &mut Controller,
        rmap: &ReverseMap,
    ) -> CoreResult<()> {
        if self.wear.wants_leveling() {
            self.stats.wear_level_rounds += 1;
            self.wear.enqueue_min_age();
            debug!(
                spread = self.wear.spread(),
                queued = self.wear.queued(),
                "wear-level round started"
            );
        }

        while let Some(handle) = self.wear.peek_queued() {
            let block = device.block(handle);
            // Nothing to move out of blocks still taking writes, already
            // drained of valid pages, or already being migrated.
            if block.pages_free() > 0
                || block.pages_valid() == 0
                || self.migration_inflight.contains_key(&handle)
            {
                self.wear.pop_queued();
                continue;
            }
            if self.num_available_pages_for_new_writes <= i64::from(block.pages_valid()) {
                break;
            }
            self.wear.pop_queued();
            self.migrate(handle, now, device, ctl, rmap)?;
        }
        Ok(())
    }

    // ── Introspection (tests and invariant audits) ──

    /// The frontier block designated for a die, if any.
    pub fn frontier(&self, channel: usize, die: usize) -> Option<BlockHandle> {
        self.free_block_pointers[channel][die]
    }

    /// Every handle currently sitting in a free pool.
    pub fn free_pool_handles(&self) -> Vec<BlockHandle> {
        let mut handles = Vec::new();
        for per_die in &self.free_blocks {
            for per_class in per_die {
                for pool in per_class {
                    handles.extend_from_slice(pool);
                }
            }
        }
        handles
    }

    /// Total GC candidates tracked.
    pub fn gc_candidate_count(&self) -> usize {
        self.gc_candidates
            .iter()
            .flat_map(|d| d.iter().flat_map(|c| c.iter()))
            .map(BTreeSet::len)
            .sum()
    }

    /// True if `handle` is a tracked GC candidate.
    pub fn is_gc_candidate(&self, handle: BlockHandle) -> bool {
        self.gc_candidates
            .iter()
            .flat_map(|d| d.iter().flat_map(|c| c.iter()))
            .any(|set| set.contains(&handle))
    }

    /// True if an erase is queued for `handle`.
    pub fn erase_is_pending(&self, handle: BlockHandle) -> bool {
        self.erase_pending.contains(&handle)
    }
}
