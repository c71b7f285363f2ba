//! FAST log-buffer flash translation layer.
//!
//! Block-level mapping (one data block per logical block) augmented with a
//! log buffer that absorbs in-place updates: a single sequential (SW) log
//! block for in-order streams plus a bounded pool of random (RW) log blocks
//! for scattered updates. Log blocks are reclaimed by the three merge
//! operations:
//!
//! - **switch**: a fully-populated in-order sequential block is promoted to
//!   be its logical block's data block; no data moves.
//! - **sequential merge**: sequential log and old data block are combined
//!   into a fresh data block.
//! - **random merge**: a random log block and the old data block are
//!   combined into a fresh data block.
//!
//! When both a log copy and a data-block copy of a page exist, the log copy
//! wins: it is by construction newer.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use nandsim_device::{
    Device, Event, Geometry, IoKind, PageState, PhysicalAddress, SimConfig,
};

use crate::block_manager::{BlockManager, BlockPurpose, InvalidateKind};
use crate::controller::Controller;
use crate::error::{CoreError, CoreResult};
use crate::mapping::{BlockMap, LogBlockDirectory, LogPageBlock, ReverseMap, SequentialLog};

/// Statistics for the translation layer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FtlStats {
    /// Host reads resolved.
    pub host_reads: u64,
    /// Host writes placed.
    pub host_writes: u64,
    /// GC writes placed.
    pub gc_writes: u64,
    /// Trims handled.
    pub trims: u64,
    /// Switch operations (no data movement).
    pub switch_merges: u64,
    /// Sequential merges.
    pub sequential_merges: u64,
    /// Random merges.
    pub random_merges: u64,
    /// Pages read by merges.
    pub merge_reads: u64,
    /// Pages written by merges.
    pub merge_writes: u64,
    /// Random log blocks allocated.
    pub log_allocations: u64,
    /// Random log blocks evicted to make room in the pool.
    pub log_evictions: u64,
    /// Reads of never-written pages.
    pub failed_reads: u64,
    /// Writes refused for lack of capacity.
    pub rejected_writes: u64,
}

/// The FAST FTL.
#[derive(Debug)]
pub struct FastFtl {
    geometry: Geometry,
    max_log_blocks: usize,
    map: BlockMap,
    logs: LogBlockDirectory,
    seq: SequentialLog,
    rmap: ReverseMap,
    stats: FtlStats,
}

impl FastFtl {
    /// Creates the FTL for the configured geometry, all tables unmapped.
    pub fn new(config: &SimConfig) -> Self {
        let geometry = config.geometry;
        debug!(
            logical_blocks = geometry.num_blocks(),
            address_shift = geometry.address_shift(),
            address_bits = geometry.address_bits(),
            max_log_blocks = config.max_log_blocks,
            "FAST FTL created"
        );
        Self {
            geometry,
            max_log_blocks: config.max_log_blocks,
            map: BlockMap::new(geometry.num_blocks()),
            logs: LogBlockDirectory::new(),
            seq: SequentialLog::new(),
            rmap: ReverseMap::new(),
            stats: FtlStats::default(),
        }
    }

    /// Statistics.
    #[inline]
    pub fn stats(&self) -> &FtlStats {
        &self.stats
    }

    /// The reverse map (physical linear → logical).
    #[inline]
    pub fn reverse_map(&self) -> &ReverseMap {
        &self.rmap
    }

    /// Reverse lookup for garbage collection.
    #[inline]
    pub fn get_logical_address(&self, linear: u64) -> Option<u64> {
        self.rmap.logical_at(linear)
    }

    /// The data block mapped for a logical block, if any.
    #[inline]
    pub fn data_block_of(&self, lba_block: u64) -> Option<u64> {
        self.map.get(lba_block)
    }

    /// The random log-block directory.
    #[inline]
    pub fn log_directory(&self) -> &LogBlockDirectory {
        &self.logs
    }

    /// The sequential log slot.
    #[inline]
    pub fn sequential(&self) -> &SequentialLog {
        &self.seq
    }

    fn check_bounds(&self, logical: u64) -> CoreResult<()> {
        if logical < self.geometry.total_pages() {
            Ok(())
        } else {
            Err(CoreError::LogicalOutOfRange { logical })
        }
    }

    // ── Read ──

    /// Submits a host read. Resolution happens when the pipeline dispatches
    /// the event, so it sees every earlier write already applied.
    pub fn read(&mut self, event: Event, ctl: &mut Controller) -> CoreResult<()> {
        self.check_bounds(event.logical)?;
        debug_assert!(event.physical.is_none());
        ctl.issue(event)
    }

    /// Resolves a dispatched host read against the current tables. Fails
    /// iff the page holds no live copy (never written, or trimmed).
    pub fn resolve_read(
        &mut self,
        event: &mut Event,
        device: &Device,
    ) -> CoreResult<PhysicalAddress> {
        let lba_block = self.geometry.lba_block(event.logical);
        let offset = self.geometry.page_offset(event.logical);

        let Some(address) = self.resolve(lba_block, offset, device) else {
            self.stats.failed_reads += 1;
            debug!(logical = event.logical, "page read not written");
            return Err(CoreError::UnmappedRead {
                logical: event.logical,
            });
        };
        event.physical = Some(address);
        self.stats.host_reads += 1;
        Ok(address)
    }

    /// The live copy of (logical block, page offset), if any.
    ///
    /// Resolution order: sequential log (only its owner's pages live there),
    /// then the random log block, then the data block. The first candidate
    /// whose page is VALID wins; stale slots fall through.
    fn resolve(&self, lba_block: u64, offset: u32, device: &Device) -> Option<PhysicalAddress> {
        if self.seq.owns(lba_block) {
            if let Some(slot) = self.seq.slot_of(offset) {
                let addr = self.seq.address().expect("owner implies block").with_page(slot);
                if matches!(device.page_state(&addr), Ok(PageState::Valid)) {
                    return Some(addr);
                }
            }
        }
        if let Some(log) = self.logs.get(lba_block) {
            if let Some(slot) = log.slot_of(offset) {
                let addr = log.address.with_page(slot);
                if matches!(device.page_state(&addr), Ok(PageState::Valid)) {
                    return Some(addr);
                }
            }
        }
        if let Some(linear) = self.map.get(lba_block) {
            let addr = self.geometry.decode(linear + u64::from(offset));
            if matches!(device.page_state(&addr), Ok(PageState::Valid)) {
                return Some(addr);
            }
        }
        None
    }

    // ── Write ──

    /// Admits and submits a host write. Placement is deferred: the event is
    /// queued unplaced and routed when the pipeline dispatches it, so the
    /// device only mutates under the scheduler.
    pub fn write(&mut self, event: Event, bm: &BlockManager, ctl: &mut Controller) -> CoreResult<()> {
        self.check_bounds(event.logical)?;
        if !ctl.can_write(bm, &event) {
            self.stats.rejected_writes += 1;
            return Err(CoreError::NoFreeCapacity);
        }
        debug_assert!(event.physical.is_none());
        ctl.issue(event)
    }

    /// Routes a dispatched write into the log structure and claims its
    /// target page. Invoked by the pipeline only.
    ///
    /// Case A (`offset == 0`): settle the current sequential block (switch
    /// if fully populated in order, merge otherwise), then start a fresh
    /// sequential block. Case B: in-order append. Case C: broken sequence,
    /// merge and restart. Case D (`lba_block` not the sequential owner):
    /// append to its random log block, allocating or evicting as needed.
    pub fn place_write(
        &mut self,
        event: &mut Event,
        device: &mut Device,
        bm: &mut BlockManager,
        ctl: &mut Controller,
    ) -> CoreResult<()> {
        self.check_bounds(event.logical)?;
        let lba_block = self.geometry.lba_block(event.logical);
        let offset = self.geometry.page_offset(event.logical);
        let now = event.start_time;

        // The superseded copy is resolved after any merges settle but
        // before the slot mappings move, so the old copy is still findable.
        let (target, replace) = if offset == 0 {
            if let Some(owner) = self.seq.owner() {
                if self.seq.full_for_switch(self.geometry.block_size) {
                    self.switch_sequential(owner, now, device, bm, ctl)?;
                } else {
                    self.merge_sequential(owner, now, device, bm, ctl)?;
                }
            }
            let replace = self.resolve(lba_block, offset, device);
            let block = bm.get_free_block(BlockPurpose::Data, now, device, ctl, &self.rmap)?;
            let slot = self.seq.begin(block, lba_block, 0);
            (block.with_page(slot), replace)
        } else if self.seq.owns(lba_block) {
            if offset == self.seq.next_offset() {
                let replace = self.resolve(lba_block, offset, device);
                let slot = self.seq.append();
                let addr = self.seq.address().expect("owner implies block");
                (addr.with_page(slot), replace)
            } else {
                self.merge_sequential(lba_block, now, device, bm, ctl)?;
                let replace = self.resolve(lba_block, offset, device);
                let block =
                    bm.get_free_block(BlockPurpose::Data, now, device, ctl, &self.rmap)?;
                let slot = self.seq.begin(block, lba_block, offset);
                (block.with_page(slot), replace)
            }
        } else {
            self.ensure_random_log(lba_block, now, device, bm, ctl)?;
            let replace = self.resolve(lba_block, offset, device);
            let log = self.logs.get_mut(lba_block).expect("just ensured");
            let slot = log.append(offset);
            (log.address.with_page(slot), replace)
        };

        self.claim(event, lba_block, offset, target, replace, device, bm)?;

        if event.gc_op {
            self.stats.gc_writes += 1;
        } else {
            self.stats.host_writes += 1;
        }
        trace!(logical = event.logical, placed_at = %target, "write placed");
        Ok(())
    }

    /// Claims the target page: invalidate the superseded copy, program the
    /// page, and move the reverse mapping.
    #[allow(clippy::too_many_arguments)]
    fn claim(
        &mut self,
        event: &mut Event,
        lba_block: u64,
        offset: u32,
        target: PhysicalAddress,
        replace: Option<PhysicalAddress>,
        device: &mut Device,
        bm: &mut BlockManager,
    ) -> CoreResult<()> {
        event.physical = Some(target);
        event.replace = replace;
        bm.register_write_arrival(event, device)?;

        if let Some(old) = replace {
            self.rmap.forget(self.geometry.linear(&old));
            // Drop a random-log slot mapping that still names the old copy
            // (a sequential-path overwrite leaves the log's slot behind).
            if let Some(log) = self.logs.get_mut(lba_block) {
                if log.slot_of(offset).map(|s| log.address.with_page(s)) == Some(old) {
                    log.take_slot(offset);
                }
            }
        }

        device.write_page(&target, event.payload)?;
        self.rmap.record(self.geometry.linear(&target), event.logical);
        Ok(())
    }

    // ── Merges ──

    /// Promotes the fully-populated sequential block to be its owner's data
    /// block. No data moves; the old data block is retired.
    fn switch_sequential(
        &mut self,
        owner: u64,
        now: f64,
        device: &mut Device,
        bm: &mut BlockManager,
        ctl: &mut Controller,
    ) -> CoreResult<()> {
        let seq_block = self
            .seq
            .address()
            .expect("switch requires an active sequential block");
        debug_assert!(self.seq.full_for_switch(self.geometry.block_size));

        if let Some(old) = self.map.get(owner) {
            let old_block = self.geometry.decode(old).to_block();
            bm.invalidate(old_block, InvalidateKind::Data, now, device, ctl)?;
        }
        self.map.set(owner, self.geometry.linear(&seq_block));
        self.seq.clear();
        self.stats.switch_merges += 1;
        debug!(owner, block = %seq_block, "switch sequential");
        Ok(())
    }

    /// Combines the sequential block with the owner's old data block into a
    /// fresh data block, then retires both sources.
    fn merge_sequential(
        &mut self,
        owner: u64,
        now: f64,
        device: &mut Device,
        bm: &mut BlockManager,
        ctl: &mut Controller,
    ) -> CoreResult<()> {
        let Some(seq_block) = self.seq.address() else {
            return Ok(());
        };
        let old_data = self.map.get(owner).map(|l| self.geometry.decode(l).to_block());
        let target_block = bm
            .get_free_block(BlockPurpose::Data, now, device, ctl, &self.rmap)?
            .to_block();

        let moved = self.copy_live_pages(
            owner,
            |ftl, offset| ftl.seq.slot_of(offset).map(|slot| seq_block.with_page(slot)),
            old_data,
            target_block,
            now,
            device,
            ctl,
        )?;

        bm.invalidate(seq_block, InvalidateKind::Log, now, device, ctl)?;
        if let Some(old) = old_data {
            bm.invalidate(old, InvalidateKind::Data, now, device, ctl)?;
        }
        self.map.set(owner, self.geometry.linear(&target_block));
        self.seq.clear();
        self.stats.sequential_merges += 1;
        debug!(owner, pages = moved, new_block = %target_block, "merge sequential");
        Ok(())
    }

    /// Combines a random log block with its logical block's data block into
    /// a fresh data block, then disposes of the log block.
    fn random_merge(
        &mut self,
        lba_block: u64,
        now: f64,
        device: &mut Device,
        bm: &mut BlockManager,
        ctl: &mut Controller,
    ) -> CoreResult<()> {
        let Some(log) = self.logs.get(lba_block) else {
            return Ok(());
        };
        let log_block = log.address;
        let slots: Vec<Option<u32>> = (0..self.geometry.block_size)
            .map(|offset| log.slot_of(offset))
            .collect();

        let old_data = self
            .map
            .get(lba_block)
            .map(|l| self.geometry.decode(l).to_block());
        let target_block = bm
            .get_free_block(BlockPurpose::Data, now, device, ctl, &self.rmap)?
            .to_block();

        let moved = self.copy_live_pages(
            lba_block,
            |_, offset| slots[offset as usize].map(|slot| log_block.with_page(slot)),
            old_data,
            target_block,
            now,
            device,
            ctl,
        )?;

        bm.invalidate(log_block, InvalidateKind::Log, now, device, ctl)?;
        if let Some(old) = old_data {
            bm.invalidate(old, InvalidateKind::Data, now, device, ctl)?;
        }
        self.map.set(lba_block, self.geometry.linear(&target_block));
        self.logs.remove(lba_block);
        self.stats.random_merges += 1;
        debug!(lba_block, pages = moved, new_block = %target_block, "random merge");
        Ok(())
    }

    /// The shared merge loop: for every page offset, copy the authoritative
    /// source (log copy first, else data-block copy) into the same offset of
    /// the target block; empty slots are skipped. Emits the read/write chain
    /// as one dependent batch.
    #[allow(clippy::too_many_arguments)]
    fn copy_live_pages(
        &mut self,
        lba_block: u64,
        log_source: impl Fn(&Self, u32) -> Option<PhysicalAddress>,
        old_data: Option<PhysicalAddress>,
        target_block: PhysicalAddress,
        now: f64,
        device: &mut Device,
        ctl: &mut Controller,
    ) -> CoreResult<u64> {
        let mut chain = Vec::new();
        let mut moved = 0u64;
        for offset in 0..self.geometry.block_size {
            let log_copy = log_source(self, offset)
                .filter(|a| matches!(device.page_state(a), Ok(PageState::Valid)));
            let source = match log_copy {
                Some(addr) => addr,
                None => {
                    let Some(data_copy) = old_data
                        .map(|b| b.with_page(offset))
                        .filter(|a| matches!(device.page_state(a), Ok(PageState::Valid)))
                    else {
                        trace!(lba_block, offset, "empty page, skipped in merge");
                        continue;
                    };
                    data_copy
                }
            };

            let logical = (lba_block << self.geometry.address_shift()) + u64::from(offset);
            let payload = device.read_page(&source)?;
            let target = target_block.with_page(offset);
            device.write_page(&target, payload)?;
            self.rmap.forget(self.geometry.linear(&source));
            self.rmap.record(self.geometry.linear(&target), logical);

            chain.push(Event::new(IoKind::ReadCommand, logical, now).at(source));
            let mut write = Event::new(IoKind::Write, logical, now).at(target);
            write.payload = payload;
            chain.push(write);
            moved += 1;
        }
        if !chain.is_empty() {
            ctl.issue_batch(chain)?;
        }
        self.stats.merge_reads += moved;
        self.stats.merge_writes += moved;
        Ok(moved)
    }

    /// Guarantees `lba_block` has a random log block with a free slot:
    /// merges a full one away, evicts the oldest pool entry at capacity, and
    /// allocates fresh.
    fn ensure_random_log(
        &mut self,
        lba_block: u64,
        now: f64,
        device: &mut Device,
        bm: &mut BlockManager,
        ctl: &mut Controller,
    ) -> CoreResult<()> {
        if let Some(log) = self.logs.get(lba_block) {
            if !log.is_full() {
                return Ok(());
            }
            self.random_merge(lba_block, now, device, bm, ctl)?;
        }
        if !self.logs.contains(lba_block) {
            if self.logs.len() >= self.max_log_blocks {
                let victim = self.logs.oldest().expect("non-empty at capacity");
                self.stats.log_evictions += 1;
                debug!(victim, "evicting oldest random log block");
                self.random_merge(victim, now, device, bm, ctl)?;
            }
            let block = bm.get_free_block(BlockPurpose::Log, now, device, ctl, &self.rmap)?;
            self.logs
                .insert(lba_block, LogPageBlock::new(block, self.geometry.block_size));
            self.stats.log_allocations += 1;
        }
        Ok(())
    }

    /// Called when a physical block has been erased: any table still naming
    /// it refers to dead pages and must be dropped before the block is
    /// reused. This only matters for blocks drained mid-life (a victim
    /// promoted by a switch during its own migration, or a fully trimmed
    /// log block); ordinary merges already unmap their sources.
    pub fn note_block_erased(&mut self, block_linear: u64) {
        for lba_block in self.map.mapped_to(block_linear) {
            debug!(lba_block, block_linear, "erased data block unmapped");
            self.map.clear(lba_block);
        }
        if let Some(addr) = self.seq.address() {
            if self.geometry.linear(&addr) == block_linear {
                self.seq.clear();
            }
        }
        let stale: Vec<u64> = self
            .logs
            .iter()
            .filter(|(_, log)| self.geometry.linear(&log.address) == block_linear)
            .map(|(lba_block, _)| lba_block)
            .collect();
        for lba_block in stale {
            self.logs.remove(lba_block);
        }
        for page in 0..u64::from(self.geometry.block_size) {
            self.rmap.forget(block_linear + page);
        }
    }

    // ── Trim ──

    /// Submits a host trim; it applies when the pipeline dispatches it.
    pub fn trim(&mut self, event: Event, ctl: &mut Controller) -> CoreResult<()> {
        self.check_bounds(event.logical)?;
        ctl.issue(event)
    }

    /// Applies a dispatched trim: invalidates the logical page wherever a
    /// live copy exists (sequential log, random log, data block). Purely a
    /// mapping operation with no device latency.
    pub fn apply_trim(
        &mut self,
        event: &Event,
        device: &mut Device,
        bm: &mut BlockManager,
        ctl: &mut Controller,
    ) -> CoreResult<()> {
        let lba_block = self.geometry.lba_block(event.logical);
        let offset = self.geometry.page_offset(event.logical);
        let now = event.start_time;

        if self.seq.owns(lba_block) {
            if let Some(slot) = self.seq.slot_of(offset) {
                let addr = self.seq.address().expect("owner implies block").with_page(slot);
                self.rmap.forget(self.geometry.linear(&addr));
                bm.invalidate(addr, InvalidateKind::Trim, now, device, ctl)?;
            }
        }
        if let Some(log) = self.logs.get_mut(lba_block) {
            if let Some(slot) = log.take_slot(offset) {
                let addr = log.address.with_page(slot);
                self.rmap.forget(self.geometry.linear(&addr));
                bm.invalidate(addr, InvalidateKind::Trim, now, device, ctl)?;
            }
        }
        if let Some(linear) = self.map.get(lba_block) {
            let addr = self.geometry.decode(linear + u64::from(offset));
            if device.page_state(&addr)? == PageState::Valid {
                self.rmap.forget(self.geometry.linear(&addr));
                bm.invalidate(addr, InvalidateKind::Trim, now, device, ctl)?;
            }
        }
        self.stats.trims += 1;
        Ok(())
    }
}
