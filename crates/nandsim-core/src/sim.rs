//! The simulation driver.
//!
//! Owns the device, translation layer, block manager and controller, and
//! runs the dispatch loop that advances simulated time. Host operations are
//! submitted to the pipeline and take effect only when their event is
//! dispatched: placement, page programming, invalidation and the block
//! manager callbacks all run from [`Simulation::step`], never at submission.
//! The host interface is synchronous, so each call drives the pipeline
//! forward until its own event has completed. All cross-component calls are
//! synchronous method invocations on explicitly passed references; there
//! are no globals, so multiple simulations coexist in one process and tests
//! are deterministic.

use serde::Serialize;
use tracing::{debug, warn};

use nandsim_device::{Device, DeviceError, Event, IoKind, PhysicalAddress, SimConfig};

use crate::block_manager::{BlockManager, BlockManagerStats, GcScope};
use crate::controller::Controller;
use crate::error::{CoreError, CoreResult};
use crate::ftl::{FastFtl, FtlStats};
use crate::scheduler::{service_time, Batch, SchedulerStats};
use crate::wear_leveling::WearStats;

/// Result of a resolved host read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadOutcome {
    /// Where the live copy was found.
    pub physical: PhysicalAddress,
    /// The payload token stored there.
    pub payload: Option<u64>,
}

/// What a dispatched host event produced; handed back to the blocked
/// submitter.
#[derive(Debug)]
enum HostOutcome {
    Read(ReadOutcome),
    Write(PhysicalAddress),
    Trim,
}

/// Aggregated end-of-run report.
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    /// Final simulated time in microseconds.
    pub clock: f64,
    /// Translation-layer counters.
    pub ftl: FtlStats,
    /// Block-manager counters.
    pub block_manager: BlockManagerStats,
    /// Event-queue counters.
    pub scheduler: SchedulerStats,
    /// Wear counters.
    pub wear: WearStats,
    /// Pages currently free.
    pub num_free_pages: u64,
    /// Pages free and not reserved by in-flight migrations.
    pub num_available_pages_for_new_writes: i64,
    /// Lowest block erase count.
    pub min_age: u32,
    /// Highest block erase count.
    pub max_age: u32,
    /// Live random log blocks.
    pub log_blocks: usize,
}

/// A complete simulator instance.
#[derive(Debug)]
pub struct Simulation {
    config: SimConfig,
    device: Device,
    ftl: FastFtl,
    bm: BlockManager,
    ctl: Controller,
    clock: f64,
    /// Outcome of the single outstanding host event, filled by dispatch.
    host_outcome: Option<CoreResult<HostOutcome>>,
}

impl Simulation {
    /// Builds a simulation from a validated configuration.
    pub fn new(config: SimConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            device: Device::new(config.geometry),
            ftl: FastFtl::new(&config),
            bm: BlockManager::new(&config),
            ctl: Controller::new(),
            config,
            clock: 0.0,
            host_outcome: None,
        })
    }

    /// The active configuration.
    #[inline]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Current simulated time.
    #[inline]
    pub fn now(&self) -> f64 {
        self.clock
    }

    /// The device model.
    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The translation layer.
    #[inline]
    pub fn ftl(&self) -> &FastFtl {
        &self.ftl
    }

    /// The block manager.
    #[inline]
    pub fn block_manager(&self) -> &BlockManager {
        &self.bm
    }

    /// The controller.
    #[inline]
    pub fn controller(&self) -> &Controller {
        &self.ctl
    }

    // ── Host interface ──

    /// Submits a host read at the current time and drives the pipeline
    /// until it completes. Resolution happens at dispatch, after every
    /// earlier event has executed; fails iff the page holds no live copy.
    pub fn read(&mut self, logical: u64) -> CoreResult<ReadOutcome> {
        let event = Event::read(logical, self.clock);
        self.ftl.read(event, &mut self.ctl)?;
        match self.drive_host_op()? {
            HostOutcome::Read(outcome) => Ok(outcome),
            other => panic!("read completed as {other:?}"),
        }
    }

    /// Submits a host write at the current time and drives the pipeline
    /// until it completes. Admission is checked up front; routing and the
    /// page program happen when the event is dispatched.
    pub fn write(&mut self, logical: u64, payload: u64) -> CoreResult<()> {
        let event = Event::write(logical, payload, self.clock);
        self.ftl.write(event, &self.bm, &mut self.ctl)?;
        match self.drive_host_op()? {
            HostOutcome::Write(_) => Ok(()),
            other => panic!("write completed as {other:?}"),
        }
    }

    /// Submits a host trim at the current time and drives the pipeline
    /// until it applies.
    pub fn trim(&mut self, logical: u64) -> CoreResult<()> {
        let event = Event::trim(logical, self.clock);
        self.ftl.trim(event, &mut self.ctl)?;
        match self.drive_host_op()? {
            HostOutcome::Trim => Ok(()),
            other => panic!("trim completed as {other:?}"),
        }
    }

    /// Steps the pipeline until the outstanding host event reports back.
    fn drive_host_op(&mut self) -> CoreResult<HostOutcome> {
        loop {
            let progressed = self.step()?;
            if let Some(outcome) = self.host_outcome.take() {
                return outcome;
            }
            assert!(progressed, "pending host operation lost from the pipeline");
        }
    }

    /// Forces one GC round over the whole device.
    pub fn trigger_gc(&mut self) -> CoreResult<bool> {
        self.bm.perform_gc(
            GcScope::Device,
            self.clock,
            &self.device,
            &mut self.ctl,
            self.ftl.reverse_map(),
        )
    }

    fn victim_of(&self, event: &Event) -> nandsim_device::BlockHandle {
        let replace = event.replace.expect("migration writes carry their source");
        self.device.geometry().handle_of(&replace.to_block())
    }

    fn earliest_die_idle_time(&self) -> f64 {
        let geometry = self.device.geometry();
        let mut earliest = f64::INFINITY;
        for channel in 0..geometry.num_channels() {
            for die in 0..geometry.dies_per_package() {
                earliest = earliest.min(self.device.die_finish_time(channel, die));
            }
        }
        earliest.max(self.clock)
    }

    // ── Dispatch loop ──

    /// Dispatches the next pending event. Returns false once the pipeline
    /// has drained.
    ///
    /// This is the only place the device mutates and the block-manager
    /// callbacks fire: unplaced writes are routed here, trims apply here,
    /// host reads resolve here.
    pub fn step(&mut self) -> CoreResult<bool> {
        let Some(mut batch) = self.ctl.pop_batch() else {
            return Ok(false);
        };
        let eligible = batch.ready_at;
        let mut event = batch.events.pop_front().expect("batches are non-empty");
        let was_unplaced = event.physical.is_none();

        match event.kind {
            // Trims are pure mapping operations: applied on dispatch, no
            // device latency.
            IoKind::Trim => {
                let applied =
                    self.ftl
                        .apply_trim(&event, &mut self.device, &mut self.bm, &mut self.ctl);
                self.host_outcome = Some(applied.map(|()| HostOutcome::Trim));
                self.requeue_rest(batch, eligible);
                return Ok(true);
            }
            IoKind::Read => {
                if let Err(err) = self.ftl.resolve_read(&mut event, &self.device) {
                    self.host_outcome = Some(Err(err));
                    self.requeue_rest(batch, eligible);
                    return Ok(true);
                }
            }
            IoKind::Write if was_unplaced => {
                // An ordinary write needs an idle die register; when every
                // die is occupied the event goes back and retries once one
                // clears.
                if !event.gc_op
                    && self
                        .bm
                        .probe_write_admission(eligible, &self.device)
                        .is_err()
                {
                    batch.events.push_front(event);
                    batch.ready_at = self.earliest_die_idle_time();
                    self.ctl.requeue(batch);
                    return Ok(true);
                }
                // A migration write whose source copy was superseded in
                // flight is moot.
                if event.gc_op {
                    let still_live = event.replace.is_some_and(|replace| {
                        let linear = self.device.geometry().linear(&replace);
                        self.ftl.get_logical_address(linear) == Some(event.logical)
                    });
                    if !still_live {
                        debug!(logical = event.logical, "migration write superseded, dropped");
                        let victim = self.victim_of(&event);
                        self.bm.note_migration_write_dropped(victim);
                        self.requeue_rest(batch, eligible);
                        return Ok(true);
                    }
                }
                match self
                    .ftl
                    .place_write(&mut event, &mut self.device, &mut self.bm, &mut self.ctl)
                {
                    Ok(()) => {}
                    // No block to land on right now: a migration leaves its
                    // copy at the source; a host write reports the failure.
                    Err(err @ CoreError::NoFreeBlock { .. }) => {
                        if event.gc_op {
                            warn!(logical = event.logical, "migration write unplaceable, dropped");
                            let victim = self.victim_of(&event);
                            self.bm.note_migration_write_dropped(victim);
                        } else {
                            warn!(logical = event.logical, "host write unplaceable, rejected");
                            self.host_outcome = Some(Err(err));
                        }
                        self.requeue_rest(batch, eligible);
                        return Ok(true);
                    }
                    Err(other) => return Err(other),
                }
            }
            _ => {}
        }

        let address = event.physical.expect("events are placed before execution");
        let (package, die) = (address.package as usize, address.die as usize);
        let service = service_time(event.kind, &self.config.timing);
        let start = eligible
            .max(event.start_time)
            .max(self.device.channel_finish_time(package))
            .max(self.device.die_finish_time(package, die));
        let completion = start + service;
        event.time_taken = service;
        self.device.occupy_channel(package, completion);
        self.device.occupy_die(package, die, completion);
        if completion > self.clock {
            self.clock = completion;
        }

        match event.kind {
            IoKind::Write => {
                self.bm.register_write_outcome(
                    &event,
                    completion,
                    &self.device,
                    &mut self.ctl,
                    self.ftl.reverse_map(),
                )?;
                if was_unplaced && !event.gc_op {
                    self.host_outcome = Some(Ok(HostOutcome::Write(address)));
                }
            }
            IoKind::Read => {
                self.bm.register_read_outcome(&event);
                let payload = self.device.read_page(&address)?;
                self.host_outcome = Some(Ok(HostOutcome::Read(ReadOutcome {
                    physical: address,
                    payload,
                })));
            }
            IoKind::ReadCommand => {
                self.bm.register_read_outcome(&event);
            }
            IoKind::Erase => {
                match self.device.erase_block(&address) {
                    Ok(_) => {
                        let linear = self.device.geometry().linear(&address.to_block());
                        self.ftl.note_block_erased(linear);
                        self.bm.register_erase_outcome(&event, &self.device)?;
                        self.bm.wear_level(
                            completion,
                            &self.device,
                            &mut self.ctl,
                            self.ftl.reverse_map(),
                        )?;
                    }
                    Err(DeviceError::EraseBudgetExhausted { .. }) => {
                        let handle = self.device.geometry().handle_of(&address.to_block());
                        warn!(%handle, "erase refused, block permanently retired");
                        self.bm.note_retired_block(handle);
                    }
                    Err(other) => return Err(other.into()),
                }
            }
            IoKind::Trim => unreachable!("trims apply before the timing stage"),
        }

        if !batch.events.is_empty() {
            batch.ready_at = completion;
            self.ctl.requeue(batch);
        }
        Ok(true)
    }

    /// Returns the untouched remainder of a batch to the queue.
    fn requeue_rest(&mut self, mut batch: Batch, ready_at: f64) {
        if !batch.events.is_empty() {
            batch.ready_at = ready_at;
            self.ctl.requeue(batch);
        }
    }

    /// Runs the pipeline dry. Returns the number of events dispatched.
    pub fn run_to_quiesce(&mut self) -> CoreResult<u64> {
        let mut dispatched = 0;
        while self.step()? {
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Builds the end-of-run report.
    pub fn report(&self) -> SimReport {
        SimReport {
            clock: self.clock,
            ftl: *self.ftl.stats(),
            block_manager: *self.bm.stats(),
            scheduler: *self.ctl.scheduler_stats(),
            wear: *self.bm.wear().stats(),
            num_free_pages: self.bm.num_free_pages(),
            num_available_pages_for_new_writes: self.bm.num_available_pages_for_new_writes(),
            min_age: self.bm.wear().min_age(),
            max_age: self.bm.wear().max_age(),
            log_blocks: self.ftl.log_directory().len(),
        }
    }

    // ── Invariant audit ──

    /// Checks the structural invariants. Only meaningful at quiesce: the
    /// free-page account is settled by write completions, so call after
    /// [`Self::run_to_quiesce`]. Panics with a diagnostic on violation;
    /// violations are implementation bugs, not recoverable conditions.
    pub fn assert_invariants(&self) {
        let geometry = self.device.geometry();
        let (free, valid, invalid) = self.device.page_census();
        assert_eq!(
            free + valid + invalid,
            geometry.total_pages(),
            "page states must partition the device"
        );
        assert_eq!(
            self.bm.num_free_pages(),
            free,
            "free-page account out of sync with the device"
        );
        assert!(
            self.bm.num_available_pages_for_new_writes() <= self.bm.num_free_pages() as i64,
            "more pages promised than free"
        );
        assert!(
            self.ftl.log_directory().len() <= self.config.max_log_blocks,
            "random log pool over capacity"
        );

        let wear = self.bm.wear();
        for index in 0..geometry.num_blocks() {
            let handle = nandsim_device::BlockHandle(index);
            let age = wear.age_of(&self.device, handle);
            assert!(
                age >= wear.min_age() && age <= wear.max_age(),
                "{handle} age {age} outside [{}, {}]",
                wear.min_age(),
                wear.max_age()
            );
        }
        let expected_min_set: std::collections::BTreeSet<_> = (0..geometry.num_blocks())
            .map(nandsim_device::BlockHandle)
            .filter(|&h| wear.age_of(&self.device, h) == wear.min_age())
            .collect();
        assert_eq!(
            wear.blocks_with_min_age(),
            &expected_min_set,
            "min-age tie set out of date"
        );

        for handle in self.bm.free_pool_handles() {
            assert_eq!(
                self.device.block(handle).state(),
                nandsim_device::BlockState::Free,
                "{handle} pooled while not free"
            );
            let (channel, die) = geometry.die_of(handle);
            assert_ne!(
                self.bm.frontier(channel, die),
                Some(handle),
                "{handle} pooled and frontier at once"
            );
        }
    }
}
