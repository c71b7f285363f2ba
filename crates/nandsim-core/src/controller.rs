//! Controller shim between the translation layer and the event pipeline.
//!
//! A deliberately narrow facade: the FTL hands translated events here, asks
//! for the next free page of a block it owns, and checks write admission.
//! The simulation driver drains the queue on the other side.

use serde::{Deserialize, Serialize};

use nandsim_device::{Device, Event, IoKind, PageState, PhysicalAddress};

use crate::block_manager::BlockManager;
use crate::error::{CoreError, CoreResult};
use crate::scheduler::{Batch, EventQueue};

/// Statistics for the controller.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ControllerStats {
    /// Events issued to the pipeline.
    pub issued: u64,
    /// Compound batches issued.
    pub batches_issued: u64,
}

/// The controller: owns the event queue and admission checks.
#[derive(Debug, Default)]
pub struct Controller {
    queue: EventQueue,
    stats: ControllerStats,
}

impl Controller {
    /// Creates a controller with an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands one event to the pipeline. Host reads, writes and trims are
    /// submitted unplaced and resolved at dispatch; erases and internal
    /// reads must already carry their target.
    pub fn issue(&mut self, event: Event) -> CoreResult<()> {
        debug_assert!(
            event.physical.is_some()
                || matches!(event.kind, IoKind::Read | IoKind::Write | IoKind::Trim),
            "erases and internal reads may not be issued unplaced"
        );
        self.stats.issued += 1;
        self.queue.push(event);
        Ok(())
    }

    /// Hands a dependent sequence to the pipeline.
    pub fn issue_batch(&mut self, events: Vec<Event>) -> CoreResult<()> {
        self.stats.issued += events.len() as u64;
        self.stats.batches_issued += 1;
        self.queue.push_batch(events);
        Ok(())
    }

    /// Advances the append frontier of the addressed block: returns the
    /// page-granular address of its first free page.
    pub fn get_free_page(
        &self,
        device: &Device,
        block: PhysicalAddress,
    ) -> CoreResult<PhysicalAddress> {
        let block = block.to_block();
        for page in 0..device.geometry().block_size {
            let candidate = block.with_page(page);
            if device.page_state(&candidate)? == PageState::Free {
                return Ok(candidate);
            }
        }
        Err(CoreError::NoFreeBlock {
            purpose: crate::block_manager::BlockPurpose::Log,
        })
    }

    /// Write admission: refuses non-GC writes once free capacity is spoken
    /// for.
    pub fn can_write(&self, bm: &BlockManager, event: &Event) -> bool {
        bm.can_write(event)
    }

    /// Takes the earliest queued batch.
    pub fn pop_batch(&mut self) -> Option<Batch> {
        self.queue.pop()
    }

    /// Returns a partially executed batch to the queue.
    pub fn requeue(&mut self, batch: Batch) {
        self.queue.requeue(batch);
    }

    /// Number of queued batches.
    #[inline]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// True when the pipeline has drained.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queue statistics.
    #[inline]
    pub fn scheduler_stats(&self) -> &crate::scheduler::SchedulerStats {
        self.queue.stats()
    }

    /// Controller statistics.
    #[inline]
    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }
}
