#![warn(missing_docs)]

//! nandsim core: the mapping and space-management subsystem of the flash
//! simulator
//!
//! Two tightly-coupled components translate logical traffic into physical
//! flash operations:
//!
//! - the **FAST FTL** ([`ftl::FastFtl`]) keeps a block-level mapping
//!   augmented with a log buffer (one sequential log block plus a bounded
//!   random pool) and reclaims log blocks through switch, sequential-merge
//!   and random-merge operations;
//! - the **block manager** ([`block_manager::BlockManager`]) owns the free
//!   pools bucketed by die and age class, triages GC candidates, migrates
//!   victims and levels wear.
//!
//! The [`sim::Simulation`] driver wires them to the device model and the
//! event pipeline and advances simulated time.

pub mod block_manager;
pub mod controller;
pub mod error;
pub mod ftl;
pub mod mapping;
pub mod scheduler;
pub mod sim;
pub mod wear_leveling;

pub use block_manager::{
    BlockManager, BlockManagerStats, BlockPurpose, GcScope, InvalidateKind,
};
pub use controller::{Controller, ControllerStats};
pub use error::{CoreError, CoreResult};
pub use ftl::{FastFtl, FtlStats};
pub use mapping::{BlockMap, LogBlockDirectory, LogPageBlock, ReverseMap, SequentialLog};
pub use scheduler::{service_time, Batch, EventQueue, SchedulerStats};
pub use sim::{ReadOutcome, SimReport, Simulation};
pub use wear_leveling::{WearStats, WearTracker, WEAR_LEVEL_SPREAD};
