//! Error types for the translation and block-management layers.

use thiserror::Error;

use nandsim_device::DeviceError;

use crate::block_manager::BlockPurpose;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Error variants for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A read targeted a logical page that was never written (or trimmed).
    #[error("page read not written: logical address {logical}")]
    UnmappedRead {
        /// The logical page address.
        logical: u64,
    },

    /// A logical address lies outside the configured logical space.
    #[error("logical address {logical} out of range")]
    LogicalOutOfRange {
        /// The logical page address.
        logical: u64,
    },

    /// No capacity is left for new host writes until GC reclaims space.
    #[error("no capacity available for new writes")]
    NoFreeCapacity,

    /// The free pools hold no block to hand out.
    #[error("no free block available for a {purpose} block")]
    NoFreeBlock {
        /// What the block was wanted for.
        purpose: BlockPurpose,
    },

    /// Every die register is occupied; the pipeline retries the write once
    /// one clears.
    #[error("all eligible dies are busy")]
    DeviceBusy,

    /// An underlying device operation failed.
    #[error(transparent)]
    Device(#[from] DeviceError),
}
