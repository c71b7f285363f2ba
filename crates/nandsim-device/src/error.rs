//! Error types for the device model.

use thiserror::Error;

use crate::address::PhysicalAddress;
use crate::device::PageState;

/// Result type alias for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Error variants for device operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// A physical address does not fit the configured geometry.
    #[error("address out of range: {address}")]
    AddressOutOfRange {
        /// The offending address.
        address: PhysicalAddress,
    },

    /// A page write targeted a page that is not in the FREE state.
    #[error("page {address} is not writable (state: {state:?})")]
    PageNotWritable {
        /// The target page.
        address: PhysicalAddress,
        /// The state the page was found in.
        state: PageState,
    },

    /// A block has exhausted its erase budget and cannot be cycled again.
    #[error("erase budget exhausted for block at {address}")]
    EraseBudgetExhausted {
        /// Any address within the exhausted block.
        address: PhysicalAddress,
    },

    /// A configuration value failed validation.
    #[error("invalid config: {field}: {reason}")]
    InvalidConfig {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },

    /// Reading a configuration file failed.
    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// A TOML configuration file failed to parse.
    #[error("config parse error: {0}")]
    ConfigToml(#[from] toml::de::Error),

    /// A JSON configuration file failed to parse.
    #[error("config parse error: {0}")]
    ConfigJson(#[from] serde_json::Error),

    /// The configuration file extension is not recognised.
    #[error("unsupported config file extension: {extension}")]
    UnsupportedConfigFormat {
        /// The extension that was seen.
        extension: String,
    },
}
