#![warn(missing_docs)]

//! nandsim device model: the physical side of the flash simulator
//!
//! This crate provides everything below the translation layer: the device
//! geometry and simulation configuration, physical addresses with their
//! dense linear encoding, the event type exchanged between the FTL and the
//! event pipeline, and the in-memory NAND hierarchy
//! (package → die → plane → block → page) with per-page state, per-block
//! erase budgets and channel/die timing clocks.

pub mod address;
pub mod config;
pub mod device;
pub mod error;
pub mod event;

pub use address::{BlockHandle, Granularity, PhysicalAddress};
pub use config::{Geometry, SimConfig, Timing};
pub use device::{BlockState, Device, PageState};
pub use error::{DeviceError, DeviceResult};
pub use event::{Event, IoKind};
