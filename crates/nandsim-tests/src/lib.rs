//! nandsim test & validation infrastructure
//!
//! End-to-end scenarios driven through the public [`nandsim_core::Simulation`]
//! interface: merge behaviours, garbage-collection reclaim, wear-levelling
//! convergence, model-checked random workloads, and property tests for the
//! address codec.

pub mod harness;

#[cfg(test)]
mod endurance;
#[cfg(test)]
mod proptest_address;
#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod workloads;

pub use harness::{spec_config, Model, TestRig};
