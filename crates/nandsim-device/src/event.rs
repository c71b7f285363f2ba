//! The unit of work exchanged between the translation layer and the event
//! pipeline.

use serde::{Deserialize, Serialize};

use crate::address::PhysicalAddress;

/// Kind of a simulated I/O operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IoKind {
    /// Host read: cell read plus data transfer to the host.
    Read,
    /// Internal read (merge or migration source): cell read, no host
    /// transfer.
    ReadCommand,
    /// Page program.
    Write,
    /// Logical invalidation; carries no device latency.
    Trim,
    /// Block erase.
    Erase,
}

/// A submitted unit of work.
///
/// The FTL fills `physical` when it places the operation; `replace` names
/// the old physical copy of the datum an overwrite supersedes. Compound
/// operations (merges, migrations) are delivered to the pipeline as ordered
/// batches of events rather than linked chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Operation kind.
    pub kind: IoKind,
    /// Logical page address (meaningless for erases).
    pub logical: u64,
    /// Physical target, filled by the translation layer.
    pub physical: Option<PhysicalAddress>,
    /// Old physical copy superseded by this write, if any.
    pub replace: Option<PhysicalAddress>,
    /// Simulated time at which the event becomes eligible to run.
    pub start_time: f64,
    /// Service time, filled by the pipeline on completion.
    pub time_taken: f64,
    /// True for garbage-collection and wear-levelling traffic.
    pub gc_op: bool,
    /// Page payload token carried by writes.
    pub payload: Option<u64>,
}

impl Event {
    /// Creates a new event of the given kind.
    pub fn new(kind: IoKind, logical: u64, start_time: f64) -> Self {
        Self {
            kind,
            logical,
            physical: None,
            replace: None,
            start_time,
            time_taken: 0.0,
            gc_op: false,
            payload: None,
        }
    }

    /// Creates a host read.
    pub fn read(logical: u64, start_time: f64) -> Self {
        Self::new(IoKind::Read, logical, start_time)
    }

    /// Creates a host write carrying a payload token.
    pub fn write(logical: u64, payload: u64, start_time: f64) -> Self {
        let mut ev = Self::new(IoKind::Write, logical, start_time);
        ev.payload = Some(payload);
        ev
    }

    /// Creates a trim.
    pub fn trim(logical: u64, start_time: f64) -> Self {
        Self::new(IoKind::Trim, logical, start_time)
    }

    /// Creates a block erase for the given address.
    pub fn erase(address: PhysicalAddress, start_time: f64) -> Self {
        let mut ev = Self::new(IoKind::Erase, 0, start_time);
        ev.physical = Some(address);
        ev.gc_op = true;
        ev
    }

    /// Marks the event as garbage-collection traffic.
    #[must_use]
    pub fn as_gc(mut self) -> Self {
        self.gc_op = true;
        self
    }

    /// Sets the physical target.
    #[must_use]
    pub fn at(mut self, address: PhysicalAddress) -> Self {
        self.physical = Some(address);
        self
    }

    /// Sets the replaced copy's address.
    #[must_use]
    pub fn replacing(mut self, address: PhysicalAddress) -> Self {
        self.replace = Some(address);
        self
    }
}
