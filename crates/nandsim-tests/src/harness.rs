//! Shared scaffolding for the end-to-end scenarios.

use std::collections::HashMap;

use nandsim_core::{CoreError, CoreResult, Simulation};
use nandsim_device::{Geometry, SimConfig};

/// The reference geometry the scenarios run on: one package, one die, one
/// plane, eight blocks of four pages, a random log pool of two.
pub fn spec_config() -> SimConfig {
    SimConfig {
        geometry: Geometry {
            ssd_size: 1,
            package_size: 1,
            die_size: 1,
            plane_size: 8,
            block_size: 4,
            page_size: 4096,
            block_erases: 1000,
        },
        max_log_blocks: 2,
        num_age_classes: 2,
        greedy_gc: false,
        ..SimConfig::default()
    }
}

/// Shadow model of the logical space: what every live page should read as.
#[derive(Debug, Default)]
pub struct Model {
    live: HashMap<u64, u64>,
}

impl Model {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a write.
    pub fn write(&mut self, logical: u64, payload: u64) {
        self.live.insert(logical, payload);
    }

    /// Records a trim.
    pub fn trim(&mut self, logical: u64) {
        self.live.remove(&logical);
    }

    /// Number of live pages.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// True when nothing is live.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Checks every live page reads back its last payload and every dead
    /// page fails to resolve.
    pub fn verify(&self, sim: &mut Simulation, total_pages: u64) {
        for logical in 0..total_pages {
            match self.live.get(&logical) {
                Some(&payload) => {
                    let outcome = sim
                        .read(logical)
                        .unwrap_or_else(|e| panic!("logical {logical} unreadable: {e}"));
                    assert_eq!(
                        outcome.payload,
                        Some(payload),
                        "logical {logical} read back the wrong payload"
                    );
                }
                None => {
                    assert!(
                        matches!(sim.read(logical), Err(CoreError::UnmappedRead { .. })),
                        "logical {logical} should be unmapped"
                    );
                }
            }
        }
    }
}

/// A simulation plus its shadow model.
pub struct TestRig {
    /// The simulator under test.
    pub sim: Simulation,
    /// The expected logical contents.
    pub model: Model,
}

impl TestRig {
    /// Builds a rig over the given configuration.
    pub fn new(config: SimConfig) -> Self {
        Self {
            sim: Simulation::new(config).expect("valid test config"),
            model: Model::new(),
        }
    }

    /// Writes and mirrors into the model.
    pub fn write(&mut self, logical: u64, payload: u64) -> CoreResult<()> {
        self.sim.write(logical, payload)?;
        self.model.write(logical, payload);
        Ok(())
    }

    /// Trims and mirrors into the model.
    pub fn trim(&mut self, logical: u64) -> CoreResult<()> {
        self.sim.trim(logical)?;
        self.model.trim(logical);
        Ok(())
    }

    /// Drains the pipeline and audits invariants and read-back.
    pub fn settle_and_verify(&mut self) {
        self.sim.run_to_quiesce().expect("pipeline drains");
        self.sim.assert_invariants();
        let total = self.sim.config().geometry.total_pages();
        self.model.verify(&mut self.sim, total);
    }
}
