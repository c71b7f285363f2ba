//! Model-checked random workloads: after any mix of writes, overwrites and
//! trims, every live page reads back its last payload and every dead page
//! fails to resolve.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use nandsim_core::CoreError;
use nandsim_device::{Geometry, SimConfig};

use crate::harness::TestRig;

fn workload_config() -> SimConfig {
    SimConfig {
        geometry: Geometry {
            ssd_size: 1,
            package_size: 2,
            die_size: 1,
            plane_size: 8,
            block_size: 4,
            page_size: 4096,
            block_erases: 10_000,
        },
        max_log_blocks: 4,
        num_age_classes: 2,
        greedy_gc: true,
        ..SimConfig::default()
    }
}

fn run_workload(seed: u64, ops: u64, occupancy: u64) {
    let config = workload_config();
    let total = config.geometry.total_pages();
    let hot_span = total * occupancy / 100;
    let mut rig = TestRig::new(config);
    let mut rng = StdRng::seed_from_u64(seed);

    for op in 0..ops {
        let logical = rng.gen_range(0..hot_span.max(1));
        match rng.gen_range(0..10) {
            0 => {
                rig.trim(logical).unwrap();
            }
            1..=2 => match rig.sim.read(logical) {
                Ok(_) | Err(CoreError::UnmappedRead { .. }) => {}
                Err(other) => panic!("read failed: {other}"),
            },
            _ => match rig.write(logical, op) {
                Ok(()) => {}
                // Full: the model was not updated; reclaim and move on.
                Err(CoreError::NoFreeCapacity | CoreError::NoFreeBlock { .. }) => {
                    rig.sim.trigger_gc().unwrap();
                    rig.sim.run_to_quiesce().unwrap();
                }
                Err(other) => panic!("write failed: {other}"),
            },
        }
        if op % 97 == 0 {
            rig.sim.run_to_quiesce().unwrap();
        }
    }
    rig.settle_and_verify();
}

#[test]
fn test_random_overwrites_half_full() {
    run_workload(11, 800, 50);
}

#[test]
fn test_random_overwrites_tight() {
    run_workload(23, 800, 75);
}

#[test]
fn test_trim_heavy_workload() {
    let config = workload_config();
    let total = config.geometry.total_pages();
    let mut rig = TestRig::new(config);
    let mut rng = StdRng::seed_from_u64(5);

    for op in 0..600u64 {
        let logical = rng.gen_range(0..total / 2);
        if rng.gen_bool(0.4) {
            rig.trim(logical).unwrap();
        } else if rig.write(logical, op).is_err() {
            rig.sim.trigger_gc().unwrap();
            rig.sim.run_to_quiesce().unwrap();
        }
        if op % 53 == 0 {
            rig.sim.run_to_quiesce().unwrap();
        }
    }
    rig.settle_and_verify();
}
