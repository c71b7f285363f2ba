//! Wear-levelling convergence under a pathological hot/cold split.

use nandsim_core::{CoreError, WEAR_LEVEL_SPREAD};
use nandsim_device::{Geometry, SimConfig};

use crate::harness::TestRig;

fn endurance_config() -> SimConfig {
    SimConfig {
        geometry: Geometry {
            ssd_size: 1,
            package_size: 1,
            die_size: 1,
            plane_size: 8,
            block_size: 4,
            page_size: 4096,
            block_erases: 10_000,
        },
        max_log_blocks: 2,
        num_age_classes: 2,
        greedy_gc: false,
        ..SimConfig::default()
    }
}

/// One hot round: rewrite logical block 0 in order, which switches the
/// previous copy out and erases it. Capacity dips while forced migrations
/// hold reservations, so a refused write settles the pipeline and retries.
fn hot_round(rig: &mut TestRig, round: u64) {
    for i in 0..4 {
        let mut attempts = 0;
        loop {
            match rig.write(i, round * 10 + i) {
                Ok(()) => break,
                Err(CoreError::NoFreeCapacity | CoreError::NoFreeBlock { .. }) => {
                    rig.sim.run_to_quiesce().unwrap();
                    attempts += 1;
                    assert!(attempts < 100, "capacity never recovered");
                }
                Err(other) => panic!("hot write failed: {other}"),
            }
        }
    }
    rig.sim.run_to_quiesce().unwrap();
}

#[test]
fn test_wear_levelling_moves_static_data_and_advances_min_age() {
    let mut rig = TestRig::new(endurance_config());

    // Cold data pins four blocks: logical blocks 1..=4 written once.
    for i in 4..20 {
        rig.write(i, 5000 + i).unwrap();
    }
    rig.sim.run_to_quiesce().unwrap();

    // Hammer logical block 0 until the hot blocks outrun the cold ones.
    let mut round = 0u64;
    while rig.sim.block_manager().wear().spread() <= WEAR_LEVEL_SPREAD {
        hot_round(&mut rig, round);
        round += 1;
        assert!(round < 6000, "spread never exceeded the threshold");
    }
    assert!(rig.sim.block_manager().wear().spread() > WEAR_LEVEL_SPREAD);

    // Keep cycling: each erase completion drains the forced-migration
    // queue until every cold block has moved and the minimum advances.
    let mut extra = 0u64;
    while rig.sim.block_manager().wear().min_age() == 0 {
        hot_round(&mut rig, 9000 + extra);
        extra += 1;
        assert!(extra < 3000, "minimum age never advanced");
    }

    let bm = rig.sim.block_manager();
    assert!(bm.stats().wear_level_rounds >= 1);
    assert!(bm.wear().stats().blocks_queued >= 1);
    assert!(bm.wear().min_age() >= 1);

    // The migrated cold data is intact.
    rig.settle_and_verify();
}
