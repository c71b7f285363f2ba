//! Property tests for the linear address codec.

use proptest::prelude::*;

use nandsim_device::Geometry;

fn arb_geometry() -> impl Strategy<Value = Geometry> {
    (
        1u32..4,
        1u32..4,
        1u32..4,
        1u32..16,
        prop::sample::select(vec![2u32, 4, 8, 16, 32]),
    )
        .prop_map(
            |(ssd_size, package_size, die_size, plane_size, block_size)| Geometry {
                ssd_size,
                package_size,
                die_size,
                plane_size,
                block_size,
                page_size: 4096,
                block_erases: 1000,
            },
        )
}

proptest! {
    /// decode(encode(p)) = p over the whole address space, for any geometry.
    #[test]
    fn codec_roundtrip((geometry, fraction) in (arb_geometry(), 0.0f64..1.0)) {
        let linear = ((geometry.total_pages() - 1) as f64 * fraction) as u64;
        let addr = geometry.decode(linear);
        prop_assert_eq!(geometry.linear(&addr), linear);
        prop_assert!(addr.package < geometry.ssd_size);
        prop_assert!(addr.die < geometry.package_size);
        prop_assert!(addr.plane < geometry.die_size);
        prop_assert!(addr.block < geometry.plane_size);
        prop_assert!(addr.page < geometry.block_size);
    }

    /// Encoding is injective across distinct tuples.
    #[test]
    fn codec_injective(geometry in arb_geometry(), a in 0u64..4096, b in 0u64..4096) {
        let total = geometry.total_pages();
        let (a, b) = (a % total, b % total);
        let addr_a = geometry.decode(a);
        let addr_b = geometry.decode(b);
        if a != b {
            prop_assert_ne!(addr_a, addr_b);
        } else {
            prop_assert_eq!(addr_a, addr_b);
        }
    }

    /// The logical split matches the codec's page nesting.
    #[test]
    fn logical_split_consistent(geometry in arb_geometry(), fraction in 0.0f64..1.0) {
        let logical = ((geometry.total_pages() - 1) as f64 * fraction) as u64;
        let block = geometry.lba_block(logical);
        let offset = geometry.page_offset(logical);
        prop_assert_eq!(block * u64::from(geometry.block_size) + u64::from(offset), logical);
        prop_assert!(offset < geometry.block_size);
    }
}
