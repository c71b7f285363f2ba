//! Seeded synthetic workload generation.

use std::fmt;

use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::trace::TraceOp;

/// Shape of a generated workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Pattern {
    /// Ascending logical addresses, wrapping at the end of the space.
    Sequential,
    /// Uniformly random addresses.
    Random,
    /// Sequential runs interleaved with random updates.
    Mixed,
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Sequential => write!(f, "sequential"),
            Pattern::Random => write!(f, "random"),
            Pattern::Mixed => write!(f, "mixed"),
        }
    }
}

/// Generates `ops` operations over a logical space of `total_pages`,
/// reproducibly from `seed`. `trim_ratio` of the operations are trims of
/// previously written pages.
pub fn generate(
    pattern: Pattern,
    ops: u64,
    total_pages: u64,
    seed: u64,
    trim_ratio: f64,
) -> Vec<TraceOp> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(ops as usize);
    let mut cursor = 0u64;

    for index in 0..ops {
        if trim_ratio > 0.0 && rng.gen_bool(trim_ratio.min(1.0)) && index > 0 {
            out.push(TraceOp::Trim(rng.gen_range(0..total_pages)));
            continue;
        }
        let addr = match pattern {
            Pattern::Sequential => {
                let addr = cursor;
                cursor = (cursor + 1) % total_pages;
                addr
            }
            Pattern::Random => rng.gen_range(0..total_pages),
            Pattern::Mixed => {
                if rng.gen_bool(0.5) {
                    let addr = cursor;
                    cursor = (cursor + 1) % total_pages;
                    addr
                } else {
                    rng.gen_range(0..total_pages)
                }
            }
        };
        out.push(TraceOp::Write(addr, index));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_for_seed() {
        let a = generate(Pattern::Random, 100, 256, 7, 0.1);
        let b = generate(Pattern::Random, 100, 256, 7, 0.1);
        assert_eq!(a, b);
    }

    #[test]
    fn test_sequential_wraps() {
        let ops = generate(Pattern::Sequential, 10, 4, 1, 0.0);
        let addrs: Vec<u64> = ops
            .iter()
            .map(|op| match op {
                TraceOp::Write(addr, _) => *addr,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(addrs, vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 1]);
    }

    #[test]
    fn test_addresses_in_range() {
        for op in generate(Pattern::Mixed, 500, 64, 3, 0.2) {
            let addr = match op {
                TraceOp::Read(a) | TraceOp::Write(a, _) | TraceOp::Trim(a) => a,
            };
            assert!(addr < 64);
        }
    }
}
