//! Geometry, timing and simulation configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::address::{BlockHandle, Granularity, PhysicalAddress};
use crate::error::{DeviceError, DeviceResult};

/// Physical dimensions of the simulated device.
///
/// The hierarchy is package → die → plane → block → page; one bus channel
/// per package. `block_size` must be a power of two: the logical-block split
/// and the linear address codec rely on exact page nesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    /// Number of packages (and bus channels).
    pub ssd_size: u32,
    /// Dies per package.
    pub package_size: u32,
    /// Planes per die.
    pub die_size: u32,
    /// Blocks per plane.
    pub plane_size: u32,
    /// Pages per block (power of two).
    pub block_size: u32,
    /// Page payload size in bytes (informational).
    pub page_size: u32,
    /// Erase budget per block.
    pub block_erases: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            ssd_size: 1,
            package_size: 2,
            die_size: 2,
            plane_size: 64,
            block_size: 32,
            page_size: 4096,
            block_erases: 100_000,
        }
    }
}

impl Geometry {
    /// Validates the dimensions.
    pub fn validate(&self) -> DeviceResult<()> {
        if self.ssd_size == 0
            || self.package_size == 0
            || self.die_size == 0
            || self.plane_size == 0
            || self.block_size == 0
        {
            return Err(DeviceError::InvalidConfig {
                field: "geometry",
                reason: "all dimensions must be non-zero",
            });
        }
        if !self.block_size.is_power_of_two() {
            return Err(DeviceError::InvalidConfig {
                field: "block_size",
                reason: "pages per block must be a power of two",
            });
        }
        if self.block_erases == 0 {
            return Err(DeviceError::InvalidConfig {
                field: "block_erases",
                reason: "erase budget must be non-zero",
            });
        }
        Ok(())
    }

    /// Number of bus channels (one per package).
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.ssd_size as usize
    }

    /// Dies per package.
    #[inline]
    pub fn dies_per_package(&self) -> usize {
        self.package_size as usize
    }

    /// Total number of physical blocks.
    #[inline]
    pub fn num_blocks(&self) -> usize {
        (self.ssd_size * self.package_size * self.die_size * self.plane_size) as usize
    }

    /// Total number of physical pages.
    #[inline]
    pub fn total_pages(&self) -> u64 {
        self.num_blocks() as u64 * u64::from(self.block_size)
    }

    /// Bits needed to split a logical address into block number and offset.
    #[inline]
    pub fn address_shift(&self) -> u32 {
        self.block_size.trailing_zeros()
    }

    /// Bits needed to represent any linear address.
    pub fn address_bits(&self) -> u32 {
        let pages = self.total_pages();
        64 - pages.saturating_sub(1).leading_zeros()
    }

    /// Logical block number for a logical page address.
    #[inline]
    pub fn lba_block(&self, logical: u64) -> u64 {
        logical >> self.address_shift()
    }

    /// Page offset within the logical block for a logical page address.
    #[inline]
    pub fn page_offset(&self, logical: u64) -> u32 {
        (logical & u64::from(self.block_size - 1)) as u32
    }

    /// Encodes a physical address into its dense linear form.
    pub fn linear(&self, addr: &PhysicalAddress) -> u64 {
        let mut linear = u64::from(addr.package);
        linear = linear * u64::from(self.package_size) + u64::from(addr.die);
        linear = linear * u64::from(self.die_size) + u64::from(addr.plane);
        linear = linear * u64::from(self.plane_size) + u64::from(addr.block);
        linear * u64::from(self.block_size) + u64::from(addr.page)
    }

    /// Decodes a dense linear address back into its tuple form.
    pub fn decode(&self, mut linear: u64) -> PhysicalAddress {
        let page = (linear % u64::from(self.block_size)) as u32;
        linear /= u64::from(self.block_size);
        let block = (linear % u64::from(self.plane_size)) as u32;
        linear /= u64::from(self.plane_size);
        let plane = (linear % u64::from(self.die_size)) as u32;
        linear /= u64::from(self.die_size);
        let die = (linear % u64::from(self.package_size)) as u32;
        let package = (linear / u64::from(self.package_size)) as u32;
        PhysicalAddress::page(package, die, plane, block, page)
    }

    /// Dense block handle for an address.
    pub fn handle_of(&self, addr: &PhysicalAddress) -> BlockHandle {
        BlockHandle((self.linear(addr) / u64::from(self.block_size)) as usize)
    }

    /// Block-granular address of a handle.
    pub fn address_of(&self, handle: BlockHandle) -> PhysicalAddress {
        let mut addr = self.decode(handle.0 as u64 * u64::from(self.block_size));
        addr.level = Granularity::Block;
        addr
    }

    /// (channel, die) coordinates of a handle.
    pub fn die_of(&self, handle: BlockHandle) -> (usize, usize) {
        let addr = self.address_of(handle);
        (addr.package as usize, addr.die as usize)
    }
}

/// Per-operation latencies in simulated microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    /// Cell read latency per page.
    pub page_read_delay: f64,
    /// Cell program latency per page.
    pub page_write_delay: f64,
    /// Block erase latency.
    pub block_erase_delay: f64,
    /// Bus control-cycle latency per operation.
    pub bus_ctrl_delay: f64,
    /// Bus data-transfer latency per page.
    pub bus_data_delay: f64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            page_read_delay: 25.0,
            page_write_delay: 200.0,
            block_erase_delay: 1500.0,
            bus_ctrl_delay: 2.5,
            bus_data_delay: 10.0,
        }
    }
}

/// Complete simulator configuration: geometry, timing and the translation
/// layer's tuning knobs. Loaded once at startup; no runtime reconfiguration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Device dimensions.
    pub geometry: Geometry,
    /// Operation latencies.
    pub timing: Timing,
    /// Size of the random log-block pool (`PAGE_MAX_LOG`).
    pub max_log_blocks: usize,
    /// Number of wear buckets for free blocks and GC candidates.
    pub num_age_classes: usize,
    /// Trigger GC whenever a per-(die, class) free pool runs low, not only
    /// on emergency.
    pub greedy_gc: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            geometry: Geometry::default(),
            timing: Timing::default(),
            max_log_blocks: 8,
            num_age_classes: 4,
            greedy_gc: true,
        }
    }
}

impl SimConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> DeviceResult<()> {
        self.geometry.validate()?;
        if self.max_log_blocks == 0 {
            return Err(DeviceError::InvalidConfig {
                field: "max_log_blocks",
                reason: "the random log pool must hold at least one block",
            });
        }
        if self.num_age_classes == 0 {
            return Err(DeviceError::InvalidConfig {
                field: "num_age_classes",
                reason: "at least one age class is required",
            });
        }
        Ok(())
    }

    /// Loads a configuration from a TOML or JSON file, by extension.
    pub fn from_file(path: &Path) -> DeviceResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: SimConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            other => {
                return Err(DeviceError::UnsupportedConfigFormat {
                    extension: other.to_string(),
                })
            }
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn tiny() -> Geometry {
        Geometry {
            ssd_size: 1,
            package_size: 1,
            die_size: 1,
            plane_size: 8,
            block_size: 4,
            page_size: 4096,
            block_erases: 1000,
        }
    }

    #[test]
    fn test_default_values() {
        let config = SimConfig::default();
        assert_eq!(config.geometry.ssd_size, 1);
        assert_eq!(config.geometry.block_size, 32);
        assert_eq!(config.max_log_blocks, 8);
        assert_eq!(config.num_age_classes, 4);
        assert!(config.greedy_gc);
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_non_power_of_two_block() {
        let mut g = tiny();
        g.block_size = 6;
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_dimension() {
        let mut g = tiny();
        g.plane_size = 0;
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_derived_sizes() {
        let g = tiny();
        assert_eq!(g.num_blocks(), 8);
        assert_eq!(g.total_pages(), 32);
        assert_eq!(g.address_shift(), 2);
        assert_eq!(g.address_bits(), 5);
    }

    #[test]
    fn test_logical_split() {
        let g = tiny();
        assert_eq!(g.lba_block(0), 0);
        assert_eq!(g.page_offset(0), 0);
        assert_eq!(g.lba_block(7), 1);
        assert_eq!(g.page_offset(7), 3);
    }

    #[test]
    fn test_linear_codec_bijective() {
        let g = Geometry {
            ssd_size: 2,
            package_size: 2,
            die_size: 2,
            plane_size: 3,
            block_size: 4,
            page_size: 4096,
            block_erases: 10,
        };
        for linear in 0..g.total_pages() {
            let addr = g.decode(linear);
            assert_eq!(g.linear(&addr), linear);
        }
    }

    #[test]
    fn test_handle_roundtrip() {
        let g = tiny();
        for i in 0..g.num_blocks() {
            let handle = BlockHandle(i);
            let addr = g.address_of(handle);
            assert_eq!(g.handle_of(&addr), handle);
            assert_eq!(addr.page, 0);
        }
    }

    #[test]
    fn test_die_of_handle() {
        let g = Geometry {
            ssd_size: 2,
            package_size: 2,
            die_size: 1,
            plane_size: 2,
            block_size: 4,
            page_size: 4096,
            block_erases: 10,
        };
        // Blocks nest as package → die → plane: two blocks per die.
        assert_eq!(g.die_of(BlockHandle(0)), (0, 0));
        assert_eq!(g.die_of(BlockHandle(1)), (0, 0));
        assert_eq!(g.die_of(BlockHandle(2)), (0, 1));
        assert_eq!(g.die_of(BlockHandle(7)), (1, 1));
    }

    #[test]
    fn test_serialization_round_trip() {
        let config = SimConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let decoded: SimConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_from_file_toml() {
        let config = SimConfig::default();
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(file, "{}", toml::to_string(&config).unwrap()).unwrap();
        let loaded = SimConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_from_file_json() {
        let config = SimConfig::default();
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        write!(file, "{}", serde_json::to_string(&config).unwrap()).unwrap();
        let loaded = SimConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_from_file_unknown_extension() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(file, "geometry: {{}}").unwrap();
        assert!(SimConfig::from_file(file.path()).is_err());
    }
}
