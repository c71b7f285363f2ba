//! In-memory NAND device model.
//!
//! The hierarchy is package → die → plane → block → page, with one bus
//! channel per package. The model tracks per-page state and payload tokens,
//! per-block erase budgets, and the busy-until clocks the event pipeline
//! consults for channel and die availability. Pure mechanism: all policy
//! (placement, reclamation, wear) lives above it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::{BlockHandle, PhysicalAddress};
use crate::config::Geometry;
use crate::error::{DeviceError, DeviceResult};

/// State of a single physical page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PageState {
    /// Erased and writable.
    #[default]
    Free,
    /// Holds a live copy of some logical page.
    Valid,
    /// Holds a superseded or trimmed copy; reclaimed by the next erase.
    Invalid,
}

/// Aggregate state of a physical block, derived from its page counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockState {
    /// Every page is free.
    Free,
    /// Some pages are written, some still free.
    PartiallyFree,
    /// No free pages and at least one valid page.
    Active,
    /// Every page is invalid; the block awaits an erase.
    Inactive,
}

/// A single physical page.
#[derive(Debug, Clone, Copy, Default)]
struct Page {
    state: PageState,
    payload: Option<u64>,
}

/// A physical erase block.
#[derive(Debug, Clone)]
pub struct Block {
    pages: Vec<Page>,
    erases_remaining: u32,
    pages_valid: u32,
    pages_invalid: u32,
}

impl Block {
    fn new(block_size: u32, block_erases: u32) -> Self {
        Self {
            pages: vec![Page::default(); block_size as usize],
            erases_remaining: block_erases,
            pages_valid: 0,
            pages_invalid: 0,
        }
    }

    /// Number of valid pages.
    #[inline]
    pub fn pages_valid(&self) -> u32 {
        self.pages_valid
    }

    /// Number of invalid pages.
    #[inline]
    pub fn pages_invalid(&self) -> u32 {
        self.pages_invalid
    }

    /// Number of free pages.
    #[inline]
    pub fn pages_free(&self) -> u32 {
        self.pages.len() as u32 - self.pages_valid - self.pages_invalid
    }

    /// Remaining erase budget.
    #[inline]
    pub fn erases_remaining(&self) -> u32 {
        self.erases_remaining
    }

    /// State of the page at `index`.
    #[inline]
    pub fn page_state(&self, index: u32) -> PageState {
        self.pages[index as usize].state
    }

    /// Aggregate block state.
    pub fn state(&self) -> BlockState {
        if self.pages_invalid as usize == self.pages.len() {
            BlockState::Inactive
        } else if self.pages_free() > 0 {
            if self.pages_valid == 0 && self.pages_invalid == 0 {
                BlockState::Free
            } else {
                BlockState::PartiallyFree
            }
        } else {
            BlockState::Active
        }
    }
}

/// A die: planes of blocks plus a register busy clock.
#[derive(Debug)]
struct Die {
    planes: Vec<Vec<Block>>,
    busy_until: f64,
}

/// The whole device.
#[derive(Debug)]
pub struct Device {
    geometry: Geometry,
    /// `[package][die]`.
    dies: Vec<Vec<Die>>,
    /// One per package.
    channel_busy_until: Vec<f64>,
}

impl Device {
    /// Builds a device with every page free and full erase budgets.
    pub fn new(geometry: Geometry) -> Self {
        let dies = (0..geometry.ssd_size)
            .map(|_| {
                (0..geometry.package_size)
                    .map(|_| Die {
                        planes: (0..geometry.die_size)
                            .map(|_| {
                                (0..geometry.plane_size)
                                    .map(|_| Block::new(geometry.block_size, geometry.block_erases))
                                    .collect()
                            })
                            .collect(),
                        busy_until: 0.0,
                    })
                    .collect()
            })
            .collect();
        debug!(
            blocks = geometry.num_blocks(),
            pages = geometry.total_pages(),
            "device model created"
        );
        Self {
            geometry,
            dies,
            channel_busy_until: vec![0.0; geometry.num_channels()],
        }
    }

    /// The configured geometry.
    #[inline]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn check(&self, addr: &PhysicalAddress) -> DeviceResult<()> {
        let g = &self.geometry;
        if addr.package < g.ssd_size
            && addr.die < g.package_size
            && addr.plane < g.die_size
            && addr.block < g.plane_size
            && addr.page < g.block_size
        {
            Ok(())
        } else {
            Err(DeviceError::AddressOutOfRange { address: *addr })
        }
    }

    fn block_ref(&self, addr: &PhysicalAddress) -> DeviceResult<&Block> {
        self.check(addr)?;
        Ok(&self.dies[addr.package as usize][addr.die as usize].planes[addr.plane as usize]
            [addr.block as usize])
    }

    fn block_mut(&mut self, addr: &PhysicalAddress) -> DeviceResult<&mut Block> {
        self.check(addr)?;
        Ok(
            &mut self.dies[addr.package as usize][addr.die as usize].planes
                [addr.plane as usize][addr.block as usize],
        )
    }

    /// Block lookup by dense handle.
    pub fn block(&self, handle: BlockHandle) -> &Block {
        let addr = self.geometry.address_of(handle);
        self.block_ref(&addr).expect("handle within geometry")
    }

    /// State of the addressed page.
    pub fn page_state(&self, addr: &PhysicalAddress) -> DeviceResult<PageState> {
        Ok(self.block_ref(addr)?.page_state(addr.page))
    }

    /// Aggregate state of the addressed block.
    pub fn block_state(&self, addr: &PhysicalAddress) -> DeviceResult<BlockState> {
        Ok(self.block_ref(addr)?.state())
    }

    /// Remaining erase budget of the addressed block.
    pub fn erases_remaining(&self, addr: &PhysicalAddress) -> DeviceResult<u32> {
        Ok(self.block_ref(addr)?.erases_remaining)
    }

    /// Payload token of the addressed page, `None` if never written since
    /// the last erase.
    pub fn read_page(&self, addr: &PhysicalAddress) -> DeviceResult<Option<u64>> {
        Ok(self.block_ref(addr)?.pages[addr.page as usize].payload)
    }

    /// Programs a free page with a payload token.
    pub fn write_page(&mut self, addr: &PhysicalAddress, payload: Option<u64>) -> DeviceResult<()> {
        let addr = *addr;
        let block = self.block_mut(&addr)?;
        let page = &mut block.pages[addr.page as usize];
        if page.state != PageState::Free {
            return Err(DeviceError::PageNotWritable {
                address: addr,
                state: page.state,
            });
        }
        page.state = PageState::Valid;
        page.payload = payload;
        block.pages_valid += 1;
        Ok(())
    }

    /// Marks a page invalid, returning its previous state. Free pages can be
    /// retired this way too (a merge target's never-written holes).
    pub fn invalidate_page(&mut self, addr: &PhysicalAddress) -> DeviceResult<PageState> {
        let addr = *addr;
        let block = self.block_mut(&addr)?;
        let page = &mut block.pages[addr.page as usize];
        let prior = page.state;
        match prior {
            PageState::Valid => {
                block.pages_valid -= 1;
                block.pages_invalid += 1;
            }
            PageState::Free => {
                block.pages_invalid += 1;
            }
            PageState::Invalid => {}
        }
        block.pages[addr.page as usize].state = PageState::Invalid;
        Ok(prior)
    }

    /// Erases the addressed block, resetting every page to free. Returns the
    /// remaining erase budget.
    pub fn erase_block(&mut self, addr: &PhysicalAddress) -> DeviceResult<u32> {
        let addr = *addr;
        let block = self.block_mut(&addr)?;
        if block.erases_remaining == 0 {
            return Err(DeviceError::EraseBudgetExhausted { address: addr });
        }
        debug_assert_eq!(block.pages_valid, 0, "erasing a block with live pages");
        for page in &mut block.pages {
            page.state = PageState::Free;
            page.payload = None;
        }
        block.pages_valid = 0;
        block.pages_invalid = 0;
        block.erases_remaining -= 1;
        Ok(block.erases_remaining)
    }

    /// Finish time of the channel serving `package`.
    #[inline]
    pub fn channel_finish_time(&self, package: usize) -> f64 {
        self.channel_busy_until[package]
    }

    /// Finish time of the die's currently executing operation.
    #[inline]
    pub fn die_finish_time(&self, package: usize, die: usize) -> f64 {
        self.dies[package][die].busy_until
    }

    /// True if the die register is occupied at `now`.
    #[inline]
    pub fn die_register_busy(&self, package: usize, die: usize, now: f64) -> bool {
        self.dies[package][die].busy_until > now
    }

    /// Advances the channel clock.
    pub fn occupy_channel(&mut self, package: usize, until: f64) {
        let slot = &mut self.channel_busy_until[package];
        if until > *slot {
            *slot = until;
        }
    }

    /// Advances the die clock.
    pub fn occupy_die(&mut self, package: usize, die: usize, until: f64) {
        let slot = &mut self.dies[package][die].busy_until;
        if until > *slot {
            *slot = until;
        }
    }

    /// Sums page states across the device: (free, valid, invalid).
    pub fn page_census(&self) -> (u64, u64, u64) {
        let mut census = (0u64, 0u64, 0u64);
        for handle in 0..self.geometry.num_blocks() {
            let block = self.block(BlockHandle(handle));
            census.0 += u64::from(block.pages_free());
            census.1 += u64::from(block.pages_valid());
            census.2 += u64::from(block.pages_invalid());
        }
        census
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_device() -> Device {
        Device::new(Geometry {
            ssd_size: 1,
            package_size: 1,
            die_size: 1,
            plane_size: 8,
            block_size: 4,
            page_size: 4096,
            block_erases: 2,
        })
    }

    #[test]
    fn test_new_device_all_free() {
        let dev = tiny_device();
        let (free, valid, invalid) = dev.page_census();
        assert_eq!(free, 32);
        assert_eq!(valid, 0);
        assert_eq!(invalid, 0);
    }

    #[test]
    fn test_write_then_read() {
        let mut dev = tiny_device();
        let addr = PhysicalAddress::page(0, 0, 0, 2, 1);
        dev.write_page(&addr, Some(77)).unwrap();
        assert_eq!(dev.page_state(&addr).unwrap(), PageState::Valid);
        assert_eq!(dev.read_page(&addr).unwrap(), Some(77));
    }

    #[test]
    fn test_double_write_rejected() {
        let mut dev = tiny_device();
        let addr = PhysicalAddress::page(0, 0, 0, 0, 0);
        dev.write_page(&addr, Some(1)).unwrap();
        let err = dev.write_page(&addr, Some(2)).unwrap_err();
        assert!(matches!(err, DeviceError::PageNotWritable { .. }));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let dev = tiny_device();
        let addr = PhysicalAddress::page(0, 0, 0, 8, 0);
        assert!(matches!(
            dev.page_state(&addr),
            Err(DeviceError::AddressOutOfRange { .. })
        ));
    }

    #[test]
    fn test_block_state_transitions() {
        let mut dev = tiny_device();
        let block = PhysicalAddress::block(0, 0, 0, 0);
        assert_eq!(dev.block_state(&block).unwrap(), BlockState::Free);

        dev.write_page(&block.with_page(0), Some(1)).unwrap();
        assert_eq!(dev.block_state(&block).unwrap(), BlockState::PartiallyFree);

        for page in 1..4 {
            dev.write_page(&block.with_page(page), Some(1)).unwrap();
        }
        assert_eq!(dev.block_state(&block).unwrap(), BlockState::Active);

        for page in 0..4 {
            dev.invalidate_page(&block.with_page(page)).unwrap();
        }
        assert_eq!(dev.block_state(&block).unwrap(), BlockState::Inactive);
    }

    #[test]
    fn test_invalidate_free_hole() {
        let mut dev = tiny_device();
        let addr = PhysicalAddress::page(0, 0, 0, 0, 3);
        let prior = dev.invalidate_page(&addr).unwrap();
        assert_eq!(prior, PageState::Free);
        assert_eq!(dev.block(BlockHandle(0)).pages_invalid(), 1);
        assert_eq!(dev.block(BlockHandle(0)).pages_free(), 3);
    }

    #[test]
    fn test_erase_resets_and_decrements_budget() {
        let mut dev = tiny_device();
        let block = PhysicalAddress::block(0, 0, 0, 1);
        for page in 0..4 {
            dev.write_page(&block.with_page(page), Some(9)).unwrap();
            dev.invalidate_page(&block.with_page(page)).unwrap();
        }
        let left = dev.erase_block(&block).unwrap();
        assert_eq!(left, 1);
        assert_eq!(dev.block_state(&block).unwrap(), BlockState::Free);
        assert_eq!(dev.read_page(&block.with_page(0)).unwrap(), None);
    }

    #[test]
    fn test_erase_budget_exhausted() {
        let mut dev = tiny_device();
        let block = PhysicalAddress::block(0, 0, 0, 1);
        dev.erase_block(&block).unwrap();
        dev.erase_block(&block).unwrap();
        assert!(matches!(
            dev.erase_block(&block),
            Err(DeviceError::EraseBudgetExhausted { .. })
        ));
    }

    #[test]
    fn test_busy_clocks_monotonic() {
        let mut dev = tiny_device();
        dev.occupy_channel(0, 10.0);
        dev.occupy_channel(0, 5.0);
        assert_eq!(dev.channel_finish_time(0), 10.0);

        dev.occupy_die(0, 0, 8.0);
        assert!(dev.die_register_busy(0, 0, 4.0));
        assert!(!dev.die_register_busy(0, 0, 9.0));
    }
}
