//! Physical addresses and block handles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies which fields of a [`PhysicalAddress`] are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Granularity {
    /// The whole device.
    Ssd,
    /// Meaningful up to the package field.
    Package,
    /// Meaningful up to the die field.
    Die,
    /// Meaningful up to the plane field.
    Plane,
    /// Meaningful up to the block field.
    Block,
    /// All fields are meaningful.
    Page,
    /// No field is meaningful (the null address).
    #[default]
    None,
}

/// A physical flash location: package, die, plane, block, page, plus a
/// granularity tag saying how far down the tuple is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct PhysicalAddress {
    /// Package (channel) index.
    pub package: u32,
    /// Die index within the package.
    pub die: u32,
    /// Plane index within the die.
    pub plane: u32,
    /// Block index within the plane.
    pub block: u32,
    /// Page index within the block.
    pub page: u32,
    /// Which of the fields above are meaningful.
    pub level: Granularity,
}

impl PhysicalAddress {
    /// Creates a page-granular address.
    pub fn page(package: u32, die: u32, plane: u32, block: u32, page: u32) -> Self {
        Self {
            package,
            die,
            plane,
            block,
            page,
            level: Granularity::Page,
        }
    }

    /// Creates a block-granular address (page field zeroed).
    pub fn block(package: u32, die: u32, plane: u32, block: u32) -> Self {
        Self {
            package,
            die,
            plane,
            block,
            page: 0,
            level: Granularity::Block,
        }
    }

    /// Returns this address narrowed to block granularity with page 0.
    #[must_use]
    pub fn to_block(mut self) -> Self {
        self.page = 0;
        self.level = Granularity::Block;
        self
    }

    /// Returns this address widened to page granularity at the given page.
    #[must_use]
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self.level = Granularity::Page;
        self
    }

    /// Returns true if the address carries no meaningful fields.
    #[inline]
    pub fn is_none(&self) -> bool {
        self.level == Granularity::None
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(pkg {} die {} pl {} blk {} pg {})",
            self.package, self.die, self.plane, self.block, self.page
        )
    }
}

/// Dense index of a physical block across the whole device.
///
/// Handles replace the raw block pointers of classic simulators: every
/// structure that needs to remember a block stores its handle and resolves
/// it through the device on use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockHandle(pub usize);

impl BlockHandle {
    /// Returns the inner index.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blk:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_constructor() {
        let a = PhysicalAddress::page(1, 2, 3, 4, 5);
        assert_eq!(a.package, 1);
        assert_eq!(a.page, 5);
        assert_eq!(a.level, Granularity::Page);
    }

    #[test]
    fn test_block_constructor_zeroes_page() {
        let a = PhysicalAddress::block(0, 1, 2, 3);
        assert_eq!(a.page, 0);
        assert_eq!(a.level, Granularity::Block);
    }

    #[test]
    fn test_to_block_and_back() {
        let a = PhysicalAddress::page(0, 0, 1, 7, 3);
        let b = a.to_block();
        assert_eq!(b.page, 0);
        assert_eq!(b.level, Granularity::Block);
        let c = b.with_page(3);
        assert_eq!(c, a);
    }

    #[test]
    fn test_default_is_none() {
        let a = PhysicalAddress::default();
        assert!(a.is_none());
    }

    #[test]
    fn test_handle_ordering() {
        assert!(BlockHandle(1) < BlockHandle(2));
        assert_eq!(format!("{}", BlockHandle(9)), "blk:9");
    }
}
