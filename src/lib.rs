//! A buddy allocator for physical pages.
//!
//! Physical memory is handed to the allocator as a contiguous array of
//! [`PageDescriptor`]s. The pages are grouped into blocks of `2^order`
//! pages, and every order has its own free list, sorted by address and
//! threaded through the descriptors of the free blocks. Larger blocks are
//! split to serve smaller requests, and freed blocks are merged with their
//! buddy whenever both halves are free again.
//!
//! The translation between descriptors and frame numbers is provided by the
//! memory manager through the [`FrameTranslator`] trait.
#![cfg_attr(not(test), no_std)]
#![deny(rust_2018_idioms, rustdoc::broken_intra_doc_links)]

pub mod buddy;
pub mod linked_list;
pub mod locked;
pub mod logger;
pub mod page;

pub use buddy::{pages_per_block, BuddyAllocator, DEFAULT_MAX_ORDER};
pub use locked::LockedBuddyAllocator;
pub use page::{FrameTranslator, LinearMap, PageDescriptor, PageFlags, PageId, Pfn};

use core::fmt;
use displaydoc_lite::displaydoc;

/// The size of a single page, which is also the size of an order `0` block.
pub const PAGE_SIZE: usize = 4 * 1024;

/// Result for every fallible allocator operation.
pub type Result<T, E = Error> = core::result::Result<T, E>;

displaydoc! {
    /// Any error that is reported back to the caller of the allocator.
    ///
    /// None of these leave the allocator in a different state than before
    /// the failed call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Error {
        /// tried to initialize the allocator without any pages.
        EmptyRegion,
        /// the allocator was already initialized.
        AlreadyInitialized,
        /// tried to allocate an order that exceeded the maximum order.
        OrderTooLarge,
        /// tried to allocate, but there was no large enough block left.
        NoMemoryAvailable,
        /// the page is not part of any free block.
        PageNotFree,
        /// the page was never reserved.
        NotReserved,
        /// tried to allocate zero pages.
        AllocateZeroPages,
    }
}

/// Returns the smallest order whose blocks can hold `count` pages.
///
/// The returned order may exceed what a given allocator supports, in which
/// case allocation fails with [`Error::OrderTooLarge`].
pub fn order_for_pages(count: usize) -> usize {
    match count.checked_next_power_of_two() {
        Some(pages) => pages.trailing_zeros() as usize,
        None => usize::BITS as usize,
    }
}

/// Statistics for the allocator, counted in pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocStats {
    /// The name of the allocator that collected these stats.
    pub name: &'static str,
    /// The number of pages that were handed to the allocator.
    pub total: usize,
    /// The number of pages that are part of a free block.
    pub free: usize,
    /// The number of pages that are currently allocated.
    pub allocated: usize,
    /// The number of pages that were taken out using `reserve`.
    pub reserved: usize,
}

impl AllocStats {
    /// Create a new [`AllocStats`] instance for the given allocator name.
    pub const fn with_name(name: &'static str) -> Self {
        Self {
            name,
            total: 0,
            free: 0,
            allocated: 0,
            reserved: 0,
        }
    }
}

impl fmt::Display for AllocStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(f, "\nAllocated: {} pages", self.allocated)?;
        writeln!(f, "Reserved: {} pages", self.reserved)?;
        writeln!(f, "Free: {} pages", self.free)?;
        writeln!(f, "Total: {} pages ({} KiB)", self.total, self.total * PAGE_SIZE / 1024)?;
        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(f)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_for_page_counts() {
        assert_eq!(order_for_pages(1), 0);
        assert_eq!(order_for_pages(2), 1);
        assert_eq!(order_for_pages(3), 2);
        assert_eq!(order_for_pages(8), 3);
        assert_eq!(order_for_pages(9), 4);
        assert_eq!(order_for_pages(usize::MAX), usize::BITS as usize);
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            Error::NoMemoryAvailable.to_string().trim(),
            "tried to allocate, but there was no large enough block left."
        );
        assert_eq!(
            Error::PageNotFree.to_string().trim(),
            "the page is not part of any free block."
        );
    }

    #[test]
    fn stats_display() {
        let mut stats = AllocStats::with_name("buddy");
        stats.total = 8;
        stats.free = 5;
        stats.allocated = 2;
        stats.reserved = 1;

        let text = stats.to_string();
        assert!(text.starts_with("buddy\n~~~~~\n"));
        assert!(text.contains("Allocated: 2 pages"));
        assert!(text.contains("Total: 8 pages (32 KiB)"));
    }
}
