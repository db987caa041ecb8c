//! The lock discipline for sharing one [`BuddyAllocator`] between harts,
//! interrupt handlers and threads.

use crate::{
    buddy::{BuddyAllocator, DEFAULT_MAX_ORDER},
    order_for_pages,
    page::{FrameTranslator, PageDescriptor, PageId},
    AllocStats, Error, Result,
};
use core::fmt;
use spin::{RwLock, RwLockWriteGuard};

/// A [`BuddyAllocator`] behind a single lock.
///
/// Every mutating operation holds the write lock for its whole duration,
/// so no caller can ever observe a half-finished split or merge.
/// Introspection only takes the read lock.
pub struct LockedBuddyAllocator<'a, T, const MAX_ORDER: usize = DEFAULT_MAX_ORDER>(
    RwLock<BuddyAllocator<'a, T, MAX_ORDER>>,
);

impl<'a, T: FrameTranslator, const MAX_ORDER: usize> LockedBuddyAllocator<'a, T, MAX_ORDER> {
    /// Create a new, uninitialized allocator.
    ///
    /// This is a `const fn`, so the allocator can live inside a `static`.
    pub const fn new(translator: T) -> Self {
        Self(RwLock::new(BuddyAllocator::new(translator)))
    }

    /// Manually acquire the write lock and get a guard to the allocator.
    pub fn lock(&self) -> RwLockWriteGuard<'_, BuddyAllocator<'a, T, MAX_ORDER>> {
        self.0.write()
    }

    /// Hands the given pages to the allocator.
    pub fn init(&self, pages: &'a mut [PageDescriptor]) -> Result<()> {
        self.0.write().init(pages)
    }

    /// Allocate a block of `2^order` pages.
    pub fn alloc(&self, order: usize) -> Result<PageId> {
        self.0.write().alloc(order)
    }

    /// Allocate the smallest block that holds at least `count` pages.
    pub fn alloc_pages(&self, count: usize) -> Result<PageId> {
        if count == 0 {
            return Err(Error::AllocateZeroPages);
        }

        self.0.write().alloc(order_for_pages(count))
    }

    /// Free a block of `2^order` pages.
    pub fn free(&self, block: PageId, order: usize) {
        self.0.write().free(block, order)
    }

    /// Reserve a single page.
    pub fn reserve(&self, page: PageId) -> Result<()> {
        self.0.write().reserve(page)
    }

    /// Release a page that was reserved before.
    pub fn unreserve(&self, page: PageId) -> Result<()> {
        self.0.write().unreserve(page)
    }

    /// Returns whether `page` is part of a free block.
    pub fn is_free(&self, page: PageId) -> bool {
        self.0.read().is_free(page)
    }

    /// Returns the name of the allocation algorithm.
    pub fn name(&self) -> &'static str {
        self.0.read().name()
    }

    /// Return the statistics for this allocator.
    pub fn stats(&self) -> AllocStats {
        self.0.read().stats()
    }

    /// Logs the state of all free lists on the debug level.
    pub fn dump_state(&self) {
        self.0.read().dump_state()
    }

    /// Writes the state of all free lists into `out`.
    pub fn dump_to<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        write!(out, "{}", self.0.read().dump())
    }
}
