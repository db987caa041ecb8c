//! Implementation of a Buddy Allocator that is responsible for handing out
//! contiguous blocks of physical pages.
//!
//! Every order `k` owns a free list of blocks that span `2^k` pages. All
//! public operations are built on top of four primitives: finding a buddy,
//! inserting into and removing from a free list, splitting a block into its
//! two halves and merging two buddies back together.

use crate::{
    linked_list::{FreeList, Iter},
    page::{FrameTranslator, PageDescriptor, PageFlags, PageId, Pfn},
    AllocStats, Error, Result,
};
use core::fmt;
use log::{debug, trace};

/// The number of orders a [`BuddyAllocator`] has by default.
///
/// The largest block therefore spans `2^16` pages.
pub const DEFAULT_MAX_ORDER: usize = 17;

/// Returns the number of pages inside a block of the given order.
pub const fn pages_per_block(order: usize) -> usize {
    1 << order
}

/// The central structure that is responsible for allocating pages
/// using the buddy algorithm.
///
/// `MAX_ORDER` is the number of orders, so valid orders are
/// `0..MAX_ORDER`.
pub struct BuddyAllocator<'a, T, const MAX_ORDER: usize = DEFAULT_MAX_ORDER> {
    translator: T,
    pages: &'a mut [PageDescriptor],
    orders: [FreeList; MAX_ORDER],
    stats: AllocStats,
}

impl<'a, T: FrameTranslator, const MAX_ORDER: usize> BuddyAllocator<'a, T, MAX_ORDER> {
    /// Create an empty and uninitialized buddy allocator that uses
    /// `translator` to map between pages and frame numbers.
    pub const fn new(translator: T) -> Self {
        assert!(
            MAX_ORDER > 0 && MAX_ORDER < usize::BITS as usize,
            "the number of orders must be in 1..usize::BITS"
        );

        Self {
            translator,
            pages: &mut [],
            orders: [FreeList::EMPTY; MAX_ORDER],
            stats: AllocStats::with_name("Buddy Allocator"),
        }
    }

    /// Returns the name of this allocation algorithm.
    pub fn name(&self) -> &'static str {
        "buddy"
    }

    /// Hands the given pages to this allocator, making them available for
    /// allocation.
    ///
    /// The pages are split into blocks of the largest possible orders,
    /// consumed from left to right. Every block is as large as the remaining
    /// pages and the alignment of its first frame allow, so a region that
    /// starts at a frame aligned to the largest order is decomposed into its
    /// binary representation.
    pub fn init(&mut self, pages: &'a mut [PageDescriptor]) -> Result<()> {
        if self.stats.total != 0 {
            return Err(Error::AlreadyInitialized);
        }

        if pages.is_empty() {
            return Err(Error::EmptyRegion);
        }

        pages.iter_mut().for_each(PageDescriptor::reset);
        self.pages = pages;

        let count = self.pages.len();
        let mut idx = 0;
        while idx < count {
            let block = PageId(idx);
            let order = self.seed_order(block, count - idx);

            debug!(
                "Adding block at frame {:#x} with order {} to Buddy Allocator",
                self.frame_of(block).0,
                order
            );

            self.orders[order].insert(self.pages, block);
            idx += pages_per_block(order);
        }

        self.stats.total = count;
        self.stats.free = count;
        Ok(())
    }

    /// The largest order a block starting at `block` may have, if at most
    /// `remaining` pages are left.
    fn seed_order(&self, block: PageId, remaining: usize) -> usize {
        (0..MAX_ORDER)
            .rev()
            .find(|&order| pages_per_block(order) <= remaining && self.is_aligned(block, order))
            .unwrap_or(0)
    }

    /// Allocates a block of `2^order` pages.
    ///
    /// Returns the first page of the block. The smallest order that has a
    /// free block is used, and its first block is split down until it has
    /// the requested size, always continuing with the lower half.
    pub fn alloc(&mut self, order: usize) -> Result<PageId> {
        if order >= MAX_ORDER {
            return Err(Error::OrderTooLarge);
        }

        let (found, mut block) = match (order..MAX_ORDER)
            .find_map(|order| self.orders[order].head().map(|block| (order, block)))
        {
            Some(found) => found,
            None => {
                debug!("No free block of order {} or above", order);
                return Err(Error::NoMemoryAvailable);
            }
        };

        // walk down from the order we found a block in, every split leaves
        // the upper half behind in the free list of the order below
        for order_to_split in (order + 1..=found).rev() {
            block = self.split(block, order_to_split);
        }

        self.orders[order].remove(self.pages, block);
        debug_assert!(self.is_aligned(block, order));

        let size = pages_per_block(order);
        self.stats.free -= size;
        self.stats.allocated += size;

        Ok(block)
    }

    /// Returns a block of `2^order` pages to this allocator.
    ///
    /// The block is merged with its buddy as long as the buddy is free too,
    /// up to the largest order.
    ///
    /// # Panics
    ///
    /// If `order` is not a valid order, the block is not aligned to `order`,
    /// lies outside of the managed pages, contains a reserved page, or any
    /// of its pages is already free.
    pub fn free(&mut self, block: PageId, order: usize) {
        assert!(order < MAX_ORDER, "invalid order {} given to free", order);
        assert!(
            block.0 + pages_per_block(order) <= self.pages.len(),
            "block {} of order {} is outside of the managed pages",
            block,
            order
        );
        assert!(
            self.is_aligned(block, order),
            "block {} is not aligned for order {}",
            block,
            order
        );

        let size = pages_per_block(order);
        if let Some(page) = (block.0..block.0 + size).find(|&idx| self.pages[idx].is_reserved()) {
            panic!(
                "reserved page {} must be released using `unreserve`",
                PageId(page)
            );
        }
        assert!(
            !self.overlaps_free(block, order),
            "double free of block {} with order {}",
            block,
            order
        );

        self.release(block, order);

        self.stats.free += size;
        self.stats.allocated -= size;
    }

    /// Returns whether any page of the given block is part of a free block.
    ///
    /// Every free list is walked up to the end of the block, so this also
    /// catches free blocks of a smaller order inside of it.
    fn overlaps_free(&self, block: PageId, order: usize) -> bool {
        let end = block.0 + pages_per_block(order);
        (0..MAX_ORDER).any(|k| {
            self.free_list(k)
                .take_while(|free| free.0 < end)
                .any(|free| free.0 + pages_per_block(k) > block.0)
        })
    }

    /// Inserts the block into its free list and coalesces it with its
    /// buddies for as long as possible.
    fn release(&mut self, mut block: PageId, mut order: usize) {
        self.orders[order].insert(self.pages, block);

        while order + 1 < MAX_ORDER {
            let buddy = match self.buddy_of(block, order) {
                Some(buddy) => buddy,
                None => break,
            };

            if !self.orders[order].contains(self.pages, buddy) {
                break;
            }

            block = self.merge(block, order);
            order += 1;
        }
    }

    /// Takes a single page out of circulation, even if it is part of a
    /// larger free block.
    ///
    /// The block containing the page is split down to order `0`, always
    /// continuing with the half that contains `page`. The other halves stay
    /// free.
    pub fn reserve(&mut self, page: PageId) -> Result<()> {
        let (mut block, mut order) = self.find_block(page).ok_or(Error::PageNotFree)?;

        while order > 0 {
            let lower = self.split(block, order);
            order -= 1;

            block = if self.covers(lower, order, page) {
                lower
            } else {
                self.offset(lower, pages_per_block(order))
            };
        }

        debug_assert_eq!(block, page);
        self.orders[0].remove(self.pages, block);
        self.pages[page.0].flags.insert(PageFlags::RESERVED);

        trace!("Reserved page at frame {:#x}", self.frame_of(page).0);

        self.stats.free -= 1;
        self.stats.reserved += 1;
        Ok(())
    }

    /// Returns a page that was taken out using [`reserve`](Self::reserve)
    /// back to this allocator.
    pub fn unreserve(&mut self, page: PageId) -> Result<()> {
        match self.pages.get_mut(page.0) {
            Some(desc) if desc.is_reserved() => desc.flags.remove(PageFlags::RESERVED),
            _ => return Err(Error::NotReserved),
        }

        self.release(page, 0);

        self.stats.reserved -= 1;
        self.stats.free += 1;
        Ok(())
    }

    /// Finds the free block that contains `page`.
    ///
    /// Returns the first page of the block and its order, or `None` if the
    /// page is allocated, reserved or not managed by this allocator.
    pub fn find_block(&self, page: PageId) -> Option<(PageId, usize)> {
        let pfn = self.frame_of(page).0;

        // a block containing `page` can only start at `pfn` rounded down to
        // the block size, so there is a single candidate per order
        (0..MAX_ORDER).find_map(|order| {
            let start = pfn & !(pages_per_block(order) - 1);
            let block = self.translator.page_of(Pfn(start));
            self.orders[order]
                .contains(self.pages, block)
                .then(|| (block, order))
        })
    }

    /// Returns whether `page` is part of a free block.
    pub fn is_free(&self, page: PageId) -> bool {
        self.find_block(page).is_some()
    }

    /// Returns whether `page` is reserved.
    pub fn is_reserved(&self, page: PageId) -> bool {
        self.pages.get(page.0).map_or(false, PageDescriptor::is_reserved)
    }

    /// Returns whether the frame of `page` is a multiple of the block size
    /// of `order`.
    pub fn is_aligned(&self, page: PageId, order: usize) -> bool {
        self.frame_of(page).0 % pages_per_block(order) == 0
    }

    /// Returns the first page of the buddy of the given block.
    ///
    /// If the block is aligned to the next order, its buddy is the next block
    /// of the same size, otherwise it's the previous one. Returns `None` if
    /// `order` is not a valid order, or the block is not aligned to it.
    pub fn buddy_of(&self, block: PageId, order: usize) -> Option<PageId> {
        if order >= MAX_ORDER || !self.is_aligned(block, order) {
            return None;
        }

        let pfn = self.frame_of(block).0;
        let size = pages_per_block(order);
        let buddy = if self.is_aligned(block, order + 1) {
            pfn.checked_add(size)?
        } else {
            pfn - size
        };

        Some(self.translator.page_of(Pfn(buddy)))
    }

    /// Splits a free block into two halves, which are inserted into the
    /// order below.
    ///
    /// Returns the lower half.
    ///
    /// # Panics
    ///
    /// If `order` is `0`, the block is not aligned to `order` or it is not
    /// in the free list of `order`.
    fn split(&mut self, block: PageId, order: usize) -> PageId {
        assert!(order > 0, "cannot split block {} of order 0", block);
        assert!(
            self.is_aligned(block, order),
            "tried to split block {} that is not aligned for order {}",
            block,
            order
        );

        self.orders[order].remove(self.pages, block);

        //
        // +-- `block`            +-- `upper`, the start of the
        // v                      v   second half
        // +-----------------------------------------------+
        // |     lower half       |      upper half        |
        // +-----------------------------------------------+
        //
        let half = order - 1;
        let upper = self.offset(block, pages_per_block(half));

        self.orders[half].insert(self.pages, block);
        self.orders[half].insert(self.pages, upper);

        trace!(
            "Split block at frame {:#x} from order {} into two blocks of order {}",
            self.frame_of(block).0,
            order,
            half
        );

        block
    }

    /// Merges a free block with its free buddy into a single block of the
    /// next order.
    ///
    /// Returns the merged block, which starts at the lower of the two.
    ///
    /// # Panics
    ///
    /// If the merged block would exceed the largest order, or one of the
    /// buddies is not in the free list of `order`.
    fn merge(&mut self, block: PageId, order: usize) -> PageId {
        assert!(
            order + 1 < MAX_ORDER,
            "cannot merge block {} of the largest order",
            block
        );

        let buddy = match self.buddy_of(block, order) {
            Some(buddy) => buddy,
            None => panic!(
                "tried to merge block {} that is not aligned for order {}",
                block, order
            ),
        };

        self.orders[order].remove(self.pages, block);
        self.orders[order].remove(self.pages, buddy);

        let merged = core::cmp::min(block, buddy);
        self.orders[order + 1].insert(self.pages, merged);

        trace!(
            "Merged block at frame {:#x} into order {}",
            self.frame_of(merged).0,
            order + 1
        );

        merged
    }

    /// Returns whether the block of `order` starting at `block` contains `page`.
    fn covers(&self, block: PageId, order: usize, page: PageId) -> bool {
        let start = self.frame_of(block).0;
        let pfn = self.frame_of(page).0;
        pfn >= start && pfn - start < pages_per_block(order)
    }

    /// Returns the page `count` frames after `page`.
    fn offset(&self, page: PageId, count: usize) -> PageId {
        let pfn = self.frame_of(page).0 + count;
        self.translator.page_of(Pfn(pfn))
    }

    fn frame_of(&self, page: PageId) -> Pfn {
        self.translator.frame_of(page)
    }

    /// Returns an iterator over the free blocks of the given order, in
    /// ascending order.
    ///
    /// # Panics
    ///
    /// If `order` is not a valid order.
    pub fn free_list(&self, order: usize) -> Iter<'_> {
        self.orders[order].iter(self.pages)
    }

    /// Counts the pages in all free lists.
    pub fn free_pages(&self) -> usize {
        (0..MAX_ORDER)
            .map(|order| self.free_list(order).count() * pages_per_block(order))
            .sum()
    }

    /// Return a copy of the statistics for this allocator.
    pub fn stats(&self) -> AllocStats {
        self.stats.clone()
    }

    /// Returns a snapshot of all free lists that can be printed using its
    /// [`Display`](fmt::Display) implementation.
    pub fn dump(&self) -> Dump<'_, 'a, T, MAX_ORDER> {
        Dump { alloc: self }
    }

    /// Logs the current state of all free lists on the debug level.
    pub fn dump_state(&self) {
        debug!("BUDDY STATE:");
        for order in 0..MAX_ORDER {
            debug!("{}", OrderLine { alloc: self, order });
        }
    }
}

/// Human readable snapshot of the free lists of a [`BuddyAllocator`].
///
/// Every order is printed on its own line, followed by the frame numbers of
/// its free blocks in hex.
pub struct Dump<'d, 'a, T, const MAX_ORDER: usize> {
    alloc: &'d BuddyAllocator<'a, T, MAX_ORDER>,
}

impl<T: FrameTranslator, const MAX_ORDER: usize> fmt::Display for Dump<'_, '_, T, MAX_ORDER> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BUDDY STATE:")?;
        (0..MAX_ORDER).try_for_each(|order| {
            writeln!(
                f,
                "{}",
                OrderLine {
                    alloc: self.alloc,
                    order
                }
            )
        })
    }
}

struct OrderLine<'d, 'a, T, const MAX_ORDER: usize> {
    alloc: &'d BuddyAllocator<'a, T, MAX_ORDER>,
    order: usize,
}

impl<T: FrameTranslator, const MAX_ORDER: usize> fmt::Display
    for OrderLine<'_, '_, T, MAX_ORDER>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.order)?;
        self.alloc
            .free_list(self.order)
            .try_for_each(|block| write!(f, " {:x}", self.alloc.frame_of(block)))
    }
}
