//! Intrusive, index-threaded linked list used for the free areas of the
//! buddy allocator.
//!
//! The list itself only stores the index of its head, every further link
//! lives inside the [`PageDescriptor`] of the block's first page. Blocks are
//! kept in ascending order, so two lists with the same content are also
//! structurally equal.

use crate::page::{PageDescriptor, PageId, NIL};

/// Sorted free list of blocks of a single order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeList {
    head: usize,
}

impl FreeList {
    /// An empty list.
    pub const EMPTY: Self = Self { head: NIL };

    /// Create a new, empty `FreeList`.
    pub const fn new() -> Self {
        Self::EMPTY
    }

    /// Returns whether this list is empty.
    pub fn is_empty(&self) -> bool {
        self.head == NIL
    }

    /// Returns the first (lowest) block of this list.
    pub fn head(&self) -> Option<PageId> {
        link(self.head)
    }

    /// Insert `block` so the list stays in ascending order.
    ///
    /// Returns the position the block ended up at, `0` being the head.
    /// The position is informational only, the allocator does not keep it
    /// around since any later split or merge shifts it.
    /// The block must not already be part of this list; this is only
    /// verified in debug builds.
    pub fn insert(&mut self, pages: &mut [PageDescriptor], block: PageId) -> usize {
        let mut prev = NIL;
        let mut cur = self.head;
        let mut pos = 0;

        while cur != NIL && cur < block.0 {
            prev = cur;
            cur = pages[cur].next_free;
            pos += 1;
        }

        debug_assert!(cur != block.0, "block {} is already in the free list", block);

        pages[block.0].next_free = cur;
        if prev == NIL {
            self.head = block.0;
        } else {
            pages[prev].next_free = block.0;
        }
        pos
    }

    /// Remove `block` from this list.
    ///
    /// # Panics
    ///
    /// If the block is not part of this list. This means the free areas are
    /// corrupted, so continuing would hand out memory that is still in use.
    pub fn remove(&mut self, pages: &mut [PageDescriptor], block: PageId) {
        let mut prev = NIL;
        let mut cur = self.head;

        while cur != NIL && cur != block.0 {
            prev = cur;
            cur = pages[cur].next_free;
        }

        assert!(
            cur == block.0,
            "tried to remove block {} that is not in the free list",
            block
        );

        let next = pages[cur].next_free;
        if prev == NIL {
            self.head = next;
        } else {
            pages[prev].next_free = next;
        }
        pages[cur].next_free = NIL;
    }

    /// Returns whether `block` is part of this list.
    ///
    /// There is no per-page membership bit, so this walks the list and
    /// costs `O(len)`. The walk stops early once it passed `block`.
    pub fn contains(&self, pages: &[PageDescriptor], block: PageId) -> bool {
        self.iter(pages)
            .take_while(|&cur| cur <= block)
            .any(|cur| cur == block)
    }

    /// Returns an iterator over the blocks of this list in ascending order.
    pub fn iter<'list>(&self, pages: &'list [PageDescriptor]) -> Iter<'list> {
        Iter {
            pages,
            next: self.head,
        }
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::EMPTY
    }
}

fn link(idx: usize) -> Option<PageId> {
    if idx == NIL {
        None
    } else {
        Some(PageId(idx))
    }
}

/// Iterator over the blocks of a [`FreeList`].
pub struct Iter<'list> {
    pages: &'list [PageDescriptor],
    next: usize,
}

impl Iterator for Iter<'_> {
    type Item = PageId;

    fn next(&mut self) -> Option<Self::Item> {
        let item = link(self.next)?;
        self.next = self.pages[item.0].next_free;
        Some(item)
    }
}
