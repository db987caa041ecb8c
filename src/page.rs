//! Page descriptors and the translation between descriptors and frame numbers.

use bitflags::bitflags;
use core::fmt;

/// Sentinel stored in a link field to mark the end of a free list.
pub(crate) const NIL: usize = usize::MAX;

/// Handle identifying exactly one physical page.
///
/// The handle is the index of the page's descriptor inside the array that
/// was handed to [`BuddyAllocator::init`](crate::BuddyAllocator::init).
/// Since that array is contiguous, the ordering of handles is the ordering
/// of the underlying frame numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub usize);

impl PageId {
    /// Return the raw index of this handle.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A physical frame number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pfn(pub usize);

impl fmt::LowerHex for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

bitflags! {
    /// Per-page state the allocator keeps next to the free link.
    pub struct PageFlags: u8 {
        /// The page was taken out of circulation using `reserve`.
        const RESERVED = 1 << 0;
    }
}

/// The per-page bookkeeping the allocator threads its free lists through.
///
/// The storage for these is owned by the caller, the allocator only
/// borrows it after `init`.
#[derive(Debug, Clone, Copy)]
pub struct PageDescriptor {
    pub(crate) next_free: usize,
    pub(crate) flags: PageFlags,
}

impl PageDescriptor {
    /// A descriptor that is not linked into any list.
    pub const EMPTY: Self = Self {
        next_free: NIL,
        flags: PageFlags::empty(),
    };

    /// Create a new, unlinked page descriptor.
    pub const fn new() -> Self {
        Self::EMPTY
    }

    /// Returns whether this page is currently reserved.
    pub fn is_reserved(&self) -> bool {
        self.flags.contains(PageFlags::RESERVED)
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::EMPTY;
    }
}

impl Default for PageDescriptor {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Translation between page handles and frame numbers, provided by the
/// memory manager.
///
/// Both directions must be total, pure and inverse to each other over the
/// range of pages given to the allocator. The allocator never calls back
/// into itself through these, so implementations must not allocate.
pub trait FrameTranslator {
    /// Return the frame number of the given page.
    fn frame_of(&self, page: PageId) -> Pfn;

    /// Return the page that describes the given frame.
    fn page_of(&self, pfn: Pfn) -> PageId;
}

/// The translator for a descriptor array whose first entry describes
/// frame `base`, and every following entry the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearMap {
    /// The frame described by the first descriptor.
    pub base: Pfn,
}

impl LinearMap {
    /// Create a translator for an array starting at frame `base`.
    pub const fn new(base: Pfn) -> Self {
        Self { base }
    }
}

impl FrameTranslator for LinearMap {
    fn frame_of(&self, page: PageId) -> Pfn {
        Pfn(self.base.0 + page.0)
    }

    fn page_of(&self, pfn: Pfn) -> PageId {
        // frames below `base` are not part of the array, wrapping maps them
        // far out of range so they are never found in a free list
        PageId(pfn.0.wrapping_sub(self.base.0))
    }
}
